//! The community platform as seen by the bot.
//!
//! Everything the core needs from the chat service goes through the
//! [`Platform`] trait: role and channel primitives, role grants, nicknames,
//! messages and reactions. Every call is a fallible remote operation.
//!
//! - `memory`: in-process implementation used by tests and `simulate`

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{ChannelId, MessageId, RoleId, UserId};

pub use memory::MemoryPlatform;

/// Failure of a platform call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The referenced member, role, channel or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The platform refused the call (missing permission, role hierarchy).
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Transport failure or outage.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewChannel,
    ReadMessages,
    SendMessages,
    MentionEveryone,
    AddReactions,
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteTarget {
    Everyone,
    Role(RoleId),
    Member(UserId),
}

/// Per-channel permission override for one role or member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overwrite {
    pub target: OverwriteTarget,
    pub allow: Vec<Permission>,
    pub deny: Vec<Permission>,
}

impl Overwrite {
    pub fn new(target: OverwriteTarget) -> Self {
        Self {
            target,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    pub fn allow(mut self, perms: &[Permission]) -> Self {
        self.allow.extend_from_slice(perms);
        self
    }

    pub fn deny(mut self, perms: &[Permission]) -> Self {
        self.deny.extend_from_slice(perms);
        self
    }

    pub fn allows(&self, perm: Permission) -> bool {
        self.allow.contains(&perm)
    }

    pub fn denies(&self, perm: Permission) -> bool {
        self.deny.contains(&perm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    /// Parent category, if any.
    pub category: Option<ChannelId>,
}

/// Snapshot of a guild member at the time of the lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub id: UserId,
    pub display_name: String,
    pub roles: HashSet<RoleId>,
    pub is_bot: bool,
    /// Owners can't be renamed by anyone, so nickname edits are skipped.
    pub is_owner: bool,
    pub is_admin: bool,
}

impl MemberView {
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// How a message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Plain,
    Success,
    Error,
    Survey,
    Notice,
}

/// A platform-neutral outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outgoing {
    pub tone: Tone,
    pub title: Option<String>,
    pub text: String,
    /// Named fields (rendered as embed fields where supported).
    pub fields: Vec<(String, String)>,
}

impl Outgoing {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::toned(Tone::Plain, text)
    }

    pub fn toned(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            title: None,
            text: text.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Primitives consumed from the community platform.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn member(&self, user: UserId) -> PlatformResult<Option<MemberView>>;
    async fn role_exists(&self, role: RoleId) -> PlatformResult<bool>;
    async fn channel(&self, channel: ChannelId) -> PlatformResult<Option<ChannelInfo>>;

    async fn create_role(&self, name: &str) -> PlatformResult<RoleId>;
    async fn delete_role(&self, role: RoleId) -> PlatformResult<()>;

    async fn create_category(&self, name: &str) -> PlatformResult<ChannelId>;
    async fn create_channel(
        &self,
        category: ChannelId,
        name: &str,
        kind: ChannelKind,
        overwrites: &[Overwrite],
    ) -> PlatformResult<ChannelId>;
    async fn rename_channel(&self, channel: ChannelId, name: &str) -> PlatformResult<()>;
    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()>;
    async fn category_channels(&self, category: ChannelId) -> PlatformResult<Vec<ChannelInfo>>;

    async fn add_roles(&self, user: UserId, roles: &[RoleId]) -> PlatformResult<()>;
    async fn remove_roles(&self, user: UserId, roles: &[RoleId]) -> PlatformResult<()>;
    /// `None` clears the nickname override.
    async fn set_nickname(&self, user: UserId, nickname: Option<&str>) -> PlatformResult<()>;

    async fn send_message(&self, channel: ChannelId, message: &Outgoing) -> PlatformResult<MessageId>;
    async fn send_direct(&self, user: UserId, message: &Outgoing) -> PlatformResult<MessageId>;
    async fn add_reaction(&self, message: MessageId, emoji: &str) -> PlatformResult<()>;
}
