//! Bot configuration.
//!
//! The config file is TOML. It is parsed once into [`Config`], checked
//! against the platform, and frozen into a [`Settings`] snapshot that every
//! component receives at construction.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::model::{ChannelId, RoleId, Tier};
use crate::platform::{MemberView, Platform};

/// Default command prefix.
pub const DEFAULT_PREFIX: &str = "!";
/// Default database path.
pub const DEFAULT_DATABASE: &str = "companies.db";
/// Maximum length of a company tag.
pub const MAX_TAG_LEN: usize = 4;
pub const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub emoji: EmojiConfig,
    pub roles: SpecialRoles,
    #[serde(default)]
    pub channels: ChannelsConfig,
    pub survey: SurveyConfig,
    #[serde(default)]
    pub company_channels: Vec<ChannelTemplate>,
    #[serde(default)]
    pub factions: BTreeMap<String, FactionConfig>,
    #[serde(default)]
    pub username: UsernameConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub messages: HashMap<String, String>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmojiConfig {
    pub check: String,
    pub cross: String,
}

impl Default for EmojiConfig {
    fn default() -> Self {
        Self {
            check: "✅".to_string(),
            cross: "❌".to_string(),
        }
    }
}

/// Global roles the bot hands out or checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialRoles {
    /// Staff allowed into every company voice channel.
    pub connect_to_voice: RoleId,
    /// Members who may accept or reject creation requests.
    pub approve_companies: RoleId,
    pub view_voice_channels: RoleId,
    pub view_voice_channels_2: RoleId,
    pub governor: RoleId,
    pub console: RoleId,
    /// Marker for members without a company.
    pub pending: RoleId,
    /// Marker for members who recently joined a company.
    pub freshly_joined: RoleId,
}

impl SpecialRoles {
    fn named(&self) -> [(&'static str, RoleId); 8] {
        [
            ("connect_to_voice", self.connect_to_voice),
            ("approve_companies", self.approve_companies),
            ("view_voice_channels", self.view_voice_channels),
            ("view_voice_channels_2", self.view_voice_channels_2),
            ("governor", self.governor),
            ("console", self.console),
            ("pending", self.pending),
            ("freshly_joined", self.freshly_joined),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Staff channel notified when a survey is complete.
    pub company_apply_channel: Option<ChannelId>,
    /// The only channel where user commands are accepted.
    pub user_command_channel: Option<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Category holding the per-request survey channels.
    pub category: Option<ChannelId>,
    pub questions: Vec<String>,
    #[serde(default)]
    pub first_message: String,
    #[serde(default)]
    pub last_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Text,
    Voice,
}

/// A channel created inside every new company category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTemplate {
    /// Channel name; `{tag}` is replaced by the company tag.
    pub name: String,
    pub kind: TemplateKind,
    /// Read-only broadcast channel for the company's rank and file.
    #[serde(default)]
    pub admin: bool,
}

impl ChannelTemplate {
    pub fn render_name(&self, tag: &str) -> String {
        self.name.replace("{tag}", tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactionConfig {
    pub emoji: String,
    pub staff_role: RoleId,
    pub member_role: RoleId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsernameConfig {
    /// Display names matching this pattern trigger a warning on join.
    #[serde(default)]
    pub regex: String,
    pub channel: Option<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Prefix of the per-company channel that receives broadcasts.
    pub channel_name: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_name: "annunci".to_string(),
        }
    }
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Bad config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(raw)?;
        if config.survey.questions.is_empty() {
            anyhow::bail!("[survey] questions must not be empty");
        }
        if !config.username.regex.is_empty() {
            regex::Regex::new(&config.username.regex).context("[username] regex is invalid")?;
        }
        Ok(config)
    }
}

/// Immutable runtime snapshot of the configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    username_pattern: Option<regex::Regex>,
}

impl Settings {
    /// Build the snapshot without touching the platform.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let username_pattern = if config.username.regex.is_empty() {
            None
        } else {
            Some(regex::Regex::new(&config.username.regex).context("[username] regex is invalid")?)
        };
        Ok(Self {
            config,
            username_pattern,
        })
    }

    /// Build the snapshot and check every configured role against the
    /// platform. Missing roles are logged, not fatal.
    pub async fn resolve(config: Config, platform: &dyn Platform) -> anyhow::Result<Self> {
        for (key, role) in config.roles.named() {
            if !platform.role_exists(role).await? {
                tracing::error!(role = %role, "Role {key} is not configured correctly");
            }
        }
        for (faction, roles) in &config.factions {
            if !platform.role_exists(roles.staff_role).await? {
                tracing::error!(%faction, "Staff role of faction {faction} is not configured correctly");
            }
            if !platform.role_exists(roles.member_role).await? {
                tracing::error!(%faction, "Member role of faction {faction} is not configured correctly");
            }
        }
        Self::new(config)
    }

    pub fn roles(&self) -> &SpecialRoles {
        &self.config.roles
    }

    pub fn faction(&self, name: &str) -> Option<&FactionConfig> {
        self.config.factions.get(name)
    }

    pub fn questions(&self) -> &[String] {
        &self.config.survey.questions
    }

    pub fn is_approver(&self, member: &MemberView) -> bool {
        member.has_role(self.config.roles.approve_companies)
    }

    pub fn tier_of(&self, member: &MemberView) -> Tier {
        if member.has_role(self.config.roles.governor) {
            Tier::Governor
        } else if member.has_role(self.config.roles.console) {
            Tier::Console
        } else {
            Tier::Member
        }
    }

    pub fn is_check(&self, emoji: &str) -> bool {
        emoji == self.config.emoji.check
    }

    pub fn is_cross(&self, emoji: &str) -> bool {
        emoji == self.config.emoji.cross
    }

    pub fn username_flagged(&self, display_name: &str) -> bool {
        self.username_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(display_name))
    }

    /// Render a user-facing message. `{name}` placeholders are replaced by
    /// the matching argument.
    pub fn message(&self, key: &str, args: &[(&str, &str)]) -> String {
        let template = self
            .config
            .messages
            .get(key)
            .map(String::as_str)
            .or_else(|| default_message(key))
            .unwrap_or(key);
        let mut out = template.to_string();
        for (name, value) in args {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }
}

fn default_message(key: &str) -> Option<&'static str> {
    let text = match key {
        "company_creation_success" => "Your company has been approved!",
        "company_creation_failure" => "Your company request has been rejected.",
        "company_creation_error" => "Creating the company failed: {reason} React again to retry or reject the request.",
        "company_apply_success" => "Request opened, answer the questions in {channel}.",
        "company_apply_done" => "A company request is ready for review in {channel}.",
        "company_delete_success" => "Company deleted.",
        "company_not_exists" => "That company does not exist.",
        "company_already_exists" => "A company with that name already exists.",
        "tag_already_exists" => "That tag is already taken.",
        "tag_invalid" => "Tags can be at most 4 characters long.",
        "name_invalid" => "Company names can be at most 50 characters long.",
        "request_pending" => "You already have a pending request.",
        "request_not_found" => "No pending request found.",
        "not_configured" => "The bot is not configured yet.",
        "already_in_company" => "You are already in a company.",
        "member_already_in_company" => "That member is already in a company.",
        "member_has_request" => "That member has an open company request.",
        "not_in_company" => "You are not in a company.",
        "member_not_in_your_company" => "That member is not in your company.",
        "only_company_staff" => "Only company staff can do this.",
        "governor_cannot_leave" => "The governor can't leave the company.",
        "governor_cannot_be_expelled" => "The governor can't be expelled.",
        "expel_console_error" => "Only the governor can expel a console.",
        "expel_success" => "Member expelled.",
        "expel_notify" => "You have been expelled from {company}.",
        "leave_company_success" => "You left the company.",
        "invite_success" => "Invitation sent.",
        "dm_disabled" => "That member does not accept direct messages.",
        "recruit_embed_title" => "Company invitation",
        "recruit_embed_content" => "React {check} to accept or {cross} to decline.",
        "join_company_success" => "Welcome to your new company!",
        "join_company_abort" => "Invitation declined.",
        "no_longer_in_server" => "You are no longer in the server.",
        "role_error" => "The company role is missing, contact an administrator.",
        "faction_not_exists" => "That faction does not exist.",
        "already_in_faction" => "That company already belongs to a faction.",
        "not_in_faction" => "That company is not in a faction.",
        "set_faction_success" => "Faction set.",
        "kick_from_faction_success" => "Company removed from its faction.",
        "force_recruit_success" => "Member recruited.",
        "already_governor" => "That member is already a governor.",
        "already_console" => "That member is already a console.",
        "promote_mismatch" => "That member belongs to another company.",
        "set_governor_success" => "Governor set.",
        "set_console_success" => "Console set.",
        "companies_notify_success" => "Notification sent.",
        "no_permissions" => "You don't have permission to do this.",
        "cooldown" => "Try again in {time} seconds.",
        "incorrect_command_usage" => "Usage: {cmd}",
        "username_warn" => "Suspicious username joined: {member}",
        "internal_error" => "Something went wrong, try again later.",
        _ => return None,
    };
    Some(text)
}
