//! In-process platform.
//!
//! Keeps guild state (members, roles, channels, messages) in memory. Every
//! async call yields to the scheduler once before touching state, so tasks
//! interleave at the same points they would against a remote service.
//! Used by the integration tests and by the `simulate` subcommand.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ChannelInfo, ChannelKind, MemberView, Outgoing, Overwrite, Platform, PlatformError,
    PlatformResult,
};
use crate::model::{ChannelId, MessageId, RoleId, UserId};

/// Where a recorded message was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Channel(ChannelId),
    Direct(UserId),
}

/// A message sent through the platform.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub id: MessageId,
    pub to: Destination,
    pub message: Outgoing,
    pub reactions: Vec<String>,
}

#[derive(Debug, Clone)]
struct UserRecord {
    name: String,
    nickname: Option<String>,
    roles: HashSet<RoleId>,
    is_bot: bool,
    is_admin: bool,
}

#[derive(Debug, Clone)]
struct ChannelRecord {
    info: ChannelInfo,
    overwrites: Vec<Overwrite>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    owner: Option<UserId>,
    users: HashMap<UserId, UserRecord>,
    roles: BTreeMap<RoleId, String>,
    channels: BTreeMap<ChannelId, ChannelRecord>,
    messages: Vec<SentMessage>,
    locked_nicknames: HashSet<UserId>,
    failing_grants: HashSet<UserId>,
    outage: bool,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_mut(&mut self, user: UserId) -> PlatformResult<&mut UserRecord> {
        self.users
            .get_mut(&user)
            .ok_or_else(|| PlatformError::NotFound(format!("member {user}")))
    }

    fn check_roles(&self, roles: &[RoleId]) -> PlatformResult<()> {
        match roles.iter().find(|r| !self.roles.contains_key(r)) {
            Some(missing) => Err(PlatformError::NotFound(format!("role {missing}"))),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        }
    }

    // ── Setup ──────────────────────────────────────────────────────────

    pub fn add_user(&self, name: &str) -> UserId {
        self.insert_user(name, false)
    }

    pub fn add_bot(&self, name: &str) -> UserId {
        self.insert_user(name, true)
    }

    fn insert_user(&self, name: &str, is_bot: bool) -> UserId {
        let mut st = self.state.lock();
        let id = UserId(st.next());
        st.users.insert(
            id,
            UserRecord {
                name: name.to_string(),
                nickname: None,
                roles: HashSet::new(),
                is_bot,
                is_admin: false,
            },
        );
        id
    }

    /// Register a user under a fixed id (used when replaying recorded events).
    pub fn insert_user_with_id(&self, id: UserId, name: &str) {
        let mut st = self.state.lock();
        st.users.entry(id).or_insert_with(|| UserRecord {
            name: name.to_string(),
            nickname: None,
            roles: HashSet::new(),
            is_bot: false,
            is_admin: false,
        });
    }

    pub fn set_owner(&self, user: UserId) {
        self.state.lock().owner = Some(user);
    }

    pub fn set_admin(&self, user: UserId) {
        if let Some(u) = self.state.lock().users.get_mut(&user) {
            u.is_admin = true;
        }
    }

    pub fn remove_user(&self, user: UserId) {
        self.state.lock().users.remove(&user);
    }

    pub fn add_role(&self, name: &str) -> RoleId {
        let mut st = self.state.lock();
        let id = RoleId(st.next());
        st.roles.insert(id, name.to_string());
        id
    }

    /// Register a role under a fixed id (used when replaying recorded events).
    pub fn insert_role_with_id(&self, id: RoleId, name: &str) {
        self.state.lock().roles.insert(id, name.to_string());
    }

    pub fn delete_role_now(&self, role: RoleId) {
        let mut st = self.state.lock();
        st.roles.remove(&role);
        for u in st.users.values_mut() {
            u.roles.remove(&role);
        }
    }

    pub fn grant(&self, user: UserId, role: RoleId) {
        if let Some(u) = self.state.lock().users.get_mut(&user) {
            u.roles.insert(role);
        }
    }

    pub fn add_category(&self, name: &str) -> ChannelId {
        self.insert_channel(name, ChannelKind::Category, None)
    }

    pub fn add_text_channel(&self, category: Option<ChannelId>, name: &str) -> ChannelId {
        self.insert_channel(name, ChannelKind::Text, category)
    }

    /// Register a channel under a fixed id (used when replaying recorded events).
    pub fn insert_channel_with_id(&self, id: ChannelId, name: &str, kind: ChannelKind) {
        self.state.lock().channels.insert(
            id,
            ChannelRecord {
                info: ChannelInfo {
                    id,
                    name: name.to_string(),
                    kind,
                    category: None,
                },
                overwrites: Vec::new(),
            },
        );
    }

    fn insert_channel(&self, name: &str, kind: ChannelKind, category: Option<ChannelId>) -> ChannelId {
        let mut st = self.state.lock();
        let id = ChannelId(st.next());
        st.channels.insert(
            id,
            ChannelRecord {
                info: ChannelInfo {
                    id,
                    name: name.to_string(),
                    kind,
                    category,
                },
                overwrites: Vec::new(),
            },
        );
        id
    }

    // ── Fault injection ────────────────────────────────────────────────

    /// Nickname edits for `user` fail with `Forbidden`.
    pub fn lock_nickname(&self, user: UserId) {
        self.state.lock().locked_nicknames.insert(user);
    }

    /// Role grants and revocations for `user` fail with `Forbidden`.
    pub fn fail_role_changes(&self, user: UserId) {
        self.state.lock().failing_grants.insert(user);
    }

    pub fn allow_role_changes(&self, user: UserId) {
        self.state.lock().failing_grants.remove(&user);
    }

    /// Every call fails with `Unavailable` while set.
    pub fn set_outage(&self, down: bool) {
        self.state.lock().outage = down;
    }

    // ── Inspection ─────────────────────────────────────────────────────

    pub fn users(&self) -> Vec<UserId> {
        let mut ids: Vec<_> = self.state.lock().users.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn roles_of(&self, user: UserId) -> HashSet<RoleId> {
        self.state
            .lock()
            .users
            .get(&user)
            .map(|u| u.roles.clone())
            .unwrap_or_default()
    }

    pub fn has_role(&self, user: UserId, role: RoleId) -> bool {
        self.roles_of(user).contains(&role)
    }

    pub fn nickname(&self, user: UserId) -> Option<String> {
        self.state
            .lock()
            .users
            .get(&user)
            .and_then(|u| u.nickname.clone())
    }

    pub fn role_named(&self, name: &str) -> Option<RoleId> {
        self.state
            .lock()
            .roles
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    pub fn role_count_named(&self, name: &str) -> usize {
        self.state.lock().roles.values().filter(|n| n.as_str() == name).count()
    }

    pub fn channel_named(&self, name: &str) -> Option<ChannelInfo> {
        self.state
            .lock()
            .channels
            .values()
            .find(|c| c.info.name == name)
            .map(|c| c.info.clone())
    }

    pub fn category_count_named(&self, name: &str) -> usize {
        self.state
            .lock()
            .channels
            .values()
            .filter(|c| c.info.kind == ChannelKind::Category && c.info.name == name)
            .count()
    }

    pub fn channel_exists(&self, channel: ChannelId) -> bool {
        self.state.lock().channels.contains_key(&channel)
    }

    pub fn channel_name(&self, channel: ChannelId) -> Option<String> {
        self.state
            .lock()
            .channels
            .get(&channel)
            .map(|c| c.info.name.clone())
    }

    pub fn overwrites(&self, channel: ChannelId) -> Vec<Overwrite> {
        self.state
            .lock()
            .channels
            .get(&channel)
            .map(|c| c.overwrites.clone())
            .unwrap_or_default()
    }

    pub fn channels_in(&self, category: ChannelId) -> Vec<ChannelInfo> {
        self.state
            .lock()
            .channels
            .values()
            .filter(|c| c.info.category == Some(category))
            .map(|c| c.info.clone())
            .collect()
    }

    pub fn messages_in(&self, channel: ChannelId) -> Vec<SentMessage> {
        self.messages_to(Destination::Channel(channel))
    }

    pub fn direct_messages(&self, user: UserId) -> Vec<SentMessage> {
        self.messages_to(Destination::Direct(user))
    }

    fn messages_to(&self, to: Destination) -> Vec<SentMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.to == to)
            .cloned()
            .collect()
    }

    pub fn all_messages(&self) -> Vec<SentMessage> {
        self.state.lock().messages.clone()
    }

    /// One line per channel and role, for the simulator's report.
    pub fn describe(&self) -> Vec<String> {
        let st = self.state.lock();
        let mut lines = Vec::new();
        for (id, name) in &st.roles {
            lines.push(format!("role {id} {name:?}"));
        }
        for c in st.channels.values() {
            let parent = c.info.category.map(|p| format!(" in {p}")).unwrap_or_default();
            lines.push(format!(
                "{:?} {} {:?}{parent}",
                c.info.kind, c.info.id, c.info.name
            ));
        }
        lines
    }

    async fn suspend(&self) -> PlatformResult<()> {
        tokio::task::yield_now().await;
        if self.state.lock().outage {
            return Err(PlatformError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    fn record(&self, to: Destination, message: &Outgoing) -> MessageId {
        let mut st = self.state.lock();
        let id = MessageId(st.next());
        st.messages.push(SentMessage {
            id,
            to,
            message: message.clone(),
            reactions: Vec::new(),
        });
        id
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn member(&self, user: UserId) -> PlatformResult<Option<MemberView>> {
        self.suspend().await?;
        let st = self.state.lock();
        Ok(st.users.get(&user).map(|u| MemberView {
            id: user,
            display_name: u.nickname.clone().unwrap_or_else(|| u.name.clone()),
            roles: u.roles.clone(),
            is_bot: u.is_bot,
            is_owner: st.owner == Some(user),
            is_admin: u.is_admin,
        }))
    }

    async fn role_exists(&self, role: RoleId) -> PlatformResult<bool> {
        self.suspend().await?;
        Ok(self.state.lock().roles.contains_key(&role))
    }

    async fn channel(&self, channel: ChannelId) -> PlatformResult<Option<ChannelInfo>> {
        self.suspend().await?;
        Ok(self.state.lock().channels.get(&channel).map(|c| c.info.clone()))
    }

    async fn create_role(&self, name: &str) -> PlatformResult<RoleId> {
        self.suspend().await?;
        Ok(self.add_role(name))
    }

    async fn delete_role(&self, role: RoleId) -> PlatformResult<()> {
        self.suspend().await?;
        if !self.state.lock().roles.contains_key(&role) {
            return Err(PlatformError::NotFound(format!("role {role}")));
        }
        self.delete_role_now(role);
        Ok(())
    }

    async fn create_category(&self, name: &str) -> PlatformResult<ChannelId> {
        self.suspend().await?;
        Ok(self.add_category(name))
    }

    async fn create_channel(
        &self,
        category: ChannelId,
        name: &str,
        kind: ChannelKind,
        overwrites: &[Overwrite],
    ) -> PlatformResult<ChannelId> {
        self.suspend().await?;
        let mut st = self.state.lock();
        match st.channels.get(&category) {
            Some(c) if c.info.kind == ChannelKind::Category => {}
            _ => return Err(PlatformError::NotFound(format!("category {category}"))),
        }
        let id = ChannelId(st.next());
        st.channels.insert(
            id,
            ChannelRecord {
                info: ChannelInfo {
                    id,
                    name: name.to_string(),
                    kind,
                    category: Some(category),
                },
                overwrites: overwrites.to_vec(),
            },
        );
        Ok(id)
    }

    async fn rename_channel(&self, channel: ChannelId, name: &str) -> PlatformResult<()> {
        self.suspend().await?;
        let mut st = self.state.lock();
        let ch = st
            .channels
            .get_mut(&channel)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))?;
        ch.info.name = name.to_string();
        Ok(())
    }

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        self.suspend().await?;
        self.state
            .lock()
            .channels
            .remove(&channel)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel}")))
    }

    async fn category_channels(&self, category: ChannelId) -> PlatformResult<Vec<ChannelInfo>> {
        self.suspend().await?;
        Ok(self.channels_in(category))
    }

    async fn add_roles(&self, user: UserId, roles: &[RoleId]) -> PlatformResult<()> {
        self.suspend().await?;
        let mut st = self.state.lock();
        st.check_roles(roles)?;
        if st.failing_grants.contains(&user) {
            return Err(PlatformError::Forbidden(format!("role change for {user}")));
        }
        let u = st.user_mut(user)?;
        u.roles.extend(roles.iter().copied());
        Ok(())
    }

    async fn remove_roles(&self, user: UserId, roles: &[RoleId]) -> PlatformResult<()> {
        self.suspend().await?;
        let mut st = self.state.lock();
        st.check_roles(roles)?;
        if st.failing_grants.contains(&user) {
            return Err(PlatformError::Forbidden(format!("role change for {user}")));
        }
        let u = st.user_mut(user)?;
        for r in roles {
            u.roles.remove(r);
        }
        Ok(())
    }

    async fn set_nickname(&self, user: UserId, nickname: Option<&str>) -> PlatformResult<()> {
        self.suspend().await?;
        let mut st = self.state.lock();
        if st.owner == Some(user) || st.locked_nicknames.contains(&user) {
            return Err(PlatformError::Forbidden(format!("nickname of {user}")));
        }
        let u = st.user_mut(user)?;
        u.nickname = nickname.map(str::to_string);
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, message: &Outgoing) -> PlatformResult<MessageId> {
        self.suspend().await?;
        if !self.channel_exists(channel) {
            return Err(PlatformError::NotFound(format!("channel {channel}")));
        }
        Ok(self.record(Destination::Channel(channel), message))
    }

    async fn send_direct(&self, user: UserId, message: &Outgoing) -> PlatformResult<MessageId> {
        self.suspend().await?;
        if !self.state.lock().users.contains_key(&user) {
            return Err(PlatformError::NotFound(format!("member {user}")));
        }
        Ok(self.record(Destination::Direct(user), message))
    }

    async fn add_reaction(&self, message: MessageId, emoji: &str) -> PlatformResult<()> {
        self.suspend().await?;
        let mut st = self.state.lock();
        let msg = st
            .messages
            .iter_mut()
            .find(|m| m.id == message)
            .ok_or_else(|| PlatformError::NotFound(format!("message {message}")))?;
        msg.reactions.push(emoji.to_string());
        Ok(())
    }
}
