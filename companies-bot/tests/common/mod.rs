#![allow(dead_code)]

use std::sync::Arc;

use companies_bot::config::{Config, Settings, SpecialRoles};
use companies_bot::event::Event;
use companies_bot::model::{ChannelId, Company, MessageId, RoleId, UserId};
use companies_bot::platform::memory::SentMessage;
use companies_bot::platform::{MemoryPlatform, Platform};
use companies_bot::store::Store;
use companies_bot::Bot;

pub const CHECK: &str = "✅";
pub const CROSS: &str = "❌";

pub struct Harness {
    pub platform: Arc<MemoryPlatform>,
    pub store: Arc<Store>,
    pub settings: Arc<Settings>,
    pub bot: Bot,
    pub roles: SpecialRoles,
    pub faction_staff: RoleId,
    pub faction_member: RoleId,
    pub apply: ChannelId,
    pub requests: ChannelId,
    pub commands: ChannelId,
    pub watch: ChannelId,
    pub approver: UserId,
    pub admin: UserId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryPlatform::new()), Arc::new(Store::open_memory().unwrap()))
    }

    pub fn with_store(platform: Arc<MemoryPlatform>, store: Arc<Store>) -> Self {
        let role = |name: &str| platform.role_named(name).unwrap_or_else(|| platform.add_role(name));
        let roles = SpecialRoles {
            connect_to_voice: role("voice staff"),
            approve_companies: role("approver"),
            view_voice_channels: role("voice viewer"),
            view_voice_channels_2: role("voice viewer 2"),
            governor: role("governor"),
            console: role("console"),
            pending: role("pending"),
            freshly_joined: role("freshly joined"),
        };
        let faction_staff = role("empire staff");
        let faction_member = role("empire member");

        let text = |name: &str| {
            platform
                .channel_named(name)
                .map(|c| c.id)
                .unwrap_or_else(|| platform.add_text_channel(None, name))
        };
        let apply = text("company-apply");
        let commands = text("commands");
        let watch = text("username-watch");
        let requests = platform
            .channel_named("requests")
            .map(|c| c.id)
            .unwrap_or_else(|| platform.add_category("requests"));

        let raw = format!(
            r#"
[roles]
connect_to_voice = {}
approve_companies = {}
view_voice_channels = {}
view_voice_channels_2 = {}
governor = {}
console = {}
pending = {}
freshly_joined = {}

[channels]
company_apply_channel = {apply}
user_command_channel = {commands}

[survey]
category = {requests}
questions = ["Why?", "Who?", "How many?"]
first_message = "Welcome! React to cancel."
last_message = "Thanks, staff will review."

[[company_channels]]
name = "{{tag}}-chat"
kind = "text"

[[company_channels]]
name = "{{tag}}-voice"
kind = "voice"

[[company_channels]]
name = "annunci-{{tag}}"
kind = "text"
admin = true

[factions.Empire]
emoji = "E"
staff_role = {faction_staff}
member_role = {faction_member}

[username]
regex = "(?i)admin"
channel = {watch}
"#,
            roles.connect_to_voice,
            roles.approve_companies,
            roles.view_voice_channels,
            roles.view_voice_channels_2,
            roles.governor,
            roles.console,
            roles.pending,
            roles.freshly_joined,
        );
        let settings = Arc::new(Settings::new(Config::from_toml(&raw).unwrap()).unwrap());

        let approver = platform.add_user("staffer");
        platform.grant(approver, roles.approve_companies);
        let admin = platform.add_user("boss");
        platform.set_admin(admin);

        let dyn_platform: Arc<dyn Platform> = platform.clone();
        let bot = Bot::new(dyn_platform, store.clone(), settings.clone()).unwrap();

        Self {
            platform,
            store,
            settings,
            bot,
            roles,
            faction_staff,
            faction_member,
            apply,
            requests,
            commands,
            watch,
            approver,
            admin,
        }
    }

    /// A plain guild member without a company.
    pub fn user(&self, name: &str) -> UserId {
        let id = self.platform.add_user(name);
        self.platform.grant(id, self.roles.pending);
        id
    }

    pub async fn say(&self, channel: ChannelId, author: UserId, text: &str) {
        self.bot
            .handle(&Event::MessageCreated {
                channel,
                author,
                text: text.to_string(),
            })
            .await
            .unwrap();
    }

    pub async fn command(&self, author: UserId, text: &str) -> SentMessage {
        self.say(self.commands, author, text).await;
        self.last_in(self.commands)
    }

    pub async fn react(&self, channel: ChannelId, message: MessageId, user: UserId, emoji: &str) {
        self.bot
            .handle(&Event::ReactionAdded {
                channel: Some(channel),
                message,
                user,
                emoji: emoji.to_string(),
            })
            .await
            .unwrap();
    }

    pub async fn react_direct(&self, message: MessageId, user: UserId, emoji: &str) {
        self.bot
            .handle(&Event::ReactionAdded {
                channel: None,
                message,
                user,
                emoji: emoji.to_string(),
            })
            .await
            .unwrap();
    }

    pub fn last_in(&self, channel: ChannelId) -> SentMessage {
        self.platform.messages_in(channel).pop().expect("no message in channel")
    }

    pub fn last_direct(&self, user: UserId) -> SentMessage {
        self.platform.direct_messages(user).pop().expect("no direct message")
    }

    pub fn survey_channel(&self, requester: UserId) -> ChannelId {
        self.store
            .request_for(requester)
            .unwrap()
            .expect("no request")
            .survey_channel
    }

    /// Open a request and answer every question. Returns the survey
    /// channel and the approval message.
    pub async fn submit(&self, requester: UserId, name: &str, tag: &str) -> (ChannelId, MessageId) {
        self.say(self.commands, requester, &format!("!create-company \"{name}\" {tag}"))
            .await;
        let channel = self.survey_channel(requester);
        for answer in ["Because", "Friends", "Ten"] {
            self.say(channel, requester, answer).await;
        }
        let message = self
            .store
            .request_for(requester)
            .unwrap()
            .and_then(|r| r.approval_message)
            .expect("no approval message");
        (channel, message)
    }

    /// Run the whole creation flow and approve it.
    pub async fn found(&self, requester: UserId, name: &str, tag: &str) -> Company {
        let (channel, message) = self.submit(requester, name, tag).await;
        self.react(channel, message, self.approver, CHECK).await;
        let company = self.store.company(name).unwrap().expect("company not created");
        self.assert_links_match_roles();
        company
    }

    /// Found a company with a governor, a console and a plain member.
    pub async fn staffed(&self, name: &str, tag: &str) -> (Company, UserId, UserId, UserId) {
        let governor = self.user(&format!("{tag}-gov"));
        let company = self.found(governor, name, tag).await;
        let console = self.user(&format!("{tag}-console"));
        let member = self.user(&format!("{tag}-member"));
        self.command(self.admin, &format!("!set-console \"{name}\" <@{console}>")).await;
        self.command(self.admin, &format!("!force-recruit \"{name}\" <@{member}>")).await;
        self.assert_links_match_roles();
        (company, governor, console, member)
    }

    /// A member is linked to a company exactly when they hold that
    /// company's role.
    pub fn assert_links_match_roles(&self) {
        let companies = self.store.list_companies().unwrap();
        for user in self.platform.users() {
            let linked = self.store.company_of(user).unwrap();
            let held: Vec<&str> = companies
                .iter()
                .filter(|c| self.platform.has_role(user, c.role))
                .map(|c| c.name.as_str())
                .collect();
            let expected: Vec<&str> = linked.as_deref().into_iter().collect();
            assert_eq!(held, expected, "company link and roles disagree for {user}");
        }
    }
}
