//! Event dispatch and chat commands.
//!
//! [`Bot`] owns every component and routes platform events to them:
//! messages become commands or survey answers, reactions become approval
//! decisions or invitation replies, and guild joins/leaves keep the
//! registry tidy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::approval::{ApprovalController, ReactionOutcome};
use crate::command::{Command, ParseError, ADMIN_COMMANDS, USER_COMMANDS};
use crate::config::Settings;
use crate::error::{Error, ErrorKind, Result};
use crate::event::Event;
use crate::faction::FactionEngine;
use crate::membership::{MembershipEngine, RemoveOptions, Roster};
use crate::model::{ChannelId, MessageId, UserId};
use crate::platform::{ChannelKind, MemberView, Outgoing, Platform, PlatformError, Tone};
use crate::store::Store;

/// How long a non-admin waits between two creation requests.
pub const CREATE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// An open recruitment invitation, keyed by the DM message id.
#[derive(Debug, Clone)]
struct Invitation {
    company: String,
    invitee: UserId,
}

pub struct Bot {
    platform: Arc<dyn Platform>,
    store: Arc<Store>,
    settings: Arc<Settings>,
    membership: Arc<MembershipEngine>,
    factions: FactionEngine,
    approvals: ApprovalController,
    invitations: Mutex<HashMap<MessageId, Invitation>>,
    cooldowns: Mutex<HashMap<UserId, Instant>>,
}

impl Bot {
    pub fn new(platform: Arc<dyn Platform>, store: Arc<Store>, settings: Arc<Settings>) -> Result<Self> {
        let membership = Arc::new(MembershipEngine::new(
            platform.clone(),
            store.clone(),
            settings.clone(),
        ));
        let factions = FactionEngine::new(platform.clone(), store.clone(), settings.clone());
        let approvals =
            ApprovalController::new(platform.clone(), store.clone(), settings.clone(), membership.clone())?;
        Ok(Self {
            platform,
            store,
            settings,
            membership,
            factions,
            approvals,
            invitations: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn approvals(&self) -> &ApprovalController {
        &self.approvals
    }

    pub fn membership(&self) -> &MembershipEngine {
        &self.membership
    }

    pub fn factions(&self) -> &FactionEngine {
        &self.factions
    }

    pub async fn handle(&self, event: &Event) -> Result<()> {
        match event {
            Event::MessageCreated { channel, author, text } => self.on_message(*channel, *author, text).await,
            Event::ReactionAdded {
                channel: Some(channel),
                message,
                user,
                emoji,
            } => self.on_reaction(*channel, *message, *user, emoji).await,
            Event::ReactionAdded {
                channel: None,
                message,
                user,
                emoji,
            } => self.on_invitation_reaction(*message, *user, emoji).await,
            Event::MemberJoined { user } => self.on_member_joined(*user).await,
            Event::MemberRemoved { user } => {
                if self.store.delete_member(*user)? {
                    tracing::info!(member = %user, "Removed departed member from registry");
                }
                self.invitations.lock().retain(|_, inv| inv.invitee != *user);
                Ok(())
            }
        }
    }

    // ── Events ─────────────────────────────────────────────────────────

    async fn on_message(&self, channel: ChannelId, author: UserId, text: &str) -> Result<()> {
        let Some(author) = self.platform.member(author).await? else {
            return Ok(());
        };
        if author.is_bot {
            return Ok(());
        }
        match Command::parse(text, &self.settings.config.prefix) {
            None | Some(Err(ParseError::Unknown)) => self.approvals.on_message(channel, &author).await,
            Some(parsed) => self.on_command(channel, &author, parsed).await,
        }
    }

    async fn on_reaction(&self, channel: ChannelId, message: MessageId, user: UserId, emoji: &str) -> Result<()> {
        let Some(reactor) = self.platform.member(user).await? else {
            return Ok(());
        };
        match self.approvals.on_reaction(channel, message, &reactor, emoji).await? {
            ReactionOutcome::Ignored => {}
            ReactionOutcome::Approved(company) => {
                tracing::debug!(company = %company.name, "Approval handled");
            }
            ReactionOutcome::Rejected { requester } => {
                tracing::debug!(%requester, "Rejection handled");
            }
            ReactionOutcome::Aborted { requester } => {
                tracing::debug!(requester = ?requester, "Abort handled");
            }
        }
        Ok(())
    }

    async fn on_invitation_reaction(&self, message: MessageId, user: UserId, emoji: &str) -> Result<()> {
        let accept = self.settings.is_check(emoji);
        if !accept && !self.settings.is_cross(emoji) {
            return Ok(());
        }
        let invitation = {
            let mut open = self.invitations.lock();
            match open.get(&message) {
                Some(inv) if inv.invitee == user => open.remove(&message),
                _ => None,
            }
        };
        let Some(invitation) = invitation else {
            return Ok(());
        };

        if !accept {
            let text = self.settings.message("join_company_abort", &[]);
            self.direct(user, Outgoing::toned(Tone::Error, text).with_title("Invitation declined"))
                .await;
            return Ok(());
        }

        let joined = match self.platform.member(user).await? {
            Some(view) => self.membership.add_to_company(&view, &invitation.company).await,
            None => Err(Error::MemberNotFound(user.to_string())),
        };
        match joined {
            Ok(company) => {
                tracing::info!(member = %user, company = %company.name, "Invitation accepted");
                let text = self.settings.message("join_company_success", &[]);
                self.direct(user, Outgoing::toned(Tone::Success, text).with_title("Invitation accepted"))
                    .await;
            }
            Err(e) => {
                tracing::warn!(member = %user, company = %invitation.company, error = %e, "Invitation could not be honoured");
                let key = match &e {
                    Error::AlreadyInCompany(_) => "already_in_company",
                    Error::RequestOpen(_) => "request_pending",
                    other => other.message_key(),
                };
                let text = self.settings.message(key, &[]);
                self.direct(user, Outgoing::toned(Tone::Error, text)).await;
            }
        }
        Ok(())
    }

    async fn on_member_joined(&self, user: UserId) -> Result<()> {
        let Some(member) = self.platform.member(user).await? else {
            return Ok(());
        };
        if !self.settings.username_flagged(&member.display_name) {
            return Ok(());
        }
        tracing::info!(member = %user, name = %member.display_name, "Flagged username joined");
        if let Some(channel) = self.settings.config.username.channel {
            let text = self.settings.message("username_warn", &[("member", &member.mention())]);
            self.platform
                .send_message(channel, &Outgoing::toned(Tone::Notice, text))
                .await?;
        }
        Ok(())
    }

    // ── Commands ───────────────────────────────────────────────────────

    /// User commands are restricted to the user command channel unless the
    /// author is an administrator.
    fn accepts_user_commands(&self, channel: ChannelId, author: &MemberView) -> bool {
        author.is_admin
            || self
                .settings
                .config
                .channels
                .user_command_channel
                .is_none_or(|allowed| allowed == channel)
    }

    async fn on_command(
        &self,
        channel: ChannelId,
        author: &MemberView,
        parsed: std::result::Result<Command, ParseError>,
    ) -> Result<()> {
        let command = match parsed {
            Ok(command) => command,
            Err(ParseError::Usage(usage)) => {
                if !self.accepts_user_commands(channel, author) {
                    return Ok(());
                }
                let cmd = format!("{}{usage}", self.settings.config.prefix);
                return self.reply(channel, self.failure("incorrect_command_usage", &[("cmd", &cmd)])).await;
            }
            Err(ParseError::Unknown) => return Ok(()),
        };

        if command.is_admin() {
            if !author.is_admin {
                return self.reply(channel, self.failure("no_permissions", &[])).await;
            }
        } else if !self.accepts_user_commands(channel, author) {
            return Ok(());
        }

        tracing::debug!(author = %author.id, ?command, "Command");
        let reply = match self.execute(author, command).await {
            Ok(reply) => reply,
            Err(e) => {
                match e.kind() {
                    ErrorKind::ResourceUnavailable | ErrorKind::PermissionDenied => {
                        tracing::error!(author = %author.id, error = %e, "Command failed")
                    }
                    _ => tracing::debug!(author = %author.id, error = %e, "Command refused"),
                }
                self.failure(e.message_key(), &[])
            }
        };
        self.reply(channel, reply).await
    }

    async fn execute(&self, author: &MemberView, command: Command) -> Result<Outgoing> {
        match command {
            Command::CreateCompany { name, tag } => self.create_company(author, &name, &tag).await,
            Command::ListMembers => {
                let company = self.store.company_of(author.id)?.ok_or(Error::NotInCompany)?;
                if !self.settings.tier_of(author).is_staff() {
                    return Err(Error::NotCompanyStaff);
                }
                let roster = self.membership.roster(&company).await?;
                Ok(roster_message(&company, &roster))
            }
            Command::Recruit { user } => self.recruit(author, user).await,
            Command::LeaveCompany => {
                self.membership.leave(author).await?;
                Ok(self.success("leave_company_success", &[]))
            }
            Command::Kick { user } => {
                let target = self.membership.resolve(user).await?;
                let company = match self.membership.kick(author, &target).await {
                    Err(Error::CannotRemoveGovernor) => {
                        return Ok(self.failure("governor_cannot_be_expelled", &[]));
                    }
                    other => other?,
                };
                self.notify_expelled(target.id, &company).await;
                Ok(self.success("expel_success", &[]))
            }
            Command::Help => Ok(self.help(author)),

            Command::DeleteCompany { company } => {
                self.delete_company(&company).await?;
                Ok(self.success("company_delete_success", &[]))
            }
            Command::ListCompanies => {
                let lines: Vec<String> = self
                    .store
                    .list_companies()?
                    .into_iter()
                    .map(|c| match c.faction {
                        Some(faction) => format!("- {} [{}] ({faction})", c.name, c.tag),
                        None => format!("- {} [{}]", c.name, c.tag),
                    })
                    .collect();
                Ok(Outgoing::toned(Tone::Notice, lines.join("\n")).with_title("Companies"))
            }
            Command::SetFaction { company, faction } => {
                let report = self.factions.set_faction(&company, &faction).await?;
                let mut reply = self.success("set_faction_success", &[]);
                if !report.failed.is_empty() {
                    reply = reply.with_field("Failed", report.failed.len().to_string());
                }
                Ok(reply)
            }
            Command::KickFromFaction { company } => {
                let report = self.factions.clear_faction(&company).await?;
                let mut reply = self.success("kick_from_faction_success", &[]);
                if !report.failed.is_empty() {
                    reply = reply.with_field("Failed", report.failed.len().to_string());
                }
                Ok(reply)
            }
            Command::ForceRecruit { company, user } => {
                let target = self.membership.resolve(user).await?;
                self.membership.add_to_company(&target, &company).await?;
                Ok(self.success("force_recruit_success", &[]))
            }
            Command::ForceKick { user } => {
                let target = self.membership.resolve(user).await?;
                let company = self
                    .membership
                    .remove_from_company(&target, RemoveOptions::force())
                    .await?;
                self.notify_expelled(target.id, &company).await;
                Ok(self.success("expel_success", &[]))
            }
            Command::SetGovernor { company, user } => {
                let target = self.membership.resolve(user).await?;
                self.membership.set_governor(&company, &target).await?;
                Ok(self.success("set_governor_success", &[]))
            }
            Command::SetConsole { company, user } => {
                let target = self.membership.resolve(user).await?;
                self.membership.set_console(&company, &target).await?;
                Ok(self.success("set_console_success", &[]))
            }
            Command::NotifyCompanies { title, message } => {
                let sent = self.notify_companies(&title, &message).await?;
                tracing::info!(%title, channels = sent, "Companies notified");
                Ok(self.success("companies_notify_success", &[]))
            }
            Command::MemberList { company } => {
                let company = self
                    .store
                    .company(&company)?
                    .ok_or_else(|| Error::CompanyNotFound(company.clone()))?;
                let roster = self.membership.roster(&company.name).await?;
                Ok(roster_message(&company.name, &roster))
            }
        }
    }

    async fn create_company(&self, author: &MemberView, name: &str, tag: &str) -> Result<Outgoing> {
        if !author.is_admin {
            if let Some(left) = self.cooldown_left(author.id) {
                let secs = left.as_secs().max(1).to_string();
                return Ok(self.failure("cooldown", &[("time", &secs)]));
            }
        }
        let channel = match self.approvals.begin_request(author, name, tag).await {
            Err(Error::AlreadyInCompany(_)) => return Ok(self.failure("already_in_company", &[])),
            other => other?,
        };
        if !author.is_admin {
            self.cooldowns.lock().insert(author.id, Instant::now());
        }
        let mention = format!("<#{channel}>");
        Ok(self.success("company_apply_success", &[("channel", &mention)]))
    }

    fn cooldown_left(&self, user: UserId) -> Option<Duration> {
        let mut cooldowns = self.cooldowns.lock();
        cooldowns.retain(|_, started| started.elapsed() < CREATE_COOLDOWN);
        let started = *cooldowns.get(&user)?;
        CREATE_COOLDOWN.checked_sub(started.elapsed()).filter(|d| !d.is_zero())
    }

    /// Users currently waiting out the creation cooldown.
    pub fn cooling_down(&self) -> usize {
        self.cooldowns.lock().len()
    }

    /// Recruitment invitations still waiting for an answer.
    pub fn open_invitations(&self) -> usize {
        self.invitations.lock().len()
    }

    async fn recruit(&self, author: &MemberView, user: UserId) -> Result<Outgoing> {
        let company = self.store.company_of(author.id)?.ok_or(Error::NotInCompany)?;
        if !self.settings.tier_of(author).is_staff() {
            return Err(Error::NotCompanyStaff);
        }
        let target = self.membership.resolve(user).await?;
        if let Some(current) = self.store.company_of(target.id)? {
            return Err(Error::AlreadyInCompany(current));
        }
        if self.store.request_for(target.id)?.is_some() {
            return Err(Error::RequestOpen(target.id));
        }

        let emoji = &self.settings.config.emoji;
        let text = self.settings.message(
            "recruit_embed_content",
            &[("check", emoji.check.as_str()), ("cross", emoji.cross.as_str())],
        );
        let invite = Outgoing::toned(Tone::Notice, text)
            .with_title(self.settings.message("recruit_embed_title", &[]))
            .with_field("Company", &company);
        let message = match self.platform.send_direct(target.id, &invite).await {
            Ok(id) => id,
            Err(PlatformError::Forbidden(_)) => return Ok(self.failure("dm_disabled", &[])),
            Err(e) => return Err(e.into()),
        };
        self.platform.add_reaction(message, &emoji.check).await?;
        self.platform.add_reaction(message, &emoji.cross).await?;
        self.invitations.lock().insert(
            message,
            Invitation {
                company: company.clone(),
                invitee: target.id,
            },
        );
        tracing::info!(%company, by = %author.id, invitee = %target.id, "Invitation sent");
        Ok(self.success("invite_success", &[]))
    }

    /// Delete a company: every member is force-removed, then its role,
    /// channels, category and registry row go.
    pub async fn delete_company(&self, name: &str) -> Result<()> {
        let company = self
            .store
            .company(name)?
            .ok_or_else(|| Error::CompanyNotFound(name.to_string()))?;

        for id in self.store.company_members(&company.name)? {
            let Some(member) = self.platform.member(id).await? else {
                tracing::warn!(member = %id, company = %company.name, "Member cannot be found in current guild");
                continue;
            };
            if let Err(e) = self
                .membership
                .remove_from_company(&member, RemoveOptions::dissolve())
                .await
            {
                tracing::warn!(member = %id, company = %company.name, error = %e, "Failed to remove member");
            }
        }

        tolerate_missing(self.platform.delete_role(company.role).await, "company role")?;
        for channel in self.platform.category_channels(company.category).await? {
            tolerate_missing(self.platform.delete_channel(channel.id).await, "company channel")?;
        }
        tolerate_missing(self.platform.delete_channel(company.category).await, "company category")?;

        self.store.delete_company(&company.name)?;
        self.invitations
            .lock()
            .retain(|_, inv| !inv.company.eq_ignore_ascii_case(&company.name));
        tracing::info!(company = %company.name, "Company deleted");
        Ok(())
    }

    /// Post a notice to every company's notification channel. Returns how
    /// many channels received it.
    pub async fn notify_companies(&self, title: &str, message: &str) -> Result<usize> {
        let prefix = self
            .settings
            .config
            .notify
            .channel_name
            .to_lowercase()
            .replace(' ', "-");
        let notice = Outgoing::toned(Tone::Notice, message).with_title(title);
        let mut sent = 0;
        for company in self.store.list_companies()? {
            let channels = match self.platform.category_channels(company.category).await {
                Ok(channels) => channels,
                Err(e) => {
                    tracing::warn!(company = %company.name, error = %e, "Can't list company channels");
                    continue;
                }
            };
            for channel in channels
                .iter()
                .filter(|c| c.kind == ChannelKind::Text && c.name.starts_with(&prefix))
            {
                match self.platform.send_message(channel.id, &notice).await {
                    Ok(_) => sent += 1,
                    Err(e) => tracing::warn!(company = %company.name, channel = %channel.id, error = %e, "Notification failed"),
                }
            }
        }
        Ok(sent)
    }

    fn help(&self, author: &MemberView) -> Outgoing {
        let prefix = &self.settings.config.prefix;
        let render = |commands: &[(&str, &str, &str)]| {
            commands
                .iter()
                .map(|(_, usage, description)| format!("`{prefix}{usage}` - {description}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let mut out = Outgoing::toned(Tone::Notice, render(USER_COMMANDS)).with_title("Company commands");
        if author.is_admin {
            out = out.with_field("Admin commands", render(ADMIN_COMMANDS));
        }
        out
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn success(&self, key: &str, args: &[(&str, &str)]) -> Outgoing {
        Outgoing::toned(Tone::Success, self.settings.message(key, args))
    }

    fn failure(&self, key: &str, args: &[(&str, &str)]) -> Outgoing {
        Outgoing::toned(Tone::Error, self.settings.message(key, args))
    }

    async fn reply(&self, channel: ChannelId, message: Outgoing) -> Result<()> {
        self.platform.send_message(channel, &message).await?;
        Ok(())
    }

    async fn direct(&self, user: UserId, message: Outgoing) {
        if let Err(e) = self.platform.send_direct(user, &message).await {
            tracing::warn!(member = %user, error = %e, "Direct message failed");
        }
    }

    async fn notify_expelled(&self, user: UserId, company: &str) {
        let text = self.settings.message("expel_notify", &[("company", company)]);
        self.direct(user, Outgoing::toned(Tone::Error, text).with_title("Expelled"))
            .await;
    }
}

fn tolerate_missing(result: std::result::Result<(), PlatformError>, what: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(PlatformError::NotFound(detail)) => {
            tracing::warn!(%detail, "{what} already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn roster_message(company: &str, roster: &Roster) -> Outgoing {
    let list = |names: &[String], empty: &str| {
        if names.is_empty() {
            empty.to_string()
        } else {
            names.iter().map(|n| format!("- {n}")).collect::<Vec<_>>().join("\n")
        }
    };
    Outgoing::toned(Tone::Notice, String::new())
        .with_title(format!("Members of {company}"))
        .with_field("Governor", list(&roster.governors, "No governor"))
        .with_field("Consoles", list(&roster.consoles, "No consoles"))
        .with_field("Members", list(&roster.members, "No members"))
}
