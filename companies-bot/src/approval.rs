//! Company creation requests: survey, staff decision, provisioning.
//!
//! A request moves through `surveying → awaiting approval → approved |
//! rejected`. The decision is taken at most once per approval message:
//! the message id is claimed from the pending set before the first await,
//! so two approvers reacting at the same time cannot both provision.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Settings, MAX_NAME_LEN, MAX_TAG_LEN};
use crate::error::{Error, Result};
use crate::membership::MembershipEngine;
use crate::model::{company_nickname, ChannelId, Company, CompanyRequest, MessageId, NewCompany, RoleId, UserId};
use crate::platform::{ChannelKind, MemberView, Outgoing, Platform, Tone};
use crate::provision;
use crate::store::Store;
use crate::survey::{SurveyStep, SurveyTracker};

/// What a reaction in the survey category led to.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactionOutcome {
    Ignored,
    Approved(Company),
    Rejected { requester: UserId },
    /// A survey was cancelled before it reached the approval stage.
    Aborted { requester: Option<UserId> },
}

pub struct ApprovalController {
    platform: Arc<dyn Platform>,
    store: Arc<Store>,
    settings: Arc<Settings>,
    membership: Arc<MembershipEngine>,
    surveys: Mutex<SurveyTracker>,
    /// Approval messages still open for a decision.
    pending: Mutex<HashSet<MessageId>>,
}

/// Platform resources created by one provisioning run.
#[derive(Default)]
struct Provisioned {
    role: Option<RoleId>,
    granted: bool,
    category: Option<ChannelId>,
}

impl ApprovalController {
    /// Build the controller, re-arming approval messages left open by a
    /// previous run.
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<Store>,
        settings: Arc<Settings>,
        membership: Arc<MembershipEngine>,
    ) -> Result<Self> {
        let pending: HashSet<MessageId> = store.pending_approval_messages()?.into_iter().collect();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Restored pending approval messages");
        }
        let surveys = Mutex::new(SurveyTracker::new(settings.questions().to_vec()));
        Ok(Self {
            platform,
            store,
            settings,
            membership,
            surveys,
            pending: Mutex::new(pending),
        })
    }

    pub fn pending_approvals(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.pending.lock().iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_surveying(&self, channel: ChannelId) -> bool {
        self.surveys.lock().is_tracked(channel)
    }

    async fn survey_category(&self) -> Result<ChannelId> {
        let category = self
            .settings
            .config
            .survey
            .category
            .ok_or(Error::NotConfigured("survey category"))?;
        match self.platform.channel(category).await? {
            Some(info) if info.kind == ChannelKind::Category => Ok(category),
            _ => Err(Error::NotConfigured("survey category")),
        }
    }

    // ── Survey ─────────────────────────────────────────────────────────

    /// Open a creation request for `requester`. Returns the survey channel.
    pub async fn begin_request(&self, requester: &MemberView, name: &str, tag: &str) -> Result<ChannelId> {
        if self.settings.config.channels.company_apply_channel.is_none() {
            return Err(Error::NotConfigured("company apply channel"));
        }
        let category = self.survey_category().await?;
        if tag.is_empty() || tag.chars().count() > MAX_TAG_LEN {
            return Err(Error::InvalidTag(tag.to_string()));
        }
        if name.trim().is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(Error::InvalidName(name.to_string()));
        }
        if let Some(company) = self.store.company_of(requester.id)? {
            return Err(Error::AlreadyInCompany(company));
        }
        if self.store.request_for(requester.id)?.is_some() {
            return Err(Error::DuplicateRequest(requester.id.to_string()));
        }
        if self.store.name_taken(name, true)? {
            return Err(Error::DuplicateName(name.to_string()));
        }
        if self.store.tag_taken(tag)? {
            return Err(Error::DuplicateTag(tag.to_string()));
        }

        let channel = self
            .platform
            .create_channel(
                category,
                &format!("request-{}", requester.display_name),
                ChannelKind::Text,
                &provision::survey_overwrites(requester.id),
            )
            .await?;

        // The checks above raced with other requests; the insert is the
        // authoritative one.
        if let Err(e) = self.store.create_request(requester.id, name, tag, channel) {
            self.discard_channel(channel).await;
            return Err(e);
        }
        self.surveys.lock().start(channel);

        if let Err(e) = self.open_survey(channel, requester).await {
            tracing::error!(%channel, requester = %requester.id, error = %e, "Failed to open survey");
            self.surveys.lock().abort(channel);
            self.store.delete_request(requester.id)?;
            self.discard_channel(channel).await;
            return Err(e);
        }
        tracing::info!(%channel, requester = %requester.id, %name, %tag, "Company request opened");
        Ok(channel)
    }

    async fn open_survey(&self, channel: ChannelId, requester: &MemberView) -> Result<()> {
        let survey = &self.settings.config.survey;
        self.platform
            .send_message(channel, &Outgoing::plain(requester.mention()))
            .await?;
        if !survey.first_message.is_empty() {
            let intro = self
                .platform
                .send_message(channel, &Outgoing::toned(Tone::Survey, &survey.first_message))
                .await?;
            self.platform
                .add_reaction(intro, &self.settings.config.emoji.cross)
                .await?;
        }
        if let Some(question) = self.settings.questions().first() {
            self.platform
                .send_message(channel, &Outgoing::toned(Tone::Survey, question))
                .await?;
        }
        Ok(())
    }

    /// Feed a message posted in `channel` to the survey.
    pub async fn on_message(&self, channel: ChannelId, author: &MemberView) -> Result<()> {
        if author.is_bot {
            return Ok(());
        }
        let step = self
            .surveys
            .lock()
            .advance(channel, self.settings.is_approver(author));
        match step {
            SurveyStep::Ignored => Ok(()),
            SurveyStep::Ask(question) => {
                self.platform
                    .send_message(channel, &Outgoing::toned(Tone::Survey, question))
                    .await?;
                Ok(())
            }
            SurveyStep::Complete => self.submit_for_approval(channel).await,
        }
    }

    async fn submit_for_approval(&self, channel: ChannelId) -> Result<()> {
        let Some(request) = self.store.request_by_channel(channel)? else {
            tracing::warn!(%channel, "Survey finished without a stored request");
            return Ok(());
        };
        let config = &self.settings.config;

        if !config.survey.last_message.is_empty() {
            self.platform
                .send_message(channel, &Outgoing::toned(Tone::Survey, &config.survey.last_message))
                .await?;
        }

        let summary = Outgoing::toned(Tone::Notice, format!("<@{}>", request.requester))
            .with_title("Company request")
            .with_field("Name", &request.name)
            .with_field("Tag", &request.tag);
        let message = self.platform.send_message(channel, &summary).await?;
        self.store.set_approval_message(request.requester, message)?;
        self.pending.lock().insert(message);

        self.platform.add_reaction(message, &config.emoji.check).await?;
        self.platform.add_reaction(message, &config.emoji.cross).await?;

        if let Some(apply) = config.channels.company_apply_channel {
            let text = self
                .settings
                .message("company_apply_done", &[("channel", &format!("<#{channel}>"))]);
            if let Err(e) = self.platform.send_message(apply, &Outgoing::plain(text)).await {
                tracing::warn!(%apply, error = %e, "Can't notify the apply channel");
            }
        }
        tracing::info!(%channel, requester = %request.requester, %message, "Request awaiting approval");
        Ok(())
    }

    // ── Decision ───────────────────────────────────────────────────────

    /// Handle a reaction on `message` in `channel`.
    pub async fn on_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        reactor: &MemberView,
        emoji: &str,
    ) -> Result<ReactionOutcome> {
        let check = self.settings.is_check(emoji);
        let cross = self.settings.is_cross(emoji);
        if reactor.is_bot || !(check || cross) {
            return Ok(ReactionOutcome::Ignored);
        }
        let Some(category) = self.settings.config.survey.category else {
            return Ok(ReactionOutcome::Ignored);
        };
        match self.platform.channel(channel).await? {
            Some(info) if info.category == Some(category) => {}
            _ => return Ok(ReactionOutcome::Ignored),
        }

        let approver = self.settings.is_approver(reactor);
        if approver && self.claim(message) {
            let Some(request) = self.store.request_by_message(message)? else {
                tracing::warn!(%message, "Approval message has no stored request");
                return Ok(ReactionOutcome::Ignored);
            };
            return if check {
                self.approve(request, reactor).await.map(ReactionOutcome::Approved)
            } else {
                self.reject(request, reactor).await
            };
        }
        if cross {
            return self.abort_survey(channel, reactor, approver).await;
        }
        Ok(ReactionOutcome::Ignored)
    }

    /// Remove `message` from the pending set. Only the caller that removed
    /// it may act on it.
    fn claim(&self, message: MessageId) -> bool {
        self.pending.lock().remove(&message)
    }

    async fn approve(&self, request: CompanyRequest, approver: &MemberView) -> Result<Company> {
        let approval = request.approval_message;
        let mut created = Provisioned::default();
        let result = self.provision(&request, &mut created).await;
        match &result {
            Ok(company) => {
                tracing::info!(company = %company.name, tag = %company.tag, approver = %approver.id, "Company approved");
                self.notify_requester(request.requester, "company_creation_success", Tone::Success)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    requester = %request.requester,
                    name = %request.name,
                    error = %e,
                    "Company provisioning failed"
                );
                self.roll_back(&request, created).await;
                self.report_failure(&request, e).await;
                // Open for a manual decision again: approve once more or reject.
                if let Some(message) = approval {
                    self.pending.lock().insert(message);
                }
            }
        }
        result
    }

    async fn provision(&self, request: &CompanyRequest, created: &mut Provisioned) -> Result<Company> {
        let roles = self.settings.roles();
        let requester = self.membership.resolve(request.requester).await?;
        // The requester may have been recruited since the survey started.
        if let Some(current) = self.store.company_of(requester.id)? {
            return Err(Error::AlreadyInCompany(current));
        }

        let role = self.platform.create_role(&request.name).await?;
        created.role = Some(role);
        created.granted = true;
        self.platform
            .add_roles(requester.id, &[role, roles.governor, roles.freshly_joined])
            .await?;
        self.platform.remove_roles(requester.id, &[roles.pending]).await?;
        self.membership
            .rename(
                &requester,
                Some(company_nickname(&request.tag, &requester.display_name).as_str()),
            )
            .await;

        let category = self.platform.create_category(&request.name).await?;
        created.category = Some(category);
        provision::create_company_channels(self.platform.as_ref(), &self.settings, category, role, &request.tag)
            .await?;

        let company = self.store.create_company(&NewCompany {
            name: request.name.clone(),
            tag: request.tag.clone(),
            category,
            role,
            governor: requester.id,
        })?;

        // Committed: what follows is cleanup and must not undo the company.
        self.discard_channel(request.survey_channel).await;
        if let Err(e) = self.store.delete_request(request.requester) {
            tracing::warn!(requester = %request.requester, error = %e, "Can't delete approved request");
        }
        Ok(company)
    }

    /// Best-effort removal of what a failed provisioning run created.
    async fn roll_back(&self, request: &CompanyRequest, created: Provisioned) {
        let roles = self.settings.roles();
        if created.granted {
            let revoke = [roles.governor, roles.freshly_joined];
            if let Err(e) = self.platform.remove_roles(request.requester, &revoke).await {
                tracing::warn!(requester = %request.requester, error = %e, "Can't revoke requester roles");
            }
            if let Err(e) = self.platform.add_roles(request.requester, &[roles.pending]).await {
                tracing::warn!(requester = %request.requester, error = %e, "Can't restore pending role");
            }
            if let Ok(Some(view)) = self.platform.member(request.requester).await {
                self.membership.rename(&view, None).await;
            }
        }
        if let Some(category) = created.category {
            match self.platform.category_channels(category).await {
                Ok(channels) => {
                    for channel in channels {
                        self.discard_channel(channel.id).await;
                    }
                }
                Err(e) => tracing::warn!(%category, error = %e, "Can't list channels to roll back"),
            }
            self.discard_channel(category).await;
        }
        if let Some(role) = created.role {
            if let Err(e) = self.platform.delete_role(role).await {
                tracing::warn!(%role, error = %e, "Can't delete role of failed company");
            }
        }
    }

    async fn report_failure(&self, request: &CompanyRequest, error: &Error) {
        let reason = self.settings.message(error.message_key(), &[]);
        let text = self.settings.message("company_creation_error", &[("reason", &reason)]);
        let notice = Outgoing::toned(Tone::Error, text).with_title("Company creation failed");
        if let Err(e) = self.platform.send_message(request.survey_channel, &notice).await {
            tracing::warn!(channel = %request.survey_channel, error = %e, "Can't report provisioning failure");
        }
    }

    async fn reject(&self, request: CompanyRequest, approver: &MemberView) -> Result<ReactionOutcome> {
        self.store.delete_request(request.requester)?;
        self.discard_channel(request.survey_channel).await;
        self.notify_requester(request.requester, "company_creation_failure", Tone::Error)
            .await;
        tracing::info!(requester = %request.requester, name = %request.name, approver = %approver.id, "Company rejected");
        Ok(ReactionOutcome::Rejected {
            requester: request.requester,
        })
    }

    /// Cancel a survey that has not reached the approval stage. Allowed
    /// for approvers and for the requester.
    async fn abort_survey(&self, channel: ChannelId, reactor: &MemberView, approver: bool) -> Result<ReactionOutcome> {
        let request = self.store.request_by_channel(channel)?;
        if let Some(req) = &request {
            if req.approval_message.is_some() {
                return Ok(ReactionOutcome::Ignored);
            }
            if !approver && req.requester != reactor.id {
                return Ok(ReactionOutcome::Ignored);
            }
        } else if !approver {
            return Ok(ReactionOutcome::Ignored);
        }

        let tracked = self.surveys.lock().abort(channel);
        if !tracked && request.is_none() {
            return Ok(ReactionOutcome::Ignored);
        }
        let requester = self.store.delete_request_by_channel(channel)?;
        self.discard_channel(channel).await;
        tracing::info!(%channel, requester = ?requester, by = %reactor.id, "Survey aborted");
        Ok(ReactionOutcome::Aborted { requester })
    }

    async fn discard_channel(&self, channel: ChannelId) {
        if let Err(e) = self.platform.delete_channel(channel).await {
            tracing::warn!(%channel, error = %e, "Can't delete survey channel");
        }
    }

    async fn notify_requester(&self, requester: UserId, key: &str, tone: Tone) {
        let text = self.settings.message(key, &[]);
        if let Err(e) = self.platform.send_direct(requester, &Outgoing::toned(tone, text)).await {
            tracing::warn!(%requester, error = %e, "Can't notify requester");
        }
    }
}
