//! Membership engine: keeps platform roles and registry rows in step when
//! members join, leave, or change tier.
//!
//! A member's company link in the store is set if and only if they hold
//! the company role. Nickname edits are cosmetic: they are attempted,
//! and failures are logged without affecting the outcome.

use std::sync::Arc;

use crate::config::{FactionConfig, Settings};
use crate::error::{Error, Result};
use crate::model::{company_nickname, Company, RoleId, Tier, UserId};
use crate::platform::{MemberView, Platform};
use crate::store::Store;

/// How a member is taken out of their company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Refuse to remove the governor (self-service leave, staff kicks).
    pub prevent_governor_removal: bool,
    /// Clear the member's company link in the store. Left unset when the
    /// whole company row is about to be deleted.
    pub delete_from_registry: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            prevent_governor_removal: true,
            delete_from_registry: true,
        }
    }
}

impl RemoveOptions {
    /// Administrative removal: the governor can be removed too.
    pub fn force() -> Self {
        Self {
            prevent_governor_removal: false,
            delete_from_registry: true,
        }
    }

    /// Removal as part of deleting the whole company.
    pub fn dissolve() -> Self {
        Self {
            prevent_governor_removal: false,
            delete_from_registry: false,
        }
    }
}

/// Company members grouped by tier, by display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    pub governors: Vec<String>,
    pub consoles: Vec<String>,
    pub members: Vec<String>,
}

pub struct MembershipEngine {
    platform: Arc<dyn Platform>,
    store: Arc<Store>,
    settings: Arc<Settings>,
}

impl MembershipEngine {
    pub fn new(platform: Arc<dyn Platform>, store: Arc<Store>, settings: Arc<Settings>) -> Self {
        Self {
            platform,
            store,
            settings,
        }
    }

    /// Look up a guild member, failing with `MemberNotFound` if they left.
    pub async fn resolve(&self, user: UserId) -> Result<MemberView> {
        self.platform
            .member(user)
            .await?
            .ok_or_else(|| Error::MemberNotFound(user.to_string()))
    }

    fn faction_roles(&self, faction: Option<&str>) -> Option<&FactionConfig> {
        let name = faction?;
        let roles = self.settings.faction(name);
        if roles.is_none() {
            tracing::warn!(faction = %name, "Company references a faction that is not configured");
        }
        roles
    }

    /// Set or clear a member's nickname, logging instead of failing.
    pub async fn rename(&self, member: &MemberView, nickname: Option<&str>) {
        if member.is_owner {
            return;
        }
        if let Err(e) = self.platform.set_nickname(member.id, nickname).await {
            tracing::warn!(member = %member.id, error = %e, "Can't modify username of {}", member.display_name);
        }
    }

    /// Make `member` part of `company`.
    pub async fn add_to_company(&self, member: &MemberView, company: &str) -> Result<Company> {
        if let Some(current) = self.store.company_of(member.id)? {
            return Err(Error::AlreadyInCompany(current));
        }
        if self.store.request_for(member.id)?.is_some() {
            return Err(Error::RequestOpen(member.id));
        }
        let company = self
            .store
            .company(company)?
            .ok_or_else(|| Error::CompanyNotFound(company.to_string()))?;
        if !self.platform.role_exists(company.role).await? {
            return Err(Error::RoleResourceMissing(company.name.clone()));
        }

        let roles = self.settings.roles();
        let mut grant = vec![company.role, roles.freshly_joined];
        if let Some(faction) = self.faction_roles(company.faction.as_deref()) {
            grant.push(faction.member_role);
        }
        self.platform.add_roles(member.id, &grant).await?;
        self.platform.remove_roles(member.id, &[roles.pending]).await?;

        let nickname = company_nickname(&company.tag, &member.display_name);
        self.rename(member, Some(nickname.as_str())).await;

        self.store.join_company(member.id, &company.name)?;
        tracing::info!(member = %member.id, company = %company.name, "Member joined company");
        Ok(company)
    }

    /// Take `member` out of their company. Returns the company name.
    pub async fn remove_from_company(&self, member: &MemberView, opts: RemoveOptions) -> Result<String> {
        let company_name = self.store.company_of(member.id)?.ok_or(Error::NotInCompany)?;
        let roles = self.settings.roles();

        if member.has_role(roles.governor) {
            if opts.prevent_governor_removal {
                return Err(Error::CannotRemoveGovernor);
            }
            self.platform.remove_roles(member.id, &[roles.governor]).await?;
        }

        self.store.reset_donations(member.id)?;
        self.rename(member, None).await;

        let mut strip: Vec<RoleId> = vec![roles.freshly_joined, roles.console];
        match self.store.company(&company_name)? {
            Some(company) => {
                if self.platform.role_exists(company.role).await? {
                    strip.push(company.role);
                } else {
                    tracing::warn!(company = %company.name, "Company role is gone, skipping it");
                }
                if let Some(faction) = self.faction_roles(company.faction.as_deref()) {
                    strip.push(faction.staff_role);
                    strip.push(faction.member_role);
                }
            }
            None => tracing::warn!(company = %company_name, "Member linked to a missing company"),
        }
        self.platform.remove_roles(member.id, &strip).await?;
        self.platform.add_roles(member.id, &[roles.pending]).await?;

        if opts.delete_from_registry {
            self.store.leave_company(member.id)?;
        }
        tracing::info!(member = %member.id, company = %company_name, "Member left company");
        Ok(company_name)
    }

    pub async fn set_governor(&self, company: &str, member: &MemberView) -> Result<()> {
        self.promote(company, member, Tier::Governor).await
    }

    pub async fn set_console(&self, company: &str, member: &MemberView) -> Result<()> {
        self.promote(company, member, Tier::Console).await
    }

    async fn promote(&self, company: &str, member: &MemberView, tier: Tier) -> Result<()> {
        let roles = self.settings.roles();
        let (wanted, other, already) = if tier == Tier::Governor {
            (roles.governor, roles.console, Error::AlreadyGovernor)
        } else {
            (roles.console, roles.governor, Error::AlreadyConsole)
        };
        if member.has_role(wanted) {
            return Err(already);
        }

        let company = self
            .store
            .company(company)?
            .ok_or_else(|| Error::CompanyNotFound(company.to_string()))?;
        match self.store.company_of(member.id)? {
            None => {
                self.add_to_company(member, &company.name).await?;
            }
            Some(current) if !current.eq_ignore_ascii_case(&company.name) => {
                return Err(Error::CompanyMismatch {
                    requested: company.name.clone(),
                    actual: current,
                });
            }
            Some(_) => {}
        }

        if tier == Tier::Governor {
            self.demote_other_governors(&company, member.id).await?;
        }

        if member.has_role(other) {
            self.platform.remove_roles(member.id, &[other]).await?;
        }
        self.platform.add_roles(member.id, &[wanted]).await?;
        if let Some(faction) = self.faction_roles(company.faction.as_deref()) {
            self.platform.remove_roles(member.id, &[faction.member_role]).await?;
            self.platform.add_roles(member.id, &[faction.staff_role]).await?;
        }
        tracing::info!(member = %member.id, company = %company.name, %tier, "Member promoted");
        Ok(())
    }

    /// Keep the governor tier exclusive: any other holder in `company`
    /// goes back to plain member.
    async fn demote_other_governors(&self, company: &Company, keep: UserId) -> Result<()> {
        let roles = self.settings.roles();
        for id in self.store.company_members(&company.name)? {
            if id == keep {
                continue;
            }
            let Some(view) = self.platform.member(id).await? else {
                continue;
            };
            if !view.has_role(roles.governor) {
                continue;
            }
            self.platform.remove_roles(id, &[roles.governor]).await?;
            if let Some(faction) = self.faction_roles(company.faction.as_deref()) {
                self.platform.remove_roles(id, &[faction.staff_role]).await?;
                self.platform.add_roles(id, &[faction.member_role]).await?;
            }
            tracing::info!(member = %id, company = %company.name, "Previous governor demoted");
        }
        Ok(())
    }

    /// Self-service departure. The governor has to hand over first.
    pub async fn leave(&self, member: &MemberView) -> Result<String> {
        self.remove_from_company(member, RemoveOptions::default()).await
    }

    /// Staff-initiated removal of `target` from the actor's own company.
    /// Returns the company name.
    pub async fn kick(&self, actor: &MemberView, target: &MemberView) -> Result<String> {
        let company = self.store.company_of(actor.id)?.ok_or(Error::NotInCompany)?;
        let actor_tier = self.settings.tier_of(actor);
        if !actor_tier.is_staff() {
            return Err(Error::NotCompanyStaff);
        }
        if self.store.company_of(target.id)?.as_deref() != Some(company.as_str()) {
            return Err(Error::NotInYourCompany);
        }
        if self.settings.tier_of(target) == Tier::Console && actor_tier != Tier::Governor {
            return Err(Error::CannotKickConsole);
        }
        self.remove_from_company(target, RemoveOptions::default()).await
    }

    /// Members of `company` grouped by tier. Members who left the
    /// community are purged from the store and skipped.
    pub async fn roster(&self, company: &str) -> Result<Roster> {
        let mut roster = Roster::default();
        for id in self.store.company_members(company)? {
            let Some(view) = self.platform.member(id).await? else {
                tracing::warn!(member = %id, "Member cannot be found in current guild");
                self.store.delete_member(id)?;
                continue;
            };
            let name = view.display_name.clone();
            match self.settings.tier_of(&view) {
                Tier::Governor => roster.governors.push(name),
                Tier::Console => roster.consoles.push(name),
                Tier::Member => roster.members.push(name),
            }
        }
        Ok(roster)
    }
}
