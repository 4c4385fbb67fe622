//! Faction affiliation of companies.
//!
//! Setting or clearing a faction rewrites roles for every member of the
//! company. Per-member failures are logged and the batch continues; the
//! registry is updated regardless, and re-running the command converges.

use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::model::{Company, UserId};
use crate::platform::Platform;
use crate::store::Store;

/// Outcome of a bulk faction change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactionReport {
    pub updated: Vec<UserId>,
    pub failed: Vec<UserId>,
}

pub struct FactionEngine {
    platform: Arc<dyn Platform>,
    store: Arc<Store>,
    settings: Arc<Settings>,
}

impl FactionEngine {
    pub fn new(platform: Arc<dyn Platform>, store: Arc<Store>, settings: Arc<Settings>) -> Self {
        Self {
            platform,
            store,
            settings,
        }
    }

    fn company(&self, name: &str) -> Result<Company> {
        self.store
            .company(name)?
            .ok_or_else(|| Error::CompanyNotFound(name.to_string()))
    }

    pub async fn set_faction(&self, company: &str, faction: &str) -> Result<FactionReport> {
        let roles = self
            .settings
            .faction(faction)
            .ok_or_else(|| Error::FactionNotFound(faction.to_string()))?;
        let company = self.company(company)?;
        if company.faction.is_some() {
            return Err(Error::AlreadyAffiliated(company.name));
        }

        let mut report = FactionReport::default();
        for id in self.store.company_members(&company.name)? {
            let outcome = match self.platform.member(id).await {
                Ok(Some(view)) => {
                    let role = if self.settings.tier_of(&view).is_staff() {
                        roles.staff_role
                    } else {
                        roles.member_role
                    };
                    self.platform.add_roles(id, &[role]).await.map_err(Error::from)
                }
                Ok(None) => Err(Error::MemberNotFound(id.to_string())),
                Err(e) => Err(e.into()),
            };
            record(&mut report, id, outcome, "grant faction role");
        }

        let label = format!("{} - {}", roles.emoji, company.name);
        self.rename_category(&company, &label).await;

        self.store.set_faction(&company.name, Some(faction))?;
        tracing::info!(company = %company.name, %faction, failed = report.failed.len(), "Faction set");
        Ok(report)
    }

    pub async fn clear_faction(&self, company: &str) -> Result<FactionReport> {
        let company = self.company(company)?;
        let Some(faction) = company.faction.clone() else {
            return Err(Error::NotAffiliated(company.name));
        };

        let mut report = FactionReport::default();
        match self.settings.faction(&faction) {
            Some(roles) => {
                let strip = [roles.staff_role, roles.member_role];
                for id in self.store.company_members(&company.name)? {
                    let outcome = self.platform.remove_roles(id, &strip).await.map_err(Error::from);
                    record(&mut report, id, outcome, "strip faction roles");
                }
            }
            None => {
                tracing::warn!(%faction, company = %company.name, "Faction no longer configured, only clearing the registry");
            }
        }

        self.rename_category(&company, &company.name).await;

        self.store.set_faction(&company.name, None)?;
        tracing::info!(company = %company.name, %faction, failed = report.failed.len(), "Faction cleared");
        Ok(report)
    }

    async fn rename_category(&self, company: &Company, name: &str) {
        if let Err(e) = self.platform.rename_channel(company.category, name).await {
            tracing::warn!(company = %company.name, category = %company.category, error = %e, "Can't rename company category");
        }
    }
}

fn record(report: &mut FactionReport, id: UserId, outcome: Result<()>, action: &str) {
    match outcome {
        Ok(()) => report.updated.push(id),
        Err(e) => {
            tracing::warn!(member = %id, error = %e, "Failed to {action}");
            report.failed.push(id);
        }
    }
}
