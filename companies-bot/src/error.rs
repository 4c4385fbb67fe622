//! Error types for company lifecycle operations.
//!
//! Every failure carries an [`ErrorKind`] so command handlers can decide how
//! to surface it, and a message key into the configured `[messages]` table.

use crate::model::UserId;
use crate::platform::PlatformError;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    ResourceUnavailable,
    PermissionDenied,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("company {0:?} does not exist")]
    CompanyNotFound(String),
    #[error("no creation request for {0}")]
    RequestNotFound(String),
    #[error("member {0} not found")]
    MemberNotFound(String),
    #[error("faction {0:?} is not configured")]
    FactionNotFound(String),

    #[error("a company or request named {0:?} already exists")]
    DuplicateName(String),
    #[error("tag {0:?} is already in use")]
    DuplicateTag(String),
    #[error("a creation request is already pending for {0}")]
    DuplicateRequest(String),
    #[error("company {0:?} already belongs to a faction")]
    AlreadyAffiliated(String),
    #[error("member already belongs to company {0:?}")]
    AlreadyInCompany(String),
    #[error("member {0} has an open company request")]
    RequestOpen(UserId),
    #[error("member is already a governor")]
    AlreadyGovernor,
    #[error("member is already a console")]
    AlreadyConsole,
    #[error("member belongs to {actual:?}, not {requested:?}")]
    CompanyMismatch { requested: String, actual: String },

    #[error("member is not in a company")]
    NotInCompany,
    #[error("the governor cannot leave or be removed from their company")]
    CannotRemoveGovernor,
    #[error("company {0:?} is not in a faction")]
    NotAffiliated(String),
    #[error("tag {0:?} must be at most 4 characters")]
    InvalidTag(String),
    #[error("company name {0:?} must be at most 50 characters")]
    InvalidName(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("only company staff can do this")]
    NotCompanyStaff,
    #[error("only the governor can expel a console")]
    CannotKickConsole,
    #[error("member is not in your company")]
    NotInYourCompany,

    #[error("role of company {0:?} no longer exists")]
    RoleResourceMissing(String),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CompanyNotFound(_)
            | Error::RequestNotFound(_)
            | Error::MemberNotFound(_)
            | Error::FactionNotFound(_) => ErrorKind::NotFound,

            Error::DuplicateName(_)
            | Error::DuplicateTag(_)
            | Error::DuplicateRequest(_)
            | Error::AlreadyAffiliated(_)
            | Error::AlreadyInCompany(_)
            | Error::RequestOpen(_)
            | Error::AlreadyGovernor
            | Error::AlreadyConsole
            | Error::CompanyMismatch { .. } => ErrorKind::Conflict,

            Error::NotInCompany
            | Error::CannotRemoveGovernor
            | Error::NotAffiliated(_)
            | Error::InvalidTag(_)
            | Error::InvalidName(_)
            | Error::NotConfigured(_)
            | Error::NotCompanyStaff
            | Error::CannotKickConsole
            | Error::NotInYourCompany => ErrorKind::InvalidState,

            Error::RoleResourceMissing(_) | Error::Storage(_) => ErrorKind::ResourceUnavailable,
            Error::Platform(PlatformError::Forbidden(_)) => ErrorKind::PermissionDenied,
            Error::Platform(_) => ErrorKind::ResourceUnavailable,
        }
    }

    /// Key of the user-facing message in the `[messages]` config table.
    pub fn message_key(&self) -> &'static str {
        match self {
            Error::CompanyNotFound(_) => "company_not_exists",
            Error::RequestNotFound(_) => "request_not_found",
            Error::MemberNotFound(_) => "no_longer_in_server",
            Error::FactionNotFound(_) => "faction_not_exists",
            Error::DuplicateName(_) => "company_already_exists",
            Error::DuplicateTag(_) => "tag_already_exists",
            Error::DuplicateRequest(_) => "request_pending",
            Error::AlreadyAffiliated(_) => "already_in_faction",
            Error::AlreadyInCompany(_) => "member_already_in_company",
            Error::RequestOpen(_) => "member_has_request",
            Error::AlreadyGovernor => "already_governor",
            Error::AlreadyConsole => "already_console",
            Error::CompanyMismatch { .. } => "promote_mismatch",
            Error::NotInCompany => "not_in_company",
            Error::CannotRemoveGovernor => "governor_cannot_leave",
            Error::NotAffiliated(_) => "not_in_faction",
            Error::InvalidTag(_) => "tag_invalid",
            Error::InvalidName(_) => "name_invalid",
            Error::NotConfigured(_) => "not_configured",
            Error::NotCompanyStaff => "only_company_staff",
            Error::CannotKickConsole => "expel_console_error",
            Error::NotInYourCompany => "member_not_in_your_company",
            Error::RoleResourceMissing(_) => "role_error",
            Error::Platform(_) | Error::Storage(_) => "internal_error",
        }
    }
}
