//! Domain types shared by every component: platform identifiers, registry
//! rows, and the staff tier of a company member.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

snowflake!(
    /// A platform user.
    UserId
);
snowflake!(
    /// A platform role.
    RoleId
);
snowflake!(
    /// A text/voice channel or a channel category.
    ChannelId
);
snowflake!(
    /// A message in any channel, direct messages included.
    MessageId
);

/// A persisted community member.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: UserId,
    pub balance: f64,
    pub blacklisted: bool,
    /// Amount donated to the current company. Reset on departure.
    pub company_donations: f64,
    pub company: Option<String>,
}

impl Member {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            balance: 0.0,
            blacklisted: false,
            company_donations: 0.0,
            company: None,
        }
    }
}

/// A committed company.
#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub name: String,
    pub tag: String,
    pub category: ChannelId,
    pub role: RoleId,
    pub faction: Option<String>,
    pub balance: f64,
}

/// Input for committing a freshly approved company.
#[derive(Debug, Clone)]
pub struct NewCompany {
    pub name: String,
    pub tag: String,
    pub category: ChannelId,
    pub role: RoleId,
    pub governor: UserId,
}

/// An in-flight creation request, keyed by its requester.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyRequest {
    pub requester: UserId,
    pub name: String,
    pub tag: String,
    pub survey_channel: ChannelId,
    /// Set once the survey is complete and the summary has been posted.
    pub approval_message: Option<MessageId>,
    pub created_at: String,
}

/// Staff tier of a company member, derived from the global tier roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Governor,
    Console,
    Member,
}

impl Tier {
    pub fn is_staff(self) -> bool {
        matches!(self, Tier::Governor | Tier::Console)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Governor => f.write_str("governor"),
            Tier::Console => f.write_str("console"),
            Tier::Member => f.write_str("member"),
        }
    }
}

/// Display handle given to company members: `"{tag} - {display name}"`.
pub fn company_nickname(tag: &str, display_name: &str) -> String {
    format!("{tag} - {display_name}")
}
