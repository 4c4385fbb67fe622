//! Events delivered by the platform gateway for the bot to handle.
//!
//! The `simulate` subcommand reads them as JSON lines, one event per line.

use serde::{Deserialize, Serialize};

use crate::model::{ChannelId, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A message posted in a guild channel.
    MessageCreated {
        channel: ChannelId,
        author: UserId,
        text: String,
    },

    /// A reaction added to a message. `channel` is `None` in direct
    /// messages (recruitment invitations).
    ReactionAdded {
        #[serde(default)]
        channel: Option<ChannelId>,
        message: MessageId,
        user: UserId,
        emoji: String,
    },

    /// Someone joined the guild.
    MemberJoined {
        user: UserId,
    },

    /// Someone left (or was removed from) the guild.
    MemberRemoved {
        user: UserId,
    },
}

impl Event {
    /// Parse one JSON line.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_json() {
        let ev = Event::from_json(r#"{"type":"message_created","channel":5,"author":7,"text":"!help"}"#).unwrap();
        assert_eq!(
            ev,
            Event::MessageCreated {
                channel: ChannelId(5),
                author: UserId(7),
                text: "!help".into(),
            }
        );
    }

    #[test]
    fn direct_reaction_has_no_channel() {
        let ev = Event::from_json(r#"{"type":"reaction_added","message":9,"user":7,"emoji":"✅"}"#).unwrap();
        assert!(matches!(ev, Event::ReactionAdded { channel: None, .. }));
    }

    #[test]
    fn unknown_event_type_is_an_error() {
        assert!(Event::from_json(r#"{"type":"typing","user":1}"#).is_err());
    }
}
