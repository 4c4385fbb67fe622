//! Chat command parsing.
//!
//! Commands are `<prefix><name> <args...>`. Arguments are split on
//! whitespace; double quotes group a multi-word company name. Members are
//! given as mentions (`<@id>`, `<@!id>`) or raw ids.

use crate::model::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ── User commands ──────────────────────────────────────────────────
    CreateCompany { name: String, tag: String },
    ListMembers,
    Recruit { user: UserId },
    LeaveCompany,
    Kick { user: UserId },
    Help,

    // ── Admin commands ─────────────────────────────────────────────────
    DeleteCompany { company: String },
    ListCompanies,
    SetFaction { company: String, faction: String },
    KickFromFaction { company: String },
    ForceRecruit { company: String, user: UserId },
    ForceKick { user: UserId },
    SetGovernor { company: String, user: UserId },
    SetConsole { company: String, user: UserId },
    NotifyCompanies { title: String, message: String },
    MemberList { company: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not a command this bot knows.
    Unknown,
    /// Known command, bad arguments. Carries the usage line.
    Usage(&'static str),
}

/// Name, usage line and description of every command.
pub const USER_COMMANDS: &[(&str, &str, &str)] = &[
    ("create-company", "create-company <name> <tag>", "Request a new company"),
    ("members", "members", "List the members of your company"),
    ("recruit", "recruit <@member>", "Invite a member to your company (staff)"),
    ("leave-company", "leave-company", "Leave your company"),
    ("kick", "kick <@member>", "Expel a member from your company (staff)"),
    ("help", "help", "Show this list"),
];

pub const ADMIN_COMMANDS: &[(&str, &str, &str)] = &[
    ("company-delete", "company-delete <company>", "Delete a company and its resources"),
    ("company-list", "company-list", "List every company"),
    ("set-faction", "set-faction <company> <faction>", "Affiliate a company with a faction"),
    ("kick-from-faction", "kick-from-faction <company>", "Remove a company from its faction"),
    ("force-recruit", "force-recruit <company> <@member>", "Add a member to a company"),
    ("force-kick", "force-kick <@member>", "Remove a member from their company"),
    ("set-governor", "set-governor <company> <@member>", "Make a member the company governor"),
    ("set-console", "set-console <company> <@member>", "Make a member a company console"),
    ("companies-notify", "companies-notify <title> | <message>", "Broadcast to every company"),
    ("member-list", "member-list <company>", "Show a company roster"),
];

fn usage(name: &str) -> Option<&'static str> {
    USER_COMMANDS
        .iter()
        .chain(ADMIN_COMMANDS)
        .find(|(n, _, _)| *n == name)
        .map(|(_, u, _)| *u)
}

impl Command {
    /// Parse a message. Returns `None` if it doesn't start with `prefix`.
    pub fn parse(text: &str, prefix: &str) -> Option<Result<Command, ParseError>> {
        let body = text.trim().strip_prefix(prefix)?;
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return None;
        }
        let name = name.to_lowercase();
        Some(match Self::parse_args(&name, rest) {
            Some(cmd) => Ok(cmd),
            None => Err(usage(&name).map_or(ParseError::Unknown, ParseError::Usage)),
        })
    }

    fn parse_args(name: &str, rest: &str) -> Option<Command> {
        if name == "companies-notify" {
            let (title, message) = rest.split_once('|')?;
            let (title, message) = (title.trim(), message.trim());
            if title.is_empty() || message.is_empty() {
                return None;
            }
            return Some(Command::NotifyCompanies {
                title: title.to_string(),
                message: message.to_string(),
            });
        }

        let args = tokenize(rest);
        let cmd = match (name, args.as_slice()) {
            ("create-company", [name, tag]) => Command::CreateCompany {
                name: name.clone(),
                tag: tag.clone(),
            },
            ("members", []) => Command::ListMembers,
            ("recruit", [user]) => Command::Recruit { user: parse_user(user)? },
            ("leave-company", []) => Command::LeaveCompany,
            ("kick", [user]) => Command::Kick { user: parse_user(user)? },
            ("help", _) => Command::Help,

            ("company-delete", [company]) => Command::DeleteCompany {
                company: company.clone(),
            },
            ("company-list", []) => Command::ListCompanies,
            ("set-faction", [company, faction]) => Command::SetFaction {
                company: company.clone(),
                faction: faction.clone(),
            },
            ("kick-from-faction", [company]) => Command::KickFromFaction {
                company: company.clone(),
            },
            ("force-recruit", [company, user]) => Command::ForceRecruit {
                company: company.clone(),
                user: parse_user(user)?,
            },
            ("force-kick", [user]) => Command::ForceKick { user: parse_user(user)? },
            ("set-governor", [company, user]) => Command::SetGovernor {
                company: company.clone(),
                user: parse_user(user)?,
            },
            ("set-console", [company, user]) => Command::SetConsole {
                company: company.clone(),
                user: parse_user(user)?,
            },
            ("member-list", [company]) => Command::MemberList {
                company: company.clone(),
            },
            _ => return None,
        };
        Some(cmd)
    }

    pub fn is_admin(&self) -> bool {
        !matches!(
            self,
            Command::CreateCompany { .. }
                | Command::ListMembers
                | Command::Recruit { .. }
                | Command::LeaveCompany
                | Command::Kick { .. }
                | Command::Help
        )
    }
}

/// Split on whitespace, keeping double-quoted runs together.
fn tokenize(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;
    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    out.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        out.push(current);
    }
    out
}

fn parse_user(arg: &str) -> Option<UserId> {
    let raw = arg
        .strip_prefix("<@")
        .and_then(|s| s.strip_suffix('>'))
        .map(|s| s.trim_start_matches('!'))
        .unwrap_or(arg);
    raw.parse::<u64>().ok().map(UserId)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Command, ParseError> {
        Command::parse(text, "!").unwrap()
    }

    #[test]
    fn ignores_text_without_prefix() {
        assert!(Command::parse("hello there", "!").is_none());
        assert!(Command::parse("!", "!").is_none());
    }

    #[test]
    fn quoted_names_stay_together() {
        assert_eq!(
            parse(r#"!create-company "Acme Corp" ACM"#),
            Ok(Command::CreateCompany {
                name: "Acme Corp".into(),
                tag: "ACM".into()
            })
        );
    }

    #[test]
    fn mentions_and_raw_ids_resolve() {
        assert_eq!(parse("!kick <@42>"), Ok(Command::Kick { user: UserId(42) }));
        assert_eq!(parse("!kick <@!42>"), Ok(Command::Kick { user: UserId(42) }));
        assert_eq!(
            parse("!set-governor Acme 42"),
            Ok(Command::SetGovernor {
                company: "Acme".into(),
                user: UserId(42)
            })
        );
    }

    #[test]
    fn bad_arguments_report_usage() {
        assert_eq!(
            parse("!create-company Acme"),
            Err(ParseError::Usage("create-company <name> <tag>"))
        );
        assert_eq!(parse("!kick bob"), Err(ParseError::Usage("kick <@member>")));
        assert_eq!(parse("!dance"), Err(ParseError::Unknown));
    }

    #[test]
    fn notify_splits_on_pipe() {
        assert_eq!(
            parse("!companies-notify War | Gather at dawn, all of you"),
            Ok(Command::NotifyCompanies {
                title: "War".into(),
                message: "Gather at dawn, all of you".into()
            })
        );
        assert!(parse("!companies-notify no separator").is_err());
    }

    #[test]
    fn admin_split() {
        assert!(!parse("!members").unwrap().is_admin());
        assert!(parse("!company-list").unwrap().is_admin());
    }

    #[test]
    fn empty_quotes_make_an_empty_argument() {
        assert_eq!(tokenize(r#""" ACM"#), vec![String::new(), "ACM".to_string()]);
    }
}
