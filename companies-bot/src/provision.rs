//! Channel permission policy and company channel provisioning.
//!
//! The overwrite table is fixed for every company; only the channel list
//! comes from configuration.

use crate::config::{ChannelTemplate, Settings, SpecialRoles, TemplateKind};
use crate::error::Result;
use crate::model::{ChannelId, RoleId, UserId};
use crate::platform::{ChannelKind, Overwrite, OverwriteTarget, Platform};

use crate::platform::Permission::*;

pub fn voice_overwrites(roles: &SpecialRoles, company_role: RoleId) -> Vec<Overwrite> {
    vec![
        Overwrite::new(OverwriteTarget::Everyone).deny(&[Connect, ViewChannel]),
        Overwrite::new(OverwriteTarget::Role(roles.connect_to_voice)).allow(&[Connect, ViewChannel]),
        Overwrite::new(OverwriteTarget::Role(roles.view_voice_channels))
            .allow(&[ViewChannel])
            .deny(&[Connect]),
        Overwrite::new(OverwriteTarget::Role(roles.view_voice_channels_2))
            .allow(&[ViewChannel])
            .deny(&[Connect]),
        Overwrite::new(OverwriteTarget::Role(company_role)).allow(&[Connect, ViewChannel]),
    ]
}

/// Overwrites for a company text channel. `admin` channels are read-only
/// for the company role; only governor and console staff can post.
pub fn text_overwrites(roles: &SpecialRoles, company_role: RoleId, admin: bool) -> Vec<Overwrite> {
    let everyone = Overwrite::new(OverwriteTarget::Everyone).deny(&[ReadMessages, ViewChannel]);
    if admin {
        vec![
            everyone,
            Overwrite::new(OverwriteTarget::Role(roles.governor)).allow(&[SendMessages, MentionEveryone]),
            Overwrite::new(OverwriteTarget::Role(roles.console)).allow(&[SendMessages, MentionEveryone]),
            Overwrite::new(OverwriteTarget::Role(company_role))
                .allow(&[ReadMessages])
                .deny(&[SendMessages]),
        ]
    } else {
        vec![
            everyone,
            Overwrite::new(OverwriteTarget::Role(roles.governor)).allow(&[MentionEveryone]),
            Overwrite::new(OverwriteTarget::Role(roles.console)).allow(&[MentionEveryone]),
            Overwrite::new(OverwriteTarget::Role(company_role)).allow(&[
                ReadMessages,
                SendMessages,
                ViewChannel,
            ]),
        ]
    }
}

/// Private survey channel: hidden from everyone but the requester, and no
/// reactions except the bot's own.
pub fn survey_overwrites(requester: UserId) -> Vec<Overwrite> {
    vec![
        Overwrite::new(OverwriteTarget::Everyone).deny(&[ReadMessages, AddReactions]),
        Overwrite::new(OverwriteTarget::Member(requester)).allow(&[ReadMessages]),
    ]
}

pub fn template_overwrites(template: &ChannelTemplate, roles: &SpecialRoles, company_role: RoleId) -> Vec<Overwrite> {
    match template.kind {
        TemplateKind::Text => text_overwrites(roles, company_role, template.admin),
        TemplateKind::Voice => voice_overwrites(roles, company_role),
    }
}

/// Create every configured company channel under `category`.
pub async fn create_company_channels(
    platform: &dyn Platform,
    settings: &Settings,
    category: ChannelId,
    company_role: RoleId,
    tag: &str,
) -> Result<Vec<ChannelId>> {
    let mut created = Vec::with_capacity(settings.config.company_channels.len());
    for template in &settings.config.company_channels {
        let name = template.render_name(tag);
        let kind = match template.kind {
            TemplateKind::Text => ChannelKind::Text,
            TemplateKind::Voice => ChannelKind::Voice,
        };
        let overwrites = template_overwrites(template, settings.roles(), company_role);
        let id = platform.create_channel(category, &name, kind, &overwrites).await?;
        tracing::debug!(channel = %id, %name, "Created company channel");
        created.push(id);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> SpecialRoles {
        SpecialRoles {
            connect_to_voice: RoleId(1),
            approve_companies: RoleId(2),
            view_voice_channels: RoleId(3),
            view_voice_channels_2: RoleId(4),
            governor: RoleId(5),
            console: RoleId(6),
            pending: RoleId(7),
            freshly_joined: RoleId(8),
        }
    }

    fn for_target(ows: &[Overwrite], target: OverwriteTarget) -> &Overwrite {
        ows.iter().find(|o| o.target == target).unwrap()
    }

    #[test]
    fn everyone_is_locked_out() {
        let company = RoleId(50);
        let voice = voice_overwrites(&roles(), company);
        let everyone = for_target(&voice, OverwriteTarget::Everyone);
        assert!(everyone.denies(ViewChannel) && everyone.denies(Connect));

        let text = text_overwrites(&roles(), company, false);
        let everyone = for_target(&text, OverwriteTarget::Everyone);
        assert!(everyone.denies(ViewChannel) && everyone.denies(ReadMessages));
    }

    #[test]
    fn voice_observers_can_only_look() {
        let voice = voice_overwrites(&roles(), RoleId(50));
        for observer in [RoleId(3), RoleId(4)] {
            let ow = for_target(&voice, OverwriteTarget::Role(observer));
            assert!(ow.allows(ViewChannel));
            assert!(ow.denies(Connect));
        }
        let company = for_target(&voice, OverwriteTarget::Role(RoleId(50)));
        assert!(company.allows(Connect) && company.allows(ViewChannel));
    }

    #[test]
    fn staff_can_mention_everyone_in_text_channels() {
        let text = text_overwrites(&roles(), RoleId(50), false);
        assert!(for_target(&text, OverwriteTarget::Role(RoleId(5))).allows(MentionEveryone));
        assert!(for_target(&text, OverwriteTarget::Role(RoleId(6))).allows(MentionEveryone));
        assert!(for_target(&text, OverwriteTarget::Role(RoleId(50))).allows(SendMessages));
    }

    #[test]
    fn admin_channel_is_read_only_for_company_role() {
        let admin = text_overwrites(&roles(), RoleId(50), true);
        let company = for_target(&admin, OverwriteTarget::Role(RoleId(50)));
        assert!(company.allows(ReadMessages));
        assert!(company.denies(SendMessages));
        let governor = for_target(&admin, OverwriteTarget::Role(RoleId(5)));
        assert!(governor.allows(SendMessages) && governor.allows(MentionEveryone));
    }

    #[test]
    fn survey_channel_admits_only_requester() {
        let ows = survey_overwrites(UserId(9));
        assert!(for_target(&ows, OverwriteTarget::Everyone).denies(ReadMessages));
        assert!(for_target(&ows, OverwriteTarget::Member(UserId(9))).allows(ReadMessages));
    }
}
