mod common;

use common::{Harness, CHECK, CROSS};
use companies_bot::event::Event;
use companies_bot::platform::Tone;

#[tokio::test]
async fn accepted_invitation_joins_the_company() {
    let h = Harness::new();
    let (company, governor, _, _) = h.staffed("Acme", "ACM").await;
    let bob = h.user("bob");

    let reply = h.command(governor, &format!("!recruit <@{bob}>")).await;
    assert_eq!(reply.message.text, "Invitation sent.");

    let invite = h.last_direct(bob);
    assert_eq!(invite.message.field("Company"), Some("Acme"));
    assert_eq!(invite.reactions, [CHECK, CROSS]);

    h.react_direct(invite.id, bob, CHECK).await;

    assert_eq!(h.store.company_of(bob).unwrap().as_deref(), Some("Acme"));
    let roles = h.platform.roles_of(bob);
    assert!(roles.contains(&company.role));
    assert!(roles.contains(&h.roles.freshly_joined));
    assert!(!roles.contains(&h.roles.pending));
    assert_eq!(h.platform.nickname(bob).as_deref(), Some("ACM - bob"));
    assert_eq!(h.last_direct(bob).message.tone, Tone::Success);

    // the invitation is consumed
    let before = h.platform.direct_messages(bob).len();
    h.react_direct(invite.id, bob, CHECK).await;
    assert_eq!(h.platform.direct_messages(bob).len(), before);
}

#[tokio::test]
async fn declined_invitation_changes_nothing() {
    let h = Harness::new();
    let (_, governor, _, _) = h.staffed("Acme", "ACM").await;
    let bob = h.user("bob");
    h.command(governor, &format!("!recruit <@{bob}>")).await;
    let invite = h.last_direct(bob);

    h.react_direct(invite.id, bob, CROSS).await;

    assert_eq!(h.store.company_of(bob).unwrap(), None);
    assert_eq!(h.last_direct(bob).message.text, "Invitation declined.");
}

#[tokio::test]
async fn stale_invitation_reports_existing_membership() {
    let h = Harness::new();
    let (_, acme_governor, _, _) = h.staffed("Acme", "ACM").await;
    let beta_governor = h.user("beta");
    h.found(beta_governor, "Beta", "BET").await;
    let bob = h.user("bob");

    h.command(acme_governor, &format!("!recruit <@{bob}>")).await;
    let invite = h.last_direct(bob);
    h.command(h.admin, &format!("!force-recruit Beta <@{bob}>")).await;

    h.react_direct(invite.id, bob, CHECK).await;

    assert_eq!(h.store.company_of(bob).unwrap().as_deref(), Some("Beta"));
    assert_eq!(h.last_direct(bob).message.text, "You are already in a company.");
}

#[tokio::test]
async fn only_staff_recruit() {
    let h = Harness::new();
    let (_, _, _, member) = h.staffed("Acme", "ACM").await;
    let bob = h.user("bob");
    let outsider = h.user("outsider");

    let reply = h.command(member, &format!("!recruit <@{bob}>")).await;
    assert_eq!(reply.message.text, "Only company staff can do this.");

    let reply = h.command(outsider, &format!("!recruit <@{bob}>")).await;
    assert_eq!(reply.message.text, "You are not in a company.");
    assert!(h.platform.direct_messages(bob).is_empty());
}

#[tokio::test]
async fn recruiting_a_member_of_another_company_fails() {
    let h = Harness::new();
    let (_, governor, _, _) = h.staffed("Acme", "ACM").await;
    let (_, _, _, beta_member) = h.staffed("Beta", "BET").await;

    let reply = h.command(governor, &format!("!recruit <@{beta_member}>")).await;
    assert_eq!(reply.message.text, "That member is already in a company.");
}

#[tokio::test]
async fn leaving_restores_the_outsider_state() {
    let h = Harness::new();
    let (company, _, _, member) = h.staffed("Acme", "ACM").await;
    h.store.add_donation(member, 50.0).unwrap();

    let reply = h.command(member, "!leave-company").await;
    assert_eq!(reply.message.text, "You left the company.");

    let row = h.store.member(member).unwrap().unwrap();
    assert_eq!(row.company, None);
    assert_eq!(row.company_donations, 0.0);
    let roles = h.platform.roles_of(member);
    assert!(!roles.contains(&company.role));
    assert!(!roles.contains(&h.roles.freshly_joined));
    assert!(roles.contains(&h.roles.pending));
    assert_eq!(h.platform.nickname(member), None);
}

#[tokio::test]
async fn governor_cannot_leave() {
    let h = Harness::new();
    let (company, governor, _, _) = h.staffed("Acme", "ACM").await;

    let reply = h.command(governor, "!leave-company").await;
    assert_eq!(reply.message.text, "The governor can't leave the company.");
    assert!(h.platform.has_role(governor, company.role));
    assert_eq!(h.store.company_of(governor).unwrap().as_deref(), Some("Acme"));
}

#[tokio::test]
async fn kick_rules() {
    let h = Harness::new();
    let (_, governor, console, member) = h.staffed("Acme", "ACM").await;
    let second_console = h.user("second console");
    h.command(h.admin, &format!("!set-console Acme <@{second_console}>")).await;
    let outsider = h.user("outsider");

    let reply = h.command(member, &format!("!kick <@{console}>")).await;
    assert_eq!(reply.message.text, "Only company staff can do this.");

    let reply = h.command(console, &format!("!kick <@{outsider}>")).await;
    assert_eq!(reply.message.text, "That member is not in your company.");

    let reply = h.command(console, &format!("!kick <@{governor}>")).await;
    assert_eq!(reply.message.text, "The governor can't be expelled.");

    let reply = h.command(console, &format!("!kick <@{second_console}>")).await;
    assert_eq!(reply.message.text, "Only the governor can expel a console.");

    let reply = h.command(console, &format!("!kick <@{member}>")).await;
    assert_eq!(reply.message.text, "Member expelled.");
    assert_eq!(h.store.company_of(member).unwrap(), None);
    assert_eq!(h.last_direct(member).message.text, "You have been expelled from Acme.");

    let reply = h.command(governor, &format!("!kick <@{second_console}>")).await;
    assert_eq!(reply.message.text, "Member expelled.");
    assert!(!h.platform.has_role(second_console, h.roles.console));
}

#[tokio::test]
async fn force_kick_removes_even_the_governor() {
    let h = Harness::new();
    let (company, governor, _, _) = h.staffed("Acme", "ACM").await;

    let reply = h.command(h.admin, &format!("!force-kick <@{governor}>")).await;
    assert_eq!(reply.message.text, "Member expelled.");
    assert_eq!(h.store.company_of(governor).unwrap(), None);
    assert!(!h.platform.has_role(governor, h.roles.governor));
    assert!(!h.platform.has_role(governor, company.role));
    assert_eq!(h.last_direct(governor).message.tone, Tone::Error);
}

#[tokio::test]
async fn governor_role_is_exclusive() {
    let h = Harness::new();
    let (_, governor, console, member) = h.staffed("Acme", "ACM").await;

    let reply = h.command(h.admin, &format!("!set-governor Acme <@{member}>")).await;
    assert_eq!(reply.message.text, "Governor set.");
    assert!(h.platform.has_role(member, h.roles.governor));
    assert!(!h.platform.has_role(governor, h.roles.governor));
    assert_eq!(h.store.company_of(governor).unwrap().as_deref(), Some("Acme"));

    let holders = h
        .store
        .company_members("Acme")
        .unwrap()
        .into_iter()
        .filter(|id| h.platform.has_role(*id, h.roles.governor))
        .count();
    assert_eq!(holders, 1);

    // promoting a console swaps the tier roles
    h.command(h.admin, &format!("!set-governor Acme <@{console}>")).await;
    assert!(h.platform.has_role(console, h.roles.governor));
    assert!(!h.platform.has_role(console, h.roles.console));
    assert!(!h.platform.has_role(member, h.roles.governor));

    let reply = h.command(h.admin, &format!("!set-governor Acme <@{console}>")).await;
    assert_eq!(reply.message.text, "That member is already a governor.");
}

#[tokio::test]
async fn promotion_checks_the_company() {
    let h = Harness::new();
    h.staffed("Acme", "ACM").await;
    let (_, _, _, beta_member) = h.staffed("Beta", "BET").await;

    let reply = h.command(h.admin, &format!("!set-console Acme <@{beta_member}>")).await;
    assert_eq!(reply.message.text, "That member belongs to another company.");

    let reply = h.command(h.admin, &format!("!set-console Nowhere <@{beta_member}>")).await;
    assert_eq!(reply.message.text, "That company does not exist.");
}

#[tokio::test]
async fn nickname_failures_do_not_block_joining() {
    let h = Harness::new();
    let company = h.found(h.user("alice"), "Acme", "ACM").await;
    let locked = h.user("locked");
    h.platform.lock_nickname(locked);
    let owner = h.user("owner");
    h.platform.set_owner(owner);

    for id in [locked, owner] {
        let reply = h.command(h.admin, &format!("!force-recruit Acme <@{id}>")).await;
        assert_eq!(reply.message.text, "Member recruited.");
        assert!(h.platform.has_role(id, company.role));
        assert_eq!(h.platform.nickname(id), None);
    }
}

#[tokio::test]
async fn roster_groups_by_tier_and_purges_departed() {
    let h = Harness::new();
    let (_, governor, console, member) = h.staffed("Acme", "ACM").await;

    let roster = h.command(governor, "!members").await;
    assert!(roster.message.field("Governor").unwrap().contains("ACM-gov"));
    assert!(roster.message.field("Consoles").unwrap().contains("ACM-console"));
    assert!(roster.message.field("Members").unwrap().contains("ACM-member"));

    let reply = h.command(member, "!members").await;
    assert_eq!(reply.message.text, "Only company staff can do this.");

    h.platform.remove_user(member);
    let roster = h.command(h.admin, "!member-list acme").await;
    assert_eq!(roster.message.title.as_deref(), Some("Members of Acme"));
    assert_eq!(roster.message.field("Members"), Some("No members"));
    assert!(h.store.member(member).unwrap().is_none());
    assert_eq!(h.store.company_members("Acme").unwrap().len(), 2);
    assert!(h.store.company_of(console).unwrap().is_some());
}

#[tokio::test]
async fn deleting_a_company_cascades() {
    let h = Harness::new();
    let (company, governor, console, member) = h.staffed("Acme", "ACM").await;

    let reply = h.command(h.admin, "!company-delete Acme").await;
    assert_eq!(reply.message.text, "Company deleted.");

    assert!(h.store.company("Acme").unwrap().is_none());
    assert!(!h.platform.channel_exists(company.category));
    assert!(h.platform.channels_in(company.category).is_empty());
    assert_eq!(h.platform.role_count_named("Acme"), 0);
    for id in [governor, console, member] {
        assert_eq!(h.store.company_of(id).unwrap(), None);
        assert!(h.store.member(id).unwrap().is_some());
        let roles = h.platform.roles_of(id);
        assert!(roles.contains(&h.roles.pending));
        assert!(!roles.contains(&h.roles.governor));
        assert!(!roles.contains(&h.roles.console));
        assert_eq!(h.platform.nickname(id), None);
    }

    let reply = h.command(h.admin, "!company-delete Acme").await;
    assert_eq!(reply.message.text, "That company does not exist.");

    // the name is free again
    let reply = h.command(governor, "!create-company Acme ACM").await;
    assert_eq!(reply.message.tone, Tone::Error);
    assert!(reply.message.text.starts_with("Try again in"));
    let reply = h.command(h.admin, "!create-company Acme ACM").await;
    assert_eq!(reply.message.tone, Tone::Success);
}

#[tokio::test]
async fn departed_members_leave_the_registry() {
    let h = Harness::new();
    let (_, _, _, member) = h.staffed("Acme", "ACM").await;

    h.bot.handle(&Event::MemberRemoved { user: member }).await.unwrap();

    assert!(h.store.member(member).unwrap().is_none());
    assert_eq!(h.store.company_members("Acme").unwrap().len(), 2);
}

#[tokio::test]
async fn suspicious_usernames_are_reported() {
    let h = Harness::new();
    let fake = h.platform.add_user("Server ADMIN");
    let normal = h.platform.add_user("alice");

    h.bot.handle(&Event::MemberJoined { user: normal }).await.unwrap();
    assert!(h.platform.messages_in(h.watch).is_empty());

    h.bot.handle(&Event::MemberJoined { user: fake }).await.unwrap();
    assert!(h.last_in(h.watch).message.text.contains(&format!("<@{fake}>")));
}

#[tokio::test]
async fn command_gates() {
    let h = Harness::new();
    let alice = h.user("alice");

    let reply = h.command(alice, "!company-list").await;
    assert_eq!(reply.message.text, "You don't have permission to do this.");

    h.say(h.apply, alice, "!help").await;
    assert!(h.platform.messages_in(h.apply).is_empty());

    h.say(h.apply, h.admin, "!help").await;
    let help = h.last_in(h.apply);
    assert!(help.message.text.contains("!create-company <name> <tag>"));
    assert!(help.message.field("Admin commands").is_some());

    let reply = h.command(alice, "!kick bob").await;
    assert_eq!(reply.message.text, "Usage: !kick <@member>");
}

#[tokio::test]
async fn company_list_shows_tags_and_factions() {
    let h = Harness::new();
    h.staffed("Acme", "ACM").await;
    h.staffed("Beta", "BET").await;
    h.command(h.admin, "!set-faction Beta Empire").await;

    let list = h.command(h.admin, "!company-list").await;
    assert!(list.message.text.contains("- Acme [ACM]"));
    assert!(list.message.text.contains("- Beta [BET] (Empire)"));
}

#[tokio::test]
async fn invitations_to_a_deleted_company_are_dropped() {
    let h = Harness::new();
    let (_, governor, _, _) = h.staffed("Acme", "ACM").await;
    let bob = h.user("bob");
    h.command(governor, &format!("!recruit <@{bob}>")).await;
    assert_eq!(h.bot.open_invitations(), 1);

    h.command(h.admin, "!company-delete Acme").await;

    assert_eq!(h.bot.open_invitations(), 0);
}

#[tokio::test]
async fn company_links_track_roles_across_every_change() {
    let h = Harness::new();
    let (_, acme_governor, acme_console, acme_member) = h.staffed("Acme", "ACM").await;
    let (_, _, beta_console, beta_member) = h.staffed("Beta", "BET").await;

    let bob = h.user("bob");
    h.command(acme_governor, &format!("!recruit <@{bob}>")).await;
    h.react_direct(h.last_direct(bob).id, bob, CHECK).await;
    h.assert_links_match_roles();

    h.command(h.admin, &format!("!set-governor Acme <@{acme_member}>")).await;
    h.assert_links_match_roles();

    h.command(bob, "!leave-company").await;
    h.assert_links_match_roles();

    h.command(h.admin, &format!("!force-kick <@{acme_governor}>")).await;
    h.assert_links_match_roles();

    h.command(acme_member, &format!("!kick <@{acme_console}>")).await;
    h.assert_links_match_roles();

    h.command(h.admin, &format!("!force-recruit Acme <@{bob}>")).await;
    h.command(h.admin, &format!("!set-console Acme <@{beta_member}>")).await;
    h.assert_links_match_roles();

    h.command(h.admin, "!company-delete Beta").await;
    h.assert_links_match_roles();
    assert_eq!(h.store.company_of(beta_console).unwrap(), None);

    let carol = h.user("carol");
    h.found(carol, "Gamma", "GAM").await;
    h.assert_links_match_roles();
}
