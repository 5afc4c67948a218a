use chrono::TimeZone;
use std::sync::Arc;
use std::time::Duration;

use super::applications::{ApplicationReview, ApplicationSubmission, ReviewAction, ReviewSubmission};
use super::info::InfoDesk;
use super::moderation::{ModerationCommand, ModerationContext, ModerationDesk, TargetUser};
use super::tickets::{TicketCreation, TicketDesk, TicketType};
use super::verification::{ConfirmOutcome, VerificationDesk};
use super::{EffectOutcome, SideEffect, WorkflowError};
use crate::discord::types::*;
use crate::identity::{ExternalIdentity, IdentityError, MockIdentityProvider};
use crate::storage::{Answer, ApplicationStatus, Store};
use crate::testing::*;

fn review_desk(harness: &Harness) -> ApplicationReview {
    ApplicationReview::new(
        harness.store.clone(),
        harness.platform_ops(),
        harness.audit.clone(),
        harness.config.clone(),
    )
}

fn staff_submission(applicant: u64) -> ApplicationSubmission {
    ApplicationSubmission {
        submitter_id: UserId(applicant),
        submitter_name: "bob".to_string(),
        kind: "staff".to_string(),
        answers: vec![Answer::new("Roblox username?", "Bob")],
    }
}

fn review(id: i64, action: ReviewAction, reason: &str) -> ReviewSubmission {
    ReviewSubmission {
        application_id: id,
        action,
        reason: reason.to_string(),
        reviewer: staff(9, "rita"),
        guild: GUILD,
        notice: Some((APPLICATIONS_CHANNEL, MessageId(77))),
    }
}

#[tokio::test]
async fn accepted_application_is_logged_and_role_granted() {
    let harness = Harness::new();
    harness.platform.add_member(UserId(42), "bob", vec![]);
    let desk = review_desk(&harness);

    let submitted = desk.submit(staff_submission(42)).await.unwrap();
    let id = submitted.outcome.id;
    assert_eq!(submitted.outcome.status, ApplicationStatus::Pending);
    assert_eq!(
        harness
            .platform
            .count(|c| matches!(c, PlatformCall::SendMessage { channel, .. } if *channel == APPLICATIONS_CHANNEL)),
        1
    );

    let decided = desk
        .finalize_review(review(id, ReviewAction::Accept, "Great fit"))
        .await
        .unwrap();
    assert_eq!(decided.outcome.status, ApplicationStatus::Accepted);
    assert_eq!(decided.outcome.review_reason.as_deref(), Some("Great fit"));
    assert_eq!(decided.outcome_of(SideEffect::RoleGrant), Some(&EffectOutcome::Applied));
    assert!(harness.platform.member_roles(UserId(42)).contains(&STAFF_APPLICATION_ROLE));

    let logs = harness.store.recent_logs(10).await.unwrap();
    let accepted = logs
        .iter()
        .find(|entry| entry.action == "application_accepted")
        .expect("acceptance is logged");
    assert!(accepted.details.contains(&format!("Application ID: {id}")));
    assert!(logs.iter().any(|entry| entry.action == "application_submitted"));
}

#[tokio::test]
async fn second_decision_is_rejected_without_changes() {
    let harness = Harness::new();
    let desk = review_desk(&harness);
    let id = desk.submit(staff_submission(42)).await.unwrap().outcome.id;

    desk.finalize_review(review(id, ReviewAction::Deny, "Too short"))
        .await
        .unwrap();
    let dms_before = harness.platform.count(|c| matches!(c, PlatformCall::DirectMessage { .. }));

    let err = desk
        .finalize_review(review(id, ReviewAction::Accept, "Changed my mind"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::AlreadyFinalized {
            status: ApplicationStatus::Denied,
            ..
        }
    ));

    let stored = desk.get_application(id).await.unwrap();
    assert_eq!(stored.status, ApplicationStatus::Denied);
    assert_eq!(stored.review_reason.as_deref(), Some("Too short"));
    assert_eq!(
        harness.platform.count(|c| matches!(c, PlatformCall::DirectMessage { .. })),
        dms_before
    );
}

#[tokio::test]
async fn review_notice_failures_do_not_undo_decision() {
    let harness = Harness::new();
    let desk = review_desk(&harness);
    let id = desk.submit(staff_submission(42)).await.unwrap().outcome.id;
    harness.platform.fail("send_direct_message", Failure::Forbidden);
    harness.platform.fail("edit_message", Failure::NotFound);

    let decided = desk
        .finalize_review(review(id, ReviewAction::Deny, "Not now"))
        .await
        .unwrap();
    assert_eq!(decided.failures().count(), 2);
    assert_eq!(decided.outcome_of(SideEffect::RoleGrant), None);
    assert_eq!(desk.get_application(id).await.unwrap().status, ApplicationStatus::Denied);
}

#[tokio::test]
async fn accepting_a_departed_applicant_skips_role_grant() {
    let harness = Harness::new();
    let desk = review_desk(&harness);
    let id = desk.submit(staff_submission(42)).await.unwrap().outcome.id;

    let decided = desk
        .finalize_review(review(id, ReviewAction::Accept, "Welcome"))
        .await
        .unwrap();
    assert!(matches!(
        decided.outcome_of(SideEffect::RoleGrant),
        Some(EffectOutcome::Skipped(_))
    ));
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::AddRole { .. })), 0);
}

#[tokio::test]
async fn review_requires_reviewer_role_and_reason() {
    let harness = Harness::new();
    let desk = review_desk(&harness);
    let id = desk.submit(staff_submission(42)).await.unwrap().outcome.id;

    let err = desk
        .request_review(&member(5, "nobody"), id, ReviewAction::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PermissionDenied(_)));

    let err = desk
        .finalize_review(review(id, ReviewAction::Accept, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));

    let err = desk
        .finalize_review(review(id + 100, ReviewAction::Accept, "ok"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn invalid_application_type_is_rejected() {
    let harness = Harness::new();
    let desk = review_desk(&harness);
    let mut submission = staff_submission(42);
    submission.kind = "police".to_string();

    assert!(matches!(
        desk.submit(submission).await.unwrap_err(),
        WorkflowError::Validation(_)
    ));
    assert!(desk.list_applications().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_answer_list_is_accepted() {
    let harness = Harness::new();
    let desk = review_desk(&harness);
    let mut submission = staff_submission(42);
    submission.answers.clear();

    let stored = desk.submit(submission).await.unwrap().outcome;
    assert!(stored.answers.is_empty());
    assert_eq!(stored.status, ApplicationStatus::Pending);
    assert_eq!(
        harness
            .platform
            .count(|c| matches!(c, PlatformCall::SendMessage { channel, .. } if *channel == APPLICATIONS_CHANNEL)),
        1
    );

    let mut unnamed = staff_submission(43);
    unnamed.submitter_name = "  ".to_string();
    assert!(matches!(
        desk.submit(unnamed).await.unwrap_err(),
        WorkflowError::Validation(_)
    ));
}

fn ticket_desk(harness: &Harness) -> TicketDesk {
    TicketDesk::new(harness.platform_ops(), harness.audit.clone(), harness.config.clone())
}

#[tokio::test]
async fn repeated_ticket_request_returns_existing_channel() {
    let harness = Harness::new();
    let desk = ticket_desk(&harness);
    let owner = member(42, "Bob");

    let first = desk
        .create_ticket(GUILD, &owner, TicketType::General)
        .await
        .unwrap();
    let second = desk
        .create_ticket(GUILD, &owner, TicketType::General)
        .await
        .unwrap();

    assert!(matches!(first.outcome, TicketCreation::Created(_)));
    assert!(matches!(second.outcome, TicketCreation::AlreadyOpen(_)));
    assert_eq!(first.outcome.ticket().channel, second.outcome.ticket().channel);
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::CreateChannel { .. })), 1);

    let other = desk
        .create_ticket(GUILD, &owner, TicketType::StaffReport)
        .await
        .unwrap();
    assert!(matches!(other.outcome, TicketCreation::Created(_)));
    assert_ne!(other.outcome.ticket().channel, first.outcome.ticket().channel);
}

#[tokio::test]
async fn concurrent_ticket_requests_create_one_channel() {
    let harness = Harness::new();
    harness.platform.slow_channel_creation(Duration::from_millis(20));
    let desk = ticket_desk(&harness);
    let owner = member(42, "Bob");

    let (a, b) = tokio::join!(
        desk.create_ticket(GUILD, &owner, TicketType::HighRank),
        desk.create_ticket(GUILD, &owner, TicketType::HighRank)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.outcome.ticket().channel, b.outcome.ticket().channel);
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::CreateChannel { .. })), 1);
}

#[tokio::test]
async fn ticket_channel_is_private_to_owner_and_support() {
    let harness = Harness::new();
    let desk = ticket_desk(&harness);
    desk.create_ticket(GUILD, &member(42, "Bob"), TicketType::General)
        .await
        .unwrap();

    let calls = harness.platform.calls();
    let Some(PlatformCall::CreateChannel { channel, .. }) = calls
        .iter()
        .find(|c| matches!(c, PlatformCall::CreateChannel { .. }))
    else {
        panic!("channel was not created");
    };
    assert_eq!(channel.parent_id, Some(TICKET_CATEGORY));
    assert!(channel.name.starts_with("general-bob-"));
    let everyone = channel
        .permission_overwrites
        .iter()
        .find(|o| o.target_id() == GUILD.get())
        .unwrap();
    assert!(everyone.deny.contains(Permissions::VIEW_CHANNEL));
    assert!(channel
        .permission_overwrites
        .iter()
        .any(|o| o.target_id() == 42 && o.allow.contains(Permissions::SEND_MESSAGES)));
    assert!(channel
        .permission_overwrites
        .iter()
        .any(|o| o.target_id() == STAFF_ROLE.get() && o.allow.contains(Permissions::MANAGE_MESSAGES)));
}

#[tokio::test]
async fn missing_ticket_category_is_reported() {
    let mut config = test_config();
    config.tickets.category = None;
    let harness = Harness::with_config(config);
    let desk = ticket_desk(&harness);

    let err = desk
        .create_ticket(GUILD, &member(42, "Bob"), TicketType::General)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::CreateChannel { .. })), 0);
}

fn history_message(id: u64, author: &str, content: &str) -> ChannelMessage {
    ChannelMessage {
        id: MessageId(id),
        author: User {
            id: UserId(id),
            username: author.to_string(),
            global_name: None,
            avatar: None,
            bot: false,
        },
        content: content.to_string(),
        timestamp: chrono::Utc::now(),
        pinned: false,
    }
}

#[tokio::test(start_paused = true)]
async fn confirmed_close_archives_once_then_deletes() {
    let harness = Harness::new();
    let desk = ticket_desk(&harness);
    let owner = member(42, "Bob");
    let created = desk
        .create_ticket(GUILD, &owner, TicketType::General)
        .await
        .unwrap();
    let channel = created.outcome.ticket().channel;
    harness.platform.set_history(
        channel,
        vec![history_message(2, "rita", "How can I help?"), history_message(1, "Bob", "Hello")],
    );

    let closed = desk.confirm_close(channel, &staff(9, "rita")).await.unwrap();
    assert_eq!(closed.outcome.message_count, 2);
    assert!(closed.outcome.transcript.find("Hello") < closed.outcome.transcript.find("How can I help?"));

    let err = desk.confirm_close(channel, &staff(9, "rita")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));

    let logs = harness.store.recent_logs(10).await.unwrap();
    assert_eq!(logs.iter().filter(|e| e.action == "ticket_closed").count(), 1);
    assert_eq!(
        harness.platform.count(
            |c| matches!(c, PlatformCall::SendFile { filename, .. } if filename.starts_with("transcript-general-bob-"))
        ),
        1
    );
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::DeleteChannel { .. })), 0);

    tokio::time::sleep(Duration::from_secs(harness.config.tickets.close_delay_seconds + 1)).await;
    tokio::task::yield_now().await;
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::DeleteChannel { .. })), 1);
    assert!(desk.tracked_ticket(channel).await.is_none());

    let reopened = desk
        .create_ticket(GUILD, &owner, TicketType::General)
        .await
        .unwrap();
    assert!(matches!(reopened.outcome, TicketCreation::Created(_)));
}

#[tokio::test]
async fn closing_untracked_channel_uses_unknown_type() {
    let harness = Harness::new();
    let desk = ticket_desk(&harness);

    let closed = desk
        .confirm_close(ChannelId(999), &staff(9, "rita"))
        .await
        .unwrap();
    assert_eq!(closed.outcome.kind_label(), "unknown");
}

#[tokio::test]
async fn failed_history_fetch_reopens_ticket() {
    let harness = Harness::new();
    let desk = ticket_desk(&harness);
    let owner = member(42, "Bob");
    let channel = desk
        .create_ticket(GUILD, &owner, TicketType::General)
        .await
        .unwrap()
        .outcome
        .ticket()
        .channel;

    harness
        .platform
        .fail("fetch_recent_messages", Failure::Api { status: 500, code: None });
    let err = desk.confirm_close(channel, &owner).await.unwrap_err();
    assert!(matches!(err, WorkflowError::External { .. }));
    assert!(desk.open_ticket_for(owner.id, TicketType::General).await.is_some());

    harness.platform.recover("fetch_recent_messages");
    assert!(desk.confirm_close(channel, &owner).await.is_ok());
}

fn bob() -> ExternalIdentity {
    ExternalIdentity {
        id: 123,
        name: "BobRoblox".to_string(),
    }
}

fn identity_with_description(description: &'static str) -> MockIdentityProvider {
    let mut identity = MockIdentityProvider::new();
    identity
        .expect_lookup_username()
        .returning(|_| Ok(Some(bob())));
    identity
        .expect_fetch_avatar()
        .returning(|_| Ok(Some("https://cdn.example/bob.png".to_string())));
    identity
        .expect_fetch_description()
        .returning(move |_| Ok(description.to_string()));
    identity
}

fn verification_desk(harness: &Harness, identity: MockIdentityProvider) -> VerificationDesk {
    VerificationDesk::new(
        harness.platform_ops(),
        Arc::new(identity),
        harness.audit.clone(),
        harness.config.clone(),
    )
}

#[tokio::test]
async fn wrong_code_keeps_pending_entry() {
    let harness = Harness::new();
    let desk = verification_desk(&harness, identity_with_description("hello there"));
    let owner = member(42, "bob");

    let issued = desk.issue(&owner, "BobRoblox").await.unwrap();
    assert!(issued.outcome.code.starts_with("GSRP-"));
    assert_eq!(issued.outcome.avatar_url.as_deref(), Some("https://cdn.example/bob.png"));

    let checked = desk.confirm(&owner, GUILD).await.unwrap();
    assert!(matches!(checked.outcome, ConfirmOutcome::CodeNotFound { .. }));
    assert!(desk.registry().live(owner.id).await.is_some());
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::AddRole { .. })), 0);
    let logs = harness.store.recent_logs(5).await.unwrap();
    assert_eq!(logs[0].action, "verification_failed");
}

#[tokio::test]
async fn matching_code_grants_role_and_renames() {
    let harness = Harness::new();
    let profile = Arc::new(std::sync::Mutex::new(String::new()));
    let mut identity = MockIdentityProvider::new();
    identity.expect_lookup_username().returning(|_| Ok(Some(bob())));
    identity.expect_fetch_avatar().returning(|_| Ok(None));
    let bio = profile.clone();
    identity
        .expect_fetch_description()
        .returning(move |_| Ok(bio.lock().unwrap().clone()));
    let desk = verification_desk(&harness, identity);
    let owner = member(42, "bob");

    let code = desk.issue(&owner, "BobRoblox").await.unwrap().outcome.code;
    *profile.lock().unwrap() = format!("I play here! {code}");

    let verified = desk.confirm(&owner, GUILD).await.unwrap();
    assert!(matches!(
        verified.outcome,
        ConfirmOutcome::Verified { ref identity, .. } if identity.name == "BobRoblox"
    ));
    assert_eq!(verified.outcome_of(SideEffect::RoleGrant), Some(&EffectOutcome::Applied));
    assert_eq!(verified.outcome_of(SideEffect::Rename), Some(&EffectOutcome::Applied));
    assert_eq!(
        harness.platform.count(|c| matches!(c, PlatformCall::AddRole { role, .. } if *role == VERIFIED_ROLE)),
        1
    );
    assert!(harness.platform.calls().iter().any(|c| matches!(
        c,
        PlatformCall::SetNickname { nickname: Some(nick), .. } if nick == "BobRoblox"
    )));
    assert!(desk.registry().live(owner.id).await.is_none());
    let logs = harness.store.recent_logs(5).await.unwrap();
    assert_eq!(logs[0].action, "verification_success");
}

#[tokio::test]
async fn failed_role_grant_keeps_session() {
    let harness = Harness::new();
    harness.platform.fail("add_role", Failure::Forbidden);
    let profile = Arc::new(std::sync::Mutex::new(String::new()));
    let mut identity = MockIdentityProvider::new();
    identity.expect_lookup_username().returning(|_| Ok(Some(bob())));
    identity.expect_fetch_avatar().returning(|_| Ok(None));
    let bio = profile.clone();
    identity
        .expect_fetch_description()
        .returning(move |_| Ok(bio.lock().unwrap().clone()));
    let desk = verification_desk(&harness, identity);
    let owner = member(42, "bob");

    let code = desk.issue(&owner, "BobRoblox").await.unwrap().outcome.code;
    *profile.lock().unwrap() = code;

    let err = desk.confirm(&owner, GUILD).await.unwrap_err();
    assert!(matches!(err, WorkflowError::External { .. }));
    assert!(desk.registry().live(owner.id).await.is_some());
}

fn identity_with_profile(profile: Arc<std::sync::Mutex<String>>) -> MockIdentityProvider {
    let mut identity = MockIdentityProvider::new();
    identity.expect_lookup_username().returning(|_| Ok(Some(bob())));
    identity.expect_fetch_avatar().returning(|_| Ok(None));
    identity
        .expect_fetch_description()
        .returning(move |_| Ok(profile.lock().unwrap().clone()));
    identity
}

#[tokio::test]
async fn reissued_code_invalidates_previous_one() {
    let harness = Harness::new();
    let profile = Arc::new(std::sync::Mutex::new(String::new()));
    let desk = verification_desk(&harness, identity_with_profile(profile.clone()));
    let owner = member(42, "bob");

    let first = desk.issue(&owner, "BobRoblox").await.unwrap().outcome.code;
    let second = desk.issue(&owner, "BobRoblox").await.unwrap().outcome.code;
    assert_ne!(first, second);
    assert_eq!(desk.registry().len().await, 1);

    *profile.lock().unwrap() = format!("bio {first}");
    let stale = desk.confirm(&owner, GUILD).await.unwrap();
    assert!(matches!(stale.outcome, ConfirmOutcome::CodeNotFound { ref code } if *code == second));
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::AddRole { .. })), 0);

    *profile.lock().unwrap() = format!("bio {second}");
    let fresh = desk.confirm(&owner, GUILD).await.unwrap();
    assert!(matches!(fresh.outcome, ConfirmOutcome::Verified { .. }));
    assert!(desk.registry().live(owner.id).await.is_none());
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn stale_expiry_timer_spares_reissued_code() {
    let harness = Harness::new();
    let profile = Arc::new(std::sync::Mutex::new(String::new()));
    let desk = verification_desk(&harness, identity_with_profile(profile.clone()));
    let owner = member(42, "bob");

    let first = desk.issue(&owner, "BobRoblox").await.unwrap().outcome.code;
    tokio::time::advance(Duration::from_secs(5 * 60)).await;
    let second = desk.issue(&owner, "BobRoblox").await.unwrap().outcome.code;

    *profile.lock().unwrap() = format!("bio {first}");
    let stale = desk.confirm(&owner, GUILD).await.unwrap();
    assert!(matches!(stale.outcome, ConfirmOutcome::CodeNotFound { .. }));

    // First code's timer fires at 10 minutes; the second code has until 15.
    tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
    settle().await;
    let live = desk.registry().live(owner.id).await.unwrap();
    assert_eq!(live.code, second);

    tokio::time::advance(Duration::from_secs(5 * 60)).await;
    settle().await;
    assert_eq!(desk.registry().len().await, 0);

    *profile.lock().unwrap() = format!("bio {second}");
    assert!(matches!(
        desk.confirm(&owner, GUILD).await.unwrap_err(),
        WorkflowError::NotFound(_)
    ));
}

#[tokio::test]
async fn out_of_range_expiry_is_rejected_before_lookup() {
    let mut config = test_config();
    config.verification.expiry_minutes = u64::MAX;
    let harness = Harness::with_config(config);
    let desk = verification_desk(&harness, MockIdentityProvider::new());
    let owner = member(42, "bob");

    let err = desk.issue(&owner, "BobRoblox").await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
    assert_eq!(desk.registry().len().await, 0);
}

#[tokio::test]
async fn expired_session_cannot_be_confirmed() {
    let mut config = test_config();
    config.verification.expiry_minutes = 0;
    let harness = Harness::with_config(config);
    let desk = verification_desk(&harness, identity_with_description(""));
    let owner = member(42, "bob");

    desk.issue(&owner, "BobRoblox").await.unwrap();
    let err = desk.confirm(&owner, GUILD).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn unknown_username_and_bad_length_are_rejected() {
    let harness = Harness::new();
    let mut identity = MockIdentityProvider::new();
    identity.expect_lookup_username().returning(|_| Ok(None));
    let desk = verification_desk(&harness, identity);
    let owner = member(42, "bob");

    assert!(matches!(
        desk.issue(&owner, "ab").await.unwrap_err(),
        WorkflowError::Validation(_)
    ));
    assert!(matches!(
        desk.issue(&owner, "NoSuchPlayer").await.unwrap_err(),
        WorkflowError::NotFound(_)
    ));
    assert_eq!(desk.registry().len().await, 0);
}

#[tokio::test]
async fn profile_read_failure_keeps_session() {
    let harness = Harness::new();
    let mut identity = MockIdentityProvider::new();
    identity.expect_lookup_username().returning(|_| Ok(Some(bob())));
    identity.expect_fetch_avatar().returning(|_| Ok(None));
    identity.expect_fetch_description().returning(|_| {
        Err(IdentityError::Status {
            endpoint: "users",
            status: 503,
        })
    });
    let desk = verification_desk(&harness, identity);
    let owner = member(42, "bob");

    desk.issue(&owner, "BobRoblox").await.unwrap();
    let err = desk.confirm(&owner, GUILD).await.unwrap_err();
    assert!(matches!(err, WorkflowError::External { .. }));
    assert!(desk.registry().live(owner.id).await.is_some());
}

#[tokio::test]
async fn cancel_discards_pending_code() {
    let harness = Harness::new();
    let desk = verification_desk(&harness, identity_with_description(""));
    let owner = member(42, "bob");

    desk.issue(&owner, "BobRoblox").await.unwrap();
    assert!(desk.cancel(owner.id).await);
    assert!(!desk.cancel(owner.id).await);
    assert!(matches!(
        desk.confirm(&owner, GUILD).await.unwrap_err(),
        WorkflowError::NotFound(_)
    ));
}

fn moderation_desk(harness: &Harness) -> ModerationDesk {
    ModerationDesk::new(harness.platform_ops(), harness.audit.clone(), harness.config.clone())
}

fn context(actor: super::Actor) -> ModerationContext {
    ModerationContext {
        actor,
        guild: GUILD,
        channel: ChannelId(400),
    }
}

fn spammer() -> TargetUser {
    TargetUser {
        id: UserId(66),
        username: "spammer".to_string(),
    }
}

#[tokio::test]
async fn ban_is_audited_with_moderator_in_reason() {
    let harness = Harness::new();
    let desk = moderation_desk(&harness);

    let done = desk
        .execute(
            &context(staff(9, "rita")),
            ModerationCommand::Ban {
                target: spammer(),
                reason: Some("raiding".to_string()),
                delete_messages: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(done.outcome_of(SideEffect::LogNotice), Some(&EffectOutcome::Applied));

    let calls = harness.platform.calls();
    assert!(calls.iter().any(|c| matches!(
        c,
        PlatformCall::Ban { user, delete_message_seconds: 604_800, reason: Some(reason) }
            if *user == UserId(66) && reason == "raiding | Banned by rita"
    )));
    let logs = harness.store.recent_logs(1).await.unwrap();
    assert_eq!(logs[0].action, "moderation_ban");
}

#[tokio::test]
async fn non_staff_cannot_moderate() {
    let harness = Harness::new();
    let desk = moderation_desk(&harness);

    let err = desk
        .execute(&context(member(5, "nobody")), ModerationCommand::Unlock)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PermissionDenied(_)));
    assert!(harness.platform.calls().is_empty());
}

#[tokio::test]
async fn refused_kick_reports_hierarchy() {
    let harness = Harness::new();
    harness.platform.fail("kick_member", Failure::Forbidden);
    let desk = moderation_desk(&harness);

    let err = desk
        .execute(
            &context(admin(1, "owner")),
            ModerationCommand::Kick {
                target: spammer(),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "❌ I cannot kick this user.");
}

#[tokio::test]
async fn mute_outside_voice_is_a_validation_error() {
    let harness = Harness::new();
    harness.platform.fail(
        "set_voice_state",
        Failure::Api {
            status: 400,
            code: Some(40032),
        },
    );
    let desk = moderation_desk(&harness);

    let err = desk
        .execute(
            &context(staff(9, "rita")),
            ModerationCommand::Mute {
                target: spammer(),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(message) if message == "User is not in a voice channel."));
}

#[tokio::test]
async fn clear_skips_pinned_old_and_other_authors() {
    let harness = Harness::new();
    let channel = ChannelId(400);
    let mut pinned = history_message(66, "spammer", "pinned");
    pinned.id = MessageId(1);
    pinned.pinned = true;
    let mut old = history_message(66, "spammer", "ancient");
    old.id = MessageId(2);
    old.timestamp = chrono::Utc::now() - chrono::Duration::days(15);
    let mut fresh = history_message(66, "spammer", "spam");
    fresh.id = MessageId(3);
    let bystander = history_message(7, "alice", "hi");
    harness
        .platform
        .set_history(channel, vec![fresh, bystander, pinned, old]);
    let desk = moderation_desk(&harness);

    let done = desk
        .execute(
            &context(staff(9, "rita")),
            ModerationCommand::Clear {
                amount: 10,
                author: Some(spammer()),
            },
        )
        .await
        .unwrap();
    assert_eq!(done.outcome.content.as_deref(), Some("Deleted **1** message(s) from spammer."));
    assert!(harness.platform.calls().iter().any(|c| matches!(
        c,
        PlatformCall::DeleteMessages { messages, .. } if messages == &vec![MessageId(3)]
    )));
}

#[tokio::test]
async fn lock_denies_everyone_send_messages() {
    let harness = Harness::new();
    let desk = moderation_desk(&harness);

    desk.execute(&context(staff(9, "rita")), ModerationCommand::Lock { reason: None })
        .await
        .unwrap();
    assert!(harness.platform.calls().iter().any(|c| matches!(
        c,
        PlatformCall::EditOverwrite { overwrite, .. }
            if overwrite.target_id() == GUILD.get() && overwrite.deny.contains(Permissions::SEND_MESSAGES)
    )));
}

#[tokio::test]
async fn timeout_sets_expiry_in_the_future() {
    let harness = Harness::new();
    let desk = moderation_desk(&harness);
    let before = chrono::Utc::now();

    desk.execute(
        &context(staff(9, "rita")),
        ModerationCommand::Timeout {
            target: spammer(),
            duration: "1h".to_string(),
            reason: Some("cool off".to_string()),
        },
    )
    .await
    .unwrap();
    let until = harness.platform.calls().iter().find_map(|c| match c {
        PlatformCall::Timeout { until, .. } => *until,
        _ => None,
    });
    let until = until.expect("timeout applied");
    assert!(until >= before + chrono::Duration::minutes(59));

    let logs = harness.store.recent_logs(1).await.unwrap();
    assert!(logs[0].details.contains("Duration: 1 hour(s)"));
}

fn info_desk(harness: &Harness) -> InfoDesk {
    InfoDesk::new(harness.platform_ops(), harness.config.clone())
}

fn test_guild() -> Guild {
    serde_json::from_value(serde_json::json!({
        "id": GUILD.to_string(),
        "name": "Georgia State Roleplay",
        "icon": "abc",
        "owner_id": "9",
        "premium_tier": 2,
        "premium_subscription_count": 14,
        "approximate_member_count": 1250,
        "roles": [
            {"id": GUILD.to_string(), "name": "@everyone", "position": 0},
            {"id": STAFF_ROLE.to_string(), "name": "Staff", "position": 4},
            {"id": VERIFIED_ROLE.to_string(), "name": "Verified", "position": 1}
        ]
    }))
    .unwrap()
}

fn only_embed(reply: &MessagePayload) -> &Embed {
    let embeds = reply.embeds.as_deref().unwrap_or_default();
    assert_eq!(embeds.len(), 1);
    &embeds[0]
}

fn field<'a>(embed: &'a Embed, name: &str) -> Option<&'a str> {
    embed.fields.iter().find(|f| f.name == name).map(|f| f.value.as_str())
}

#[tokio::test]
async fn user_info_includes_membership_details() {
    let harness = Harness::new();
    harness.platform.set_guild(test_guild(), 12);
    harness.platform.add_member(UserId(42), "bob", vec![VERIFIED_ROLE, STAFF_ROLE]);
    let joined = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    harness.platform.set_member_profile(UserId(42), Some("hash"), Some("Bobby"), joined);

    let reply = info_desk(&harness).user_info(Some(GUILD), UserId(42)).await.unwrap();
    let embed = only_embed(&reply);
    assert_eq!(embed.title.as_deref(), Some("User Information"));
    assert_eq!(
        embed.thumbnail.as_ref().unwrap().url,
        "https://cdn.discordapp.com/avatars/42/hash.png?size=256"
    );
    assert_eq!(field(embed, "Username"), Some(">>> bob"));
    assert_eq!(field(embed, "Joined Server"), Some(">>> <t:1709251200:R>"));
    assert_eq!(field(embed, "Nickname"), Some(">>> Bobby"));
    assert_eq!(field(embed, "Top Role"), Some(">>> <@&50>"));
    assert_eq!(field(embed, "Roles"), Some(">>> 2 roles"));
}

#[tokio::test]
async fn user_info_outside_guild_shows_account_only() {
    let harness = Harness::new();
    harness.platform.set_guild(test_guild(), 12);
    harness.platform.add_member(UserId(42), "bob", vec![]);
    harness.platform.fail("fetch_member", Failure::NotFound);

    let reply = info_desk(&harness).user_info(Some(GUILD), UserId(42)).await.unwrap();
    let embed = only_embed(&reply);
    assert_eq!(embed.fields.len(), 3);
    assert!(field(embed, "Account Created").unwrap().starts_with(">>> <t:"));
    assert_eq!(harness.platform.count(|c| matches!(c, PlatformCall::FetchGuild { .. })), 0);
}

#[tokio::test]
async fn server_info_reports_counts_and_boosts() {
    let harness = Harness::new();
    harness.platform.set_guild(test_guild(), 12);

    let reply = info_desk(&harness).server_info(GUILD).await.unwrap();
    let embed = only_embed(&reply);
    assert_eq!(field(embed, "Server Name"), Some(">>> Georgia State Roleplay"));
    assert_eq!(field(embed, "Owner"), Some(">>> <@9>"));
    assert_eq!(field(embed, "Members"), Some(">>> 1250"));
    assert_eq!(field(embed, "Channels"), Some(">>> 12"));
    assert_eq!(field(embed, "Roles"), Some(">>> 3"));
    assert_eq!(field(embed, "Boost Level"), Some(">>> Level 2"));
    assert_eq!(field(embed, "Boosts"), Some(">>> 14"));
    assert_eq!(
        embed.thumbnail.as_ref().unwrap().url,
        "https://cdn.discordapp.com/icons/1/abc.png?size=256"
    );
}

#[tokio::test]
async fn avatar_and_member_count_read_platform_state() {
    let harness = Harness::new();
    harness.platform.set_guild(test_guild(), 12);
    harness.platform.add_member(UserId(42), "bob", vec![]);
    let desk = info_desk(&harness);

    let avatar = desk.avatar(UserId(42)).await.unwrap();
    assert_eq!(only_embed(&avatar).title.as_deref(), Some("bob's Avatar"));
    assert_eq!(
        only_embed(&avatar).image.as_ref().unwrap().url,
        "https://cdn.discordapp.com/embed/avatars/0.png"
    );

    let count = desk.member_count(GUILD).await.unwrap();
    assert_eq!(
        only_embed(&count).description.as_deref(),
        Some(">>> **Georgia State Roleplay** has **1250** members.")
    );

    harness.platform.fail("fetch_user", Failure::NotFound);
    assert!(matches!(
        desk.avatar(UserId(42)).await.unwrap_err(),
        WorkflowError::External { .. }
    ));
}
