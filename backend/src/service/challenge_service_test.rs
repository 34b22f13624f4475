use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LivesExhaustedPolicy;
use crate::error::EngineError;
use crate::models::*;
use crate::service::abuse_monitor::AbuseMonitor;
use crate::service::challenge_service::ChallengeService;
use crate::service::context::EngineEvent;
use crate::service::rate_limiter::MemoryRateLimiter;
use crate::service::test_support::{test_config, test_context, TestContext};
use crate::store::Store;

fn service_with(t: &TestContext) -> ChallengeService {
    let abuse = Arc::new(AbuseMonitor::new(t.ctx.clone(), Arc::new(MemoryRateLimiter::new())));
    ChallengeService::new(t.ctx.clone(), abuse)
}

fn request(name: &str, lives: u32, wins_required: u32) -> CreateChallengeRequest {
    CreateChallengeRequest {
        name: name.into(),
        lives,
        wins_required,
        reward_badge: format!("{} badge", name),
        starts_at: None,
        ends_at: None,
    }
}

async fn active_challenge(svc: &ChallengeService, lives: u32, wins_required: u32) -> Challenge {
    let c = svc.create_challenge(request("Gauntlet", lives, wins_required)).await.unwrap();
    svc.start_challenge(c.id).await.unwrap()
}

async fn rep_of(t: &TestContext, user: &str) -> i64 {
    t.ctx.load_player(user).await.unwrap().rep
}

#[tokio::test]
async fn test_join_errors() {
    let t = test_context(test_config());
    let svc = service_with(&t);

    let err = svc.join_challenge("u1", Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err, EngineError::ChallengeNotFound);

    let scheduled = svc.create_challenge(request("Later", 3, 5)).await.unwrap();
    let err = svc.join_challenge("u1", scheduled.id).await.unwrap_err();
    assert_eq!(err, EngineError::ChallengeNotActive);

    let c = svc.start_challenge(scheduled.id).await.unwrap();
    svc.join_challenge("u1", c.id).await.unwrap();
    let err = svc.join_challenge("u1", c.id).await.unwrap_err();
    assert_eq!(err, EngineError::AlreadyJoined);
}

#[tokio::test]
async fn test_starting_new_challenge_archives_previous_with_compensation() {
    let mut t = test_context(test_config());
    let svc = service_with(&t);
    let first = active_challenge(&svc, 3, 5).await;
    svc.join_challenge("u1", first.id).await.unwrap();
    svc.join_challenge("u2", first.id).await.unwrap();

    let second = svc.create_challenge(request("Second", 3, 5)).await.unwrap();
    svc.start_challenge(second.id).await.unwrap();

    let active = t.store.list_challenges(&[ChallengeStatus::Active]).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);
    assert_eq!(svc.get_challenge(first.id).await.unwrap().status, ChallengeStatus::Archived);

    for user in ["u1", "u2"] {
        let p = t.store.get_participant(first.id, user).await.unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Dnf);
        assert_eq!(p.pending_award, None);
        assert_eq!(rep_of(&t, user).await, 50);
        assert!(!t.notifier.messages_for(user).await.is_empty());
    }

    let mut forced = false;
    while let Ok(event) = t.events.try_recv() {
        if let EngineEvent::ChallengeArchived { challenge_id, forced: f } = event {
            assert_eq!(challenge_id, first.id);
            forced = f;
        }
    }
    assert!(forced);
}

#[tokio::test]
async fn test_loss_at_last_life_resets_progress() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 1, 5).await;
    svc.join_challenge("u1", c.id).await.unwrap();

    svc.record_match_result("u1", Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    let update = svc
        .record_match_result("u1", Uuid::new_v4(), MatchResultKind::Loss)
        .await
        .unwrap();
    assert_eq!(update, ProgressUpdate::Reset { attempts: 2 });

    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.status, ParticipantStatus::Active);
    assert_eq!(p.wins, 0);
    assert_eq!(p.lives, 1);
    assert_eq!(p.attempts, 2);
    assert_eq!(p.matches.len(), 2);
}

#[tokio::test]
async fn test_loss_at_last_life_fails_under_fail_policy() {
    let mut config = test_config();
    config.lives_exhausted_policy = LivesExhaustedPolicy::Fail;
    let t = test_context(config);
    let svc = service_with(&t);
    let c = active_challenge(&svc, 1, 5).await;
    svc.join_challenge("u1", c.id).await.unwrap();

    let update = svc
        .record_match_result("u1", Uuid::new_v4(), MatchResultKind::Loss)
        .await
        .unwrap();
    assert!(matches!(update, ProgressUpdate::Failed { .. }));
    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.status, ParticipantStatus::Failed);
    assert_eq!(p.lives, 0);
}

#[tokio::test]
async fn test_completion_happens_exactly_once() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 2).await;
    svc.join_challenge("u1", c.id).await.unwrap();

    svc.record_match_result("u1", Uuid::new_v4(), MatchResultKind::Tie).await.unwrap();
    svc.record_match_result("u1", Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    let last = Uuid::new_v4();
    let update = svc.record_match_result("u1", last, MatchResultKind::Win).await.unwrap();
    let ProgressUpdate::Completed(event) = update else {
        panic!("expected completion, got {update:?}");
    };
    // 100 base + 50 speed + 30 lives + 50 win rate (ties excluded)
    assert_eq!(event.bonus, 230);
    assert_eq!(event.badge, "Gauntlet badge");
    assert_eq!(rep_of(&t, "u1").await, 230);

    let dup = svc.record_match_result("u1", last, MatchResultKind::Win).await.unwrap();
    assert_eq!(dup, ProgressUpdate::AlreadyRecorded);
    let late = svc
        .record_match_result("u1", Uuid::new_v4(), MatchResultKind::Win)
        .await
        .unwrap();
    assert_eq!(late, ProgressUpdate::NotParticipating);

    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.status, ParticipantStatus::Completed);
    assert_eq!(p.wins, 2);
    assert_eq!(p.completion_bonus, Some(230));
    assert_eq!(rep_of(&t, "u1").await, 230);
}

#[tokio::test]
async fn test_unpaid_completion_award_is_settled_on_replay() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 1).await;
    let mut p = svc.join_challenge("u1", c.id).await.unwrap();

    // Simulate a crash after the completion was saved but before it was paid.
    let match_id = Uuid::new_v4();
    p.wins = 1;
    p.status = ParticipantStatus::Completed;
    p.completed_at = Some(t.clock.now());
    p.completion_bonus = Some(180);
    p.pending_award = Some(180);
    p.matches.push(MatchEntry {
        match_id,
        result: MatchResultKind::Win,
        recorded_at: t.clock.now(),
    });
    t.store.save_participant(&p).await.unwrap();

    let update = svc.record_match_result("u1", match_id, MatchResultKind::Win).await.unwrap();
    assert_eq!(update, ProgressUpdate::AlreadyRecorded);
    assert_eq!(rep_of(&t, "u1").await, 180);
    assert_eq!(svc.settle_pending_awards().await.unwrap(), 0);
}

#[tokio::test]
async fn test_award_paid_before_a_failed_participant_save_is_not_paid_again() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 1).await;
    let mut p = svc.join_challenge("u1", c.id).await.unwrap();

    // The rep went out, then the write clearing pending_award failed.
    p.status = ParticipantStatus::Completed;
    p.completion_bonus = Some(180);
    p.pending_award = Some(180);
    t.store.save_participant(&p).await.unwrap();
    t.ctx.pay_award("u1", c.id, 180, "challenge award").await.unwrap();
    assert_eq!(rep_of(&t, "u1").await, 180);

    assert_eq!(svc.settle_pending_awards().await.unwrap(), 1);
    assert_eq!(rep_of(&t, "u1").await, 180);
    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.pending_award, None);
    assert!(t.ctx.load_player("u1").await.unwrap().paid_awards.is_empty());

    assert_eq!(svc.settle_pending_awards().await.unwrap(), 0);
    assert_eq!(rep_of(&t, "u1").await, 180);
}

#[tokio::test]
async fn test_hypercharge_multiplies_completion_bonus_until_expiry() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 2, 1).await;
    svc.apply_hypercharge(c.id, 50, "2h").await.unwrap();
    svc.join_challenge("u1", c.id).await.unwrap();
    svc.join_challenge("u2", c.id).await.unwrap();

    assert_eq!(svc.hypercharge_for_user("u1").await.unwrap(), Some(0.5));
    let update = svc.record_match_result("u1", Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    // (100 + 50 + 20 + 50) * 1.5
    assert!(matches!(update, ProgressUpdate::Completed(ref e) if e.bonus == 330));

    t.clock.advance(Duration::hours(2));
    assert_eq!(svc.hypercharge_for_user("u2").await.unwrap(), None);
    let update = svc.record_match_result("u2", Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    assert!(matches!(update, ProgressUpdate::Completed(ref e) if e.bonus == 220));
}

#[tokio::test]
async fn test_hypercharge_validation_and_overwrite() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 5).await;

    assert!(matches!(
        svc.apply_hypercharge(c.id, 50, "soon").await,
        Err(EngineError::InvalidDuration(_))
    ));
    assert_eq!(
        svc.apply_hypercharge(c.id, 500, "1h").await,
        Err(EngineError::InvalidMultiplier(500))
    );

    svc.apply_hypercharge(c.id, 20, "1d").await.unwrap();
    let c = svc.apply_hypercharge(c.id, 80, "3h").await.unwrap();
    let charge = c.hypercharge.unwrap();
    assert!((charge.multiplier - 0.8).abs() < f64::EPSILON);
    assert_eq!(charge.expires_at, t.clock.now() + Duration::hours(3));
}

#[tokio::test]
async fn test_match_against_inactive_challenge_fails_participant() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 5).await;
    svc.join_challenge("u1", c.id).await.unwrap();

    // Challenge archived underneath an active participant.
    let mut archived = svc.get_challenge(c.id).await.unwrap();
    archived.status = ChallengeStatus::Archived;
    t.store.save_challenge(&archived).await.unwrap();

    let update = svc.record_match_result("u1", Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    assert!(matches!(update, ProgressUpdate::Failed { .. }));
    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.status, ParticipantStatus::Failed);
    assert!(p.matches.is_empty());
    assert_eq!(p.wins, 0);
}

#[tokio::test]
async fn test_pause_resume_mirrors_participants() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 5).await;
    svc.join_challenge("u1", c.id).await.unwrap();

    svc.pause_challenge(c.id).await.unwrap();
    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.status, ParticipantStatus::Paused);
    let update = svc.record_match_result("u1", Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    assert_eq!(update, ProgressUpdate::NotParticipating);

    assert!(matches!(
        svc.pause_challenge(c.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    svc.resume_challenge(c.id).await.unwrap();
    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.status, ParticipantStatus::Active);

    svc.end_challenge(c.id).await.unwrap();
    let p = t.store.get_participant(c.id, "u1").await.unwrap().unwrap();
    assert_eq!(p.status, ParticipantStatus::Dnf);
    // A normal end pays no compensation.
    assert_eq!(rep_of(&t, "u1").await, 0);
    assert!(matches!(
        svc.resume_challenge(c.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_leaderboard_ordering_and_paging() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 2).await;

    for i in 0..12 {
        svc.join_challenge(&format!("p{:02}", i), c.id).await.unwrap();
    }
    // p05 finishes first, p03 second, p07 has one win.
    for user in ["p05", "p05", "p03", "p07", "p03"] {
        t.clock.advance(Duration::minutes(1));
        svc.record_match_result(user, Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    }
    svc.record_match_result("p01", Uuid::new_v4(), MatchResultKind::Loss).await.unwrap();

    let page1 = svc.generate_leaderboard(c.id, 1).await.unwrap();
    assert_eq!(page1.total_pages, 2);
    assert_eq!(page1.total_participants, 12);
    assert_eq!(page1.entries.len(), 10);
    let order: Vec<&str> = page1.entries.iter().take(3).map(|e| e.user_id.as_str()).collect();
    assert_eq!(order, vec!["p05", "p03", "p07"]);
    // equal wins and lives fall back to user id; p01 lost a life
    assert_eq!(page1.entries.last().map(|e| e.user_id.as_str()), Some("p10"));

    let page2 = svc.generate_leaderboard(c.id, 2).await.unwrap();
    assert_eq!(page2.entries.len(), 2);
    assert_eq!(page2.entries[0].rank, 11);
    assert_eq!(page2.entries[1].user_id, "p01");

    let stats = svc.calculate_challenge_stats(c.id).await.unwrap();
    assert_eq!(stats.total_participants, 12);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.active, 10);
    assert_eq!(stats.total_matches, 6);
    assert!((stats.completion_rate - 2.0 / 12.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_cached_views_are_invalidated_by_progress() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let c = active_challenge(&svc, 3, 5).await;
    svc.join_challenge("u1", c.id).await.unwrap();

    assert_eq!(svc.calculate_challenge_stats(c.id).await.unwrap().total_matches, 0);
    svc.record_match_result("u1", Uuid::new_v4(), MatchResultKind::Win).await.unwrap();
    assert_eq!(svc.calculate_challenge_stats(c.id).await.unwrap().total_matches, 1);
    assert_eq!(svc.generate_leaderboard(c.id, 1).await.unwrap().entries[0].wins, 1);
}

#[tokio::test]
async fn test_schedule_starts_and_ends_challenges() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    let now = t.clock.now();

    let mut req = request("Timed", 3, 5);
    req.starts_at = Some(now + Duration::minutes(5));
    req.ends_at = Some(now + Duration::hours(1));
    let c = svc.create_challenge(req).await.unwrap();

    assert_eq!(svc.run_schedule().await.unwrap(), (0, 0));
    t.clock.advance(Duration::minutes(6));
    assert_eq!(svc.run_schedule().await.unwrap(), (1, 0));
    assert_eq!(svc.get_challenge(c.id).await.unwrap().status, ChallengeStatus::Active);

    svc.extend_challenge(c.id, "1h").await.unwrap();
    t.clock.advance(Duration::minutes(60));
    assert_eq!(svc.run_schedule().await.unwrap(), (0, 0));
    t.clock.advance(Duration::minutes(60));
    assert_eq!(svc.run_schedule().await.unwrap(), (0, 1));
    assert_eq!(svc.get_challenge(c.id).await.unwrap().status, ChallengeStatus::Archived);
}

#[tokio::test]
async fn test_create_rejects_bad_definitions() {
    let t = test_context(test_config());
    let svc = service_with(&t);
    assert!(matches!(
        svc.create_challenge(request("", 3, 5)).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        svc.create_challenge(request("Zero", 0, 5)).await,
        Err(EngineError::Validation(_))
    ));
    let mut req = request("Backwards", 3, 5);
    req.starts_at = Some(Utc::now());
    req.ends_at = Some(Utc::now() - Duration::hours(1));
    assert!(matches!(svc.create_challenge(req).await, Err(EngineError::Validation(_))));
}
