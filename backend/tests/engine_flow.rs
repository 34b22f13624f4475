//! End-to-end flows over the fully wired engine with in-memory collaborators.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use matchbot_backend::clock::ManualClock;
use matchbot_backend::config::EngineConfig;
use matchbot_backend::error::{EngineError, EngineResult};
use matchbot_backend::models::*;
use matchbot_backend::notify::RecordingNotifier;
use matchbot_backend::service::{Engine, EngineDeps, EngineEvent, MemoryRateLimiter};
use matchbot_backend::store::{MemoryStore, Store};

/// Memory store with switchable faults.
struct FlakyStore {
    inner: MemoryStore,
    fail_player_writes: AtomicBool,
    /// Club lookups fail, which stops a settlement right before the ledger.
    fail_club_lookups: AtomicBool,
    /// Participant writes that clear a finished participant's award fail.
    fail_award_clears: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_player_writes: AtomicBool::new(false),
            fail_club_lookups: AtomicBool::new(false),
            fail_award_clears: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_match(&self, m: &Match) -> EngineResult<()> {
        self.inner.insert_match(m).await
    }
    async fn get_match(&self, id: Uuid) -> EngineResult<Option<Match>> {
        self.inner.get_match(id).await
    }
    async fn save_match(&self, m: &Match) -> EngineResult<()> {
        self.inner.save_match(m).await
    }
    async fn list_matches(&self, statuses: &[MatchStatus]) -> EngineResult<Vec<Match>> {
        self.inner.list_matches(statuses).await
    }
    async fn get_player(&self, user_id: &str) -> EngineResult<Option<PlayerRecord>> {
        self.inner.get_player(user_id).await
    }
    async fn save_player(&self, player: &PlayerRecord) -> EngineResult<()> {
        if self.fail_player_writes.load(Ordering::SeqCst) {
            return Err(EngineError::database("players table unavailable"));
        }
        self.inner.save_player(player).await
    }
    async fn list_players(&self) -> EngineResult<Vec<PlayerRecord>> {
        self.inner.list_players().await
    }
    async fn refill_tickets(&self, user_id: &str, season_key: &str, tickets: u32) -> EngineResult<bool> {
        self.inner.refill_tickets(user_id, season_key, tickets).await
    }
    async fn get_challenge(&self, id: Uuid) -> EngineResult<Option<Challenge>> {
        self.inner.get_challenge(id).await
    }
    async fn save_challenge(&self, challenge: &Challenge) -> EngineResult<()> {
        self.inner.save_challenge(challenge).await
    }
    async fn list_challenges(&self, statuses: &[ChallengeStatus]) -> EngineResult<Vec<Challenge>> {
        self.inner.list_challenges(statuses).await
    }
    async fn get_participant(
        &self,
        challenge_id: Uuid,
        user_id: &str,
    ) -> EngineResult<Option<ChallengeParticipant>> {
        self.inner.get_participant(challenge_id, user_id).await
    }
    async fn save_participant(&self, participant: &ChallengeParticipant) -> EngineResult<()> {
        if self.fail_award_clears.load(Ordering::SeqCst)
            && participant.status == ParticipantStatus::Completed
            && participant.pending_award.is_none()
        {
            return Err(EngineError::database("participants table unavailable"));
        }
        self.inner.save_participant(participant).await
    }
    async fn list_participants(&self, challenge_id: Uuid) -> EngineResult<Vec<ChallengeParticipant>> {
        self.inner.list_participants(challenge_id).await
    }
    async fn find_participations(
        &self,
        user_id: &str,
        statuses: &[ParticipantStatus],
    ) -> EngineResult<Vec<ChallengeParticipant>> {
        self.inner.find_participations(user_id, statuses).await
    }
    async fn get_club(&self, id: Uuid) -> EngineResult<Option<Club>> {
        self.inner.get_club(id).await
    }
    async fn save_club(&self, club: &Club) -> EngineResult<()> {
        self.inner.save_club(club).await
    }
    async fn list_clubs(&self) -> EngineResult<Vec<Club>> {
        self.inner.list_clubs().await
    }
    async fn replace_club_if(&self, expected: &Club, updated: &Club) -> EngineResult<bool> {
        self.inner.replace_club_if(expected, updated).await
    }
    async fn find_club_of(&self, user_id: &str) -> EngineResult<Option<Club>> {
        if self.fail_club_lookups.load(Ordering::SeqCst) {
            return Err(EngineError::database("clubs table unavailable"));
        }
        self.inner.find_club_of(user_id).await
    }
    async fn get_abuse_metric(&self, user_id: &str) -> EngineResult<Option<AbuseMetric>> {
        self.inner.get_abuse_metric(user_id).await
    }
    async fn save_abuse_metric(&self, metric: &AbuseMetric) -> EngineResult<()> {
        self.inner.save_abuse_metric(metric).await
    }
    async fn list_abuse_metrics(&self) -> EngineResult<Vec<AbuseMetric>> {
        self.inner.list_abuse_metrics().await
    }
    async fn archive_abuse_metric(&self, archived: &ArchivedAbuseMetric) -> EngineResult<()> {
        self.inner.archive_abuse_metric(archived).await
    }
    async fn insert_dispute(&self, dispute: &DisputeRecord) -> EngineResult<()> {
        self.inner.insert_dispute(dispute).await
    }
    async fn list_disputes(&self) -> EngineResult<Vec<DisputeRecord>> {
        self.inner.list_disputes().await
    }
    async fn get_marker(&self, key: &str) -> EngineResult<Option<String>> {
        self.inner.get_marker(key).await
    }
    async fn claim_marker(&self, key: &str, value: &str) -> EngineResult<bool> {
        self.inner.claim_marker(key, value).await
    }
    async fn set_marker(&self, key: &str, value: &str) -> EngineResult<()> {
        self.inner.set_marker(key, value).await
    }
}

struct Harness {
    engine: Arc<Engine>,
    store: Arc<FlakyStore>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, hour, 0, 0).unwrap()
}

fn harness(start: DateTime<Utc>) -> Harness {
    let store = Arc::new(FlakyStore::new());
    let clock = Arc::new(ManualClock::new(start));
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = Arc::new(Engine::new(EngineDeps {
        store: store.clone(),
        notifier: notifier.clone(),
        moderation: None,
        rate_limiter: Arc::new(MemoryRateLimiter::new()),
        clock: clock.clone(),
        config: EngineConfig {
            admin_channel_id: "admin".into(),
            moderation_channel_id: "mods".into(),
            ..EngineConfig::default()
        },
    }));
    Harness {
        engine,
        store,
        clock,
        notifier,
    }
}

async fn play(h: &Harness, a: (&str, u32), b: (&str, u32)) -> EngineResult<SubmitOutcome> {
    let m = h.engine.reconciler.create_match(a.0, b.0).await?;
    h.engine.reconciler.submit_report(m.id, a.0, a.1, b.1).await?;
    h.engine.reconciler.submit_report(m.id, b.0, b.1, a.1).await
}

#[tokio::test]
async fn test_match_settles_into_rating_challenge_and_league() {
    let h = harness(at(2, 20, 12));
    let red = h.engine.league.create_club("Red").await.unwrap();
    let blue = h.engine.league.create_club("Blue").await.unwrap();
    h.engine.league.join_club("alice", red.id).await.unwrap();
    h.engine.league.join_club("bob", blue.id).await.unwrap();

    h.clock.set(at(3, 3, 12));
    let challenge = h
        .engine
        .challenges
        .create_challenge(CreateChallengeRequest {
            name: "March Gauntlet".into(),
            lives: 3,
            wins_required: 5,
            reward_badge: "gauntlet".into(),
            starts_at: None,
            ends_at: None,
        })
        .await
        .unwrap();
    h.engine.challenges.start_challenge(challenge.id).await.unwrap();
    h.engine.challenges.join_challenge("alice", challenge.id).await.unwrap();
    h.engine.challenges.join_challenge("bob", challenge.id).await.unwrap();
    h.engine.league.league_eligibility("alice").await.unwrap();

    let mut events = h.engine.subscribe();
    let outcome = play(&h, ("alice", 6), ("bob", 2)).await.unwrap();
    let SubmitOutcome::Resolved(event) = outcome else {
        panic!("expected the second report to resolve the match");
    };
    assert_eq!(event.outcome, Outcome::Match);

    let ctx = h.engine.context();
    let alice = ctx.load_player("alice").await.unwrap();
    let bob = ctx.load_player("bob").await.unwrap();
    assert_eq!(alice.rep, 75 + 12);
    assert_eq!(bob.rep, 0);
    assert_eq!(alice.tickets, 6);
    assert_eq!(bob.tickets, 6);

    let pa = h.store.get_participant(challenge.id, "alice").await.unwrap().unwrap();
    let pb = h.store.get_participant(challenge.id, "bob").await.unwrap().unwrap();
    assert_eq!(pa.wins, 1);
    assert_eq!(pb.lives, 2);

    let red = h.engine.league.get_club(red.id).await.unwrap();
    let blue = h.engine.league.get_club(blue.id).await.unwrap();
    assert_eq!(red.current_season_rep, 82);
    assert_eq!(blue.current_season_rep, 0);

    match events.try_recv().unwrap() {
        EngineEvent::MatchResolved(published) => assert_eq!(published, event),
        other => panic!("unexpected event {other:?}"),
    }
    let dms = h.notifier.messages_for("alice").await;
    assert!(dms.iter().any(|m| m.plain().contains("Victory (6-2)")));

    // Week one is over: trophies are minted and tickets refilled exactly once.
    h.clock.set(at(3, 8, 1));
    let report = h.engine.league.run_season_reset().await.unwrap().unwrap();
    assert_eq!(report.season_key, "2026-03");
    assert_eq!(report.trophies_awarded, 9);
    assert!(h.engine.league.run_season_reset().await.unwrap().is_none());

    let red = h.engine.league.get_club(red.id).await.unwrap();
    assert_eq!(red.current_season_rep, 0);
    assert_eq!(red.season_trophies.get("2026-03"), Some(&9));
    assert_eq!(ctx.load_player("alice").await.unwrap().tickets, 7);

    // Outside the window matches still rate but leave the ledger alone.
    play(&h, ("alice", 3), ("bob", 1)).await.unwrap();
    let red = h.engine.league.get_club(red.id).await.unwrap();
    assert_eq!(red.current_season_rep, 0);
    assert_eq!(ctx.load_player("alice").await.unwrap().tickets, 7);
}

#[tokio::test]
async fn test_store_failure_is_reported_and_repaired() {
    let h = harness(at(3, 15, 12));
    let m = h.engine.reconciler.create_match("alice", "bob").await.unwrap();
    h.engine.reconciler.submit_report(m.id, "alice", 4, 1).await.unwrap();

    h.store.fail_player_writes.store(true, Ordering::SeqCst);
    let err = h
        .engine
        .reconciler
        .submit_report(m.id, "bob", 1, 4)
        .await
        .unwrap_err();
    assert!(err.is_critical());

    let admin = h.notifier.channel_messages_for("admin").await;
    assert!(admin.iter().any(|msg| msg.plain().contains("submit_report")));
    let bob_dms = h.notifier.messages_for("bob").await;
    assert!(bob_dms.iter().any(|msg| msg.plain().contains("could not be processed")));

    // The outcome is already durable; only its effects are outstanding.
    let stored = h.engine.reconciler.get_match(m.id).await.unwrap();
    assert_eq!(stored.status, MatchStatus::Completed);
    assert!(stored.settlement_pending());
    assert!(h.store.get_player("alice").await.unwrap().is_none());

    h.store.fail_player_writes.store(false, Ordering::SeqCst);
    assert_eq!(h.engine.reconciler.repair_pending_settlements().await.unwrap(), 1);
    assert_eq!(h.engine.context().load_player("alice").await.unwrap().rep, 84);
    assert!(!h.engine.reconciler.get_match(m.id).await.unwrap().settlement_pending());

    assert_eq!(
        h.engine.reconciler.submit_report(m.id, "bob", 1, 4).await,
        Err(EngineError::AlreadyReported)
    );
}

async fn league_pair(h: &Harness) -> (Uuid, Uuid) {
    let red = h.engine.league.create_club("Red").await.unwrap();
    let blue = h.engine.league.create_club("Blue").await.unwrap();
    h.engine.league.join_club("alice", red.id).await.unwrap();
    h.engine.league.join_club("bob", blue.id).await.unwrap();
    (red.id, blue.id)
}

#[tokio::test]
async fn test_repair_after_a_newer_match_applies_each_effect_once() {
    let h = harness(at(2, 20, 12));
    let (red, _blue) = league_pair(&h).await;
    h.clock.set(at(3, 3, 12));
    let ctx = h.engine.context();

    h.store.fail_club_lookups.store(true, Ordering::SeqCst);
    let err = play(&h, ("alice", 6), ("bob", 2)).await.unwrap_err();
    assert!(err.is_critical());
    assert_eq!(ctx.load_player("alice").await.unwrap().rep, 87);
    h.store.fail_club_lookups.store(false, Ordering::SeqCst);

    h.clock.set(at(3, 3, 13));
    play(&h, ("alice", 3), ("bob", 1)).await.unwrap();
    let alice_before = ctx.load_player("alice").await.unwrap();
    let bob_before = ctx.load_player("bob").await.unwrap();
    assert!(alice_before.rep > 87);
    assert_eq!(h.engine.league.get_club(red).await.unwrap().current_season_rep, 76);

    assert_eq!(h.engine.reconciler.repair_pending_settlements().await.unwrap(), 1);
    let alice = ctx.load_player("alice").await.unwrap();
    assert_eq!(alice.rep, alice_before.rep);
    assert_eq!(alice.win_streak, alice_before.win_streak);
    assert_eq!(alice.tickets, 5);
    assert_eq!(ctx.load_player("bob").await.unwrap().rep, bob_before.rep);
    assert_eq!(h.engine.league.get_club(red).await.unwrap().current_season_rep, 76 + 82);
    assert!(alice.rated_matches.is_empty());
    assert!(alice.ticket_matches.is_empty());
}

#[tokio::test]
async fn test_award_is_paid_once_when_clearing_it_fails() {
    let h = harness(at(3, 15, 12));
    let challenge = h
        .engine
        .challenges
        .create_challenge(CreateChallengeRequest {
            name: "Sprint".into(),
            lives: 3,
            wins_required: 1,
            reward_badge: "sprint".into(),
            starts_at: None,
            ends_at: None,
        })
        .await
        .unwrap();
    h.engine.challenges.start_challenge(challenge.id).await.unwrap();
    h.engine.challenges.join_challenge("alice", challenge.id).await.unwrap();
    let ctx = h.engine.context();

    h.store.fail_award_clears.store(true, Ordering::SeqCst);
    let err = play(&h, ("alice", 4), ("bob", 1)).await.unwrap_err();
    assert!(err.is_critical());
    let paid = ctx.load_player("alice").await.unwrap();
    let stuck = h.store.get_participant(challenge.id, "alice").await.unwrap().unwrap();
    let bonus = stuck.pending_award.unwrap();
    assert!(bonus > 0);
    assert_eq!(paid.paid_awards, vec![challenge.id]);
    h.store.fail_award_clears.store(false, Ordering::SeqCst);

    assert_eq!(h.engine.reconciler.repair_pending_settlements().await.unwrap(), 1);
    assert_eq!(h.engine.challenges.settle_pending_awards().await.unwrap(), 0);
    let alice = ctx.load_player("alice").await.unwrap();
    assert_eq!(alice.rep, paid.rep);
    assert!(alice.paid_awards.is_empty());
    let p = h.store.get_participant(challenge.id, "alice").await.unwrap().unwrap();
    assert_eq!(p.pending_award, None);
    assert_eq!(p.completion_bonus, Some(bonus));
}

#[tokio::test]
async fn test_disputes_are_persisted_for_moderators() {
    let h = harness(at(3, 15, 12));
    let m = h.engine.reconciler.create_match("alice", "bob").await.unwrap();
    h.engine.reconciler.submit_report(m.id, "alice", 4, 1).await.unwrap();
    h.engine.reconciler.submit_report(m.id, "bob", 4, 1).await.unwrap();

    let disputes = h.store.list_disputes().await.unwrap();
    assert_eq!(disputes.len(), 1);
    assert_eq!(disputes[0].match_id, m.id);
    assert_eq!(disputes[0].reports.len(), 2);
    assert!(!h.notifier.channel_messages_for("mods").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_jobs_run_until_shutdown() {
    let h = harness(at(2, 20, 12));
    let club = h.engine.league.create_club("Red").await.unwrap();
    let mut stored = h.engine.league.get_club(club.id).await.unwrap();
    stored.current_season_rep = 41;
    h.store.save_club(&stored).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = h.engine.spawn_background_jobs(shutdown_rx);
    assert_eq!(jobs.len(), 4);

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    let club = h.engine.league.get_club(club.id).await.unwrap();
    assert_eq!(club.season_trophies.get("2026-02"), Some(&5));
    assert_eq!(club.current_season_rep, 0);

    shutdown_tx.send(true).unwrap();
    for job in jobs {
        tokio_test::assert_ok!(job.await);
    }
}
