use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::locks::user_key;
use crate::models::*;
use crate::notify::{Embed, Message};
use crate::service::context::{EngineEvent, ServiceContext};

pub const SEASON_LAST_DAY: u32 = 7;
pub const WIN_BASE_GAIN: i64 = 70;
pub const RUN_DIFF_FACTOR: i64 = 3;
pub const RUN_DIFF_CAP: i64 = 30;
pub const MAX_GAIN: i64 = 100;
pub const MAX_LOSS: i64 = 10;
pub const RESET_MARKER: &str = "club_league_reset";

const MEMBERSHIP_LOCK: &str = "clubs:membership";

fn club_key(id: &Uuid) -> String {
    format!("club:{}", id)
}

fn offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.clamp(-23, 23) * 3600).unwrap_or(Utc.fix())
}

fn local_midnight(tz: &FixedOffset, year: i32, month: u32, day: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| tz.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Season window containing (or following) `now`. Purely date-derived.
pub fn season_info(now: DateTime<Utc>, utc_offset_hours: i32) -> SeasonInfo {
    let tz = offset(utc_offset_hours);
    let local = now.with_timezone(&tz);
    let (year, month) = (local.year(), local.month());
    let (ny, nm) = next_month(year, month);

    SeasonInfo {
        season_key: format!("{:04}-{:02}", year, month),
        active: local.day() <= SEASON_LAST_DAY,
        starts_at: local_midnight(&tz, year, month, 1),
        ends_at: local_midnight(&tz, year, month, SEASON_LAST_DAY + 1),
        next_starts_at: local_midnight(&tz, ny, nm, 1),
    }
}

pub fn is_season_active(now: DateTime<Utc>, utc_offset_hours: i32) -> bool {
    season_info(now, utc_offset_hours).active
}

/// Club rep won by the winner's club.
pub fn winner_gain(run_diff: u32) -> i64 {
    (WIN_BASE_GAIN + (run_diff as i64 * RUN_DIFF_FACTOR).min(RUN_DIFF_CAP)).min(MAX_GAIN)
}

/// Club rep lost by the loser's club; never takes the club below zero.
pub fn loser_loss(current_rep: i64) -> i64 {
    MAX_LOSS.min(current_rep.max(0))
}

/// Trophies earned from a season's rep.
pub fn trophies_for(rep: i64) -> i64 {
    (rep.max(0) + 9) / 10
}

/// One side of a reconciled match as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeagueSide {
    pub user_id: String,
    pub score: u32,
}

/// Seasonal club-vs-club ledger with a ticket economy.
pub struct ClubLeagueService {
    ctx: ServiceContext,
}

impl ClubLeagueService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn current_season_info(&self) -> SeasonInfo {
        season_info(self.ctx.clock.now(), self.ctx.config.season_utc_offset_hours)
    }

    // =============================================================================
    // CLUBS
    // =============================================================================

    pub async fn create_club(&self, name: &str) -> EngineResult<Club> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("club name must not be empty".into()));
        }
        let club = Club::new(name, self.ctx.clock.now());
        self.ctx.store.save_club(&club).await?;
        info!(club_id = %club.id, name, "Club created");
        Ok(club)
    }

    pub async fn get_club(&self, club_id: Uuid) -> EngineResult<Club> {
        self.ctx
            .store
            .get_club(club_id)
            .await?
            .ok_or_else(|| EngineError::ClubIneligible("club not found".into()))
    }

    pub async fn join_club(&self, user_id: &str, club_id: Uuid) -> EngineResult<Club> {
        let _membership = self.ctx.locks.lock(MEMBERSHIP_LOCK).await;
        if let Some(existing) = self.ctx.store.find_club_of(user_id).await? {
            return Err(EngineError::ClubIneligible(format!(
                "already a member of {}",
                existing.name
            )));
        }

        let _guard = self.ctx.locks.lock(&club_key(&club_id)).await;
        let mut club = self.get_club(club_id).await?;
        if club.is_full() {
            return Err(EngineError::ClubIneligible(format!(
                "club is full ({} members)",
                MAX_CLUB_MEMBERS
            )));
        }
        club.members.push(ClubMember {
            user_id: user_id.to_string(),
            joined_at: self.ctx.clock.now(),
        });
        self.ctx.store.save_club(&club).await?;
        info!(club_id = %club_id, user_id, members = club.members.len(), "Joined club");
        Ok(club)
    }

    pub async fn leave_club(&self, user_id: &str) -> EngineResult<Club> {
        let _membership = self.ctx.locks.lock(MEMBERSHIP_LOCK).await;
        let club = self
            .ctx
            .store
            .find_club_of(user_id)
            .await?
            .ok_or_else(|| EngineError::ClubIneligible("not in a club".into()))?;

        let _guard = self.ctx.locks.lock(&club_key(&club.id)).await;
        let mut club = self.get_club(club.id).await?;
        club.members.retain(|m| m.user_id != user_id);
        self.ctx.store.save_club(&club).await?;
        info!(club_id = %club.id, user_id, "Left club");
        Ok(club)
    }

    /// Whether `user_id` could currently play a league match.
    pub async fn league_eligibility(&self, user_id: &str) -> EngineResult<()> {
        let season = self.current_season_info();
        if !season.active {
            return Err(EngineError::ClubIneligible("club league season is not active".into()));
        }
        let club = self
            .ctx
            .store
            .find_club_of(user_id)
            .await?
            .ok_or_else(|| EngineError::ClubIneligible("not in a club".into()))?;
        check_not_hopping(&club, user_id, &season)?;
        if self.ctx.load_player(user_id).await?.tickets == 0 {
            return Err(EngineError::InsufficientTickets);
        }
        Ok(())
    }

    // =============================================================================
    // MATCHES
    // =============================================================================

    /// Feeds a reconciled match into the ledger of the season `reconciled_at`
    /// falls in. Replays of the same match are detected per player (tickets)
    /// and per club (rep), so calling this again after a partial failure
    /// completes the work without double-applying.
    pub async fn record_match(
        &self,
        match_id: Uuid,
        reconciled_at: DateTime<Utc>,
        a: &LeagueSide,
        b: &LeagueSide,
    ) -> EngineResult<LeagueResult> {
        let season = season_info(reconciled_at, self.ctx.config.season_utc_offset_hours);
        if !season.active {
            return Ok(LeagueResult::SeasonInactive);
        }

        let (club_a, club_b) = match (
            self.ctx.store.find_club_of(&a.user_id).await?,
            self.ctx.store.find_club_of(&b.user_id).await?,
        ) {
            (Some(ca), Some(cb)) => (ca, cb),
            _ => {
                return Ok(LeagueResult::NotApplicable {
                    reason: "both players must be in a club".into(),
                })
            }
        };
        if club_a.id == club_b.id {
            return Ok(LeagueResult::NotApplicable {
                reason: "players are in the same club".into(),
            });
        }
        let closed = Some(season.season_key.as_str());
        if club_a.last_reset_season.as_deref() == closed || club_b.last_reset_season.as_deref() == closed {
            warn!(match_id = %match_id, season = %season.season_key, "League match arrived after the season was converted");
            return Ok(LeagueResult::SeasonInactive);
        }

        let had_tickets = self.spend_tickets(match_id, &[&a.user_id, &b.user_id]).await?;
        let tickets_spent: Vec<String> = had_tickets
            .iter()
            .filter(|(_, had)| *had)
            .map(|(user, _)| user.clone())
            .collect();

        let disqualification = if had_tickets.iter().any(|(_, had)| !had) {
            Some(EngineError::InsufficientTickets.to_string())
        } else {
            check_not_hopping(&club_a, &a.user_id, &season)
                .and_then(|_| check_not_hopping(&club_b, &b.user_id, &season))
                .err()
                .map(|e| e.to_string())
        };
        if let Some(reason) = disqualification {
            info!(match_id = %match_id, reason = %reason, "League match disqualified");
            return Ok(LeagueResult::Disqualified { reason, tickets_spent });
        }

        if a.score == b.score {
            return Ok(LeagueResult::Tie);
        }
        let (winner, loser, winner_club, loser_club) = if a.score > b.score {
            (a, b, club_a.id, club_b.id)
        } else {
            (b, a, club_b.id, club_a.id)
        };
        let gain = winner_gain(winner.score - loser.score);

        let _guards = self
            .ctx
            .locks
            .lock_many(&[club_key(&winner_club), club_key(&loser_club)])
            .await;
        let mut wc = self.get_club(winner_club).await?;
        let mut lc = self.get_club(loser_club).await?;

        let winner_done = wc.season_matches.contains(&match_id);
        let loser_done = lc.season_matches.contains(&match_id);
        if winner_done && loser_done {
            debug!(match_id = %match_id, "League match already credited");
            return Ok(LeagueResult::AlreadyCredited);
        }

        let loss = loser_loss(lc.current_season_rep);
        if !winner_done {
            wc.current_season_rep += gain;
            wc.season_matches.push(match_id);
            self.ctx.store.save_club(&wc).await?;
        }
        if !loser_done {
            lc.current_season_rep -= loss;
            lc.season_matches.push(match_id);
            self.ctx.store.save_club(&lc).await?;
        }

        info!(
            match_id = %match_id,
            winner_club = %winner_club,
            loser_club = %loser_club,
            gain,
            loss,
            "League match credited"
        );
        Ok(LeagueResult::Credited {
            winner_club,
            loser_club,
            winner_gain: gain,
            loser_loss: loss,
        })
    }

    /// Takes one ticket from each player holding any. Returns whether each
    /// player held a ticket for this match.
    async fn spend_tickets(&self, match_id: Uuid, users: &[&String]) -> EngineResult<Vec<(String, bool)>> {
        let keys: Vec<String> = users.iter().map(|u| user_key(u)).collect();
        let _guards = self.ctx.locks.lock_many(&keys).await;

        let mut out = Vec::with_capacity(users.len());
        for user in users {
            let mut player = self.ctx.load_player(user).await?;
            if player.ticket_matches.contains(&match_id) {
                out.push((user.to_string(), true));
                continue;
            }
            if player.tickets == 0 {
                out.push((user.to_string(), false));
                continue;
            }
            player.tickets -= 1;
            player.ticket_matches.push(match_id);
            self.ctx.store.save_player(&player).await?;
            debug!(user_id = %user, tickets = player.tickets, "Ticket spent");
            out.push((user.to_string(), true));
        }
        Ok(out)
    }

    // =============================================================================
    // SEASON RESET
    // =============================================================================

    /// Converts the finished season's club rep into trophies and refills tickets.
    ///
    /// Runs only after the season window closed and only once no match of that
    /// season still waits for its settlement. Each club is converted with a
    /// compare-and-swap write and each refill is conditional on the player's
    /// `last_reset_season`, so two instances racing through the same season
    /// apply every conversion exactly once. [`RESET_MARKER`] records the
    /// finished run.
    pub async fn run_season_reset(&self) -> EngineResult<Option<SeasonResetReport>> {
        let season = self.current_season_info();
        if season.active {
            return Ok(None);
        }
        let key = season.season_key.clone();
        if self.ctx.store.get_marker(RESET_MARKER).await?.as_deref() == Some(key.as_str()) {
            debug!(season = %key, "Season reset already done");
            return Ok(None);
        }
        let unsettled = self.unsettled_season_matches(&season).await?;
        if unsettled > 0 {
            warn!(season = %key, unsettled, "Season reset deferred until pending settlements finish");
            return Ok(None);
        }

        info!(season = %key, "Starting club league season reset");
        let mut report = SeasonResetReport {
            season_key: key.clone(),
            clubs_converted: 0,
            trophies_awarded: 0,
            players_refilled: 0,
        };

        for club in self.ctx.store.list_clubs().await? {
            let _guard = self.ctx.locks.lock(&club_key(&club.id)).await;
            if let Some(trophies) = self.convert_club(club.id, &key).await? {
                report.clubs_converted += 1;
                report.trophies_awarded += trophies;
            }
        }

        for player in self.ctx.store.list_players().await? {
            let _guard = self.ctx.locks.lock(&user_key(&player.user_id)).await;
            if self
                .ctx
                .store
                .refill_tickets(&player.user_id, &key, self.ctx.config.season_tickets)
                .await?
            {
                report.players_refilled += 1;
            }
        }

        if let Err(e) = self.ctx.store.set_marker(RESET_MARKER, &key).await {
            warn!(season = %key, error = %e, "Season reset applied but marker not saved");
            return Err(e);
        }

        info!(
            season = %key,
            clubs = report.clubs_converted,
            trophies = report.trophies_awarded,
            players = report.players_refilled,
            "Club league season reset complete"
        );
        self.ctx.publish(EngineEvent::SeasonReset(report.clone()));
        let embed = Embed::new("Club league season closed", format!("Season {} is over.", key))
            .field("Clubs", report.clubs_converted)
            .field("Trophies awarded", report.trophies_awarded);
        self.ctx.notifications.admin(Message::Embed(embed)).await;
        Ok(Some(report))
    }

    /// Completed matches of `season` whose league effects may still be outstanding.
    async fn unsettled_season_matches(&self, season: &SeasonInfo) -> EngineResult<usize> {
        let completed = self.ctx.store.list_matches(&[MatchStatus::Completed]).await?;
        Ok(completed
            .iter()
            .filter(|m| m.settlement_pending())
            .filter_map(|m| m.outcome.as_ref())
            .filter(|o| o.reconciled_at >= season.starts_at && o.reconciled_at < season.ends_at)
            .count())
    }

    /// Mints one club's trophies for `season_key`. Returns `None` when the
    /// club was already converted, by this run or a concurrent one.
    async fn convert_club(&self, club_id: Uuid, season_key: &str) -> EngineResult<Option<i64>> {
        loop {
            let Some(current) = self.ctx.store.get_club(club_id).await? else {
                return Ok(None);
            };
            if current.last_reset_season.as_deref() == Some(season_key) {
                return Ok(None);
            }
            let trophies = trophies_for(current.current_season_rep);
            let mut converted = current.clone();
            converted.total_trophies += trophies;
            converted.season_trophies.insert(season_key.to_string(), trophies);
            converted.current_season_rep = 0;
            converted.season_matches.clear();
            converted.last_reset_season = Some(season_key.to_string());
            if self.ctx.store.replace_club_if(&current, &converted).await? {
                debug!(club_id = %club_id, trophies, "Club season converted");
                return Ok(Some(trophies));
            }
            debug!(club_id = %club_id, "Club changed during conversion, retrying");
        }
    }
}

fn check_not_hopping(club: &Club, user_id: &str, season: &SeasonInfo) -> EngineResult<()> {
    match club.member(user_id) {
        Some(member) if member.joined_at > season.starts_at => Err(EngineError::ClubIneligible(
            "joined the club after the season started".into(),
        )),
        Some(_) => Ok(()),
        None => Err(EngineError::ClubIneligible("not in a club".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::locks::KeyedLocks;
    use crate::service::test_support::{test_config, test_context, TestContext};
    use crate::store::Store;
    use chrono::Duration;
    use std::sync::Arc;

    fn side(user: &str, score: u32) -> LeagueSide {
        LeagueSide {
            user_id: user.into(),
            score,
        }
    }

    async fn setup() -> (TestContext, ClubLeagueService, Club, Club) {
        let t = test_context(test_config());
        // Members join before the March season starts.
        t.clock.set(Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap());
        let league = ClubLeagueService::new(t.ctx.clone());
        let red = league.create_club("Red").await.unwrap();
        let blue = league.create_club("Blue").await.unwrap();
        league.join_club("alice", red.id).await.unwrap();
        league.join_club("bob", blue.id).await.unwrap();
        t.clock.set(Utc.with_ymd_and_hms(2026, 3, 3, 18, 0, 0).unwrap());
        (t, league, red, blue)
    }

    #[test]
    fn test_season_window() {
        let day7 = Utc.with_ymd_and_hms(2026, 3, 7, 23, 59, 59).unwrap();
        let day8 = Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap();
        assert!(is_season_active(day7, 0));
        assert!(!is_season_active(day8, 0));

        // 8th at 00:30 UTC is still the 7th at UTC-5
        assert!(is_season_active(day8 + Duration::minutes(30), -5));

        let info = season_info(Utc.with_ymd_and_hms(2026, 12, 15, 0, 0, 0).unwrap(), 0);
        assert_eq!(info.season_key, "2026-12");
        assert!(!info.active);
        assert_eq!(info.ends_at, Utc.with_ymd_and_hms(2026, 12, 8, 0, 0, 0).unwrap());
        assert_eq!(info.next_starts_at, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_gain_and_loss_formulas() {
        assert_eq!(winner_gain(0), 70);
        assert_eq!(winner_gain(5), 85);
        assert_eq!(winner_gain(50), 100);
        assert_eq!(loser_loss(235), 10);
        assert_eq!(loser_loss(4), 4);
        assert_eq!(loser_loss(0), 0);
        assert_eq!(trophies_for(235), 24);
        assert_eq!(trophies_for(230), 23);
        assert_eq!(trophies_for(0), 0);
    }

    #[tokio::test]
    async fn test_credit_spends_tickets_and_is_replay_safe() {
        let (t, league, red, blue) = setup().await;
        let match_id = Uuid::new_v4();

        let result = league
            .record_match(match_id, t.clock.now(), &side("alice", 7), &side("bob", 3))
            .await
            .unwrap();
        assert_eq!(
            result,
            LeagueResult::Credited {
                winner_club: red.id,
                loser_club: blue.id,
                winner_gain: 82,
                loser_loss: 0,
            }
        );

        let again = league
            .record_match(match_id, t.clock.now(), &side("alice", 7), &side("bob", 3))
            .await
            .unwrap();
        assert_eq!(again, LeagueResult::AlreadyCredited);

        assert_eq!(t.store.get_club(red.id).await.unwrap().unwrap().current_season_rep, 82);
        assert_eq!(t.store.get_club(blue.id).await.unwrap().unwrap().current_season_rep, 0);
        assert_eq!(t.store.get_player("alice").await.unwrap().unwrap().tickets, 6);
        assert_eq!(t.store.get_player("bob").await.unwrap().unwrap().tickets, 6);
    }

    #[tokio::test]
    async fn test_club_rep_never_negative() {
        let (t, league, _red, blue) = setup().await;
        let mut b = t.store.get_club(blue.id).await.unwrap().unwrap();
        b.current_season_rep = 15;
        t.store.save_club(&b).await.unwrap();

        for _ in 0..3 {
            league
                .record_match(Uuid::new_v4(), t.clock.now(), &side("alice", 2), &side("bob", 1))
                .await
                .unwrap();
        }
        assert_eq!(t.store.get_club(blue.id).await.unwrap().unwrap().current_season_rep, 0);
    }

    #[tokio::test]
    async fn test_hopper_disqualified_but_tickets_still_spent() {
        let (t, league, red, _blue) = setup().await;
        league.leave_club("alice").await.unwrap();
        league.join_club("alice", red.id).await.unwrap();

        let result = league
            .record_match(Uuid::new_v4(), t.clock.now(), &side("alice", 5), &side("bob", 1))
            .await
            .unwrap();
        match result {
            LeagueResult::Disqualified { reason, tickets_spent } => {
                assert!(reason.contains("after the season started"));
                assert_eq!(tickets_spent.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(t.store.get_player("alice").await.unwrap().unwrap().tickets, 6);
        assert_eq!(t.store.get_club(red.id).await.unwrap().unwrap().current_season_rep, 0);
    }

    #[tokio::test]
    async fn test_out_of_tickets_disqualifies() {
        let (t, league, _red, _blue) = setup().await;
        let mut bob = t.ctx.load_player("bob").await.unwrap();
        bob.tickets = 0;
        t.store.save_player(&bob).await.unwrap();

        let result = league
            .record_match(Uuid::new_v4(), t.clock.now(), &side("alice", 5), &side("bob", 1))
            .await
            .unwrap();
        assert!(matches!(result, LeagueResult::Disqualified { .. }));
        assert_eq!(t.store.get_player("alice").await.unwrap().unwrap().tickets, 6);
        assert_eq!(t.store.get_player("bob").await.unwrap().unwrap().tickets, 0);
        assert_eq!(league.league_eligibility("bob").await, Err(EngineError::InsufficientTickets));
    }

    #[tokio::test]
    async fn test_outside_season_and_same_club() {
        let (t, league, red, _blue) = setup().await;
        league.join_club("carol", red.id).await.unwrap();
        let result = league
            .record_match(Uuid::new_v4(), t.clock.now(), &side("alice", 5), &side("carol", 1))
            .await
            .unwrap();
        assert!(matches!(result, LeagueResult::NotApplicable { .. }));

        t.clock.set(Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());
        let result = league
            .record_match(Uuid::new_v4(), t.clock.now(), &side("alice", 5), &side("bob", 1))
            .await
            .unwrap();
        assert_eq!(result, LeagueResult::SeasonInactive);
        assert_eq!(t.ctx.load_player("alice").await.unwrap().tickets, 7);
    }

    #[tokio::test]
    async fn test_late_settlement_counts_for_its_own_season() {
        let (t, league, red, _blue) = setup().await;
        let last_minute = Utc.with_ymd_and_hms(2026, 3, 7, 23, 59, 0).unwrap();
        t.clock.set(Utc.with_ymd_and_hms(2026, 3, 8, 0, 10, 0).unwrap());

        let result = league
            .record_match(Uuid::new_v4(), last_minute, &side("alice", 4), &side("bob", 1))
            .await
            .unwrap();
        assert!(matches!(result, LeagueResult::Credited { winner_gain: 79, .. }));
        assert_eq!(t.store.get_club(red.id).await.unwrap().unwrap().current_season_rep, 79);

        // A match reconciled after the window closed never counts.
        let result = league
            .record_match(Uuid::new_v4(), t.clock.now(), &side("alice", 4), &side("bob", 1))
            .await
            .unwrap();
        assert_eq!(result, LeagueResult::SeasonInactive);
    }

    #[tokio::test]
    async fn test_converted_season_takes_no_more_credit() {
        let (t, league, red, _blue) = setup().await;
        let in_season = t.clock.now();
        t.clock.set(Utc.with_ymd_and_hms(2026, 3, 8, 0, 1, 0).unwrap());
        league.run_season_reset().await.unwrap().unwrap();

        let result = league
            .record_match(Uuid::new_v4(), in_season, &side("alice", 4), &side("bob", 1))
            .await
            .unwrap();
        assert_eq!(result, LeagueResult::SeasonInactive);
        assert_eq!(t.store.get_club(red.id).await.unwrap().unwrap().current_season_rep, 0);
        assert_eq!(t.ctx.load_player("alice").await.unwrap().tickets, 7);
    }

    #[tokio::test]
    async fn test_club_capacity() {
        let (_t, league, red, _blue) = setup().await;
        for i in 0..9 {
            league.join_club(&format!("m{}", i), red.id).await.unwrap();
        }
        let err = league.join_club("late", red.id).await.unwrap_err();
        assert!(matches!(err, EngineError::ClubIneligible(_)));
        let err = league.join_club("m0", red.id).await.unwrap_err();
        assert!(matches!(err, EngineError::ClubIneligible(_)));
    }

    #[tokio::test]
    async fn test_season_reset_runs_once() {
        let (t, league, red, _blue) = setup().await;
        let mut r = t.store.get_club(red.id).await.unwrap().unwrap();
        r.current_season_rep = 235;
        t.store.save_club(&r).await.unwrap();
        let mut alice = t.ctx.load_player("alice").await.unwrap();
        alice.tickets = 2;
        t.store.save_player(&alice).await.unwrap();

        // still inside the season: nothing happens
        assert!(league.run_season_reset().await.unwrap().is_none());

        t.clock.set(Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 30).unwrap());
        let report = league.run_season_reset().await.unwrap().unwrap();
        assert_eq!(report.season_key, "2026-03");
        assert_eq!(report.trophies_awarded, 24);

        let r = t.store.get_club(red.id).await.unwrap().unwrap();
        assert_eq!(r.current_season_rep, 0);
        assert_eq!(r.total_trophies, 24);
        assert_eq!(r.season_trophies.get("2026-03"), Some(&24));
        assert_eq!(t.store.get_player("alice").await.unwrap().unwrap().tickets, 7);

        t.clock.advance(Duration::minutes(1));
        assert!(league.run_season_reset().await.unwrap().is_none());
        assert_eq!(t.store.get_club(red.id).await.unwrap().unwrap().total_trophies, 24);
    }

    #[tokio::test]
    async fn test_season_reset_resumes_after_partial_run() {
        let (t, league, red, blue) = setup().await;
        t.clock.set(Utc.with_ymd_and_hms(2026, 3, 8, 0, 1, 0).unwrap());
        let mut r = t.store.get_club(red.id).await.unwrap().unwrap();
        r.current_season_rep = 40;
        t.store.save_club(&r).await.unwrap();
        // Blue was already converted by a run that crashed before the marker.
        let mut b = t.store.get_club(blue.id).await.unwrap().unwrap();
        b.current_season_rep = 0;
        b.total_trophies = 9;
        b.last_reset_season = Some("2026-03".into());
        t.store.save_club(&b).await.unwrap();

        let report = league.run_season_reset().await.unwrap().unwrap();
        assert_eq!(report.clubs_converted, 1);
        assert_eq!(t.store.get_club(blue.id).await.unwrap().unwrap().total_trophies, 9);
        assert_eq!(t.store.get_club(red.id).await.unwrap().unwrap().total_trophies, 4);
        assert_eq!(
            t.store.get_marker(RESET_MARKER).await.unwrap().as_deref(),
            Some("2026-03")
        );
    }

    #[tokio::test]
    async fn test_racing_instances_convert_each_club_once() {
        let (t, league, red, blue) = setup().await;
        let mut r = t.store.get_club(red.id).await.unwrap().unwrap();
        r.current_season_rep = 235;
        t.store.save_club(&r).await.unwrap();
        for user in ["alice", "bob"] {
            let p = t.ctx.load_player(user).await.unwrap();
            t.store.save_player(&p).await.unwrap();
        }

        // A second process shares the store but not the in-process locks.
        let mut other_ctx = t.ctx.clone();
        other_ctx.locks = Arc::new(KeyedLocks::new());
        let other = ClubLeagueService::new(other_ctx);

        t.clock.set(Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 30).unwrap());
        let (a, b) = tokio::join!(league.run_season_reset(), other.run_season_reset());
        let reports: Vec<SeasonResetReport> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
        assert!(!reports.is_empty());
        assert_eq!(reports.iter().map(|r| r.clubs_converted).sum::<usize>(), 2);
        assert_eq!(reports.iter().map(|r| r.players_refilled).sum::<usize>(), 2);
        assert_eq!(reports.iter().map(|r| r.trophies_awarded).sum::<i64>(), 24);

        assert_eq!(t.store.get_club(red.id).await.unwrap().unwrap().total_trophies, 24);
        assert_eq!(t.store.get_club(blue.id).await.unwrap().unwrap().total_trophies, 0);
    }
}
