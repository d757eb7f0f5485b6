//! Document model for the derived-state store.
//!
//! Every struct here maps 1:1 to a stored JSON document. Keys are
//! deterministic concatenations of the composite identifiers (see the
//! `key()` constructors), which is what makes replayed events idempotent:
//! the same event always lands on the same document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fixed-point scale for odds and ROI values: 7 implied decimal digits.
pub const PRECISION: u64 = 10_000_000;

/// Store collection names (key prefixes in the document store).
pub mod col {
    pub const CONTESTS: &str = "contests";
    pub const CONTESTS_ARCHIVE: &str = "contests_archive";
    pub const SPECULATIONS: &str = "speculations";
    pub const SPECULATIONS_ARCHIVE: &str = "speculations_archive";
    pub const POSITIONS: &str = "positions";
    pub const LEADERBOARDS: &str = "leaderboards";
    pub const REGISTRATIONS: &str = "registrations";
    pub const LEADERBOARD_POSITIONS: &str = "leaderboard_positions";
    pub const ODDS_HISTORY: &str = "odds_history";
}

/// One side of an odds pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Upper,
    Lower,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Upper => Side::Lower,
            Side::Lower => Side::Upper,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Upper => "upper",
            Side::Lower => "lower",
        }
    }

    /// Decode the wire representation (0 = upper, 1 = lower).
    pub fn from_wire(v: u64) -> Option<Side> {
        match v {
            0 => Some(Side::Upper),
            1 => Some(Side::Lower),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contest lifecycle status.
///
/// `Ready` contests come from the reconciler; `Unverified` ones were copied
/// into existence by an on-chain creation event before any feed matched
/// them. `Created` means the on-chain market exists for a feed-sourced
/// contest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    Ready,
    Unverified,
    Verified,
    Created,
    Scored,
    Final,
}

impl ContestStatus {
    /// Ordering used by the refresh merge: a refresh may only move a contest
    /// forward through the lifecycle, never backwards.
    pub fn rank(self) -> u8 {
        match self {
            ContestStatus::Ready => 0,
            ContestStatus::Unverified => 0,
            ContestStatus::Verified => 1,
            ContestStatus::Created => 2,
            ContestStatus::Scored => 3,
            ContestStatus::Final => 4,
        }
    }
}

/// Odds snapshot as delivered by the authoritative feed (display strings,
/// American convention) next to the raw fixed-point values derived from
/// them. Raw odds are decimal odds scaled by `PRECISION`; lines (spread /
/// total points) are scaled the same way and may be negative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub money_line_away: String,
    pub money_line_home: String,
    pub over_line: String,
    pub under_line: String,
    pub total_number: String,
    pub point_spread_away: String,
    pub point_spread_home: String,
    pub point_spread_away_line: String,
    pub point_spread_home_line: String,
    #[serde(default)]
    pub raw: RawLines,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLines {
    pub money_line_away: Option<u64>,
    pub money_line_home: Option<u64>,
    pub spread_line: Option<i64>,
    pub spread_away_price: Option<u64>,
    pub spread_home_price: Option<u64>,
    pub total_line: Option<i64>,
    pub over_price: Option<u64>,
    pub under_price: Option<u64>,
}

/// The canonical reconciled record for one real-world sporting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    /// On-chain contest id (string form of a uint256). Absent until the
    /// creation event arrives.
    pub contest_id: Option<String>,
    /// Cross-feed correlation keys.
    pub jsonodds_id: Option<String>,
    pub rundown_id: Option<String>,
    pub sportspage_id: Option<i64>,
    pub sport: u8,
    pub away_team: String,
    pub home_team: String,
    pub match_time: DateTime<Utc>,
    pub snapshot: MarketSnapshot,
    pub status: ContestStatus,
    /// Locally-owned: set by the on-chain creation event, never by a feed.
    /// Must survive every reconciliation refresh.
    pub created: bool,
    pub score_away: Option<i64>,
    pub score_home: Option<i64>,
    pub scored_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Contest {
    /// Document key: the on-chain id once known, else the provider id.
    pub fn doc_key(&self) -> String {
        self.contest_id
            .clone()
            .or_else(|| self.jsonodds_id.clone())
            .unwrap_or_default()
    }

    /// Merge a freshly reconciled record over the stored one.
    ///
    /// Per-field policy:
    /// - correlation keys, teams, match time, snapshot: taken from `fresh`
    ///   (the feeds own them);
    /// - `created` / `contest_id`: kept from `self` (locally owned);
    /// - `status`: kept if `self` is further along the lifecycle, otherwise
    ///   `fresh` wins; an `Unverified` contest that now has feed keys
    ///   advances to `Verified`;
    /// - scores / `scored_at`: kept once set, never cleared by a refresh.
    pub fn merge_refresh(&self, fresh: &Contest, now: DateTime<Utc>) -> Contest {
        let mut status = if self.status.rank() >= fresh.status.rank() {
            self.status
        } else {
            fresh.status
        };
        if self.status == ContestStatus::Unverified && fresh.jsonodds_id.is_some() {
            status = ContestStatus::Verified;
        }
        Contest {
            contest_id: self.contest_id.clone().or_else(|| fresh.contest_id.clone()),
            jsonodds_id: fresh.jsonodds_id.clone().or_else(|| self.jsonodds_id.clone()),
            rundown_id: fresh.rundown_id.clone().or_else(|| self.rundown_id.clone()),
            sportspage_id: fresh.sportspage_id.or(self.sportspage_id),
            sport: fresh.sport,
            away_team: fresh.away_team.clone(),
            home_team: fresh.home_team.clone(),
            match_time: fresh.match_time,
            snapshot: fresh.snapshot.clone(),
            status,
            created: self.created,
            score_away: self.score_away.or(fresh.score_away),
            score_home: self.score_home.or(fresh.score_home),
            scored_at: self.scored_at.or(fresh.scored_at),
            updated_at: now,
        }
    }
}

/// Speculation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeculationStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinningSide {
    Upper,
    Lower,
    Push,
}

impl WinningSide {
    pub fn from_wire(v: u64) -> Option<WinningSide> {
        match v {
            0 => Some(WinningSide::Upper),
            1 => Some(WinningSide::Lower),
            2 => Some(WinningSide::Push),
            _ => None,
        }
    }
}

/// A wagering proposition on a contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speculation {
    pub speculation_id: String,
    pub contest_id: String,
    /// Scorer contract address, lowercased.
    pub scorer: String,
    /// Threshold the scorer resolves against (spread / total, may be
    /// negative).
    pub threshold: i64,
    pub creator: String,
    pub lock_time: DateTime<Utc>,
    pub status: SpeculationStatus,
    pub winning_side: Option<WinningSide>,
    pub updated_at: DateTime<Utc>,
}

impl Speculation {
    /// The business tuple that must stay unique even when primary ids
    /// differ. Used by the functional-duplicate scan.
    pub fn business_tuple(&self) -> (String, String, i64) {
        (self.contest_id.clone(), self.scorer.clone(), self.threshold)
    }
}

/// A user's stake on one side of an odds pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub speculation_id: String,
    pub user: String,
    pub odds_pair_id: String,
    pub side: Side,
    pub matched_amount: u128,
    pub unmatched_amount: u128,
    pub unmatched_expiry: Option<DateTime<Utc>>,
    /// Fixed-point decimal odds, `PRECISION` scale.
    pub stored_upper_odds: u64,
    pub stored_lower_odds: u64,
    /// Counterparty address -> amount recorded against it. Ordered map so
    /// iteration (and serialized form) is deterministic.
    ///
    /// The amounts are asymmetric by design: a maker records the taker's
    /// contributed amount, a taker records the maker's consumed amount.
    pub counterparties: BTreeMap<String, u128>,
    pub claimed: bool,
    pub payout: u128,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn key(speculation_id: &str, user: &str, odds_pair_id: &str, side: Side) -> String {
        format!("{speculation_id}-{user}-{odds_pair_id}-{}", side.as_str())
    }

    pub fn doc_key(&self) -> String {
        Position::key(&self.speculation_id, &self.user, &self.odds_pair_id, self.side)
    }
}

/// Closed set of leaderboard rule types. Unknown rule keys coming off the
/// wire are rejected, never written as free-form fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardRule {
    MaxPositions,
    MinBankroll,
    MaxBankroll,
    RegistrationDeadline,
}

impl LeaderboardRule {
    pub fn parse(key: &str) -> Option<LeaderboardRule> {
        match key {
            "maxPositions" => Some(LeaderboardRule::MaxPositions),
            "minBankroll" => Some(LeaderboardRule::MinBankroll),
            "maxBankroll" => Some(LeaderboardRule::MaxBankroll),
            "registrationDeadline" => Some(LeaderboardRule::RegistrationDeadline),
            _ => None,
        }
    }
}

/// Typed rule fields, one per `LeaderboardRule` variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRules {
    pub max_positions: Option<u64>,
    /// Bankroll bounds are uint256 amounts, kept as decimal strings.
    pub min_bankroll: Option<String>,
    pub max_bankroll: Option<String>,
    pub registration_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub leaderboard_id: String,
    /// uint256 amounts as decimal strings (arbitrary precision survives
    /// JSON round-trips that u64 would not).
    pub entry_fee: String,
    pub prize_pool: String,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub current_participants: u64,
    pub total_positions: u64,
    /// Speculations with at least one position under this leaderboard.
    pub speculations: BTreeSet<String>,
    pub rules: LeaderboardRules,
    /// ROI fixed-point, `PRECISION` scale.
    pub current_highest_roi: Option<i64>,
    pub current_winner: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub leaderboard_id: String,
    pub user: String,
    pub declared_bankroll: String,
    /// ROI fixed-point, `PRECISION` scale.
    pub submitted_roi: i64,
    pub is_current_winner: bool,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn key(leaderboard_id: &str, user: &str) -> String {
        format!("{leaderboard_id}-{user}")
    }
}

/// Denormalized join row for per-leaderboard position queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPosition {
    pub leaderboard_id: String,
    pub speculation_id: String,
    pub user: String,
    pub odds_pair_id: String,
    pub side: Side,
    /// Leaderboard-scoped stake, mirrors the corresponding `Position`.
    pub amount: u128,
    pub updated_at: DateTime<Utc>,
}

impl LeaderboardPosition {
    pub fn key(
        leaderboard_id: &str,
        speculation_id: &str,
        user: &str,
        odds_pair_id: &str,
        side: Side,
    ) -> String {
        format!(
            "{leaderboard_id}-{speculation_id}-{user}-{odds_pair_id}-{}",
            side.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn contest(status: ContestStatus) -> Contest {
        Contest {
            contest_id: None,
            jsonodds_id: Some("jo-1".into()),
            rundown_id: Some("rd-1".into()),
            sportspage_id: Some(42),
            sport: 1,
            away_team: "Away".into(),
            home_team: "Home".into(),
            match_time: Utc.with_ymd_and_hms(2025, 3, 1, 19, 0, 0).unwrap(),
            snapshot: MarketSnapshot::default(),
            status,
            created: false,
            score_away: None,
            score_home: None,
            scored_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn refresh_keeps_created_flag_and_chain_id() {
        let mut stored = contest(ContestStatus::Created);
        stored.created = true;
        stored.contest_id = Some("901".into());

        let fresh = contest(ContestStatus::Ready);
        let merged = stored.merge_refresh(&fresh, Utc::now());

        assert!(merged.created);
        assert_eq!(merged.contest_id.as_deref(), Some("901"));
        assert_eq!(merged.status, ContestStatus::Created);
    }

    #[test]
    fn refresh_never_reverts_final() {
        let mut stored = contest(ContestStatus::Final);
        stored.score_away = Some(101);
        stored.score_home = Some(99);
        stored.scored_at = Some(Utc::now());

        let fresh = contest(ContestStatus::Ready);
        let merged = stored.merge_refresh(&fresh, Utc::now());

        assert_eq!(merged.status, ContestStatus::Final);
        assert_eq!(merged.score_away, Some(101));
        assert_eq!(merged.score_home, Some(99));
        assert!(merged.scored_at.is_some());
    }

    #[test]
    fn unverified_contest_advances_to_verified_on_feed_match() {
        let mut stored = contest(ContestStatus::Unverified);
        stored.jsonodds_id = None;
        stored.contest_id = Some("17".into());

        let fresh = contest(ContestStatus::Ready);
        let merged = stored.merge_refresh(&fresh, Utc::now());

        assert_eq!(merged.status, ContestStatus::Verified);
        assert_eq!(merged.jsonodds_id.as_deref(), Some("jo-1"));
        assert_eq!(merged.contest_id.as_deref(), Some("17"));
    }

    #[test]
    fn unknown_rule_key_is_rejected() {
        assert_eq!(LeaderboardRule::parse("maxPositions"), Some(LeaderboardRule::MaxPositions));
        assert_eq!(LeaderboardRule::parse("vibeCheck"), None);
    }
}
