//! Per-cycle odds history.
//!
//! Every reconciliation cycle appends one tick per market (moneyline,
//! spread, total) from the authoritative snapshot, so line movement stays
//! queryable after the contest document has been overwritten by later
//! refreshes. On the first capture for a contest the Sportspage opening
//! lines are written alongside, once. Ticks are keyed by capture time;
//! a re-run inside the same second loses the conditional create and is
//! skipped, which is the intended duplicate-timing tolerance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{col, Contest};
use crate::odds;
use crate::reconcile::feeds::{SportspageGame, SportspageOddsSet};
use crate::store::{create_doc, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Moneyline,
    Spread,
    Total,
}

impl Market {
    pub fn as_str(self) -> &'static str {
        match self {
            Market::Moneyline => "moneyline",
            Market::Spread => "spread",
            Market::Total => "total",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    /// Current lines from the authoritative feed, captured every cycle.
    Jsonodds,
    /// Opening lines, captured once per contest.
    SportspageOpen,
}

impl TickSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TickSource::Jsonodds => "jsonodds",
            TickSource::SportspageOpen => "sportspage_open",
        }
    }
}

/// One odds observation for one market. Totals reuse the away/home slots
/// as over/under, matching the pair ordering everywhere else in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsTick {
    pub jsonodds_id: String,
    pub sportspage_id: Option<i64>,
    pub market: Market,
    /// Spread (home perspective) or total, 1e7 fixed point; none for
    /// moneylines.
    pub line: Option<i64>,
    pub away_american: i64,
    pub home_american: i64,
    pub away_raw: u64,
    pub home_raw: u64,
    pub source: TickSource,
    pub captured_at: DateTime<Utc>,
}

impl OddsTick {
    pub fn doc_key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.jsonodds_id,
            self.market.as_str(),
            self.source.as_str(),
            self.captured_at.timestamp()
        )
    }
}

/// Append this cycle's ticks for one sport's matched contests. Returns
/// (current ticks written, opener ticks written).
pub async fn record_sport(
    store: &dyn DocumentStore,
    contests: &[Contest],
    games: &[SportspageGame],
    now: DateTime<Utc>,
) -> anyhow::Result<(usize, usize)> {
    let mut current = 0;
    let mut openers = 0;

    for contest in contests {
        let Some(jsonodds_id) = contest.jsonodds_id.as_deref() else {
            continue;
        };
        let mut ticks = current_ticks(contest, jsonodds_id, now);

        let prefix = format!("{jsonodds_id}-");
        if store.list_keys(col::ODDS_HISTORY, &prefix).await?.is_empty() {
            let game = contest
                .sportspage_id
                .and_then(|id| games.iter().find(|g| g.game_id == id));
            if let Some(set) = game.and_then(|g| g.odds.first()) {
                ticks.extend(opener_ticks(contest, jsonodds_id, set, now));
            }
        }

        for tick in ticks {
            if create_doc(store, col::ODDS_HISTORY, &tick.doc_key(), &tick).await? {
                match tick.source {
                    TickSource::Jsonodds => current += 1,
                    TickSource::SportspageOpen => openers += 1,
                }
            } else {
                debug!(jsonodds_id, market = tick.market.as_str(), "tick already captured");
            }
        }
    }

    Ok((current, openers))
}

fn tick(
    contest: &Contest,
    jsonodds_id: &str,
    market: Market,
    line: Option<i64>,
    away: i64,
    home: i64,
    source: TickSource,
    captured_at: DateTime<Utc>,
) -> Option<OddsTick> {
    Some(OddsTick {
        jsonodds_id: jsonodds_id.to_string(),
        sportspage_id: contest.sportspage_id,
        market,
        line,
        away_american: away,
        home_american: home,
        away_raw: odds::american_odds_to_raw(away)?,
        home_raw: odds::american_odds_to_raw(home)?,
        source,
        captured_at,
    })
}

/// A market is captured only when both of its prices are quoted.
fn current_ticks(contest: &Contest, jsonodds_id: &str, now: DateTime<Utc>) -> Vec<OddsTick> {
    let snap = &contest.snapshot;
    let mut out = Vec::new();

    if let (Some(away), Some(home)) = (
        odds::parse_american(&snap.money_line_away),
        odds::parse_american(&snap.money_line_home),
    ) {
        out.extend(tick(
            contest,
            jsonodds_id,
            Market::Moneyline,
            None,
            away,
            home,
            TickSource::Jsonodds,
            now,
        ));
    }

    if let (Some(line), Some(away), Some(home)) = (
        odds::line_to_raw(&snap.point_spread_home),
        odds::parse_american(&snap.point_spread_away_line),
        odds::parse_american(&snap.point_spread_home_line),
    ) {
        out.extend(tick(
            contest,
            jsonodds_id,
            Market::Spread,
            Some(line),
            away,
            home,
            TickSource::Jsonodds,
            now,
        ));
    }

    if let (Some(line), Some(over), Some(under)) = (
        odds::line_to_raw(&snap.total_number),
        odds::parse_american(&snap.over_line),
        odds::parse_american(&snap.under_line),
    ) {
        out.extend(tick(
            contest,
            jsonodds_id,
            Market::Total,
            Some(line),
            over,
            under,
            TickSource::Jsonodds,
            now,
        ));
    }

    out
}

fn opener_ticks(
    contest: &Contest,
    jsonodds_id: &str,
    set: &SportspageOddsSet,
    now: DateTime<Utc>,
) -> Vec<OddsTick> {
    let mut out = Vec::new();

    if let Some(ml) = set.moneyline.as_ref().and_then(|m| m.open.as_ref()) {
        out.extend(tick(
            contest,
            jsonodds_id,
            Market::Moneyline,
            None,
            ml.away_odds,
            ml.home_odds,
            TickSource::SportspageOpen,
            now,
        ));
    }

    if let Some(sp) = set.spread.as_ref().and_then(|s| s.open.as_ref()) {
        if let Some(line) = odds::line_value_to_raw(sp.home) {
            out.extend(tick(
                contest,
                jsonodds_id,
                Market::Spread,
                Some(line),
                sp.away_odds,
                sp.home_odds,
                TickSource::SportspageOpen,
                now,
            ));
        }
    }

    if let Some(tot) = set.total.as_ref().and_then(|t| t.open.as_ref()) {
        if let Some(line) = odds::line_value_to_raw(tot.total) {
            out.extend(tick(
                contest,
                jsonodds_id,
                Market::Total,
                Some(line),
                tot.over_odds,
                tot.under_odds,
                TickSource::SportspageOpen,
                now,
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContestStatus, MarketSnapshot};
    use crate::reconcile::feeds::{
        SportspageMoneylineLine, SportspageMoneylineOdds, SportspageSchedule, SportspageSpreadLine,
        SportspageSpreadOdds, SportspageTeam, SportspageTeams, SportspageTotalLine,
        SportspageTotalOdds,
    };
    use crate::store::MemoryStore;
    use chrono::Duration;
    use std::sync::Arc;

    fn contest(snapshot: MarketSnapshot) -> Contest {
        Contest {
            contest_id: None,
            jsonodds_id: Some("jo-1".into()),
            rundown_id: Some("rd-1".into()),
            sportspage_id: Some(9),
            sport: 1,
            away_team: "Miami Heat".into(),
            home_team: "Boston Celtics".into(),
            match_time: Utc::now() + Duration::hours(5),
            snapshot,
            status: ContestStatus::Ready,
            created: false,
            score_away: None,
            score_home: None,
            scored_at: None,
            updated_at: Utc::now(),
        }
    }

    fn full_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            money_line_away: "+150".into(),
            money_line_home: "-170".into(),
            over_line: "-110".into(),
            under_line: "-110".into(),
            total_number: "217.5".into(),
            point_spread_away: "4.5".into(),
            point_spread_home: "-4.5".into(),
            point_spread_away_line: "-108".into(),
            point_spread_home_line: "-112".into(),
            raw: Default::default(),
        }
    }

    fn game_with_openers() -> SportspageGame {
        SportspageGame {
            game_id: 9,
            schedule: SportspageSchedule { date: "2025-03-01T19:00:00Z".into() },
            teams: SportspageTeams {
                away: SportspageTeam { team: "Miami Heat".into() },
                home: SportspageTeam { team: "Boston Celtics".into() },
            },
            status: "scheduled".into(),
            scoreboard: None,
            odds: vec![SportspageOddsSet {
                spread: Some(SportspageSpreadOdds {
                    open: Some(SportspageSpreadLine {
                        away: 4.0,
                        home: -4.0,
                        away_odds: -110,
                        home_odds: -110,
                    }),
                }),
                moneyline: Some(SportspageMoneylineOdds {
                    open: Some(SportspageMoneylineLine { away_odds: 145, home_odds: -165 }),
                }),
                total: Some(SportspageTotalOdds {
                    open: Some(SportspageTotalLine {
                        total: 216.0,
                        over_odds: -110,
                        under_odds: -110,
                    }),
                }),
            }],
        }
    }

    #[tokio::test]
    async fn first_capture_stores_openers_alongside_current_lines() {
        let store = Arc::new(MemoryStore::new());
        let contests = [contest(full_snapshot())];
        let games = [game_with_openers()];
        let t0 = Utc::now();

        let (current, openers) = record_sport(&*store, &contests, &games, t0).await.unwrap();
        assert_eq!((current, openers), (3, 3));

        // Next cycle: current lines again, opener capture never repeats.
        let t1 = t0 + Duration::minutes(15);
        let (current, openers) = record_sport(&*store, &contests, &games, t1).await.unwrap();
        assert_eq!((current, openers), (3, 0));

        let keys = store.list_keys(col::ODDS_HISTORY, "jo-1-").await.unwrap();
        assert_eq!(keys.len(), 9);
    }

    #[tokio::test]
    async fn duplicate_capture_timing_is_tolerated() {
        let store = Arc::new(MemoryStore::new());
        let contests = [contest(full_snapshot())];
        let t0 = Utc::now();

        record_sport(&*store, &contests, &[], t0).await.unwrap();
        let (current, openers) = record_sport(&*store, &contests, &[], t0).await.unwrap();
        assert_eq!((current, openers), (0, 0));
        assert_eq!(store.list_keys(col::ODDS_HISTORY, "jo-1-").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn markets_missing_a_price_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let snapshot = MarketSnapshot {
            money_line_away: "+150".into(),
            money_line_home: "-170".into(),
            ..full_snapshot_with_empty_rest()
        };
        let contests = [contest(snapshot)];

        let (current, openers) =
            record_sport(&*store, &contests, &[], Utc::now()).await.unwrap();
        assert_eq!((current, openers), (1, 0));

        let keys = store.list_keys(col::ODDS_HISTORY, "jo-1-").await.unwrap();
        let tick: OddsTick = serde_json::from_str(
            &store.get(col::ODDS_HISTORY, &keys[0]).await.unwrap().unwrap(),
        )
        .unwrap();
        assert_eq!(tick.market, Market::Moneyline);
        assert_eq!(tick.away_raw, 25_000_000);
        assert!(tick.line.is_none());
    }

    fn full_snapshot_with_empty_rest() -> MarketSnapshot {
        MarketSnapshot {
            money_line_away: String::new(),
            money_line_home: String::new(),
            over_line: String::new(),
            under_line: String::new(),
            total_number: String::new(),
            point_spread_away: String::new(),
            point_spread_home: String::new(),
            point_spread_away_line: String::new(),
            point_spread_home_line: String::new(),
            raw: Default::default(),
        }
    }
}
