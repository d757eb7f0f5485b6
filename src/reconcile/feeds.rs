//! Sports-data feed clients.
//!
//! Three providers, three shapes:
//! - JsonOdds is the authoritative proposition feed: one call returns every
//!   upcoming game across all sports, keyed by its own event id.
//! - The Rundown and Sportspage are secondary schedule/score feeds, polled
//!   per sport and per date through RapidAPI.
//!
//! Every call carries an explicit timeout. A failed call is logged and
//! yields whatever was gathered so far; the cycle runs on partial data
//! rather than aborting.

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::FeedsConfig;
use crate::reconcile::sports::feed_date;

const FEED_TIMEOUT: Duration = Duration::from_secs(15);

// --- JsonOdds -------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct JsonOddsEvent {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "HomeTeam")]
    pub home_team: String,
    #[serde(rename = "AwayTeam")]
    pub away_team: String,
    #[serde(rename = "Sport")]
    pub sport: u8,
    /// Naive local string from the provider, to be read as UTC.
    #[serde(rename = "MatchTime")]
    pub match_time: String,
    #[serde(rename = "Odds", default)]
    pub odds: Vec<JsonOddsLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonOddsLine {
    #[serde(rename = "OddType", default)]
    pub odd_type: String,
    #[serde(rename = "MoneyLineAway", default)]
    pub money_line_away: String,
    #[serde(rename = "MoneyLineHome", default)]
    pub money_line_home: String,
    #[serde(rename = "OverLine", default)]
    pub over_line: String,
    #[serde(rename = "TotalNumber", default)]
    pub total_number: String,
    #[serde(rename = "UnderLine", default)]
    pub under_line: String,
    #[serde(rename = "PointSpreadAway", default)]
    pub point_spread_away: String,
    #[serde(rename = "PointSpreadHome", default)]
    pub point_spread_home: String,
    #[serde(rename = "PointSpreadAwayLine", default)]
    pub point_spread_away_line: String,
    #[serde(rename = "PointSpreadHomeLine", default)]
    pub point_spread_home_line: String,
}

// --- The Rundown ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RundownEnvelope {
    #[serde(default)]
    events: Vec<RundownEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RundownEvent {
    pub event_id: String,
    /// ISO-8601 with offset.
    pub event_date: String,
    #[serde(default)]
    pub teams_normalized: Vec<RundownTeam>,
    pub score: Option<RundownScore>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RundownTeam {
    pub name: String,
    #[serde(default)]
    pub mascot: Option<String>,
    #[serde(default)]
    pub is_away: bool,
    #[serde(default)]
    pub is_home: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RundownScore {
    #[serde(default)]
    pub event_status: String,
    #[serde(default)]
    pub event_status_detail: String,
    #[serde(default)]
    pub score_away: i64,
    #[serde(default)]
    pub score_home: i64,
    /// Seconds remaining in the current period.
    #[serde(default)]
    pub game_clock: i64,
    #[serde(default)]
    pub game_period: i64,
}

impl RundownEvent {
    pub fn home(&self) -> Option<&RundownTeam> {
        self.teams_normalized.iter().find(|t| t.is_home)
    }

    pub fn away(&self) -> Option<&RundownTeam> {
        self.teams_normalized.iter().find(|t| t.is_away)
    }
}

// --- Sportspage -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SportspageEnvelope {
    #[serde(default)]
    results: Vec<SportspageGame>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportspageGame {
    #[serde(rename = "gameId")]
    pub game_id: i64,
    pub schedule: SportspageSchedule,
    pub teams: SportspageTeams,
    #[serde(default)]
    pub status: String,
    pub scoreboard: Option<SportspageScoreboard>,
    /// Bookmaker odds sets; only the opening lines are consumed, for the
    /// one-time opener capture in the odds history.
    #[serde(default)]
    pub odds: Vec<SportspageOddsSet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportspageSchedule {
    /// ISO-8601 with offset.
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportspageTeams {
    pub away: SportspageTeam,
    pub home: SportspageTeam,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportspageTeam {
    pub team: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportspageScoreboard {
    pub score: Option<SportspageScore>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageScore {
    #[serde(default)]
    pub away: i64,
    #[serde(default)]
    pub home: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageOddsSet {
    pub spread: Option<SportspageSpreadOdds>,
    pub moneyline: Option<SportspageMoneylineOdds>,
    pub total: Option<SportspageTotalOdds>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageSpreadOdds {
    pub open: Option<SportspageSpreadLine>,
}

/// Spread from the home team's perspective, American prices per side.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageSpreadLine {
    #[serde(default)]
    pub away: f64,
    #[serde(default)]
    pub home: f64,
    #[serde(rename = "awayOdds", default)]
    pub away_odds: i64,
    #[serde(rename = "homeOdds", default)]
    pub home_odds: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageMoneylineOdds {
    pub open: Option<SportspageMoneylineLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageMoneylineLine {
    #[serde(rename = "awayOdds", default)]
    pub away_odds: i64,
    #[serde(rename = "homeOdds", default)]
    pub home_odds: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageTotalOdds {
    pub open: Option<SportspageTotalLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SportspageTotalLine {
    #[serde(default)]
    pub total: f64,
    #[serde(rename = "overOdds", default)]
    pub over_odds: i64,
    #[serde(rename = "underOdds", default)]
    pub under_odds: i64,
}

// --- Clients --------------------------------------------------------------

pub struct FeedClients {
    http: Client,
    cfg: FeedsConfig,
}

impl FeedClients {
    pub fn new(cfg: FeedsConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(FEED_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, cfg })
    }

    /// The authoritative feed: every game-odds proposition, all sports.
    pub async fn fetch_jsonodds(&self) -> anyhow::Result<Vec<JsonOddsEvent>> {
        let url = format!("{}/api/odds?oddType=Game", self.cfg.jsonodds_url);
        let events: Vec<JsonOddsEvent> = self
            .http
            .get(&url)
            .header("x-api-key", &self.cfg.jsonodds_api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(count = events.len(), "jsonodds feed fetched");
        Ok(events)
    }

    /// Rundown schedule for one sport across the date window. Failures are
    /// per-date: a bad day is logged and skipped.
    pub async fn fetch_rundown(&self, sport_id: u8, dates: &[NaiveDate]) -> Vec<RundownEvent> {
        let mut all = Vec::new();
        for date in dates {
            let url = format!(
                "{}/sports/{}/events/{}",
                self.cfg.rundown_url,
                sport_id,
                feed_date(*date)
            );
            match self.rapidapi_get::<RundownEnvelope>(&url, &self.cfg.rundown_host).await {
                Ok(envelope) => all.extend(envelope.events),
                Err(err) => {
                    error!(sport_id, date = %date, error = %err, "rundown fetch failed")
                }
            }
        }
        debug!(sport_id, count = all.len(), "rundown feed fetched");
        all
    }

    /// Sportspage schedule for one league across the date window.
    pub async fn fetch_sportspage(&self, league: &str, dates: &[NaiveDate]) -> Vec<SportspageGame> {
        let mut all = Vec::new();
        for date in dates {
            let url = format!(
                "{}/games?date={}&league={}",
                self.cfg.sportspage_url,
                feed_date(*date),
                league
            );
            match self
                .rapidapi_get::<SportspageEnvelope>(&url, &self.cfg.sportspage_host)
                .await
            {
                Ok(envelope) => all.extend(envelope.results),
                Err(err) => {
                    error!(league, date = %date, error = %err, "sportspage fetch failed")
                }
            }
        }
        debug!(league, count = all.len(), "sportspage feed fetched");
        all
    }

    async fn rapidapi_get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        host: &str,
    ) -> anyhow::Result<T> {
        let value = self
            .http
            .get(url)
            .header("x-rapidapi-host", host)
            .header("x-rapidapi-key", &self.cfg.rapidapi_api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonodds_event_deserializes_provider_casing() {
        let raw = r#"{
            "ID": "a2f-9913",
            "HomeTeam": "Boston Celtics",
            "AwayTeam": "Miami Heat",
            "Sport": 1,
            "MatchTime": "2025-03-01T19:00:00",
            "Odds": [{
                "OddType": "Game",
                "MoneyLineAway": "+150",
                "MoneyLineHome": "-170",
                "OverLine": "-110",
                "TotalNumber": "217.5",
                "UnderLine": "-110",
                "PointSpreadAway": "4.5",
                "PointSpreadHome": "-4.5",
                "PointSpreadAwayLine": "-108",
                "PointSpreadHomeLine": "-112"
            }]
        }"#;
        let event: JsonOddsEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.id, "a2f-9913");
        assert_eq!(event.sport, 1);
        assert_eq!(event.odds[0].money_line_home, "-170");
    }

    #[test]
    fn rundown_event_picks_home_and_away() {
        let raw = r#"{
            "event_id": "rd-1",
            "event_date": "2025-03-01T19:05:00Z",
            "teams_normalized": [
                {"name": "Miami", "mascot": "Heat", "is_away": true, "is_home": false},
                {"name": "Boston", "mascot": "Celtics", "is_away": false, "is_home": true}
            ],
            "score": {"event_status": "STATUS_FINAL", "event_status_detail": "Final",
                      "score_away": 98, "score_home": 104}
        }"#;
        let event: RundownEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.home().unwrap().name, "Boston");
        assert_eq!(event.away().unwrap().mascot.as_deref(), Some("Heat"));
        assert_eq!(event.score.as_ref().unwrap().score_home, 104);
    }

    #[test]
    fn sportspage_game_tolerates_missing_scoreboard() {
        let raw = r#"{
            "gameId": 271234,
            "schedule": {"date": "2025-03-01T19:00:00.000Z"},
            "teams": {"away": {"team": "Miami Heat"}, "home": {"team": "Boston Celtics"}},
            "status": "scheduled"
        }"#;
        let game: SportspageGame = serde_json::from_str(raw).unwrap();
        assert!(game.scoreboard.is_none());
        assert!(game.odds.is_empty());
        assert_eq!(game.teams.home.team, "Boston Celtics");
    }

    #[test]
    fn sportspage_opening_lines_deserialize() {
        let raw = r#"{
            "gameId": 271234,
            "schedule": {"date": "2025-03-01T19:00:00.000Z"},
            "teams": {"away": {"team": "Miami Heat"}, "home": {"team": "Boston Celtics"}},
            "status": "scheduled",
            "odds": [{
                "spread": {
                    "open": {"away": 4.5, "home": -4.5, "awayOdds": -108, "homeOdds": -112},
                    "current": {"away": 5.0, "home": -5.0, "awayOdds": -110, "homeOdds": -110}
                },
                "moneyline": {
                    "open": {"awayOdds": 150, "homeOdds": -170},
                    "current": {"awayOdds": 155, "homeOdds": -175}
                },
                "total": {
                    "open": {"total": 217.5, "overOdds": -110, "underOdds": -110},
                    "current": {"total": 218.0, "overOdds": -112, "underOdds": -108}
                }
            }]
        }"#;
        let game: SportspageGame = serde_json::from_str(raw).unwrap();
        let set = &game.odds[0];
        let ml = set.moneyline.as_ref().unwrap().open.as_ref().unwrap();
        assert_eq!((ml.away_odds, ml.home_odds), (150, -170));
        let sp = set.spread.as_ref().unwrap().open.as_ref().unwrap();
        assert_eq!(sp.home, -4.5);
        let tot = set.total.as_ref().unwrap().open.as_ref().unwrap();
        assert_eq!(tot.total, 217.5);
    }
}
