//! Multi-source reconciliation.
//!
//! Each cycle fuses the three feeds into canonical contest records: the
//! authoritative proposition feed supplies identity and odds, the two
//! secondary feeds corroborate the schedule and carry scores. A contest is
//! emitted only when both secondary feeds produce a match on
//! (canonical home, canonical away, kickoff hour).

pub mod feeds;
pub mod history;
pub mod sports;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::alias::AliasResolver;
use crate::finality;
use crate::model::{col, Contest, ContestStatus, MarketSnapshot, RawLines};
use crate::odds;
use crate::store::{create_doc, get_doc, update_doc, BatchOp, DocumentStore};
use feeds::{FeedClients, JsonOddsEvent, RundownEvent, SportspageGame};
use sports::{SportConfig, SPORTS};

pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    feeds: FeedClients,
    resolver: Arc<AliasResolver>,
    // Single-flight: a slow cycle must not overlap the next tick.
    cycle_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        feeds: FeedClients,
        resolver: Arc<AliasResolver>,
    ) -> Self {
        Self {
            store,
            feeds,
            resolver,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one reconciliation cycle, unless the previous one is still
    /// going, in which case this tick is skipped.
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!("previous reconciliation cycle still running, skipping tick");
            return Ok(());
        };
        self.cycle(Utc::now()).await
    }

    async fn cycle(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let jsonodds = self.feeds.fetch_jsonodds().await?;
        let existing = self.load_existing().await?;
        info!(
            propositions = jsonodds.len(),
            existing = existing.len(),
            "reconciliation cycle started"
        );

        let mut fresh: Vec<Contest> = Vec::new();
        for sport in SPORTS {
            let window = sport.date_window(now);
            if window.is_empty() {
                debug!(sport = sport.name, "offseason, skipping");
                continue;
            }
            let rundown = self.feeds.fetch_rundown(sport.rundown_id, &window).await;
            let sportspage = self.feeds.fetch_sportspage(sport.name, &window).await;
            if rundown.is_empty() || sportspage.is_empty() {
                warn!(sport = sport.name, "secondary feed returned no events, skipping sport");
                continue;
            }
            let propositions: Vec<&JsonOddsEvent> = jsonodds
                .iter()
                .filter(|e| e.sport == sport.jsonodds_id)
                .collect();
            let matched =
                join_sport(&self.resolver, sport, &propositions, &rundown, &sportspage, now);
            let (ticks, openers) =
                history::record_sport(&*self.store, &matched, &sportspage, now).await?;
            info!(
                sport = sport.name,
                propositions = propositions.len(),
                matched = matched.len(),
                ticks,
                openers,
                "sport reconciled"
            );
            fresh.extend(matched);
        }

        let written = commit_merged(&*self.store, &existing, fresh, now).await?;
        info!(written, "reconciliation cycle finished");
        Ok(())
    }

    async fn load_existing(&self) -> anyhow::Result<Vec<(String, Contest)>> {
        let mut contests = Vec::new();
        for key in self.store.list_keys(col::CONTESTS, "").await? {
            if let Some(contest) = get_doc::<Contest>(&*self.store, col::CONTESTS, &key).await? {
                contests.push((key, contest));
            }
        }
        Ok(contests)
    }
}

/// Truncate to the start of the hour, UTC. Feed timestamps disagree on
/// minutes (19:00 vs 19:05 tip-off), never on the hour.
pub fn hour_bucket(dt: DateTime<Utc>) -> DateTime<Utc> {
    let secs = dt.timestamp();
    Utc.timestamp_opt(secs - secs.rem_euclid(3600), 0).single().unwrap_or(dt)
}

/// The authoritative feed publishes naive timestamps that are in fact UTC.
fn parse_jsonodds_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&format!("{raw}Z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_feed_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Join one sport's propositions against both secondary feeds.
fn join_sport(
    resolver: &AliasResolver,
    sport: &SportConfig,
    propositions: &[&JsonOddsEvent],
    rundown: &[RundownEvent],
    sportspage: &[SportspageGame],
    now: DateTime<Utc>,
) -> Vec<Contest> {
    let league = sport.jsonodds_id;
    let mut out = Vec::new();

    for event in propositions {
        let home = resolver.canonicalize(&event.home_team, league);
        let away = resolver.canonicalize(&event.away_team, league);
        let Some(match_time) = parse_jsonodds_time(&event.match_time) else {
            warn!(id = event.id, raw = event.match_time, "unparseable proposition time");
            continue;
        };
        let hour = hour_bucket(match_time);

        // First match wins. Candidate collisions within one hour bucket are
        // possible in principle; they are surfaced by the triage logging
        // below rather than handled.
        let rundown_match = rundown.iter().find(|candidate| {
            let (Some(h), Some(a)) = (candidate.home(), candidate.away()) else {
                return false;
            };
            let c_home = resolver.team_name_for_sport(league, &h.name, h.mascot.as_deref());
            let c_away = resolver.team_name_for_sport(league, &a.name, a.mascot.as_deref());
            c_home == home
                && c_away == away
                && parse_feed_time(&candidate.event_date).map(hour_bucket) == Some(hour)
        });
        let sportspage_match = sportspage.iter().find(|candidate| {
            let c_home = resolver.canonicalize(&candidate.teams.home.team, league);
            let c_away = resolver.canonicalize(&candidate.teams.away.team, league);
            c_home == home
                && c_away == away
                && parse_feed_time(&candidate.schedule.date).map(hour_bucket) == Some(hour)
        });

        let (Some(rd), Some(sp)) = (rundown_match, sportspage_match) else {
            log_unmatched(
                resolver, league, event, &home, &away, hour, rundown_match, sportspage_match,
                rundown, sportspage,
            );
            continue;
        };

        let line = event.odds.first().cloned().unwrap_or_default();
        let mut contest = Contest {
            contest_id: None,
            jsonodds_id: Some(event.id.clone()),
            rundown_id: Some(rd.event_id.clone()),
            sportspage_id: Some(sp.game_id),
            sport: league,
            away_team: event.away_team.clone(),
            home_team: event.home_team.clone(),
            match_time,
            snapshot: snapshot_from_line(&line),
            status: ContestStatus::Ready,
            created: false,
            score_away: None,
            score_home: None,
            scored_at: None,
            updated_at: now,
        };
        finality::apply_signals(&mut contest, rd, sp, now);
        out.push(contest);
    }

    out
}

/// An unmatched proposition with same-hour candidates in either feed is the
/// interesting failure: usually a name the resolver does not know yet.
#[allow(clippy::too_many_arguments)]
fn log_unmatched(
    resolver: &AliasResolver,
    league: u8,
    event: &JsonOddsEvent,
    home: &str,
    away: &str,
    hour: DateTime<Utc>,
    rundown_match: Option<&RundownEvent>,
    sportspage_match: Option<&SportspageGame>,
    rundown: &[RundownEvent],
    sportspage: &[SportspageGame],
) {
    if rundown_match.is_none() {
        for candidate in rundown {
            if parse_feed_time(&candidate.event_date).map(hour_bucket) != Some(hour) {
                continue;
            }
            let (Some(h), Some(a)) = (candidate.home(), candidate.away()) else {
                continue;
            };
            warn!(
                proposition = event.id,
                home_raw = event.home_team,
                away_raw = event.away_team,
                home_canonical = home,
                away_canonical = away,
                candidate = candidate.event_id,
                candidate_home_raw = h.name,
                candidate_away_raw = a.name,
                candidate_home = resolver.team_name_for_sport(league, &h.name, h.mascot.as_deref()),
                candidate_away = resolver.team_name_for_sport(league, &a.name, a.mascot.as_deref()),
                proposition_time = %event.match_time,
                candidate_time = candidate.event_date,
                "same-hour rundown candidate did not match"
            );
        }
    }
    if sportspage_match.is_none() {
        for candidate in sportspage {
            if parse_feed_time(&candidate.schedule.date).map(hour_bucket) != Some(hour) {
                continue;
            }
            warn!(
                proposition = event.id,
                home_raw = event.home_team,
                away_raw = event.away_team,
                home_canonical = home,
                away_canonical = away,
                candidate = candidate.game_id,
                candidate_home_raw = candidate.teams.home.team,
                candidate_away_raw = candidate.teams.away.team,
                candidate_home = resolver.canonicalize(&candidate.teams.home.team, league),
                candidate_away = resolver.canonicalize(&candidate.teams.away.team, league),
                proposition_time = %event.match_time,
                candidate_time = candidate.schedule.date,
                "same-hour sportspage candidate did not match"
            );
        }
    }
}

fn snapshot_from_line(line: &feeds::JsonOddsLine) -> MarketSnapshot {
    MarketSnapshot {
        money_line_away: line.money_line_away.clone(),
        money_line_home: line.money_line_home.clone(),
        over_line: line.over_line.clone(),
        under_line: line.under_line.clone(),
        total_number: line.total_number.clone(),
        point_spread_away: line.point_spread_away.clone(),
        point_spread_home: line.point_spread_home.clone(),
        point_spread_away_line: line.point_spread_away_line.clone(),
        point_spread_home_line: line.point_spread_home_line.clone(),
        raw: RawLines {
            money_line_away: odds::american_to_raw(&line.money_line_away),
            money_line_home: odds::american_to_raw(&line.money_line_home),
            spread_line: odds::line_to_raw(&line.point_spread_home),
            spread_away_price: odds::american_to_raw(&line.point_spread_away_line),
            spread_home_price: odds::american_to_raw(&line.point_spread_home_line),
            total_line: odds::line_to_raw(&line.total_number),
            over_price: odds::american_to_raw(&line.over_line),
            under_price: odds::american_to_raw(&line.under_line),
        },
    }
}

/// Merge freshly reconciled records over the stored ones and commit.
///
/// Each merge is a per-document CAS: the closure re-reads the live document
/// on every retry, so fields a webhook handler set mid-cycle (`created`,
/// `contest_id`, advanced status) survive the refresh instead of being
/// clobbered from the cycle-start snapshot. The snapshot only supplies the
/// physical key to update. A contest's key moves from provider id to chain
/// id once it is created on-chain; the old document is dropped in the same
/// batch as the re-keyed write.
async fn commit_merged(
    store: &dyn DocumentStore,
    existing: &[(String, Contest)],
    fresh: Vec<Contest>,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let mut written = 0;
    for record in fresh {
        let stored_key = existing
            .iter()
            .find(|(_, e)| e.jsonodds_id.is_some() && e.jsonodds_id == record.jsonodds_id)
            .map(|(key, _)| key.as_str());

        let merged = match stored_key {
            Some(key) => {
                update_doc::<Contest, _>(store, col::CONTESTS, key, |c| {
                    *c = c.merge_refresh(&record, now);
                })
                .await?
            }
            None => None,
        };
        match (stored_key, merged) {
            (Some(key), Some(merged)) => {
                let new_key = merged.doc_key();
                if new_key != key {
                    store
                        .commit(vec![
                            BatchOp::Put {
                                collection: col::CONTESTS.to_string(),
                                key: new_key,
                                json: serde_json::to_string(&merged)?,
                            },
                            BatchOp::Delete {
                                collection: col::CONTESTS.to_string(),
                                key: key.to_string(),
                            },
                        ])
                        .await?;
                }
                written += 1;
            }
            // Archived or deleted mid-cycle, or genuinely new.
            (Some(_), None) | (None, _) => {
                let key = record.doc_key();
                if create_doc(store, col::CONTESTS, &key, &record).await? {
                    written += 1;
                } else {
                    // Lost the create race to a webhook delivery; fold the
                    // feed data in through the same CAS merge.
                    let folded = update_doc::<Contest, _>(store, col::CONTESTS, &key, |c| {
                        *c = c.merge_refresh(&record, now);
                    })
                    .await?;
                    if folded.is_some() {
                        written += 1;
                    } else {
                        warn!(contest = key, "contest vanished during refresh, dropped");
                    }
                }
            }
        }
    }
    Ok(written)
}
