//! Terminal-state detection and cold-storage migration.
//!
//! A game is over when either secondary feed says so; the two providers are
//! independent signals and one is enough (an OR, not a vote). Once a contest
//! goes `Final` with scores it stays that way: `Contest::merge_refresh`
//! never moves status backwards or clears scores, so a later cycle that no
//! longer sees the game cannot undo it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::model::{col, Contest, ContestStatus, Speculation};
use crate::reconcile::feeds::{RundownEvent, RundownScore, SportspageGame};
use crate::reconcile::sports;
use crate::store::{get_doc, BatchOp, DocumentStore};

/// Substrings that mark a provider status string as terminal.
const TERMINAL_MARKERS: &[&str] = &["final", "complete", "finished"];

pub fn is_terminal_status(status: &str) -> bool {
    let lower = status.to_lowercase();
    TERMINAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Clock-based terminal signal, independent of the status strings: the
/// final regulation period (or a later one) has its clock at zero and the
/// game is not tied, so no further period is coming.
fn clock_exhausted(sport: u8, score: &RundownScore) -> bool {
    let Some(cfg) = sports::by_jsonodds_id(sport) else {
        return false;
    };
    score.game_period >= cfg.regulation_periods
        && score.game_clock == 0
        && score.score_away != score.score_home
}

/// Fold both secondary feeds' live state into a freshly reconciled contest:
/// scores when available, `Scored` while in progress, `Final` on a terminal
/// signal from either side.
pub fn apply_signals(
    contest: &mut Contest,
    rundown: &RundownEvent,
    sportspage: &SportspageGame,
    now: DateTime<Utc>,
) {
    let mut terminal = is_terminal_status(&sportspage.status);
    let mut scores: Option<(i64, i64)> = None;

    if let Some(score) = &rundown.score {
        terminal = terminal
            || is_terminal_status(&score.event_status)
            || is_terminal_status(&score.event_status_detail)
            || clock_exhausted(contest.sport, score);
        if score.score_away != 0 || score.score_home != 0 {
            scores = Some((score.score_away, score.score_home));
        }
    }
    if scores.is_none() {
        if let Some(score) = sportspage.scoreboard.as_ref().and_then(|b| b.score.as_ref()) {
            if score.away != 0 || score.home != 0 {
                scores = Some((score.away, score.home));
            }
        }
    }

    if let Some((away, home)) = scores {
        contest.score_away = Some(away);
        contest.score_home = Some(home);
        contest.scored_at = Some(now);
        if contest.status.rank() < ContestStatus::Scored.rank() {
            contest.status = ContestStatus::Scored;
        }
    }
    if terminal {
        contest.status = ContestStatus::Final;
        // A terminal status without score data still locks the contest; the
        // scores stay whatever a previous cycle captured.
        if contest.scored_at.is_none() {
            contest.scored_at = Some(now);
        }
    }
}

/// Archive wrapper: the original document plus the migration stamp.
#[derive(Debug, Serialize, Deserialize)]
pub struct Archived<T> {
    #[serde(flatten)]
    pub doc: T,
    pub archived_at: DateTime<Utc>,
}

pub struct Archiver {
    store: Arc<dyn DocumentStore>,
    retention: Duration,
}

impl Archiver {
    pub fn new(store: Arc<dyn DocumentStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Migrate aged terminal contests and dead speculations to the archive
    /// collections. Copy-then-delete in one batch, so a crash leaves the hot
    /// copy in place rather than losing the document.
    pub async fn run(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut ops = Vec::new();
        let mut moved = 0;

        for key in self.store.list_keys(col::CONTESTS, "").await? {
            let Some(contest) = get_doc::<Contest>(&*self.store, col::CONTESTS, &key).await?
            else {
                continue;
            };
            if !self.contest_expired(&contest, now) {
                continue;
            }
            self.push_move(&mut ops, col::CONTESTS, col::CONTESTS_ARCHIVE, &key, contest, now)?;
            moved += 1;
        }

        for key in self.store.list_keys(col::SPECULATIONS, "").await? {
            let Some(speculation) =
                get_doc::<Speculation>(&*self.store, col::SPECULATIONS, &key).await?
            else {
                continue;
            };
            if speculation.lock_time + self.retention > now {
                continue;
            }
            self.push_move(
                &mut ops,
                col::SPECULATIONS,
                col::SPECULATIONS_ARCHIVE,
                &key,
                speculation,
                now,
            )?;
            moved += 1;
        }

        if !ops.is_empty() {
            self.store.commit(ops).await?;
            info!(moved, "aged documents archived");
        }
        Ok(moved)
    }

    /// Age is measured from the scored timestamp, falling back to the
    /// scheduled start for contests that went terminal without one.
    fn contest_expired(&self, contest: &Contest, now: DateTime<Utc>) -> bool {
        if contest.status != ContestStatus::Final {
            return false;
        }
        let reference = contest.scored_at.unwrap_or(contest.match_time);
        reference + self.retention <= now
    }

    fn push_move<T: Serialize>(
        &self,
        ops: &mut Vec<BatchOp>,
        from: &str,
        to: &str,
        key: &str,
        doc: T,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let archived = Archived { doc, archived_at: now };
        ops.push(BatchOp::Put {
            collection: to.to_string(),
            key: key.to_string(),
            json: serde_json::to_string(&archived)?,
        });
        ops.push(BatchOp::Delete {
            collection: from.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MarketSnapshot, SpeculationStatus};
    use crate::store::{put_doc, MemoryStore};

    fn final_contest(scored_at: DateTime<Utc>) -> Contest {
        Contest {
            contest_id: Some("901".into()),
            jsonodds_id: Some("jo-1".into()),
            rundown_id: Some("rd-1".into()),
            sportspage_id: Some(1),
            sport: 1,
            away_team: "Away".into(),
            home_team: "Home".into(),
            match_time: scored_at - Duration::hours(3),
            snapshot: MarketSnapshot::default(),
            status: ContestStatus::Final,
            created: true,
            score_away: Some(98),
            score_home: Some(104),
            scored_at: Some(scored_at),
            updated_at: scored_at,
        }
    }

    #[test]
    fn status_markers_are_case_insensitive() {
        assert!(is_terminal_status("STATUS_FINAL"));
        assert!(is_terminal_status("Completed"));
        assert!(is_terminal_status("game finished"));
        assert!(!is_terminal_status("in progress"));
        assert!(!is_terminal_status("scheduled"));
    }

    #[tokio::test]
    async fn aged_final_contest_is_archived_with_stamp() {
        let store = Arc::new(MemoryStore::new());
        let contest = final_contest(Utc::now() - Duration::hours(72));
        put_doc(&*store, col::CONTESTS, "901", &contest).await.unwrap();

        let archiver = Archiver::new(store.clone(), Duration::hours(48));
        assert_eq!(archiver.run().await.unwrap(), 1);

        assert!(store.get(col::CONTESTS, "901").await.unwrap().is_none());
        let archived: Archived<Contest> =
            get_doc(&*store, col::CONTESTS_ARCHIVE, "901").await.unwrap().unwrap();
        assert_eq!(archived.doc.score_home, Some(104));
    }

    #[tokio::test]
    async fn recent_or_nonfinal_contests_stay_hot() {
        let store = Arc::new(MemoryStore::new());
        let recent = final_contest(Utc::now() - Duration::hours(2));
        put_doc(&*store, col::CONTESTS, "901", &recent).await.unwrap();

        let mut live = final_contest(Utc::now() - Duration::hours(72));
        live.status = ContestStatus::Scored;
        put_doc(&*store, col::CONTESTS, "902", &live).await.unwrap();

        let archiver = Archiver::new(store.clone(), Duration::hours(48));
        assert_eq!(archiver.run().await.unwrap(), 0);
        assert!(store.get(col::CONTESTS, "901").await.unwrap().is_some());
        assert!(store.get(col::CONTESTS, "902").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dead_speculations_archive_alongside_contests() {
        let store = Arc::new(MemoryStore::new());
        let speculation = Speculation {
            speculation_id: "10".into(),
            contest_id: "901".into(),
            scorer: "0xabc".into(),
            threshold: 100,
            creator: "0xdef".into(),
            lock_time: Utc::now() - Duration::hours(100),
            status: SpeculationStatus::Closed,
            winning_side: None,
            updated_at: Utc::now(),
        };
        put_doc(&*store, col::SPECULATIONS, "10", &speculation).await.unwrap();

        let archiver = Archiver::new(store.clone(), Duration::hours(48));
        assert_eq!(archiver.run().await.unwrap(), 1);
        assert!(store.get(col::SPECULATIONS, "10").await.unwrap().is_none());
        assert!(store.get(col::SPECULATIONS_ARCHIVE, "10").await.unwrap().is_some());
    }

    #[test]
    fn missing_contest_without_terminal_signal_keeps_scored_status() {
        // In-progress scores mark the contest Scored, not Final.
        let mut contest = final_contest(Utc::now());
        contest.status = ContestStatus::Ready;
        contest.score_away = None;
        contest.score_home = None;
        contest.scored_at = None;

        let rundown = RundownEvent {
            event_id: "rd-1".into(),
            event_date: "2025-03-01T19:00:00Z".into(),
            teams_normalized: vec![],
            score: Some(RundownScore {
                event_status: "STATUS_IN_PROGRESS".into(),
                event_status_detail: "3rd Quarter".into(),
                score_away: 61,
                score_home: 58,
                game_clock: 421,
                game_period: 3,
            }),
        };
        let sportspage = in_progress_game();

        apply_signals(&mut contest, &rundown, &sportspage, Utc::now());
        assert_eq!(contest.status, ContestStatus::Scored);
        assert_eq!(contest.score_home, Some(58));
    }

    #[test]
    fn exhausted_clock_is_terminal_without_a_status_string() {
        // Fourth-quarter clock at zero, not tied: over, even though neither
        // feed's status string says so yet.
        let mut contest = final_contest(Utc::now());
        contest.status = ContestStatus::Ready;
        contest.score_away = None;
        contest.score_home = None;
        contest.scored_at = None;

        let rundown = RundownEvent {
            event_id: "rd-1".into(),
            event_date: "2025-03-01T19:00:00Z".into(),
            teams_normalized: vec![],
            score: Some(RundownScore {
                event_status: "STATUS_IN_PROGRESS".into(),
                event_status_detail: "4th Quarter".into(),
                score_away: 98,
                score_home: 104,
                game_clock: 0,
                game_period: 4,
            }),
        };
        apply_signals(&mut contest, &rundown, &in_progress_game(), Utc::now());
        assert_eq!(contest.status, ContestStatus::Final);

        // Tied at the end of regulation means overtime, not final.
        let mut tied = final_contest(Utc::now());
        tied.status = ContestStatus::Ready;
        tied.scored_at = None;
        let mut rundown = rundown.clone();
        rundown.score.as_mut().unwrap().score_away = 104;
        apply_signals(&mut tied, &rundown, &in_progress_game(), Utc::now());
        assert_ne!(tied.status, ContestStatus::Final);
    }

    fn in_progress_game() -> SportspageGame {
        SportspageGame {
            game_id: 1,
            schedule: crate::reconcile::feeds::SportspageSchedule {
                date: "2025-03-01T19:00:00Z".into(),
            },
            teams: crate::reconcile::feeds::SportspageTeams {
                away: crate::reconcile::feeds::SportspageTeam { team: "Away".into() },
                home: crate::reconcile::feeds::SportspageTeam { team: "Home".into() },
            },
            status: "in progress".into(),
            scoreboard: None,
            odds: vec![],
        }
    }
}
