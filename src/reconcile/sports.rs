//! Per-sport reconciliation schedule.
//!
//! Each sport carries its provider ids for the two secondary feeds plus the
//! season calendar that decides whether to poll it at all and how far ahead
//! to look. Windows are maintained by hand each season; a window set to a
//! single past day effectively disables that phase.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::alias::sport;

/// Offset applied before deriving the polling dates, matching the US
/// eastern schedule the providers publish against.
const SCHEDULE_UTC_OFFSET_HOURS: i64 = -5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonPhase {
    Preseason,
    Regular,
    Postseason,
    Offseason,
}

/// Inclusive date range, kept as plain ymd triples so the table below can
/// stay a static.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub start: (i32, u32, u32),
    pub end: (i32, u32, u32),
}

impl DateRange {
    fn contains(&self, day: NaiveDate) -> bool {
        let Some(start) = ymd(self.start) else { return false };
        let Some(end) = ymd(self.end) else { return false };
        day >= start && day <= end
    }
}

fn ymd((y, m, d): (i32, u32, u32)) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

pub struct SportConfig {
    pub name: &'static str,
    pub jsonodds_id: u8,
    pub rundown_id: u8,
    /// Periods (quarters, innings, halves) in a regulation game; used to
    /// read the score payload's clock fields as a terminal signal.
    pub regulation_periods: i64,
    pub preseason: DateRange,
    pub regular: DateRange,
    pub postseason: DateRange,
    pub days_ahead_preseason: u32,
    pub days_ahead_regular: u32,
    pub days_ahead_postseason: u32,
}

impl SportConfig {
    pub fn season_phase(&self, today: NaiveDate) -> SeasonPhase {
        if self.preseason.contains(today) {
            SeasonPhase::Preseason
        } else if self.regular.contains(today) {
            SeasonPhase::Regular
        } else if self.postseason.contains(today) {
            SeasonPhase::Postseason
        } else {
            SeasonPhase::Offseason
        }
    }

    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.season_phase(today) != SeasonPhase::Offseason
    }

    pub fn days_ahead(&self, today: NaiveDate) -> u32 {
        match self.season_phase(today) {
            SeasonPhase::Preseason => self.days_ahead_preseason,
            SeasonPhase::Regular => self.days_ahead_regular,
            SeasonPhase::Postseason => self.days_ahead_postseason,
            SeasonPhase::Offseason => 0,
        }
    }

    /// The dates to poll the secondary feeds for, starting from `now`
    /// shifted to the providers' schedule timezone.
    pub fn date_window(&self, now: DateTime<Utc>) -> Vec<NaiveDate> {
        let local = now + Duration::hours(SCHEDULE_UTC_OFFSET_HOURS);
        let today = local.date_naive();
        (0..self.days_ahead(today))
            .filter_map(|i| today.checked_add_signed(Duration::days(i64::from(i))))
            .collect()
    }
}

pub static SPORTS: &[SportConfig] = &[
    SportConfig {
        name: "MLB",
        jsonodds_id: sport::MLB,
        rundown_id: 3,
        regulation_periods: 9,
        preseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        regular: DateRange { start: (2025, 4, 1), end: (2025, 10, 31) },
        postseason: DateRange { start: (2024, 11, 1), end: (2024, 12, 15) },
        days_ahead_preseason: 14,
        days_ahead_regular: 5,
        days_ahead_postseason: 14,
    },
    SportConfig {
        name: "NBA",
        jsonodds_id: sport::NBA,
        rundown_id: 4,
        regulation_periods: 4,
        preseason: DateRange { start: (2024, 10, 3), end: (2024, 10, 21) },
        regular: DateRange { start: (2024, 12, 25), end: (2025, 4, 21) },
        postseason: DateRange { start: (2025, 1, 1), end: (2025, 1, 1) },
        days_ahead_preseason: 10,
        days_ahead_regular: 3,
        days_ahead_postseason: 7,
    },
    SportConfig {
        name: "NCAAB",
        jsonodds_id: sport::NCAAB,
        rundown_id: 5,
        regulation_periods: 2,
        preseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        regular: DateRange { start: (2025, 2, 10), end: (2025, 2, 16) },
        postseason: DateRange { start: (2024, 3, 18), end: (2024, 4, 8) },
        days_ahead_preseason: 10,
        days_ahead_regular: 2,
        days_ahead_postseason: 7,
    },
    SportConfig {
        name: "NCAAF",
        jsonodds_id: sport::NCAAF,
        rundown_id: 1,
        regulation_periods: 4,
        preseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        regular: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        postseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        days_ahead_preseason: 21,
        days_ahead_regular: 8,
        days_ahead_postseason: 3,
    },
    SportConfig {
        name: "NFL",
        jsonodds_id: sport::NFL,
        rundown_id: 2,
        regulation_periods: 4,
        preseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        regular: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        postseason: DateRange { start: (2024, 12, 31), end: (2025, 2, 10) },
        days_ahead_preseason: 21,
        days_ahead_regular: 8,
        days_ahead_postseason: 3,
    },
    SportConfig {
        name: "NHL",
        jsonodds_id: sport::NHL,
        rundown_id: 6,
        regulation_periods: 3,
        preseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        regular: DateRange { start: (2023, 10, 10), end: (2024, 4, 18) },
        postseason: DateRange { start: (2024, 4, 19), end: (2024, 6, 30) },
        days_ahead_preseason: 10,
        days_ahead_regular: 3,
        days_ahead_postseason: 7,
    },
    SportConfig {
        name: "WNBA",
        jsonodds_id: sport::WNBA,
        rundown_id: 8,
        regulation_periods: 4,
        preseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        regular: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        postseason: DateRange { start: (2024, 12, 31), end: (2024, 12, 31) },
        days_ahead_preseason: 10,
        days_ahead_regular: 3,
        days_ahead_postseason: 7,
    },
];

pub fn by_jsonodds_id(id: u8) -> Option<&'static SportConfig> {
    SPORTS.iter().find(|s| s.jsonodds_id == id)
}

/// `YYYY-MM-DD` as the feed APIs expect it.
pub fn feed_date(day: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", day.year(), day.month(), day.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mlb() -> &'static SportConfig {
        by_jsonodds_id(sport::MLB).unwrap()
    }

    #[test]
    fn phase_follows_the_calendar() {
        let cfg = mlb();
        let in_season = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let off_season = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(cfg.season_phase(in_season), SeasonPhase::Regular);
        assert_eq!(cfg.season_phase(off_season), SeasonPhase::Offseason);
        assert!(cfg.is_active(in_season));
        assert!(!cfg.is_active(off_season));
    }

    #[test]
    fn window_length_matches_phase() {
        let cfg = mlb();
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let window = cfg.date_window(now);
        assert_eq!(window.len(), cfg.days_ahead_regular as usize);
        assert_eq!(window[0], NaiveDate::from_ymd_opt(2025, 6, 15).unwrap());
        assert_eq!(feed_date(window[1]), "2025-06-16");
    }

    #[test]
    fn schedule_offset_rolls_the_date_back_near_midnight() {
        let cfg = mlb();
        // 03:00 UTC is still the previous evening on the schedule clock.
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 3, 0, 0).unwrap();
        let window = cfg.date_window(now);
        assert_eq!(window[0], NaiveDate::from_ymd_opt(2025, 6, 14).unwrap());
    }

    #[test]
    fn sport_table_ids_are_unique() {
        for (i, a) in SPORTS.iter().enumerate() {
            for b in &SPORTS[i + 1..] {
                assert_ne!(a.jsonodds_id, b.jsonodds_id);
                assert_ne!(a.rundown_id, b.rundown_id);
            }
        }
    }
}
