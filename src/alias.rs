//! Team name canonicalization.
//!
//! Every feed spells team names its own way: "LA Clippers" vs
//! "Los Angeles Clippers", "Miami (FL)" vs "Miami Florida". Matching across
//! feeds happens on canonical names only, resolved per league so the same
//! raw name can belong to different schools in different leagues, and one
//! school can carry its aliases across several leagues.

use tracing::debug;

struct LeagueAliases {
    league: u8,
    aliases: &'static [&'static str],
}

struct AliasEntry {
    canonical: &'static str,
    leagues: &'static [LeagueAliases],
}

/// Sports where the secondary feeds split name and mascot; the mascot is
/// appended before canonicalization so "Los Angeles" + "Clippers" lines up
/// with the authoritative feed's "Los Angeles Clippers".
const MASCOT_SPORTS: &[u8] = &[
    sport::MLB,
    sport::NBA,
    sport::NFL,
    sport::NHL,
    sport::WNBA,
];

/// JsonOdds sport identifiers, used as league keys throughout.
pub mod sport {
    pub const MLB: u8 = 0;
    pub const NBA: u8 = 1;
    pub const NCAAB: u8 = 2;
    pub const NCAAF: u8 = 3;
    pub const NFL: u8 = 4;
    pub const NHL: u8 = 5;
    pub const WNBA: u8 = 8;
}

static ALIASES: &[AliasEntry] = &[
    AliasEntry {
        canonical: "Los Angeles Clippers",
        leagues: &[LeagueAliases {
            league: sport::NBA,
            aliases: &["LA Clippers", "Los Angeles Clippers"],
        }],
    },
    AliasEntry {
        canonical: "Portland Trail Blazers",
        leagues: &[LeagueAliases {
            league: sport::NBA,
            aliases: &["Portland Trailblazers", "Portland Trail Blazers"],
        }],
    },
    AliasEntry {
        canonical: "Miami Florida",
        leagues: &[
            LeagueAliases {
                league: sport::NCAAB,
                aliases: &["Miami (FL)", "Miami Florida"],
            },
            LeagueAliases {
                league: sport::NCAAF,
                aliases: &["Miami (FL)", "Miami Florida", "Miami Hurricanes"],
            },
        ],
    },
    AliasEntry {
        canonical: "Miami Ohio",
        leagues: &[
            LeagueAliases {
                league: sport::NCAAB,
                aliases: &["Miami (OH)", "Miami Ohio"],
            },
            LeagueAliases {
                league: sport::NCAAF,
                aliases: &["Miami (OH)", "Miami Ohio", "Miami RedHawks"],
            },
        ],
    },
    AliasEntry {
        canonical: "Connecticut",
        leagues: &[LeagueAliases {
            league: sport::NCAAB,
            aliases: &["UConn", "Connecticut"],
        }],
    },
];

/// Constructed once at startup and injected wherever names get compared.
pub struct AliasResolver {
    entries: &'static [AliasEntry],
}

impl Default for AliasResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasResolver {
    pub fn new() -> Self {
        Self { entries: ALIASES }
    }

    /// Canonicalize a secondary-feed team, appending the mascot first for
    /// the sports whose feeds split it out.
    pub fn team_name_for_sport(&self, sport: u8, name: &str, mascot: Option<&str>) -> String {
        match mascot {
            Some(mascot) if MASCOT_SPORTS.contains(&sport) => {
                let full = format!("{name} {mascot}");
                self.canonicalize(&full, sport)
            }
            _ => self.canonicalize(name, sport),
        }
    }

    /// Canonical name for `raw` in `league`, or `raw` unchanged when no
    /// alias entry covers it.
    pub fn canonicalize(&self, raw: &str, league: u8) -> String {
        for entry in self.entries {
            if let Some(la) = entry.leagues.iter().find(|la| la.league == league) {
                if la.aliases.contains(&raw) {
                    if raw != entry.canonical {
                        debug!(raw, canonical = entry.canonical, league, "team alias resolved");
                    }
                    return entry.canonical.to_string();
                }
            }
        }
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miami_schools_stay_distinct_in_ncaab() {
        let r = AliasResolver::new();
        let fl_paren = r.canonicalize("Miami (FL)", sport::NCAAB);
        let fl_full = r.canonicalize("Miami Florida", sport::NCAAB);
        let oh = r.canonicalize("Miami (OH)", sport::NCAAB);
        assert_eq!(fl_paren, fl_full);
        assert_ne!(fl_paren, oh);
    }

    #[test]
    fn same_school_resolves_across_leagues() {
        let r = AliasResolver::new();
        assert_eq!(r.canonicalize("Miami (FL)", sport::NCAAF), "Miami Florida");
        assert_eq!(r.canonicalize("Miami (FL)", sport::NCAAB), "Miami Florida");
    }

    #[test]
    fn alias_is_league_scoped() {
        let r = AliasResolver::new();
        // "UConn" is only aliased for college basketball.
        assert_eq!(r.canonicalize("UConn", sport::NCAAB), "Connecticut");
        assert_eq!(r.canonicalize("UConn", sport::NFL), "UConn");
    }

    #[test]
    fn unknown_name_passes_through() {
        let r = AliasResolver::new();
        assert_eq!(r.canonicalize("Boston Celtics", sport::NBA), "Boston Celtics");
    }

    #[test]
    fn mascot_is_appended_for_pro_leagues_only() {
        let r = AliasResolver::new();
        assert_eq!(
            r.team_name_for_sport(sport::NBA, "LA", Some("Clippers")),
            "Los Angeles Clippers"
        );
        assert_eq!(
            r.team_name_for_sport(sport::NCAAB, "UConn", Some("Huskies")),
            "Connecticut"
        );
    }
}
