//! Odds arithmetic.
//!
//! The authoritative feed quotes American odds as display strings
//! ("-110", "+150"). On-chain the protocol works in decimal odds scaled to
//! fixed point with 7 implied digits, so the reconciler keeps both: the
//! provider string untouched for display, and the converted raw integer
//! next to it.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::model::PRECISION;

const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Parse an American odds string. Accepts an optional leading `+`.
/// American odds of 0 do not exist; they and empty strings parse to `None`.
pub fn parse_american(s: &str) -> Option<i64> {
    let trimmed = s.trim().strip_prefix('+').unwrap_or_else(|| s.trim());
    match trimmed.parse::<i64>() {
        Ok(0) | Err(_) => None,
        Ok(v) => Some(v),
    }
}

/// American -> decimal odds: 1 + a/100 for favorites' opposites (positive),
/// 1 + 100/|a| for favorites (negative).
pub fn american_to_decimal(american: i64) -> Decimal {
    let a = Decimal::from(american);
    if american > 0 {
        Decimal::ONE + a / HUNDRED
    } else {
        Decimal::ONE + HUNDRED / a.abs()
    }
}

/// Decimal -> American odds, rounded to the nearest integer. Decimal odds
/// at or below 1.0 have no American form and return `None`.
pub fn decimal_to_american(decimal: Decimal) -> Option<i64> {
    if decimal <= Decimal::ONE {
        return None;
    }
    let margin = decimal - Decimal::ONE;
    let american = if decimal >= Decimal::TWO {
        margin * HUNDRED
    } else {
        -(HUNDRED / margin)
    };
    american.round().to_i64()
}

/// American odds string -> fixed-point decimal odds (1e7 scale).
pub fn american_to_raw(s: &str) -> Option<u64> {
    let decimal = american_to_decimal(parse_american(s)?);
    (decimal * Decimal::from(PRECISION)).trunc().to_u64()
}

/// American odds integer -> fixed-point decimal odds (1e7 scale).
pub fn american_odds_to_raw(american: i64) -> Option<u64> {
    if american == 0 {
        return None;
    }
    (american_to_decimal(american) * Decimal::from(PRECISION)).trunc().to_u64()
}

/// Line string (spread / total, e.g. "-3.5") -> 1e7 fixed point.
pub fn line_to_raw(s: &str) -> Option<i64> {
    let line = Decimal::from_str(s.trim()).ok()?;
    (line * Decimal::from(PRECISION)).trunc().to_i64()
}

/// Numeric line from a feed that quotes plain numbers -> 1e7 fixed point.
pub fn line_value_to_raw(line: f64) -> Option<i64> {
    let line = Decimal::try_from(line).ok()?;
    (line * Decimal::from(PRECISION)).trunc().to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_american_strings() {
        assert_eq!(parse_american("-110"), Some(-110));
        assert_eq!(parse_american("+150"), Some(150));
        assert_eq!(parse_american(" 150 "), Some(150));
        assert_eq!(parse_american("0"), None);
        assert_eq!(parse_american(""), None);
        assert_eq!(parse_american("EV"), None);
    }

    #[test]
    fn converts_to_decimal_odds() {
        assert_eq!(american_to_decimal(100), Decimal::TWO);
        assert_eq!(american_to_decimal(-100), Decimal::TWO);
        assert_eq!(american_to_decimal(150), Decimal::from_str("2.5").unwrap());
        assert_eq!(
            american_to_decimal(-200),
            Decimal::from_str("1.5").unwrap()
        );
    }

    #[test]
    fn round_trips_through_american() {
        for odds in [-250, -110, -105, 100, 120, 345] {
            assert_eq!(decimal_to_american(american_to_decimal(odds)), Some(odds));
        }
    }

    #[test]
    fn raw_odds_use_seven_digit_fixed_point() {
        assert_eq!(american_to_raw("+100"), Some(20_000_000));
        assert_eq!(american_to_raw("-200"), Some(15_000_000));
        // -110 -> 1.9090909... truncated at the seventh digit
        assert_eq!(american_to_raw("-110"), Some(19_090_909));
        assert_eq!(american_to_raw("off"), None);
    }

    #[test]
    fn lines_convert_signed() {
        assert_eq!(line_to_raw("-3.5"), Some(-35_000_000));
        assert_eq!(line_to_raw("217"), Some(2_170_000_000));
        assert_eq!(line_to_raw(""), None);
        assert_eq!(line_value_to_raw(-4.5), Some(-45_000_000));
    }

    #[test]
    fn numeric_american_odds_convert_like_strings() {
        assert_eq!(american_odds_to_raw(-110), american_to_raw("-110"));
        assert_eq!(american_odds_to_raw(150), Some(25_000_000));
        assert_eq!(american_odds_to_raw(0), None);
    }
}
