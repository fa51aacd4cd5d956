//! Human-readable durations for the command line.
//!
//! Accepts one or more `<number><unit>` groups, e.g. `30s`, `1h30m`,
//! `2d12h`, `500ms`. Units: `ms`, `s`, `m`, `h`, `d`. A bare `0` is zero.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration string")]
    Empty,

    #[error("invalid duration format: {0}")]
    InvalidFormat(String),

    #[error("invalid numeric value: {0}")]
    InvalidNumber(String),

    #[error("unknown time unit: {0}")]
    UnknownUnit(String),

    #[error("duration is too large")]
    Overflow,
}

pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(DurationParseError::InvalidFormat(format!(
                "expected a number at {rest:?}"
            )));
        }
        let (num, tail) = rest.split_at(digits);
        let num: u64 = num
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(num.to_string()))?;

        let unit_len = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let part = match unit {
            "ms" => Duration::from_millis(num),
            "s" => Duration::from_secs(num),
            "m" => secs(num, 60)?,
            "h" => secs(num, 3600)?,
            "d" => secs(num, 86400)?,
            "" => {
                return Err(DurationParseError::InvalidFormat(
                    "number without unit".into(),
                ))
            }
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };
        total = total.checked_add(part).ok_or(DurationParseError::Overflow)?;
        rest = tail;
    }
    Ok(total)
}

fn secs(num: u64, multiplier: u64) -> Result<Duration, DurationParseError> {
    num.checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or(DurationParseError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172800));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn combined_units() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(
            parse_duration("1m1s250ms").unwrap(),
            Duration::from_millis(61_250)
        );
    }

    #[test]
    fn errors() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert_eq!(
            parse_duration("10"),
            Err(DurationParseError::InvalidFormat("number without unit".into()))
        );
        assert_eq!(
            parse_duration("3w"),
            Err(DurationParseError::UnknownUnit("w".into()))
        );
        assert!(matches!(
            parse_duration("h"),
            Err(DurationParseError::InvalidFormat(_))
        ));
        assert_eq!(
            parse_duration(&format!("{}d", u64::MAX)),
            Err(DurationParseError::Overflow)
        );
    }
}
