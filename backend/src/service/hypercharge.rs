use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{EngineError, EngineResult};
use crate::models::Hypercharge;

pub const MIN_MULTIPLIER_PERCENT: u32 = 10;
pub const MAX_MULTIPLIER_PERCENT: u32 = 200;
const MAX_DURATION_HOURS: i64 = 24 * 365;

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([hd])$").expect("static duration pattern"));

/// Parses `12h` / `3d` style durations used by hypercharge and extend commands.
pub fn parse_duration(spec: &str) -> EngineResult<Duration> {
    let trimmed = spec.trim().to_ascii_lowercase();
    let caps = DURATION_RE
        .captures(&trimmed)
        .ok_or_else(|| EngineError::InvalidDuration(spec.to_string()))?;

    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| EngineError::InvalidDuration(spec.to_string()))?;
    let hours = match &caps[2] {
        "h" => amount,
        _ => amount.saturating_mul(24),
    };

    if hours == 0 || hours > MAX_DURATION_HOURS {
        return Err(EngineError::InvalidDuration(spec.to_string()));
    }
    Ok(Duration::hours(hours))
}

/// Builds a hypercharge starting at `now`. Stored as a fraction (50% -> 0.5).
pub fn build(multiplier_percent: u32, duration_spec: &str, now: DateTime<Utc>) -> EngineResult<Hypercharge> {
    if !(MIN_MULTIPLIER_PERCENT..=MAX_MULTIPLIER_PERCENT).contains(&multiplier_percent) {
        return Err(EngineError::InvalidMultiplier(multiplier_percent));
    }
    let duration = parse_duration(duration_spec)?;
    Ok(Hypercharge {
        multiplier: multiplier_percent as f64 / 100.0,
        expires_at: now + duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_duration("3d").unwrap(), Duration::hours(72));
        assert_eq!(parse_duration(" 2D ").unwrap(), Duration::hours(48));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "h", "12", "12m", "-3d", "1.5h", "0h", "99999999999999999999d", "400d"] {
            assert!(
                matches!(parse_duration(bad), Err(EngineError::InvalidDuration(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_build_bounds() {
        let now = Utc::now();
        assert!(build(10, "1h", now).is_ok());
        assert!(build(200, "1h", now).is_ok());
        assert_eq!(build(9, "1h", now), Err(EngineError::InvalidMultiplier(9)));
        assert_eq!(build(201, "1h", now), Err(EngineError::InvalidMultiplier(201)));

        let h = build(50, "2d", now).unwrap();
        assert!((h.multiplier - 0.5).abs() < f64::EPSILON);
        assert_eq!(h.expires_at, now + Duration::hours(48));
    }
}
