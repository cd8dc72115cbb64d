//! Walltime and timestamp parsing for PBS values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalltimeError {
    #[error("Empty walltime")]
    Empty,
    #[error("Invalid walltime {0:?}, expected [[H:]MM:]SS")]
    Malformed(String),
    #[error("Walltime {input:?} has {field} out of range ({value} >= 60)")]
    OutOfRange {
        input: String,
        field: &'static str,
        value: u64,
    },
    #[error("Walltime {0:?} is too large")]
    TooLarge(String),
}

/// A walltime limit, stored as whole seconds.
///
/// Rendered canonically as `H:MM:SS` with unpadded hours, e.g. `4:00:00`
/// or `24:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Walltime(u64);

impl Walltime {
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Saturates at `u64::MAX` seconds.
    pub const fn from_hms(hours: u64, minutes: u64, seconds: u64) -> Self {
        Self(
            hours
                .saturating_mul(3600)
                .saturating_add(minutes.saturating_mul(60))
                .saturating_add(seconds),
        )
    }

    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_walltime(self.0))
    }
}

impl FromStr for Walltime {
    type Err = WalltimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_walltime(s)
    }
}

/// Parse a PBS walltime.
///
/// Supports:
/// - HH:MM:SS (hours unbounded, e.g. "24:00:00" or "4:00:00")
/// - MM:SS
/// - Seconds as integer
pub fn parse_walltime(s: &str) -> Result<Walltime, WalltimeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(WalltimeError::Empty);
    }

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() > 3 {
        return Err(WalltimeError::Malformed(s.to_string()));
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WalltimeError::Malformed(s.to_string()));
        }
        let value = part
            .parse::<u64>()
            .map_err(|_| WalltimeError::Malformed(s.to_string()))?;
        values.push(value);
    }

    // Lower fields only wrap at 60 when a higher field is present
    let check = |field: &'static str, value: u64| {
        if value >= 60 {
            Err(WalltimeError::OutOfRange {
                input: s.to_string(),
                field,
                value,
            })
        } else {
            Ok(value)
        }
    };

    let (h, m, sec) = match values.as_slice() {
        [h, m, sec] => (*h, check("minutes", *m)?, check("seconds", *sec)?),
        [m, sec] => (0, *m, check("seconds", *sec)?),
        [sec] => (0, 0, *sec),
        _ => return Err(WalltimeError::Malformed(s.to_string())),
    };

    h.checked_mul(3600)
        .and_then(|v| v.checked_add(m.checked_mul(60)?))
        .and_then(|v| v.checked_add(sec))
        .map(Walltime)
        .ok_or_else(|| WalltimeError::TooLarge(s.to_string()))
}

/// Format seconds as a PBS walltime (`H:MM:SS`, hours unpadded).
pub fn format_walltime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}:{:02}:{:02}", hours, mins, secs)
}

/// Parse a qstat timestamp (e.g., "Mon Oct 19 10:30:00 2026").
///
/// qstat prints local time. Returns None for empty or unparseable values.
pub fn parse_pbs_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // Collapse double spaces from day-of-month padding ("Oct  9")
    let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y")
        .ok()
        .and_then(|dt| Local.from_local_datetime(&dt).single())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an exit status from qstat ("Exit_status = 0").
///
/// Returns None when the value is not an integer.
pub fn parse_exit_status(s: &str) -> Option<i32> {
    s.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_walltime() {
        assert_eq!(parse_walltime("24:00:00"), Ok(Walltime::from_hms(24, 0, 0)));
        assert_eq!(parse_walltime("4:00:00"), Ok(Walltime::from_secs(14400)));
        assert_eq!(parse_walltime("04:00:00"), Ok(Walltime::from_secs(14400)));
        assert_eq!(parse_walltime("30:00"), Ok(Walltime::from_secs(1800)));
        assert_eq!(parse_walltime("3600"), Ok(Walltime::from_secs(3600)));
        assert_eq!(parse_walltime("100:00:00"), Ok(Walltime::from_hms(100, 0, 0)));
    }

    #[test]
    fn test_parse_walltime_errors() {
        assert_eq!(parse_walltime(""), Err(WalltimeError::Empty));
        assert!(matches!(
            parse_walltime("1:2:3:4"),
            Err(WalltimeError::Malformed(_))
        ));
        assert!(matches!(
            parse_walltime("4h"),
            Err(WalltimeError::Malformed(_))
        ));
        assert!(matches!(
            parse_walltime("4::00"),
            Err(WalltimeError::Malformed(_))
        ));
        assert!(matches!(
            parse_walltime("1:60:00"),
            Err(WalltimeError::OutOfRange {
                field: "minutes",
                ..
            })
        ));
        assert!(matches!(
            parse_walltime("-1:00:00"),
            Err(WalltimeError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_walltime_overflow() {
        assert!(matches!(
            parse_walltime("9999999999999999:00:00"),
            Err(WalltimeError::TooLarge(_))
        ));
        assert!(matches!(
            parse_walltime("999999999999999999:00"),
            Err(WalltimeError::TooLarge(_))
        ));
        assert_eq!(Walltime::from_hms(u64::MAX, 0, 0).as_secs(), u64::MAX);
    }

    #[test]
    fn test_format_walltime() {
        assert_eq!(format_walltime(86400), "24:00:00");
        assert_eq!(format_walltime(14400), "4:00:00");
        assert_eq!(format_walltime(3725), "1:02:05");
        assert_eq!(format_walltime(59), "0:00:59");
    }

    #[test]
    fn test_walltime_display_reproduces_directive_values() {
        for value in ["24:00:00", "4:00:00", "0:30:00"] {
            assert_eq!(parse_walltime(value).unwrap().to_string(), value);
        }
    }

    #[test]
    fn test_parse_pbs_timestamp() {
        let dt = parse_pbs_timestamp("Mon Oct 19 10:30:00 2026");
        assert!(dt.is_some());
        assert!(parse_pbs_timestamp("Fri Oct  9 10:30:00 2026").is_some());
        assert!(parse_pbs_timestamp("").is_none());
        assert!(parse_pbs_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_parse_exit_status() {
        assert_eq!(parse_exit_status("0"), Some(0));
        assert_eq!(parse_exit_status(" 271 "), Some(271));
        assert_eq!(parse_exit_status("-11"), Some(-11));
        assert_eq!(parse_exit_status("x"), None);
    }
}
