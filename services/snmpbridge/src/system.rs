//! Computed system values: uptime and local time

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Utc};
use errors::{BridgeError, BridgeResult};

const MIN_OFFSET_HOURS: i64 = -12;
const MAX_OFFSET_HOURS: i64 = 14;

/// Signed whole-hour offset from UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimezoneOffset {
    hours: i8,
}

impl TimezoneOffset {
    pub fn from_hours(hours: i64) -> BridgeResult<Self> {
        if !(MIN_OFFSET_HOURS..=MAX_OFFSET_HOURS).contains(&hours) {
            return Err(BridgeError::invalid(
                "timezone_offset",
                format!("{hours} is outside {MIN_OFFSET_HOURS}..={MAX_OFFSET_HOURS}"),
            ));
        }
        Ok(Self { hours: hours as i8 })
    }

    /// Label appended to local timestamps, e.g. `+08` or `-05`
    pub fn label(self) -> String {
        let sign = if self.hours < 0 { '-' } else { '+' };
        format!("{sign}{:02}", self.hours.unsigned_abs())
    }

    fn fixed_offset(self) -> BridgeResult<FixedOffset> {
        FixedOffset::east_opt(i32::from(self.hours) * 3600)
            .ok_or_else(|| BridgeError::Internal(format!("offset {} out of range", self.label())))
    }
}

impl FromStr for TimezoneOffset {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (sign, digits) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => (1, trimmed),
        };
        if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BridgeError::invalid(
                "timezone_offset",
                format!("'{trimmed}' is not a signed hour offset such as +08"),
            ));
        }
        let hours: i64 = digits
            .parse()
            .map_err(|_| BridgeError::invalid("timezone_offset", trimmed))?;
        Self::from_hours(sign * hours)
    }
}

impl fmt::Display for TimezoneOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Source of the computed values, anchored at process start
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
    offset: TimezoneOffset,
}

impl SystemClock {
    pub fn new(offset: TimezoneOffset) -> Self {
        Self {
            started: Instant::now(),
            offset,
        }
    }

    /// Hundredths of a second since start. Wraps like an SNMP TimeTicks counter.
    pub fn uptime_ticks(&self) -> u32 {
        (self.started.elapsed().as_millis() / 10) as u32
    }

    /// Current local time, e.g. `20100607T152000+08`
    pub fn utc_time(&self) -> BridgeResult<String> {
        format_utc_time(Utc::now(), self.offset)
    }
}

/// Render `now` shifted by `offset` as `YYYYMMDDTHHMMSS` plus the offset label
pub fn format_utc_time(now: DateTime<Utc>, offset: TimezoneOffset) -> BridgeResult<String> {
    let local = now.with_timezone(&offset.fixed_offset()?);
    Ok(format!("{}{}", local.format("%Y%m%dT%H%M%S"), offset.label()))
}
