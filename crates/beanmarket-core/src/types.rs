//! Core types shared across the BeanMarket client
//!
//! Timestamps and the time source abstraction used by caches and sessions,
//! so that staleness and expiry can be driven deterministically in tests.

use core::ops::{Add, Sub};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(other.as_millis() as u64))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Create a timestamp from whole seconds since the epoch
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000))
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Whole seconds since the epoch
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }

    /// Parse an RFC 3339 date-time such as `2024-05-01T09:30:00Z`
    ///
    /// A bare `YYYY-MM-DD` date reads as midnight UTC. Fractional seconds are
    /// dropped. Instants before the epoch yield `None`.
    pub fn parse_rfc3339(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let date = raw.get(..10)?;
        let mut fields = date.split('-');
        let year: i64 = fields.next()?.parse().ok()?;
        let month: u32 = fields.next()?.parse().ok()?;
        let day: u32 = fields.next()?.parse().ok()?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        let mut secs = days_from_civil(year, month, day) * 86_400;

        let rest = &raw[10..];
        if !rest.is_empty() {
            let time = rest.strip_prefix(|c: char| matches!(c, 'T' | 't' | ' '))?;
            let clock = time.get(..8)?;
            let mut fields = clock.split(':');
            let hour: i64 = fields.next()?.parse().ok()?;
            let minute: i64 = fields.next()?.parse().ok()?;
            let second: i64 = fields.next()?.parse().ok()?;
            if hour > 23 || minute > 59 || second > 60 {
                return None;
            }
            secs += hour * 3_600 + minute * 60 + second;

            let mut zone = &time[8..];
            if let Some(fraction) = zone.strip_prefix('.') {
                zone = fraction.trim_start_matches(|c: char| c.is_ascii_digit());
            }
            let offset = match zone {
                "" | "Z" | "z" => 0,
                _ => {
                    let (sign, hhmm) = if let Some(hhmm) = zone.strip_prefix('+') {
                        (1, hhmm)
                    } else {
                        (-1, zone.strip_prefix('-')?)
                    };
                    let (hours, minutes) = hhmm.split_once(':')?;
                    let hours: i64 = hours.parse().ok()?;
                    let minutes: i64 = minutes.parse().ok()?;
                    sign * (hours * 3_600 + minutes * 60)
                }
            };
            secs -= offset;
        }

        u64::try_from(secs).ok().map(Self::from_secs)
    }
}

/// Days from 1970-01-01 to the given proleptic Gregorian date
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = (if year >= 0 { year } else { year - 399 }) / 400;
    let year_of_era = year - era * 400;
    let month_from_march = (i64::from(month) + 9) % 12;
    let day_of_year = (153 * month_from_march + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of "now" for freshness and expiry decisions
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall-clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock
///
/// Clones share the same underlying instant, so a test can hand one clone to
/// a cache and keep another to move time forward.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    millis: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Create a clock starting at the given timestamp
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start.as_millis())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.as_millis(), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let base = Timestamp::new(10_000);
        let later = base + Duration::from_secs(5);
        assert_eq!(later.as_millis(), 15_000);
        assert_eq!(later - base, 5_000);
        assert_eq!(base - later, 0);
        assert_eq!(later.duration_since(base), Duration::from_secs(5));
        assert_eq!(base.duration_since(later), Duration::ZERO);
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(Timestamp::parse_rfc3339("1970-01-01T00:00:00Z"), Some(Timestamp::new(0)));
        assert_eq!(
            Timestamp::parse_rfc3339("2024-05-01T00:00:00Z"),
            Some(Timestamp::from_secs(1_714_521_600))
        );
        assert_eq!(
            Timestamp::parse_rfc3339("2024-05-01"),
            Some(Timestamp::from_secs(1_714_521_600))
        );
        assert_eq!(
            Timestamp::parse_rfc3339("2024-05-01T02:30:00.250+02:30"),
            Some(Timestamp::from_secs(1_714_521_600))
        );
        assert_eq!(
            Timestamp::parse_rfc3339("2000-02-29T12:00:00-01:00"),
            Some(Timestamp::from_secs(951_829_200))
        );
        assert_eq!(Timestamp::parse_rfc3339("1969-12-31T23:59:59Z"), None);
        assert_eq!(Timestamp::parse_rfc3339("2024-13-01"), None);
        assert_eq!(Timestamp::parse_rfc3339("yesterday"), None);
    }

    #[test]
    fn test_manual_time_source_shared_between_clones() {
        let clock = ManualTimeSource::starting_at(Timestamp::from_secs(100));
        let observer = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(observer.now().as_millis(), 100_250);

        observer.set(Timestamp::new(1));
        assert_eq!(clock.now().as_millis(), 1);
    }
}
