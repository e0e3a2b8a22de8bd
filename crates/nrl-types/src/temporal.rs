use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock instant in milliseconds since the UNIX epoch.
///
/// Round deadlines, history rows and payment requests are all stamped with
/// this type. Clients compare their own clock against stored deadlines, so
/// no logical component is carried.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }

    /// The epoch.
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }

    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }

    /// This instant shifted forward, saturating at the end of time.
    pub fn plus(&self, d: Duration) -> Self {
        let add = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(add))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(&self, earlier: &Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Midnight UTC of the day containing this instant.
    ///
    /// Instants past the range `chrono` can represent are returned as is.
    pub fn start_of_utc_day(&self) -> Self {
        self.to_datetime()
            .and_then(|dt| dt.date_naive().and_hms_opt(0, 0, 0))
            .and_then(|midnight| u64::try_from(midnight.and_utc().timestamp_millis()).ok())
            .map_or(*self, Self)
    }

    /// Convert to a `chrono` UTC date-time, if representable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.0)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f UTC")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(Timestamp::now().as_millis() > 1_577_836_800_000);
    }

    #[test]
    fn plus_and_since() {
        let t = Timestamp::from_millis(1_000);
        let later = t.plus(Duration::from_secs(300));
        assert_eq!(later.as_millis(), 301_000);
        assert_eq!(later.since(&t), Duration::from_secs(300));
        assert_eq!(t.since(&later), Duration::ZERO);
    }

    #[test]
    fn plus_saturates() {
        let t = Timestamp::from_millis(u64::MAX - 1);
        assert_eq!(t.plus(Duration::from_secs(1)).as_millis(), u64::MAX);
    }

    #[test]
    fn start_of_day() {
        // 2024-01-02 03:04:05.006 UTC
        let t = Timestamp::from_millis(1_704_164_645_006);
        assert_eq!(t.start_of_utc_day().as_millis(), 1_704_153_600_000);
        // Midnight itself and the last millisecond of the day.
        let midnight = Timestamp::from_millis(1_704_153_600_000);
        assert_eq!(midnight.start_of_utc_day(), midnight);
        let last = Timestamp::from_millis(1_704_239_999_999);
        assert_eq!(last.start_of_utc_day(), midnight);
    }

    #[test]
    fn start_of_day_out_of_range_is_unchanged() {
        let t = Timestamp::from_millis(u64::MAX);
        assert_eq!(t.start_of_utc_day(), t);
    }

    #[test]
    fn display_is_utc() {
        let t = Timestamp::from_millis(1_704_153_600_000);
        assert_eq!(t.to_string(), "2024-01-02 00:00:00.000 UTC");
    }

    #[test]
    fn ordering() {
        let a = Timestamp::from_millis(5);
        let b = Timestamp::from_millis(6);
        assert!(a.is_before(&b));
        assert!(b.is_after(&a));
        assert!(Timestamp::zero() < a);
    }
}
