//! Injected clock so that "today" and "current hour" are explicit inputs
//! rather than ambient reads. Every component that cares about time takes an
//! `EngineClock`, which keeps the control loop deterministic under test.

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};

/// Source of the engine's notion of time.
///
/// The local offset is fixed per deployment; per-user timezones are out of
/// scope for this engine.
pub trait EngineClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local UTC offset in hours, applied when computing hour-of-day and
    /// day boundaries.
    fn utc_offset_hours(&self) -> i32;

    /// Hour of day (0-23) in the configured local offset.
    fn local_hour(&self) -> u32 {
        self.now().with_timezone(&self.offset()).hour()
    }

    /// Instant of local midnight for the current local day, expressed in UTC.
    fn local_day_start(&self) -> DateTime<Utc> {
        let local = self.now().with_timezone(&self.offset());
        let midnight = local
            - Duration::hours(i64::from(local.hour()))
            - Duration::minutes(i64::from(local.minute()))
            - Duration::seconds(i64::from(local.second()))
            - Duration::nanoseconds(i64::from(local.nanosecond()));
        midnight.with_timezone(&Utc)
    }

    fn offset(&self) -> FixedOffset {
        let clamped = self.utc_offset_hours().clamp(-12, 14);
        match FixedOffset::east_opt(clamped * 3600) {
            Some(offset) => offset,
            None => Utc.fix(),
        }
    }
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock {
    pub utc_offset_hours: i32,
}

impl SystemClock {
    pub fn new(utc_offset_hours: i32) -> Self {
        Self { utc_offset_hours }
    }
}

impl EngineClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn utc_offset_hours(&self) -> i32 {
        self.utc_offset_hours
    }
}

/// Pinned time for tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub utc_offset_hours: i32,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now, utc_offset_hours: 0 }
    }

    pub fn with_offset(now: DateTime<Utc>, utc_offset_hours: i32) -> Self {
        Self { now, utc_offset_hours }
    }
}

impl EngineClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn utc_offset_hours(&self) -> i32 {
        self.utc_offset_hours
    }
}
