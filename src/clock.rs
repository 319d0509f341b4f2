//! Wall-clock timestamps that never jump.
//!
//! The offset between `CLOCK_REALTIME` and `CLOCK_MONOTONIC_RAW` is captured
//! once; every later timestamp is that offset plus a fresh monotonic read. NTP
//! slewing or an operator setting the clock therefore cannot reorder
//! readings.

use std::fmt;

use nix::time::{ClockId, clock_gettime};

use crate::error::ProbeError;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Microseconds since the Unix epoch.
///
/// Displays as seconds immediately followed by six zero-padded microsecond
/// digits, e.g. `1690000000123456`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:06}",
            self.0 / MICROS_PER_SEC,
            self.0 % MICROS_PER_SEC
        )
    }
}

fn read_micros(clock: ClockId) -> Result<u64, ProbeError> {
    let ts = clock_gettime(clock).map_err(ProbeError::Clock)?;
    let secs = u64::try_from(ts.tv_sec()).unwrap_or(0);
    let nanos = u64::try_from(ts.tv_nsec()).unwrap_or(0);
    Ok(secs * MICROS_PER_SEC + nanos / 1_000)
}

/// Source of strictly increasing [`Timestamp`]s.
#[derive(Debug)]
pub struct Clock {
    offset_us: u64,
    last: Option<Timestamp>,
}

impl Clock {
    /// Captures the realtime/monotonic offset.
    pub fn new() -> Result<Self, ProbeError> {
        let realtime = read_micros(ClockId::CLOCK_REALTIME)?;
        let monotonic = read_micros(ClockId::CLOCK_MONOTONIC_RAW)?;
        Ok(Self::with_offset(realtime.saturating_sub(monotonic)))
    }

    pub fn with_offset(offset_us: u64) -> Self {
        Self {
            offset_us,
            last: None,
        }
    }

    /// Current timestamp.
    pub fn now(&mut self) -> Result<Timestamp, ProbeError> {
        let monotonic = read_micros(ClockId::CLOCK_MONOTONIC_RAW)?;
        Ok(self.adjust(monotonic))
    }

    /// Maps a monotonic reading to a timestamp later than every previous one.
    pub fn adjust(&mut self, monotonic_us: u64) -> Timestamp {
        let mut ts = Timestamp(self.offset_us.saturating_add(monotonic_us));
        if let Some(last) = self.last
            && ts <= last
        {
            ts = Timestamp(last.0 + 1);
        }
        self.last = Some(ts);
        ts
    }
}
