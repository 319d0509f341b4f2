//! Host-wide CPU time from the aggregate `cpu` line of `/proc/stat`.
//!
//! The decoded field set is fixed to the eight columns `user nice system idle
//! iowait irq softirq steal`. `guest` and `guest_nice` are already contained
//! in `user`/`nice` and are never added. Kernels that do not report `steal`
//! are rejected instead of silently summing fewer columns.

use std::io::BufRead;

use nix::unistd::{SysconfVar, sysconf};

use super::StatParseError;

const FIELD_NAMES: [&str; 8] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal",
];

/// Aggregate CPU time of the host in `USER_HZ` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostCpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl HostCpuStat {
    /// Parses the first line of a `/proc/stat` formatted buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::Malformed`] if the first line is not the
    /// aggregate `cpu` line, [`StatParseError::MissingField`] if one of the
    /// eight columns is absent and [`StatParseError::InvalidValue`] if a
    /// column does not parse.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut line = String::new();
        buf.read_line(&mut line)?;

        let mut parts = line.split_whitespace();
        if parts.next() != Some("cpu") {
            return Err(StatParseError::Malformed {
                line: 1,
                reason: "first line is not the aggregate cpu line",
            });
        }

        let mut values = [0u64; FIELD_NAMES.len()];
        for (slot, name) in values.iter_mut().zip(FIELD_NAMES) {
            let raw = parts.next().ok_or(StatParseError::MissingField { field: name })?;
            *slot = raw
                .parse::<u64>()
                .map_err(|source| StatParseError::InvalidValue {
                    value: raw.to_string(),
                    line: 1,
                    source,
                })?;
        }

        let [user, nice, system, idle, iowait, irq, softirq, steal] = values;
        Ok(Self {
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
        })
    }

    /// Ticks spent doing work.
    pub fn compute_ticks(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    /// Ticks spent idle, including waiting for I/O.
    pub fn idle_ticks(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }

    /// All eight columns summed.
    pub fn total_ticks(&self) -> u64 {
        self.compute_ticks().saturating_add(self.idle_ticks())
    }
}

/// Clock ticks per second used by `/proc/stat`.
///
/// Read once at startup and passed to whoever converts ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserHz(u64);

impl UserHz {
    /// Queries `sysconf(_SC_CLK_TCK)`.
    ///
    /// # Errors
    ///
    /// Fails if the system does not report a positive tick rate.
    pub fn detect() -> std::io::Result<Self> {
        match sysconf(SysconfVar::CLK_TCK) {
            Ok(Some(hz)) if hz > 0 => Ok(Self(hz as u64)),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine clock ticks per second",
            )),
        }
    }

    /// Builds a tick rate from a known value. Zero is rejected.
    pub fn new(hz: u64) -> Option<Self> {
        (hz > 0).then_some(Self(hz))
    }

    /// Converts ticks to microseconds without intermediate overflow.
    pub fn ticks_to_usec(&self, ticks: u64) -> u64 {
        let usec = u128::from(ticks) * 1_000_000 / u128::from(self.0);
        u64::try_from(usec).unwrap_or(u64::MAX)
    }
}
