//! Parsing of the cgroup v2 `cpu.stat` file.
//!
//! Only `usage_usec` is decoded. It is the cumulative CPU time of every task
//! in the cgroup, in microseconds, and must be present.
//!
//! # Example
//!
//! ```rust
//! use metering_probes::stats::{CpuStat, KeyValueStat};
//!
//! let data = "usage_usec 1000000\nuser_usec 600000\nsystem_usec 400000\n";
//! let stat = CpuStat::from_reader(&mut data.as_bytes()).unwrap();
//! assert_eq!(stat.usage_usec, 1_000_000);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use super::KeyValueStat;

/// Parsed `cpu.stat` snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuStat {
    /// Total CPU time consumed by the cgroup in microseconds.
    pub usage_usec: u64,
}

impl CpuStat {
    fn set_usage_usec(&mut self, usage_usec: u64) {
        self.usage_usec = usage_usec;
    }
}

type Setter = fn(&mut CpuStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(1);
    m.insert("usage_usec", CpuStat::set_usage_usec);
    m
});

impl KeyValueStat for CpuStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_LINES: usize = 0;
    const SKIP_VALUES: usize = 0;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;
    const REQUIRED_KEYS: &'static [&'static str] = &["usage_usec"];

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}
