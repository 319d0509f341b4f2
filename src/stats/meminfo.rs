//! Parsing of `/proc/meminfo`.
//!
//! Values are reported in KiB (`MemTotal:       16318412 kB`). Host memory in
//! use is everything the kernel does not consider available.
//!
//! # Example
//!
//! ```rust
//! use metering_probes::stats::{KeyValueStat, MemInfo};
//!
//! let data = "MemTotal: 1000 kB\nMemFree: 100 kB\nMemAvailable: 400 kB\n";
//! let info = MemInfo::from_reader(&mut data.as_bytes()).unwrap();
//! assert_eq!(info.used_bytes(), 600 * 1024);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use super::KeyValueStat;

const KIB: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemInfo {
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
}

impl MemInfo {
    /// `MemTotal - MemAvailable` in bytes, zero if the kernel reports more
    /// available than total.
    pub fn used_bytes(&self) -> u64 {
        self.mem_total_kb
            .saturating_sub(self.mem_available_kb)
            .saturating_mul(KIB)
    }

    fn set_mem_total(&mut self, kb: u64) {
        self.mem_total_kb = kb;
    }

    fn set_mem_available(&mut self, kb: u64) {
        self.mem_available_kb = kb;
    }
}

type Setter = fn(&mut MemInfo, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(2);

    m.insert("MemTotal:", MemInfo::set_mem_total);
    m.insert("MemAvailable:", MemInfo::set_mem_available);

    m
});

impl KeyValueStat for MemInfo {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_LINES: usize = 0;
    const SKIP_VALUES: usize = 0;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    // the unit column follows the value
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;
    const REQUIRED_KEYS: &'static [&'static str] = &["MemTotal:", "MemAvailable:"];

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}
