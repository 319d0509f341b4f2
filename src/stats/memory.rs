//! Parsing of the cgroup v2 `memory.stat` and `memory.current` files.
//!
//! The metered footprint is the sum of five categories: active anonymous and
//! file pages, unreclaimable slab, per-cpu allocations and unevictable pages.
//! Each category must be reported by the kernel; a missing one means the
//! cgroup exposes a schema this decoder does not understand.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::{KeyValueStat, SingleLineStat};

/// The `memory.stat` categories contributing to the metered footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStat {
    pub active_anon: u64,
    pub active_file: u64,
    pub slab_unreclaimable: u64,
    pub percpu: u64,
    pub unevictable: u64,
}

impl MemoryStat {
    /// Sum of all tracked categories in bytes.
    pub fn total(&self) -> u64 {
        self.active_anon
            .saturating_add(self.active_file)
            .saturating_add(self.slab_unreclaimable)
            .saturating_add(self.percpu)
            .saturating_add(self.unevictable)
    }

    fn set_active_anon(&mut self, v: u64) {
        self.active_anon = v;
    }

    fn set_active_file(&mut self, v: u64) {
        self.active_file = v;
    }

    fn set_slab_unreclaimable(&mut self, v: u64) {
        self.slab_unreclaimable = v;
    }

    fn set_percpu(&mut self, v: u64) {
        self.percpu = v;
    }

    fn set_unevictable(&mut self, v: u64) {
        self.unevictable = v;
    }
}

type Setter = fn(&mut MemoryStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(5);

    m.insert("active_anon", MemoryStat::set_active_anon);
    m.insert("active_file", MemoryStat::set_active_file);
    m.insert("slab_unreclaimable", MemoryStat::set_slab_unreclaimable);
    m.insert("percpu", MemoryStat::set_percpu);
    m.insert("unevictable", MemoryStat::set_unevictable);

    m
});

impl KeyValueStat for MemoryStat {
    const SPLIT_CHAR: Option<char> = None;
    const SKIP_LINES: usize = 0;
    const SKIP_VALUES: usize = 0;
    const ALLOW_DUPLICATE_KEYS: bool = false;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = false;
    const REQUIRED_KEYS: &'static [&'static str] = &[
        "active_anon",
        "active_file",
        "slab_unreclaimable",
        "percpu",
        "unevictable",
    ];

    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

/// Total memory charged to a cgroup, from `memory.current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryCurrent {
    pub bytes: u64,
}

impl SingleLineStat for MemoryCurrent {
    fn from_value(bytes: u64) -> Self {
        Self { bytes }
    }
}
