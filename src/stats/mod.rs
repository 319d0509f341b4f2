//! Decoders for the text counter files the probes sample.
//!
//! Every decoder turns one snapshot of a kernel file into a typed counter
//! struct. Decoders never keep state between snapshots; deltas and
//! normalization are the sampler's job.
//!
//! - [`CpuStat`]: `usage_usec` from a cgroup `cpu.stat`.
//! - [`MemoryStat`]: the five resident categories from `memory.stat`.
//! - [`MemoryCurrent`]: total charged memory from `memory.current`.
//! - [`MemInfo`]: `MemTotal` and `MemAvailable` from `/proc/meminfo`.
//! - [`IoStat`]: per-device byte counters from `io.stat`, partitions and
//!   virtual devices excluded.
//! - [`NetDevStat`]: byte counters from `/proc/net/dev`, loopback excluded.
//! - [`HostCpuStat`]: the aggregate `cpu` line of `/proc/stat`.
//! - [`DiskStats`]: per-disk bytes from `/proc/diskstats`, with the same
//!   device filter as [`IoStat`].

mod cpu;
mod diskstats;
mod error;
mod io;
mod meminfo;
mod memory;
mod net;
mod parser;
mod procstat;

pub use cpu::CpuStat;
pub use diskstats::{DiskBytes, DiskStats};
pub use error::StatParseError;
pub use io::IoStat;
pub use meminfo::MemInfo;
pub use memory::{MemoryCurrent, MemoryStat};
pub use net::NetDevStat;
pub use parser::{KeyValueStat, SingleLineStat};
pub use procstat::{HostCpuStat, UserHz};
