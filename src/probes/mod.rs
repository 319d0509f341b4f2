//! Concrete [`DeltaSource`](crate::sampler::DeltaSource)s: each one pairs a
//! decoder with the file or register it was resolved to at startup.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::ProbeError;
use crate::fsutil;
use crate::stats::StatParseError;

pub mod cgroup;
pub mod host;
pub mod msr;
pub mod network;

pub use cgroup::{CpuMode, CpuUsageSource, DiskIoSource, MemoryCurrentSource, MemorySource};
pub use host::{
    DiskStatsSource, HostCpuTimeSource, HostCpuUtilizationSource, HostMemorySource,
    HostNetworkSource, ProcStatBaseline,
};
pub use msr::{RaplSource, ThrottlingSource};
pub use network::NetworkSource;

/// Ratio of two deltas in basis points, capped at 10000.
///
/// Zero on either side yields zero.
pub fn basis_points(part: u64, whole: u64) -> u64 {
    if part == 0 || whole == 0 {
        return 0;
    }
    let bp = u128::from(part) * 10_000 / u128::from(whole);
    bp.min(10_000) as u64
}

/// A kernel counter file kept open for the whole run and rewound after
/// every read.
#[derive(Debug)]
pub struct CounterFile {
    path: PathBuf,
    reader: BufReader<File>,
}

impl CounterFile {
    /// Opens `path` during setup. A failure here is an environment problem.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProbeError> {
        let reader = fsutil::open_file_reader(&path).map_err(|e| ProbeError::Environment {
            what: e.path.display().to_string(),
            source: e.source,
        })?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes one snapshot of the file.
    ///
    /// A failed read becomes [`ProbeError::TargetVanished`], unexpected
    /// content becomes [`ProbeError::Format`].
    pub fn read<T>(
        &mut self,
        decode: impl FnOnce(&mut BufReader<File>) -> Result<T, StatParseError>,
    ) -> Result<T, ProbeError> {
        fsutil::read_and_rewind(&mut self.reader, decode)
            .map_err(|err| ProbeError::from_stat(&self.path, err))
    }
}
