//! Host-wide sources reading procfs: CPU time from `/proc/stat`, memory,
//! network and disk counters.

use std::io;
use std::path::Path;

use crate::error::ProbeError;
use crate::sampler::{Baseline, DeltaSource, Value, counter_delta};
use crate::stats::{DiskBytes, DiskStats, HostCpuStat, KeyValueStat, MemInfo, NetDevStat, UserHz};

use super::{CounterFile, basis_points};

fn open_proc_stat(procfs_root: &Path) -> Result<CounterFile, ProbeError> {
    CounterFile::open(procfs_root.join("stat"))
}

/// Total host CPU time in microseconds, the reference for relative cgroup
/// CPU readings.
#[derive(Debug)]
pub struct ProcStatBaseline {
    file: CounterFile,
    hz: UserHz,
}

impl ProcStatBaseline {
    pub fn open(procfs_root: &Path, hz: UserHz) -> Result<Self, ProbeError> {
        Ok(Self {
            file: open_proc_stat(procfs_root)?,
            hz,
        })
    }
}

impl Baseline for ProcStatBaseline {
    fn snapshot(&mut self) -> Result<u64, ProbeError> {
        let stat = self.file.read(HostCpuStat::from_reader)?;
        Ok(self.hz.ticks_to_usec(stat.total_ticks()))
    }
}

/// Share of host CPU time spent doing work, in basis points.
#[derive(Debug)]
pub struct HostCpuUtilizationSource {
    file: CounterFile,
}

impl HostCpuUtilizationSource {
    pub fn open(procfs_root: &Path) -> Result<Self, ProbeError> {
        Ok(Self {
            file: open_proc_stat(procfs_root)?,
        })
    }
}

impl DeltaSource for HostCpuUtilizationSource {
    type Raw = HostCpuStat;
    type Context = ();

    fn label(&self) -> Option<&str> {
        None
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<HostCpuStat, ProbeError> {
        self.file.read(HostCpuStat::from_reader)
    }

    fn normalize(
        &self,
        before: HostCpuStat,
        after: HostCpuStat,
        _: Option<u64>,
    ) -> Result<Value, ProbeError> {
        let compute = counter_delta(None, before.compute_ticks(), after.compute_ticks())?;
        let total = counter_delta(None, before.total_ticks(), after.total_ticks())?;
        Ok(Value::Single(basis_points(compute, total)))
    }
}

/// Host CPU time in microseconds, idle included.
///
/// Over one window this is roughly the wall time multiplied by the number of
/// CPUs.
#[derive(Debug)]
pub struct HostCpuTimeSource {
    file: CounterFile,
    hz: UserHz,
}

impl HostCpuTimeSource {
    pub fn open(procfs_root: &Path, hz: UserHz) -> Result<Self, ProbeError> {
        Ok(Self {
            file: open_proc_stat(procfs_root)?,
            hz,
        })
    }
}

impl DeltaSource for HostCpuTimeSource {
    type Raw = u64;
    type Context = ();

    fn label(&self) -> Option<&str> {
        None
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<u64, ProbeError> {
        self.file
            .read(HostCpuStat::from_reader)
            .map(|stat| stat.total_ticks())
    }

    fn normalize(&self, before: u64, after: u64, _: Option<u64>) -> Result<Value, ProbeError> {
        let ticks = counter_delta(None, before, after)?;
        Ok(Value::Single(self.hz.ticks_to_usec(ticks)))
    }
}

/// Host memory in use (`MemTotal - MemAvailable`) in bytes, as a gauge.
#[derive(Debug)]
pub struct HostMemorySource {
    file: CounterFile,
}

impl HostMemorySource {
    pub fn open(procfs_root: &Path) -> Result<Self, ProbeError> {
        Ok(Self {
            file: CounterFile::open(procfs_root.join("meminfo"))?,
        })
    }
}

impl DeltaSource for HostMemorySource {
    type Raw = u64;
    type Context = ();
    const GAUGE: bool = true;

    fn label(&self) -> Option<&str> {
        None
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<u64, ProbeError> {
        self.file
            .read(MemInfo::from_reader)
            .map(|info| info.used_bytes())
    }

    fn normalize(&self, _: u64, after: u64, _: Option<u64>) -> Result<Value, ProbeError> {
        Ok(Value::Single(after))
    }
}

/// Bytes received and transmitted by every non-loopback interface of the
/// host namespace.
#[derive(Debug)]
pub struct HostNetworkSource {
    file: CounterFile,
}

impl HostNetworkSource {
    pub fn open(procfs_root: &Path) -> Result<Self, ProbeError> {
        Ok(Self {
            file: CounterFile::open(procfs_root.join("net/dev"))?,
        })
    }
}

impl DeltaSource for HostNetworkSource {
    type Raw = NetDevStat;
    type Context = ();

    fn label(&self) -> Option<&str> {
        None
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<NetDevStat, ProbeError> {
        self.file.read(NetDevStat::from_reader)
    }

    fn normalize(&self, before: NetDevStat, after: NetDevStat, _: Option<u64>) -> Result<Value, ProbeError> {
        Ok(Value::Pair(
            counter_delta(None, before.rx_bytes, after.rx_bytes)?,
            counter_delta(None, before.tx_bytes, after.tx_bytes)?,
        ))
    }
}

/// Bytes read and written by one physical disk, labelled with the device
/// name.
#[derive(Debug)]
pub struct DiskStatsSource {
    device: String,
    file: CounterFile,
}

impl DiskStatsSource {
    /// One source per whole disk listed in `<procfs>/diskstats` at startup.
    ///
    /// # Errors
    ///
    /// Fails with [`ProbeError::Environment`] if the file lists no disk.
    pub fn open_all(procfs_root: &Path) -> Result<Vec<Self>, ProbeError> {
        let path = procfs_root.join("diskstats");
        let listing = CounterFile::open(&path)?.read(DiskStats::from_reader)?;
        let sources = listing
            .devices()
            .map(|device| -> Result<Self, ProbeError> {
                log::debug!("Sampling disk `{device}`");
                Ok(Self {
                    device: device.to_owned(),
                    file: CounterFile::open(&path)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if sources.is_empty() {
            return Err(ProbeError::Environment {
                what: format!("physical disks in {}", path.display()),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(sources)
    }
}

impl DeltaSource for DiskStatsSource {
    type Raw = DiskBytes;
    type Context = ();

    fn label(&self) -> Option<&str> {
        Some(&self.device)
    }

    /// A disk no longer listed has been detached.
    fn snapshot(&mut self, _: &mut ()) -> Result<DiskBytes, ProbeError> {
        let stats = self.file.read(DiskStats::from_reader)?;
        stats
            .get(&self.device)
            .ok_or_else(|| ProbeError::TargetVanished {
                path: self.file.path().to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "disk no longer listed"),
            })
    }

    fn normalize(&self, before: DiskBytes, after: DiskBytes, _: Option<u64>) -> Result<Value, ProbeError> {
        let label = Some(self.device.as_str());
        Ok(Value::Pair(
            counter_delta(label, before.read, after.read)?,
            counter_delta(label, before.written, after.written)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::sampler::DeltaSampler;

    const BEFORE: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 100 0 100 700 100 0 0 0 0 0\n";
    const AFTER: &str = "cpu  250 0 150 1450 150 0 0 0 0 0\ncpu0 250 0 150 1450 150 0 0 0 0 0\n";

    fn procfs(stat: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stat"), stat).unwrap();
        dir
    }

    #[test]
    fn test_baseline_in_microseconds() {
        let proc = procfs(BEFORE);
        let mut baseline = ProcStatBaseline::open(proc.path(), UserHz::new(100).unwrap()).unwrap();
        let before = baseline.snapshot().unwrap();
        std::fs::write(proc.path().join("stat"), AFTER).unwrap();
        let after = baseline.snapshot().unwrap();

        // 1000 ticks at 100 Hz
        assert_eq!(before, 10_000_000);
        assert_eq!(after - before, 10_000_000);
    }

    #[test]
    fn test_host_utilization() {
        let proc = procfs(BEFORE);
        let mut source = HostCpuUtilizationSource::open(proc.path()).unwrap();
        let before = source.snapshot(&mut ()).unwrap();
        std::fs::write(proc.path().join("stat"), AFTER).unwrap();
        let after = source.snapshot(&mut ()).unwrap();

        // 200 compute ticks out of 1000
        assert_eq!(source.normalize(before, after, None).unwrap(), Value::Single(2000));
        assert_eq!(source.label(), None);
    }

    #[test]
    fn test_idle_window_is_zero() {
        let proc = procfs(BEFORE);
        let mut source = HostCpuUtilizationSource::open(proc.path()).unwrap();
        let stat = source.snapshot(&mut ()).unwrap();
        assert_eq!(source.normalize(stat, stat, None).unwrap(), Value::Single(0));
    }

    #[test]
    fn test_missing_steal_is_format_error() {
        let proc = procfs("cpu  1 2 3 4 5 6 7\n");
        let mut source = HostCpuUtilizationSource::open(proc.path()).unwrap();
        let err = source.snapshot(&mut ()).unwrap_err();
        assert!(matches!(err, ProbeError::Format { .. }));
    }

    #[test]
    fn test_host_cpu_time() {
        let proc = procfs(BEFORE);
        let mut source = HostCpuTimeSource::open(proc.path(), UserHz::new(100).unwrap()).unwrap();
        let before = source.snapshot(&mut ()).unwrap();
        std::fs::write(proc.path().join("stat"), AFTER).unwrap();
        let after = source.snapshot(&mut ()).unwrap();

        // 1000 ticks at 100 Hz, idle included
        assert_eq!(source.normalize(before, after, None).unwrap(), Value::Single(10_000_000));
        assert!(matches!(
            source.normalize(after, before, None).unwrap_err(),
            ProbeError::Overflow { .. }
        ));
    }

    #[test]
    fn test_host_memory_gauge() {
        let proc = tempfile::tempdir().unwrap();
        std::fs::write(
            proc.path().join("meminfo"),
            "MemTotal: 2000 kB\nMemFree: 500 kB\nMemAvailable: 1500 kB\n",
        )
        .unwrap();
        let source = HostMemorySource::open(proc.path()).unwrap();

        let mut sampler = DeltaSampler::new(vec![source], (), Duration::ZERO);
        let readings = sampler.sample_all(&mut Clock::with_offset(0)).unwrap();
        assert_eq!(readings[0].value, Value::Single(500 * 1024));
        assert_eq!(readings[0].label, None);
    }

    #[test]
    fn test_host_network_pair() {
        let net_dev = |rx: u64, tx: u64| {
            format!(
                "Inter-|   Receive\n face |bytes\n    lo: 9 1 0 0 0 0 0 0 9 1 0 0 0 0 0 0\n  eth0: {rx} 1 0 0 0 0 0 0 {tx} 1 0 0 0 0 0 0\n"
            )
        };
        let proc = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(proc.path().join("net")).unwrap();
        std::fs::write(proc.path().join("net/dev"), net_dev(100, 200)).unwrap();

        let mut source = HostNetworkSource::open(proc.path()).unwrap();
        let before = source.snapshot(&mut ()).unwrap();
        std::fs::write(proc.path().join("net/dev"), net_dev(5100, 3200)).unwrap();
        let after = source.snapshot(&mut ()).unwrap();
        assert_eq!(source.normalize(before, after, None).unwrap(), Value::Pair(5000, 3000));
    }

    #[test]
    fn test_disk_per_device() {
        let line = |name: &str, minor: u32, read: u64, written: u64| {
            format!("   8 {minor:>7} {name} 1 0 {read} 0 1 0 {written} 0 0 0 0 0 0 0 0\n")
        };
        let proc = tempfile::tempdir().unwrap();
        let path = proc.path().join("diskstats");
        std::fs::write(&path, line("sda", 0, 10, 20) + &line("sda1", 1, 10, 20) + &line("sdb", 16, 0, 0))
            .unwrap();

        let mut sources = DiskStatsSource::open_all(proc.path()).unwrap();
        let labels: Vec<_> = sources.iter().map(|s| s.label()).collect();
        assert_eq!(labels, [Some("sda"), Some("sdb")]);

        let before = sources[0].snapshot(&mut ()).unwrap();
        std::fs::write(&path, line("sda", 0, 14, 20)).unwrap();
        let after = sources[0].snapshot(&mut ()).unwrap();
        assert_eq!(
            sources[0].normalize(before, after, None).unwrap(),
            Value::Pair(4 * 512, 0)
        );

        let err = sources[1].snapshot(&mut ()).unwrap_err();
        assert!(matches!(err, ProbeError::TargetVanished { .. }));
    }

    #[test]
    fn test_disk_listing_without_disks() {
        let proc = tempfile::tempdir().unwrap();
        std::fs::write(
            proc.path().join("diskstats"),
            "   7       0 loop0 1 0 2 0 3 0 4 0 0 0 0\n",
        )
        .unwrap();
        let err = DiskStatsSource::open_all(proc.path()).unwrap_err();
        assert!(matches!(err, ProbeError::Environment { .. }));
    }
}
