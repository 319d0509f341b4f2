//! Sources reading one controller file of one container, or of the cgroup
//! root for the host as a whole.

use std::path::Path;

use crate::cgroup::{self, CgroupResolver, CgroupTarget, EntityId};
use crate::error::ProbeError;
use crate::sampler::{DeltaSource, Value, counter_delta};
use crate::stats::{CpuStat, IoStat, KeyValueStat, MemoryCurrent, MemoryStat, SingleLineStat};

use super::{CounterFile, basis_points};

fn open_controller(
    resolver: &CgroupResolver,
    controller: &'static str,
    owner_id: u32,
    entity: &EntityId,
) -> Result<CounterFile, ProbeError> {
    let target = CgroupTarget::new(controller, owner_id, entity.clone());
    let resolved = resolver.resolve(&target)?;
    log::debug!(
        "Resolved `{controller}` of `{entity}` via {} layout: {}",
        resolved.layout,
        resolved.path.display()
    );
    CounterFile::open(resolved.path)
}

/// How a `usage_usec` delta is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    /// Microseconds of CPU time in the interval.
    Absolute,
    /// Basis points of the host CPU time in the same interval.
    Relative,
}

#[derive(Debug)]
pub struct CpuUsageSource {
    label: Option<String>,
    file: CounterFile,
    mode: CpuMode,
}

impl CpuUsageSource {
    pub fn open(
        resolver: &CgroupResolver,
        owner_id: u32,
        entity: &EntityId,
        mode: CpuMode,
    ) -> Result<Self, ProbeError> {
        Ok(Self {
            label: Some(entity.to_string()),
            file: open_controller(resolver, cgroup::CPU_STAT, owner_id, entity)?,
            mode,
        })
    }

    /// CPU time of every task on the host, from the root `cpu.stat`, in
    /// microseconds.
    pub fn root(cgroup_root: &Path) -> Result<Self, ProbeError> {
        Ok(Self {
            label: None,
            file: CounterFile::open(cgroup_root.join(cgroup::CPU_STAT))?,
            mode: CpuMode::Absolute,
        })
    }
}

impl DeltaSource for CpuUsageSource {
    type Raw = u64;
    type Context = ();

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<u64, ProbeError> {
        self.file
            .read(CpuStat::from_reader)
            .map(|stat| stat.usage_usec)
    }

    /// In relative mode a missing host delta counts as an idle host.
    fn normalize(&self, before: u64, after: u64, host_delta: Option<u64>) -> Result<Value, ProbeError> {
        let delta = counter_delta(self.label(), before, after)?;
        Ok(Value::Single(match self.mode {
            CpuMode::Absolute => delta,
            CpuMode::Relative => basis_points(delta, host_delta.unwrap_or(0)),
        }))
    }
}

/// Resident footprint of a container, reported as a gauge.
#[derive(Debug)]
pub struct MemorySource {
    label: String,
    file: CounterFile,
}

impl MemorySource {
    pub fn open(resolver: &CgroupResolver, owner_id: u32, entity: &EntityId) -> Result<Self, ProbeError> {
        Ok(Self {
            label: entity.to_string(),
            file: open_controller(resolver, cgroup::MEMORY_STAT, owner_id, entity)?,
        })
    }
}

impl DeltaSource for MemorySource {
    type Raw = u64;
    type Context = ();
    const GAUGE: bool = true;

    fn label(&self) -> Option<&str> {
        Some(&self.label)
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<u64, ProbeError> {
        self.file
            .read(MemoryStat::from_reader)
            .map(|stat| stat.total())
    }

    fn normalize(&self, _: u64, after: u64, _: Option<u64>) -> Result<Value, ProbeError> {
        Ok(Value::Single(after))
    }
}

/// Total memory charged to a container (`memory.current`) in bytes, as a
/// gauge. Unlike [`MemorySource`] this includes reclaimable page cache.
#[derive(Debug)]
pub struct MemoryCurrentSource {
    label: String,
    file: CounterFile,
}

impl MemoryCurrentSource {
    pub fn open(resolver: &CgroupResolver, owner_id: u32, entity: &EntityId) -> Result<Self, ProbeError> {
        Ok(Self {
            label: entity.to_string(),
            file: open_controller(resolver, cgroup::MEMORY_CURRENT, owner_id, entity)?,
        })
    }
}

impl DeltaSource for MemoryCurrentSource {
    type Raw = u64;
    type Context = ();
    const GAUGE: bool = true;

    fn label(&self) -> Option<&str> {
        Some(&self.label)
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<u64, ProbeError> {
        self.file
            .read(MemoryCurrent::from_reader)
            .map(|current| current.bytes)
    }

    fn normalize(&self, _: u64, after: u64, _: Option<u64>) -> Result<Value, ProbeError> {
        Ok(Value::Single(after))
    }
}

/// Bytes read and written by a container.
#[derive(Debug)]
pub struct DiskIoSource {
    label: String,
    file: CounterFile,
}

impl DiskIoSource {
    pub fn open(resolver: &CgroupResolver, owner_id: u32, entity: &EntityId) -> Result<Self, ProbeError> {
        Ok(Self {
            label: entity.to_string(),
            file: open_controller(resolver, cgroup::IO_STAT, owner_id, entity)?,
        })
    }
}

impl DeltaSource for DiskIoSource {
    type Raw = IoStat;
    type Context = ();

    fn label(&self) -> Option<&str> {
        Some(&self.label)
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<IoStat, ProbeError> {
        self.file.read(IoStat::from_reader)
    }

    fn normalize(&self, before: IoStat, after: IoStat, _: Option<u64>) -> Result<Value, ProbeError> {
        let label = Some(self.label.as_str());
        Ok(Value::Pair(
            counter_delta(label, before.rbytes, after.rbytes)?,
            counter_delta(label, before.wbytes, after.wbytes)?,
        ))
    }
}
