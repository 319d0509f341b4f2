//! Metering probes: sample host and per-container resource counters at a
//! fixed interval and write one timestamped reading per line to stdout.
//!
//! Every probe follows the same pattern. Counter sources are resolved once
//! at startup, then the [`sampler::DeltaSampler`] reads all of them, sleeps,
//! reads them again and normalizes each before/after pair.

use std::io;

use cgroup::{CgroupResolver, EntityId};
use clock::Clock;
use config::ProbeEnv;
use error::ProbeError;
use msr::rapl::{self, RaplDomain};
use msr::Detector;
use msr::throttling::ThrottleMeter;
use netns::{NetNsContext, Setns};
use output::LineWriter;
use probes::{
    CpuMode, CpuUsageSource, DiskIoSource, DiskStatsSource, HostCpuTimeSource,
    HostCpuUtilizationSource, HostMemorySource, HostNetworkSource, MemoryCurrentSource,
    MemorySource, NetworkSource, ProcStatBaseline, RaplSource, ThrottlingSource,
};
use sampler::{Baseline, DeltaSampler, DeltaSource};
use stats::UserHz;

pub mod cgroup;
pub mod clock;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod msr;
pub mod netns;
pub mod output;
pub mod probes;
pub mod sampler;
pub mod stats;

/// The probe a process runs. Each process runs exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Container CPU time in basis points of host CPU time.
    CpuUtilizationCgroup,
    /// Container CPU time in microseconds.
    CpuTimeCgroup,
    /// Host CPU time in microseconds from the root `cpu.stat`.
    CpuTimeCgroupSystem,
    MemoryCgroup,
    /// Container `memory.current` in bytes.
    MemoryTotalCgroup,
    DiskIoCgroup,
    NetworkIoCgroup,
    /// Host CPU utilization from `/proc/stat` alone.
    CpuUtilizationProcfs,
    /// Host CPU time in microseconds from `/proc/stat`, idle included.
    CpuTimeProcfs,
    MemoryUsedProcfs,
    NetworkIoProcfs,
    /// Bytes read and written per physical disk.
    DiskIoProcfs,
    Rapl(RaplDomain),
    CpuThrottling,
}

impl ProbeKind {
    /// Whether the probe measures containers given by id.
    pub fn is_cgroup_scoped(&self) -> bool {
        matches!(
            self,
            ProbeKind::CpuUtilizationCgroup
                | ProbeKind::CpuTimeCgroup
                | ProbeKind::MemoryCgroup
                | ProbeKind::MemoryTotalCgroup
                | ProbeKind::DiskIoCgroup
                | ProbeKind::NetworkIoCgroup
        )
    }
}

/// Runs `kind` until a fatal error, or once in check mode.
///
/// In check mode every source is opened and read once and the function
/// returns; otherwise readings are written to stdout forever.
///
/// # Errors
///
/// Returns the first fatal [`ProbeError`]. Recoverable conditions are
/// handled by the sampler and never surface here.
pub fn run(
    kind: ProbeKind,
    targets: &[EntityId],
    check: bool,
    env: &ProbeEnv,
) -> Result<(), ProbeError> {
    if kind.is_cgroup_scoped() && targets.is_empty() {
        if !check {
            return Err(ProbeError::NoTargets);
        }
        return verify_cgroup_root(env);
    }

    let resolver = CgroupResolver::new(&env.cgroup_root);
    let owner = env.owner_id;
    match kind {
        ProbeKind::CpuUtilizationCgroup => {
            let sources = open_all(targets, |id| {
                CpuUsageSource::open(&resolver, owner, id, CpuMode::Relative)
            })?;
            let baseline = ProcStatBaseline::open(&env.procfs_root, user_hz()?)?;
            start(
                DeltaSampler::with_baseline(sources, (), baseline, env.interval),
                check,
            )
        }
        ProbeKind::CpuTimeCgroup => {
            let sources = open_all(targets, |id| {
                CpuUsageSource::open(&resolver, owner, id, CpuMode::Absolute)
            })?;
            start(DeltaSampler::new(sources, (), env.interval), check)
        }
        ProbeKind::CpuTimeCgroupSystem => {
            let source = CpuUsageSource::root(&env.cgroup_root)?;
            start(DeltaSampler::new(vec![source], (), env.interval), check)
        }
        ProbeKind::MemoryCgroup => {
            let sources = open_all(targets, |id| MemorySource::open(&resolver, owner, id))?;
            start(DeltaSampler::new(sources, (), env.interval), check)
        }
        ProbeKind::MemoryTotalCgroup => {
            let sources = open_all(targets, |id| MemoryCurrentSource::open(&resolver, owner, id))?;
            start(DeltaSampler::new(sources, (), env.interval), check)
        }
        ProbeKind::DiskIoCgroup => {
            let sources = open_all(targets, |id| DiskIoSource::open(&resolver, owner, id))?;
            start(DeltaSampler::new(sources, (), env.interval), check)
        }
        ProbeKind::NetworkIoCgroup => {
            let sources = open_all(targets, |id| NetworkSource::open(&resolver, owner, id))?;
            let ctx = NetNsContext::new(&env.procfs_root, Box::new(Setns));
            start(DeltaSampler::new(sources, ctx, env.interval), check)
        }
        ProbeKind::CpuUtilizationProcfs => {
            let source = HostCpuUtilizationSource::open(&env.procfs_root)?;
            start(DeltaSampler::new(vec![source], (), env.interval), check)
        }
        ProbeKind::CpuTimeProcfs => {
            let source = HostCpuTimeSource::open(&env.procfs_root, user_hz()?)?;
            start(DeltaSampler::new(vec![source], (), env.interval), check)
        }
        ProbeKind::MemoryUsedProcfs => {
            let source = HostMemorySource::open(&env.procfs_root)?;
            start(DeltaSampler::new(vec![source], (), env.interval), check)
        }
        ProbeKind::NetworkIoProcfs => {
            let source = HostNetworkSource::open(&env.procfs_root)?;
            start(DeltaSampler::new(vec![source], (), env.interval), check)
        }
        ProbeKind::DiskIoProcfs => {
            let sources = DiskStatsSource::open_all(&env.procfs_root)?;
            start(DeltaSampler::new(sources, (), env.interval), check)
        }
        ProbeKind::Rapl(domain) => {
            let detector = Detector::new(&env.procfs_root, &env.sysfs_root, &env.devfs_root)
                .detect_vendor()?
                .enumerate_packages()?;
            let meter = rapl::calibrate(detector, domain)?;
            if check {
                meter.check()?;
                log::info!("{domain} energy counters of {} readable", meter.model());
                return Ok(());
            }
            let sources = meter.into_packages().into_iter().map(RaplSource::from).collect();
            start(DeltaSampler::new(sources, (), env.interval), false)
        }
        ProbeKind::CpuThrottling => {
            let meter = ThrottleMeter::open(&env.sysfs_root, &env.devfs_root)?;
            if check {
                meter.check()?;
                log::info!("Throttling status of {} package(s) readable", meter.packages().len());
                return Ok(());
            }
            let sources = meter.into_packages().into_iter().map(ThrottlingSource::from).collect();
            start(DeltaSampler::new(sources, (), env.interval), false)
        }
    }
}

fn open_all<S>(
    targets: &[EntityId],
    open: impl Fn(&EntityId) -> Result<S, ProbeError>,
) -> Result<Vec<S>, ProbeError> {
    targets.iter().map(open).collect()
}

fn user_hz() -> Result<UserHz, ProbeError> {
    UserHz::detect().map_err(|source| ProbeError::Environment {
        what: "clock ticks per second".to_owned(),
        source,
    })
}

fn verify_cgroup_root(env: &ProbeEnv) -> Result<(), ProbeError> {
    std::fs::read_dir(&env.cgroup_root).map_err(|source| ProbeError::Environment {
        what: env.cgroup_root.display().to_string(),
        source,
    })?;
    log::info!("cgroup root {} readable", env.cgroup_root.display());
    Ok(())
}

fn start<S: DeltaSource, B: Baseline>(
    mut sampler: DeltaSampler<S, B>,
    check: bool,
) -> Result<(), ProbeError> {
    if check {
        sampler.check()?;
        log::info!("All {} source(s) readable", sampler.active());
        return Ok(());
    }

    let mut clock = Clock::new()?;
    let stdout = io::stdout();
    let mut out = LineWriter::new(stdout.lock());
    let never = sampler.run(&mut clock, &mut out)?;
    match never {}
}
