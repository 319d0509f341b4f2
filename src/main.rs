use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use metering_probes::cgroup::EntityId;
use metering_probes::config::ProbeEnv;
use metering_probes::error::ResultOkLogExt;
use metering_probes::msr::rapl::RaplDomain;
use metering_probes::{ProbeKind, run};

/// Samples resource counters at a fixed interval and writes one reading
/// per line to stdout.
///
/// `ROOTFS_MOUNT_PATH` points every kernel path below a bind-mounted host
/// root, `METER_CGROUP_ROOT` overrides the cgroup v2 mount and `RUST_LOG`
/// sets the diagnostic verbosity on stderr.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    probe: Probe,
}

#[derive(Debug, Args)]
struct Common {
    /// Sampling interval in milliseconds.
    #[arg(short, long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Verify every source is readable once and exit.
    #[arg(short, long)]
    check: bool,
}

#[derive(Debug, Args)]
struct Containers {
    #[command(flatten)]
    common: Common,

    /// Comma-separated container ids or cgroup names.
    #[arg(short = 's', long, value_delimiter = ',', value_parser = parse_entity)]
    containers: Vec<EntityId>,
}

#[derive(Debug, Subcommand)]
enum Probe {
    /// Container CPU time in basis points of host CPU time.
    CpuUtilizationCgroup(Containers),
    /// Container CPU time in microseconds.
    CpuTimeCgroup(Containers),
    /// Host CPU time in microseconds from the root cgroup.
    CpuTimeCgroupSystem(Common),
    /// Container resident memory in bytes.
    MemoryCgroup(Containers),
    /// Container memory.current in bytes.
    MemoryTotalCgroup(Containers),
    /// Bytes read and written by containers.
    DiskIoCgroup(Containers),
    /// Bytes received and transmitted by containers.
    NetworkIoCgroup(Containers),
    /// Host CPU utilization in basis points.
    CpuUtilizationProcfs(Common),
    /// Host CPU time in microseconds, idle included.
    CpuTimeProcfs(Common),
    /// Host memory in use in bytes.
    MemoryUsedProcfs(Common),
    /// Bytes received and transmitted by the host.
    NetworkIoProcfs(Common),
    /// Bytes read and written per physical disk.
    DiskIoProcfs(Common),
    /// Energy per CPU package in millijoules.
    Rapl {
        #[command(flatten)]
        common: Common,
        /// Meter the DRAM domain instead of the package.
        #[arg(long, conflicts_with = "psys")]
        dram: bool,
        /// Meter the platform domain instead of the package.
        #[arg(long)]
        psys: bool,
    },
    /// Thermal and power-limit throttling per CPU package.
    CpuThrottling(Common),
}

fn parse_entity(raw: &str) -> Result<EntityId, String> {
    EntityId::new(raw.trim()).map_err(|e| e.to_string())
}

impl Probe {
    fn into_parts(self) -> (ProbeKind, Vec<EntityId>, Common) {
        match self {
            Probe::CpuUtilizationCgroup(c) => (ProbeKind::CpuUtilizationCgroup, c.containers, c.common),
            Probe::CpuTimeCgroup(c) => (ProbeKind::CpuTimeCgroup, c.containers, c.common),
            Probe::CpuTimeCgroupSystem(common) => (ProbeKind::CpuTimeCgroupSystem, Vec::new(), common),
            Probe::MemoryCgroup(c) => (ProbeKind::MemoryCgroup, c.containers, c.common),
            Probe::MemoryTotalCgroup(c) => (ProbeKind::MemoryTotalCgroup, c.containers, c.common),
            Probe::DiskIoCgroup(c) => (ProbeKind::DiskIoCgroup, c.containers, c.common),
            Probe::NetworkIoCgroup(c) => (ProbeKind::NetworkIoCgroup, c.containers, c.common),
            Probe::CpuUtilizationProcfs(common) => (ProbeKind::CpuUtilizationProcfs, Vec::new(), common),
            Probe::CpuTimeProcfs(common) => (ProbeKind::CpuTimeProcfs, Vec::new(), common),
            Probe::MemoryUsedProcfs(common) => (ProbeKind::MemoryUsedProcfs, Vec::new(), common),
            Probe::NetworkIoProcfs(common) => (ProbeKind::NetworkIoProcfs, Vec::new(), common),
            Probe::DiskIoProcfs(common) => (ProbeKind::DiskIoProcfs, Vec::new(), common),
            Probe::Rapl { common, dram, psys } => {
                let domain = match (dram, psys) {
                    (true, _) => RaplDomain::Dram,
                    (_, true) => RaplDomain::Psys,
                    _ => RaplDomain::Package,
                };
                (ProbeKind::Rapl(domain), Vec::new(), common)
            }
            Probe::CpuThrottling(common) => (ProbeKind::CpuThrottling, Vec::new(), common),
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let (kind, targets, common) = cli.probe.into_parts();
    let env = ProbeEnv::from_env(Duration::from_millis(common.interval));
    log::debug!("Running {kind:?} with {env:?}");

    match run(kind, &targets, common.check, &env).ok_log() {
        Some(()) => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    }
}
