use nix::unistd::Pid;

use crate::cgroup::{self, CgroupResolver, CgroupTarget, EntityId, procs};
use crate::error::ProbeError;
use crate::fsutil;
use crate::netns::NetNsContext;
use crate::sampler::{DeltaSource, Value, counter_delta};
use crate::stats::NetDevStat;

/// Bytes received and transmitted by a container, read from `/proc/net/dev`
/// inside its network namespace.
#[derive(Debug)]
pub struct NetworkSource {
    label: String,
    pid: Pid,
}

impl NetworkSource {
    /// Picks a member process of the container. Its namespace is the one
    /// sampled for the rest of the run.
    pub fn open(resolver: &CgroupResolver, owner_id: u32, entity: &EntityId) -> Result<Self, ProbeError> {
        let target = CgroupTarget::new(cgroup::CGROUP_PROCS, owner_id, entity.clone());
        let resolved = resolver.resolve(&target)?;
        let pid = procs::first_pid(&resolved.path)?;
        log::debug!(
            "Sampling network of `{entity}` ({} layout) through pid {pid}",
            resolved.layout
        );
        Ok(Self {
            label: entity.to_string(),
            pid,
        })
    }
}

impl DeltaSource for NetworkSource {
    type Raw = NetDevStat;
    type Context = NetNsContext;

    fn label(&self) -> Option<&str> {
        Some(&self.label)
    }

    fn snapshot(&mut self, ctx: &mut NetNsContext) -> Result<NetDevStat, ProbeError> {
        ctx.enter(self.pid)?;
        // opened fresh: a descriptor keeps the namespace it was opened in
        let path = ctx.net_dev_path();
        let mut reader =
            fsutil::open_file_reader(&path).map_err(|e| ProbeError::TargetVanished {
                path: e.path,
                source: e.source,
            })?;
        NetDevStat::from_reader(&mut reader).map_err(|err| ProbeError::from_stat(&path, err))
    }

    fn normalize(&self, before: NetDevStat, after: NetDevStat, _: Option<u64>) -> Result<Value, ProbeError> {
        let label = Some(self.label.as_str());
        Ok(Value::Pair(
            counter_delta(label, before.rx_bytes, after.rx_bytes)?,
            counter_delta(label, before.tx_bytes, after.tx_bytes)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::netns::testing::{RecordingJoiner, write_namespace};

    const HEADER: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
";

    fn net_dev(lo: u64, rx: u64, tx: u64) -> String {
        format!(
            "{HEADER}    lo: {lo} 1 0 0 0 0 0 0 {lo} 1 0 0 0 0 0 0\n  eth0: {rx} 10 0 0 0 0 0 0 {tx} 10 0 0 0 0 0 0\n"
        )
    }

    fn write_net_dev(procfs: &Path, content: &str) {
        let dir = procfs.join("self/net");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("dev"), content).unwrap();
    }

    fn cgroup_with_pid(root: &Path, id: &str, pid: i32) {
        let dir = root.join(format!("system.slice/docker-{id}.scope"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cgroup.procs"), format!("{pid}\n")).unwrap();
    }

    #[test]
    fn test_network_delta_excludes_loopback() {
        let cg = tempfile::tempdir().unwrap();
        let procfs = tempfile::tempdir().unwrap();
        cgroup_with_pid(cg.path(), "web", 42);
        write_namespace(procfs.path(), 42);
        write_net_dev(procfs.path(), &net_dev(50, 1000, 2000));

        let joiner = RecordingJoiner::default();
        let joins = joiner.joins.clone();
        let mut ctx = NetNsContext::new(procfs.path(), Box::new(joiner));
        let resolver = CgroupResolver::new(cg.path());
        let entity = EntityId::new("web").unwrap();
        let mut source = NetworkSource::open(&resolver, 0, &entity).unwrap();

        let before = source.snapshot(&mut ctx).unwrap();
        write_net_dev(procfs.path(), &net_dev(150, 6000, 5000));
        let after = source.snapshot(&mut ctx).unwrap();

        assert_eq!(source.normalize(before, after, None).unwrap(), Value::Pair(5000, 3000));
        assert_eq!(*joins.borrow(), 1);
    }

    #[test]
    fn test_empty_cgroup_is_resolution_failure() {
        let cg = tempfile::tempdir().unwrap();
        let dir = cg.path().join("system.slice/docker-idle.scope");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cgroup.procs"), "").unwrap();

        let resolver = CgroupResolver::new(cg.path());
        let err = NetworkSource::open(&resolver, 0, &EntityId::new("idle").unwrap()).unwrap_err();
        assert!(matches!(err, ProbeError::Resolution(_)));
    }

    #[test]
    fn test_exited_process_is_vanished() {
        let cg = tempfile::tempdir().unwrap();
        let procfs = tempfile::tempdir().unwrap();
        cgroup_with_pid(cg.path(), "web", 42);

        let mut ctx = NetNsContext::new(procfs.path(), Box::new(RecordingJoiner::default()));
        let resolver = CgroupResolver::new(cg.path());
        let mut source = NetworkSource::open(&resolver, 0, &EntityId::new("web").unwrap()).unwrap();
        let err = source.snapshot(&mut ctx).unwrap_err();
        assert!(matches!(err, ProbeError::TargetVanished { .. }));
    }
}
