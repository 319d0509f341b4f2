//! Filesystem roots and identity the probes run with.
//!
//! On a plain host every root is the usual kernel mount. When the probe runs
//! in a container with the host root bind-mounted, `ROOTFS_MOUNT_PATH` names
//! that mount and every root is taken below it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cgroup::mount;
use crate::error::ResultOkLogExt;

/// Location of the host root filesystem.
pub const ROOTFS_ENV: &str = "ROOTFS_MOUNT_PATH";
/// Explicit cgroup v2 mount, bypassing detection.
pub const CGROUP_ROOT_ENV: &str = "METER_CGROUP_ROOT";

const DEFAULT_CGROUP_MOUNT: &str = "sys/fs/cgroup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEnv {
    pub cgroup_root: PathBuf,
    pub procfs_root: PathBuf,
    pub sysfs_root: PathBuf,
    pub devfs_root: PathBuf,
    /// Numeric user id that owns rootless container slices.
    pub owner_id: u32,
    pub interval: Duration,
}

impl ProbeEnv {
    /// Builds the environment from the process environment variables, the
    /// real uid and the cgroup2 entry of `mountinfo`.
    pub fn from_env(interval: Duration) -> Self {
        Self::from_vars(
            std::env::var_os(ROOTFS_ENV),
            std::env::var_os(CGROUP_ROOT_ENV),
            nix::unistd::getuid().as_raw(),
            interval,
        )
    }

    fn from_vars(
        rootfs: Option<OsString>,
        cgroup_root: Option<OsString>,
        owner_id: u32,
        interval: Duration,
    ) -> Self {
        let in_container = rootfs.is_some();
        let rootfs = rootfs.map_or_else(|| PathBuf::from("/"), PathBuf::from);
        log::debug!("Final rootfs: {}", rootfs.display());

        let mut env = Self::below(&rootfs, owner_id, interval);
        env.cgroup_root = match cgroup_root {
            Some(root) => PathBuf::from(root),
            None => {
                // our own mountinfo describes the container, not the host
                let mountinfo = if in_container {
                    env.procfs_root.join("1/mountinfo")
                } else {
                    env.procfs_root.join("self/mountinfo")
                };
                mount::detect_validated_cgroup2_mount_point(mountinfo, &rootfs)
                    .ok_log()
                    .unwrap_or(env.cgroup_root)
            }
        };
        log::debug!("Final cgroup root: {}", env.cgroup_root.display());
        env
    }

    /// Every root below `rootfs` at its conventional place.
    pub fn below(rootfs: &Path, owner_id: u32, interval: Duration) -> Self {
        Self {
            cgroup_root: rootfs.join(DEFAULT_CGROUP_MOUNT),
            procfs_root: rootfs.join("proc"),
            sysfs_root: rootfs.join("sys"),
            devfs_root: rootfs.join("dev"),
            owner_id,
            interval,
        }
    }
}
