//! Scoped network-namespace switching.
//!
//! `setns(2)` changes the namespace of the calling thread, which is global
//! state for this single-threaded process. [`NetNsContext`] owns that state:
//! it remembers which namespace the thread is in and only switches when a
//! target lives in a different one.

use std::fs::File;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::sched::{CloneFlags, setns};
use nix::unistd::Pid;

use crate::error::ProbeError;

/// Moves the calling thread into the namespace behind an open handle.
pub trait NamespaceJoiner {
    fn join(&mut self, ns: &File) -> nix::Result<()>;
}

/// Joins with `setns(2)`.
#[derive(Debug, Default)]
pub struct Setns;

impl NamespaceJoiner for Setns {
    fn join(&mut self, ns: &File) -> nix::Result<()> {
        setns(ns, CloneFlags::CLONE_NEWNET)
    }
}

/// Identity of a namespace: device and inode of its `ns/net` handle.
type NamespaceKey = (u64, u64);

pub struct NetNsContext {
    procfs_root: PathBuf,
    joiner: Box<dyn NamespaceJoiner>,
    current: Option<NamespaceKey>,
}

impl NetNsContext {
    pub fn new(procfs_root: impl Into<PathBuf>, joiner: Box<dyn NamespaceJoiner>) -> Self {
        Self {
            procfs_root: procfs_root.into(),
            joiner,
            current: None,
        }
    }

    /// Switches into the network namespace of `pid` unless already there.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::TargetVanished`] if the process is gone and
    /// [`ProbeError::Namespace`] if the switch itself fails.
    pub fn enter(&mut self, pid: Pid) -> Result<(), ProbeError> {
        let path = self
            .procfs_root
            .join(pid.as_raw().to_string())
            .join("ns/net");
        let handle = File::open(&path).map_err(|source| vanished_or_env(&path, source))?;
        let meta = handle
            .metadata()
            .map_err(|source| vanished_or_env(&path, source))?;
        let key = (meta.dev(), meta.ino());

        if self.current == Some(key) {
            return Ok(());
        }

        self.joiner
            .join(&handle)
            .map_err(|source| ProbeError::Namespace {
                pid: pid.as_raw(),
                source,
            })?;
        log::debug!("Joined network namespace {} of pid {pid}", key.1);
        self.current = Some(key);
        Ok(())
    }

    /// `/proc/net/dev` as seen from the current namespace.
    pub fn net_dev_path(&self) -> PathBuf {
        self.procfs_root.join("self/net/dev")
    }
}

fn vanished_or_env(path: &Path, source: io::Error) -> ProbeError {
    match source.kind() {
        io::ErrorKind::NotFound => ProbeError::TargetVanished {
            path: path.to_path_buf(),
            source,
        },
        _ if source.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32) => {
            ProbeError::TargetVanished {
                path: path.to_path_buf(),
                source,
            }
        }
        _ => ProbeError::Environment {
            what: path.display().to_string(),
            source,
        },
    }
}
