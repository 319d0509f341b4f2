//! Locating per-container counter files in the cgroup v2 hierarchy.
//!
//! A container is addressed by an opaque [`EntityId`] (a container id or a
//! cgroup name). The [`CgroupResolver`] turns an [`EntityId`] plus a
//! controller file name into the path of the counter file by probing every
//! known runtime layout in a fixed order.

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub mod mount;
pub mod procs;
mod resolver;

pub use resolver::{CgroupResolver, Layout, ResolvedPath};

/// Cumulative CPU time of the cgroup.
pub const CPU_STAT: &str = "cpu.stat";
/// Memory breakdown of the cgroup.
pub const MEMORY_STAT: &str = "memory.stat";
/// Total memory charged to the cgroup.
pub const MEMORY_CURRENT: &str = "memory.current";
/// Per-device block I/O counters of the cgroup.
pub const IO_STAT: &str = "io.stat";
/// Member PIDs of the cgroup.
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// The maximum allowed length for an [`EntityId`].
const ENTITY_ID_MAX_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid entity id `{id}`: {reason}")]
    InvalidEntity { id: String, reason: &'static str },

    #[error("no cgroup layout under `{root}` contains `{controller}` for `{entity}`")]
    NotFound {
        root: PathBuf,
        controller: &'static str,
        entity: EntityId,
    },

    #[error("cgroup `{path}` has no member process")]
    NoProcess { path: PathBuf },

    #[error("invalid pid `{value}` in `{path}`")]
    InvalidPid { path: PathBuf, value: String },

    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A validated container or cgroup identifier.
///
/// The id is only ever used to build paths, so it is checked for the few
/// shapes that would escape the cgroup root.
///
/// # Examples
///
/// ```
/// # use metering_probes::cgroup::EntityId;
/// let id = EntityId::new("4f1c2d3e4f5a").unwrap();
/// assert_eq!(id.as_ref(), "4f1c2d3e4f5a");
/// assert!(EntityId::new("../../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId(Arc<str>);

impl EntityId {
    /// Creates a new `EntityId` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidEntity`] if the id is empty, longer than
    /// 255 bytes, absolute, or contains a `..` component or a NUL byte.
    pub fn new(src: impl AsRef<str>) -> Result<Self, ResolveError> {
        let src = src.as_ref();
        let reason = if src.is_empty() {
            Some("empty")
        } else if src.len() > ENTITY_ID_MAX_LEN {
            Some("too long")
        } else if src.starts_with('/') {
            Some("absolute path")
        } else if src.split('/').any(|c| c == "..") {
            Some("contains `..`")
        } else if src.contains('\0') {
            Some("contains NUL")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ResolveError::InvalidEntity {
                id: src.to_owned(),
                reason,
            }),
            None => Ok(Self(src.into())),
        }
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a cgroup-scoped probe measures: one controller file of one entity
/// as seen by one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupTarget {
    pub controller: &'static str,
    pub owner_id: u32,
    pub entity: EntityId,
}

impl CgroupTarget {
    pub fn new(controller: &'static str, owner_id: u32, entity: EntityId) -> Self {
        Self {
            controller,
            owner_id,
            entity,
        }
    }
}
