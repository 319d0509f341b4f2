use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{CgroupTarget, EntityId, ResolveError};

/// A cgroup v2 hierarchy layout a container runtime may place an entity in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Rootless docker under the user's systemd instance.
    RootlessDocker,
    /// Rootless podman under the user's systemd instance.
    RootlessPodman,
    /// Rootful docker with the systemd cgroup driver.
    RootfulDocker,
    /// Rootful podman with the systemd cgroup manager.
    RootfulPodman,
    /// Docker with the cgroupfs driver, as in hosted codespaces.
    Codespaces,
    /// Hosted CI runner job containers.
    ActionsRunner,
    /// A unit inside the user's session slice.
    UserSession,
    /// A unit directly below the user slice.
    UserSlice,
    /// A unit inside the user's app slice.
    UserApp,
    /// The entity id is itself a path below the cgroup root.
    Raw,
}

impl Layout {
    /// Most common production layouts first, the raw fallback last.
    pub const SEARCH_ORDER: [Layout; 10] = [
        Layout::RootlessDocker,
        Layout::RootlessPodman,
        Layout::RootfulDocker,
        Layout::RootfulPodman,
        Layout::Codespaces,
        Layout::ActionsRunner,
        Layout::UserSession,
        Layout::UserSlice,
        Layout::UserApp,
        Layout::Raw,
    ];

    /// The entity's directory relative to the cgroup root.
    pub fn relative_dir(&self, owner_id: u32, entity: &EntityId) -> PathBuf {
        let user_service = format!("user.slice/user-{owner_id}.slice/user@{owner_id}.service");
        let dir = match self {
            Layout::RootlessDocker => format!("{user_service}/user.slice/docker-{entity}.scope"),
            Layout::RootlessPodman => format!("{user_service}/user.slice/libpod-{entity}.scope"),
            Layout::RootfulDocker => format!("system.slice/docker-{entity}.scope"),
            Layout::RootfulPodman => format!("machine.slice/libpod-{entity}.scope"),
            Layout::Codespaces => format!("docker/{entity}"),
            Layout::ActionsRunner => format!("actions_job/{entity}"),
            Layout::UserSession => format!("{user_service}/session.slice/{entity}"),
            Layout::UserSlice => format!("user.slice/user-{owner_id}.slice/{entity}"),
            Layout::UserApp => format!("{user_service}/app.slice/{entity}"),
            Layout::Raw => entity.to_string(),
        };
        PathBuf::from(dir)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layout::RootlessDocker => "rootless-docker",
            Layout::RootlessPodman => "rootless-podman",
            Layout::RootfulDocker => "rootful-docker",
            Layout::RootfulPodman => "rootful-podman",
            Layout::Codespaces => "codespaces",
            Layout::ActionsRunner => "actions-runner",
            Layout::UserSession => "user-session",
            Layout::UserSlice => "user-slice",
            Layout::UserApp => "user-app",
            Layout::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// An openable counter file and the layout it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub layout: Layout,
    pub path: PathBuf,
}

/// Finds counter files below a cgroup v2 mount.
#[derive(Debug, Clone)]
pub struct CgroupResolver {
    root: PathBuf,
}

impl CgroupResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Every candidate path for `target`, in search order.
    pub fn candidates<'a>(
        &'a self,
        target: &'a CgroupTarget,
    ) -> impl Iterator<Item = (Layout, PathBuf)> + 'a {
        Layout::SEARCH_ORDER.into_iter().map(move |layout| {
            let path = self
                .root
                .join(layout.relative_dir(target.owner_id, &target.entity))
                .join(target.controller);
            (layout, path)
        })
    }

    /// Returns the first candidate that opens as a regular file.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] once every layout has been tried.
    pub fn resolve(&self, target: &CgroupTarget) -> Result<ResolvedPath, ResolveError> {
        for (layout, path) in self.candidates(target) {
            if is_readable_file(&path) {
                return Ok(ResolvedPath { layout, path });
            }
            log::trace!("No `{}` at {}", target.controller, path.display());
        }

        Err(ResolveError::NotFound {
            root: self.root.clone(),
            controller: target.controller,
            entity: target.entity.clone(),
        })
    }
}

fn is_readable_file(path: &Path) -> bool {
    File::open(path)
        .and_then(|f| f.metadata())
        .is_ok_and(|m| !m.is_dir())
}
