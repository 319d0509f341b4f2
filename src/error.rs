use std::io;
use std::path::PathBuf;

use crate::cgroup::{self, ResolveError};
use crate::msr;
use crate::stats::StatParseError;

/// Every failure a probe can run into.
///
/// Only [`ProbeError::TargetVanished`] and [`ProbeError::Overflow`] are local
/// to one entity and one tick; everything else means the environment does not
/// match what the probe needs and ends the run.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("unexpected content in `{path}`: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: StatParseError,
    },

    #[error("`{path}` is gone: {source}")]
    TargetVanished {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("counter of `{label}` decreased from {before} to {after}")]
    Overflow {
        label: String,
        before: u64,
        after: u64,
    },

    #[error(transparent)]
    Setup(#[from] msr::Error),

    #[error(transparent)]
    Mount(#[from] cgroup::mount::Error),

    #[error("failed to join network namespace of pid {pid}: {source}")]
    Namespace {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("failed to access {what}: {source}")]
    Environment {
        what: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read clock: {0}")]
    Clock(#[source] nix::Error),

    #[error("no targets given, pass at least one id with --containers")]
    NoTargets,

    #[error("failed to write reading: {0}")]
    Output(#[source] io::Error),
}

impl ProbeError {
    /// Classifies a decoder error: a failed read means the source went away,
    /// anything else is a schema mismatch.
    pub fn from_stat(path: impl Into<PathBuf>, err: StatParseError) -> Self {
        match err {
            StatParseError::Io(source) => ProbeError::TargetVanished {
                path: path.into(),
                source,
            },
            source => ProbeError::Format {
                path: path.into(),
                source,
            },
        }
    }

    /// Returns `true` for conditions that only affect one entity for one
    /// tick (or, for a vanished target, one entity for the rest of the run).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProbeError::TargetVanished { .. } | ProbeError::Overflow { .. }
        )
    }
}

pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{err}");
                None
            }
        }
    }
}
