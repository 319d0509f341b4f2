use std::io::BufRead;
use std::path::Path;

use nix::unistd::Pid;

use super::ResolveError;
use crate::fsutil;

/// Returns the first PID listed in a `cgroup.procs` file.
///
/// Any member process shares the cgroup's network namespace, so one is
/// enough to reach it.
///
/// # Errors
///
/// Returns [`ResolveError::NoProcess`] for an empty cgroup,
/// [`ResolveError::InvalidPid`] if the first line is not a PID and
/// [`ResolveError::Read`] if the file cannot be read.
pub fn first_pid(path: &Path) -> Result<Pid, ResolveError> {
    let reader = fsutil::open_file_reader(path).map_err(|e| ResolveError::Read {
        path: e.path,
        source: e.source,
    })?;
    first_pid_from_reader(reader, path)
}

fn first_pid_from_reader<R: BufRead>(mut reader: R, origin: &Path) -> Result<Pid, ResolveError> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|source| ResolveError::Read {
            path: origin.to_path_buf(),
            source,
        })?;

    let value = line.trim();
    if value.is_empty() {
        return Err(ResolveError::NoProcess {
            path: origin.to_path_buf(),
        });
    }
    match value.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Pid::from_raw(pid)),
        _ => Err(ResolveError::InvalidPid {
            path: origin.to_path_buf(),
            value: value.to_owned(),
        }),
    }
}
