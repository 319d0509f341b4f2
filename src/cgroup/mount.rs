//! Detection of the cgroup v2 mount point from a `mountinfo` file.
//!
//! See [`proc_pid_mountinfo(5)`](https://man7.org/linux/man-pages/man5/proc_pid_mountinfo.5.html)
//! for the line format. Only the mount point and filesystem type are needed.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::fsutil;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),

    #[error("failed to read line for file `{path}`: {source}")]
    ReadLine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed mountinfo line {line} in `{path}`")]
    Malformed { path: PathBuf, line: usize },

    #[error("failed to detect cgroup v2 mount point in file `{path}`")]
    MissingCgroup2Mount { path: PathBuf },

    #[error("failed to canonicalize cgroup2 mount path `{path}`: {source}")]
    Canonicalization {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cgroup2 mount path `{path}` is not a directory")]
    NotADirectory { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mount point and filesystem type of one mountinfo line.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (pre, post) = line.split_once(" - ")?;
    let mount_point = pre.split_whitespace().nth(4)?;
    let fs_type = post.split_whitespace().next()?;
    Some((mount_point, fs_type))
}

/// Returns the mount point of the first `cgroup2` entry in `mountinfo`.
///
/// The returned path is as the kernel reports it, i.e. relative to the root
/// of the process that produced the file.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::ReadLine`] if reading from the file fails.
/// - [`Error::Malformed`] if a line lacks the ` - ` separator or a field.
/// - [`Error::MissingCgroup2Mount`] if no `cgroup2` mount is listed.
pub fn detect_cgroup2_mount_point(mountinfo: impl AsRef<Path>) -> Result<PathBuf> {
    let mountinfo = mountinfo.as_ref();
    let reader = fsutil::open_file_reader(mountinfo)?;
    detect_from_reader(reader, mountinfo)
}

fn detect_from_reader<R: BufRead>(mut reader: R, origin: &Path) -> Result<PathBuf> {
    let mut line = String::with_capacity(256);
    let mut lineno = 0;

    while reader
        .read_line(&mut line)
        .map_err(|source| Error::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?
        != 0
    {
        lineno += 1;
        let (mount_point, fs_type) = parse_line(&line).ok_or_else(|| Error::Malformed {
            path: origin.to_path_buf(),
            line: lineno,
        })?;
        if fs_type == "cgroup2" {
            log::debug!("Found `cgroup2` mount point: {mount_point}");
            return Ok(PathBuf::from(mount_point));
        }
        line.clear();
    }

    Err(Error::MissingCgroup2Mount {
        path: origin.to_path_buf(),
    })
}

/// Detects the cgroup v2 mount point below `rootfs` and checks it is a
/// directory.
///
/// `rootfs` is the location of the host root filesystem as seen by this
/// process, `/` unless the probe runs inside a container.
///
/// # Errors
///
/// Returns errors from [`detect_cgroup2_mount_point`] plus
/// [`Error::Canonicalization`] and [`Error::NotADirectory`].
pub fn detect_validated_cgroup2_mount_point(
    mountinfo: impl AsRef<Path>,
    rootfs: &Path,
) -> Result<PathBuf> {
    let raw = detect_cgroup2_mount_point(mountinfo)?;
    let joined = rootfs.join(raw.strip_prefix("/").unwrap_or(&raw));
    let canonical = std::fs::canonicalize(&joined).map_err(|source| Error::Canonicalization {
        path: joined.clone(),
        source,
    })?;

    if !canonical.is_dir() {
        return Err(Error::NotADirectory { path: canonical });
    }

    Ok(canonical)
}
