use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a counter source fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileOpenError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use metering_probes::fsutil;
/// let reader = fsutil::open_file_reader("/proc/stat")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileOpenError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Applies `reader` to the held file and rewinds it so the next tick reads
/// the counter from the start again.
///
/// Kernel counter files regenerate their content on every read from offset
/// zero, so a single descriptor can be reused for the process lifetime.
///
/// A decoding error is returned as is, even if the rewind after it fails.
pub fn read_and_rewind<T, E, R>(
    file: &mut R,
    reader: impl FnOnce(&mut R) -> Result<T, E>,
) -> Result<T, E>
where
    R: BufRead + Seek,
    E: From<io::Error>,
{
    match reader(file) {
        Ok(value) => {
            file.seek(SeekFrom::Start(0))?;
            Ok(value)
        }
        Err(err) => {
            let _ = file.seek(SeekFrom::Start(0));
            Err(err)
        }
    }
}
