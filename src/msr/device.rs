use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::uio::pread;

use super::Error;

/// An open `/dev/cpu/<n>/msr` handle.
///
/// Registers are addressed by file offset; every read is a positioned
/// 8-byte little-endian read, so one handle serves any number of registers.
#[derive(Debug)]
pub struct MsrDevice {
    cpu: usize,
    path: PathBuf,
    file: File,
}

impl MsrDevice {
    /// Opens the MSR device of logical CPU `cpu` below `devfs_root`.
    ///
    /// # Errors
    ///
    /// - [`Error::DriverMissing`] if the device file does not exist.
    /// - [`Error::NoSuchCpu`] if the kernel reports no such CPU (`ENXIO`).
    /// - [`Error::Unsupported`] if the CPU has no MSRs (`EIO`).
    /// - [`Error::Open`] for anything else, usually missing privileges.
    pub fn open(devfs_root: &Path, cpu: usize) -> Result<Self, Error> {
        let path = devfs_root.join("cpu").join(cpu.to_string()).join("msr");
        match File::open(&path) {
            Ok(file) => Ok(Self { cpu, path, file }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::DriverMissing { path }),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                Err(Error::NoSuchCpu { cpu })
            }
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                Err(Error::Unsupported { cpu })
            }
            Err(source) => Err(Error::Open { path, source }),
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Reads the 64-bit value of `register`.
    pub fn read(&self, register: u32) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        let len = pread(&self.file, &mut buf, i64::from(register)).map_err(|source| {
            Error::Read {
                path: self.path.clone(),
                register,
                source,
            }
        })?;
        if len != buf.len() {
            return Err(Error::ShortRead {
                path: self.path.clone(),
                register,
                len,
            });
        }
        Ok(u64::from_le_bytes(buf))
    }
}
