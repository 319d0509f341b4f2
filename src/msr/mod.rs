//! Model-specific register access and the probes built on it.
//!
//! RAPL setup is a one-way sequence, encoded in the type of the
//! [`Detector`]:
//!
//! ```text
//! Detector<Uninitialized>
//!     -> detect_vendor()      -> Detector<VendorDetected>
//!     -> enumerate_packages() -> Detector<PackagesEnumerated>
//!     -> rapl::calibrate()    -> RaplMeter   (units calibrated, ready to sample)
//! ```
//!
//! Any failing step returns an [`Error`] and there is no way back to an
//! earlier state.

use std::path::PathBuf;

mod detector;
mod device;
pub mod rapl;
pub mod throttling;

pub use detector::{
    CpuModel, Detector, Package, PackagesEnumerated, Uninitialized, Vendor, VendorDetected,
    enumerate_packages, topology_dir,
};
pub use device::MsrDevice;

/// Upper bound on physical package ids.
pub const MAX_PACKAGES: usize = 16;
/// Upper bound on logical CPUs scanned during enumeration.
pub const MAX_CPUS: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("msr driver not loaded, `{path}` does not exist (try `modprobe msr`)")]
    DriverMissing { path: PathBuf },

    #[error("no CPU {cpu}")]
    NoSuchCpu { cpu: usize },

    #[error("CPU {cpu} doesn't support MSRs")]
    Unsupported { cpu: usize },

    #[error("failed to open `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read MSR {register:#x} from `{path}`: {source}")]
    Read {
        path: PathBuf,
        register: u32,
        #[source]
        source: nix::Error,
    },

    #[error("short read of MSR {register:#x} from `{path}`: {len} bytes")]
    ShortRead {
        path: PathBuf,
        register: u32,
        len: usize,
    },

    #[error("failed to read `{path}`: {source}")]
    Topology {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid content `{value}` in `{path}`")]
    InvalidTopology { path: PathBuf, value: String },

    #[error("package id {id} exceeds the supported maximum of {MAX_PACKAGES}")]
    TooManyPackages { id: usize },

    #[error("no CPU package found below `{path}`")]
    NoPackages { path: PathBuf },

    #[error("could not detect CPU vendor in `{path}`, only Intel and AMD are supported")]
    UnknownVendor { path: PathBuf },

    #[error("`{field}` missing from `{path}`")]
    MissingCpuInfo { path: PathBuf, field: &'static str },

    #[error("unsupported {vendor} CPU family {family}")]
    UnsupportedFamily { vendor: Vendor, family: u32 },

    #[error("RAPL domain {domain} not available on {model}")]
    DomainUnavailable {
        domain: rapl::RaplDomain,
        model: CpuModel,
    },

    #[error("MSR {register:#x} on CPU {cpu} reads as zero")]
    EmptyCounter { cpu: usize, register: u32 },
}
