use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use super::{Error, MAX_CPUS, MAX_PACKAGES};
use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Intel,
    Amd,
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vendor::Intel => f.write_str("Intel"),
            Vendor::Amd => f.write_str("AMD"),
        }
    }
}

/// Vendor, family and model as reported for the first processor in
/// `/proc/cpuinfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuModel {
    pub vendor: Vendor,
    pub family: u32,
    pub model: u32,
}

impl fmt::Display for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} family {:#x} model {:#x}",
            self.vendor, self.family, self.model
        )
    }
}

/// One physical package and the logical CPU whose MSRs represent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Package {
    /// Position among detected packages, used in output labels.
    pub index: usize,
    /// `physical_package_id` reported by sysfs.
    pub package_id: usize,
    /// First logical CPU found on the package.
    pub cpu: usize,
}

#[derive(Debug)]
pub struct Uninitialized;

#[derive(Debug)]
pub struct VendorDetected {
    model: CpuModel,
}

#[derive(Debug)]
pub struct PackagesEnumerated {
    model: CpuModel,
    packages: Vec<Package>,
}

/// Startup detection of the CPU the RAPL probe runs on.
///
/// `S` records how far detection has progressed.
#[derive(Debug)]
pub struct Detector<S> {
    procfs_root: PathBuf,
    sysfs_root: PathBuf,
    devfs_root: PathBuf,
    state: S,
}

impl Detector<Uninitialized> {
    pub fn new(
        procfs_root: impl Into<PathBuf>,
        sysfs_root: impl Into<PathBuf>,
        devfs_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            procfs_root: procfs_root.into(),
            sysfs_root: sysfs_root.into(),
            devfs_root: devfs_root.into(),
            state: Uninitialized,
        }
    }

    /// Reads vendor, family and model from `<procfs>/cpuinfo`.
    ///
    /// Intel is accepted for family 6 only, AMD for families 0x17 and 0x19.
    pub fn detect_vendor(self) -> Result<Detector<VendorDetected>, Error> {
        let path = self.procfs_root.join("cpuinfo");
        let reader = fsutil::open_file_reader(&path).map_err(|e| Error::Topology {
            path: e.path,
            source: e.source,
        })?;
        let model = parse_cpuinfo(reader, &path)?;

        let supported = match model.vendor {
            Vendor::Intel => model.family == 6,
            Vendor::Amd => matches!(model.family, 0x17 | 0x19),
        };
        if !supported {
            return Err(Error::UnsupportedFamily {
                vendor: model.vendor,
                family: model.family,
            });
        }
        log::debug!("Detected CPU: {model}");

        Ok(Detector {
            procfs_root: self.procfs_root,
            sysfs_root: self.sysfs_root,
            devfs_root: self.devfs_root,
            state: VendorDetected { model },
        })
    }
}

impl Detector<VendorDetected> {
    pub fn model(&self) -> CpuModel {
        self.state.model
    }

    /// Maps every physical package to its first logical CPU.
    pub fn enumerate_packages(self) -> Result<Detector<PackagesEnumerated>, Error> {
        let packages = enumerate_packages(&self.sysfs_root)?;
        Ok(Detector {
            procfs_root: self.procfs_root,
            sysfs_root: self.sysfs_root,
            devfs_root: self.devfs_root,
            state: PackagesEnumerated {
                model: self.state.model,
                packages,
            },
        })
    }
}

impl Detector<PackagesEnumerated> {
    pub fn model(&self) -> CpuModel {
        self.state.model
    }

    pub fn packages(&self) -> &[Package] {
        &self.state.packages
    }

    pub fn devfs_root(&self) -> &Path {
        &self.devfs_root
    }

    /// The sysfs directory the packages were enumerated from.
    pub fn topology_dir(&self) -> PathBuf {
        topology_dir(&self.sysfs_root)
    }
}

fn parse_cpuinfo<R: BufRead>(mut reader: R, origin: &Path) -> Result<CpuModel, Error> {
    let mut vendor = None;
    let mut family = None;
    let mut model = None;

    let mut line = String::new();
    while reader.read_line(&mut line).map_err(|source| Error::Topology {
        path: origin.to_path_buf(),
        source,
    })? != 0
    {
        // only the first processor block is inspected
        if line.trim().is_empty() && vendor.is_some() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            match key.trim() {
                "vendor_id" => {
                    vendor = match value {
                        "GenuineIntel" => Some(Vendor::Intel),
                        "AuthenticAMD" => Some(Vendor::Amd),
                        _ => {
                            return Err(Error::UnknownVendor {
                                path: origin.to_path_buf(),
                            });
                        }
                    }
                }
                "cpu family" => family = Some(parse_number(value, origin)?),
                "model" => model = Some(parse_number(value, origin)?),
                _ => {}
            }
        }
        line.clear();
    }

    let vendor = vendor.ok_or_else(|| Error::UnknownVendor {
        path: origin.to_path_buf(),
    })?;
    let family = family.ok_or_else(|| Error::MissingCpuInfo {
        path: origin.to_path_buf(),
        field: "cpu family",
    })?;
    // some AMD kernels omit the model; it does not affect AMD register selection
    let model = match (vendor, model) {
        (_, Some(model)) => model,
        (Vendor::Amd, None) => 0,
        (Vendor::Intel, None) => {
            return Err(Error::MissingCpuInfo {
                path: origin.to_path_buf(),
                field: "model",
            });
        }
    };

    Ok(CpuModel {
        vendor,
        family,
        model,
    })
}

fn parse_number(value: &str, origin: &Path) -> Result<u32, Error> {
    value.parse::<u32>().map_err(|_| Error::InvalidTopology {
        path: origin.to_path_buf(),
        value: value.to_owned(),
    })
}

pub fn topology_dir(sysfs_root: &Path) -> PathBuf {
    sysfs_root.join("devices/system/cpu")
}

/// Scans `<sysfs>/devices/system/cpu/cpuN/topology/physical_package_id` for
/// consecutive CPUs starting at 0 and returns one [`Package`] per distinct
/// package id, ordered by id.
///
/// # Errors
///
/// - [`Error::NoPackages`] if not even `cpu0` is listed.
/// - [`Error::TooManyPackages`] for a package id of [`MAX_PACKAGES`] or more.
/// - [`Error::InvalidTopology`] if a package id is not a number.
pub fn enumerate_packages(sysfs_root: &Path) -> Result<Vec<Package>, Error> {
    let cpu_dir = topology_dir(sysfs_root);
    let mut first_cpu: BTreeMap<usize, usize> = BTreeMap::new();

    for cpu in 0..MAX_CPUS {
        let path = cpu_dir.join(format!("cpu{cpu}/topology/physical_package_id"));
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(source) => return Err(Error::Topology { path, source }),
        };
        let id = content
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::InvalidTopology {
                path: path.clone(),
                value: content.trim().to_owned(),
            })?;
        if id >= MAX_PACKAGES {
            return Err(Error::TooManyPackages { id });
        }
        first_cpu.entry(id).or_insert(cpu);
    }

    if first_cpu.is_empty() {
        return Err(Error::NoPackages { path: cpu_dir });
    }

    let packages: Vec<Package> = first_cpu
        .into_iter()
        .enumerate()
        .map(|(index, (package_id, cpu))| Package {
            index,
            package_id,
            cpu,
        })
        .collect();
    log::debug!("Found {} package(s): {packages:?}", packages.len());
    Ok(packages)
}
