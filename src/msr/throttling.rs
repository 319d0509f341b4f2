use std::path::{Path, PathBuf};

use super::{Error, MsrDevice, enumerate_packages, topology_dir};

const IA32_THERM_STATUS: u32 = 0x19C;
const THERMAL_THROTTLING_BIT: u64 = 1 << 0;
const POWER_LIMIT_BIT: u64 = 1 << 10;

/// Current throttling state of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThrottleStatus {
    pub thermal: bool,
    pub power_limit: bool,
}

impl ThrottleStatus {
    pub fn from_register(raw: u64) -> Self {
        Self {
            thermal: raw & THERMAL_THROTTLING_BIT != 0,
            power_limit: raw & POWER_LIMIT_BIT != 0,
        }
    }
}

/// `IA32_THERM_STATUS` reader for one package.
#[derive(Debug)]
pub struct ThrottlePackage {
    label: String,
    device: MsrDevice,
}

impl ThrottlePackage {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn read_status(&self) -> Result<ThrottleStatus, Error> {
        self.device
            .read(IA32_THERM_STATUS)
            .map(ThrottleStatus::from_register)
    }
}

/// Throttling readers for every package of the host.
#[derive(Debug)]
pub struct ThrottleMeter {
    topology: PathBuf,
    packages: Vec<ThrottlePackage>,
}

impl ThrottleMeter {
    /// Opens the MSR device of the first CPU of every package.
    pub fn open(sysfs_root: &Path, devfs_root: &Path) -> Result<Self, Error> {
        let packages = enumerate_packages(sysfs_root)?
            .into_iter()
            .map(|package| {
                Ok(ThrottlePackage {
                    label: format!("Package_{}", package.index),
                    device: MsrDevice::open(devfs_root, package.cpu)?,
                })
            })
            .collect::<Result<_, Error>>()?;
        Ok(Self {
            topology: topology_dir(sysfs_root),
            packages,
        })
    }

    pub fn packages(&self) -> &[ThrottlePackage] {
        &self.packages
    }

    pub fn into_packages(self) -> Vec<ThrottlePackage> {
        self.packages
    }

    /// Verifies `IA32_THERM_STATUS` is readable on the first package.
    pub fn check(&self) -> Result<(), Error> {
        match self.packages.first() {
            Some(first) => first.read_status().map(|_| ()),
            None => Err(Error::NoPackages {
                path: self.topology.clone(),
            }),
        }
    }
}
