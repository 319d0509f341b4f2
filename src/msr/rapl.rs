//! RAPL energy metering through MSRs.
//!
//! The power-unit register yields an energy unit of `2^-N` joules per count
//! (bits 8..=12). Energy-status registers are 32-bit wrapping counters in
//! that unit. Deltas are reported in millijoules; a wrapped counter yields no
//! value for that interval.

use std::fmt;
use std::path::PathBuf;

use super::{CpuModel, Detector, Error, MsrDevice, PackagesEnumerated, Vendor};

const INTEL_POWER_UNIT: u32 = 0x606;
const INTEL_PKG_ENERGY_STATUS: u32 = 0x611;
const INTEL_DRAM_ENERGY_STATUS: u32 = 0x619;
const INTEL_PLATFORM_ENERGY_STATUS: u32 = 0x64D;

const AMD_POWER_UNIT: u32 = 0xC001_0299;
const AMD_PKG_ENERGY_STATUS: u32 = 0xC001_029B;

/// Server parts that count DRAM energy in a fixed unit of 2^-16 J instead of
/// the advertised package unit.
const DRAM_FIXED_UNIT: u8 = 16;

/// Energy domain metered by the probe, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaplDomain {
    Package,
    Dram,
    Psys,
}

impl fmt::Display for RaplDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaplDomain::Package => f.write_str("Package"),
            RaplDomain::Dram => f.write_str("DRAM"),
            RaplDomain::Psys => f.write_str("PSYS"),
        }
    }
}

/// How a CPU model exposes the DRAM domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DramSupport {
    Unavailable,
    SameUnit,
    FixedUnit,
}

fn dram_support(model: CpuModel) -> DramSupport {
    if model.vendor != Vendor::Intel {
        return DramSupport::Unavailable;
    }
    match model.model {
        // SandyBridge-EP, IvyBridge-EP
        45 | 62 => DramSupport::SameUnit,
        // Haswell-EP, Broadwell-EP, Skylake-X, Knights Landing, Knights Mill
        63 | 79 | 85 | 87 | 133 => DramSupport::FixedUnit,
        // Haswell, Broadwell, Goldmont, Gemini Lake, Denverton, Skylake, Kabylake
        60 | 69 | 70 | 61 | 71 | 92 | 122 | 95 | 78 | 94 | 142 | 158 => DramSupport::SameUnit,
        // SandyBridge, IvyBridge, TigerLake and anything unlisted
        _ => DramSupport::Unavailable,
    }
}

/// Energy per count as a power-of-two exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyUnit {
    exponent: u8,
}

impl EnergyUnit {
    pub fn from_exponent(exponent: u8) -> Self {
        Self { exponent }
    }

    /// Decodes bits 8..=12 of the power-unit register.
    pub fn from_power_unit_register(raw: u64) -> Self {
        Self {
            exponent: ((raw >> 8) & 0x1F) as u8,
        }
    }

    pub fn exponent(&self) -> u8 {
        self.exponent
    }

    /// Converts a count to whole millijoules, rounding down.
    pub fn to_millijoules(&self, counts: u64) -> u64 {
        let mj = (u128::from(counts) * 1000) >> self.exponent;
        u64::try_from(mj).unwrap_or(u64::MAX)
    }
}

/// Energy between two readings of a 32-bit energy-status counter, or `None`
/// if the counter wrapped in between.
pub fn energy_delta_mj(unit: EnergyUnit, before: u32, after: u32) -> Option<u64> {
    after
        .checked_sub(before)
        .map(|counts| unit.to_millijoules(u64::from(counts)))
}

/// One calibrated package, ready to be sampled.
#[derive(Debug)]
pub struct RaplPackage {
    label: String,
    device: MsrDevice,
    register: u32,
    unit: EnergyUnit,
}

impl RaplPackage {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unit(&self) -> EnergyUnit {
        self.unit
    }

    /// Reads the 32-bit energy-status counter.
    pub fn read_counter(&self) -> Result<u32, Error> {
        let raw = self.device.read(self.register)?;
        Ok((raw & 0xFFFF_FFFF) as u32)
    }
}

/// Every package of the host calibrated for one domain.
#[derive(Debug)]
pub struct RaplMeter {
    domain: RaplDomain,
    model: CpuModel,
    topology: PathBuf,
    packages: Vec<RaplPackage>,
}

impl RaplMeter {
    pub fn domain(&self) -> RaplDomain {
        self.domain
    }

    pub fn model(&self) -> CpuModel {
        self.model
    }

    pub fn packages(&self) -> &[RaplPackage] {
        &self.packages
    }

    pub fn into_packages(self) -> Vec<RaplPackage> {
        self.packages
    }

    /// Verifies the first package's counter is readable and non-zero.
    pub fn check(&self) -> Result<(), Error> {
        let Some(first) = self.packages.first() else {
            return Err(Error::NoPackages {
                path: self.topology.clone(),
            });
        };
        if first.read_counter()? == 0 {
            return Err(Error::EmptyCounter {
                cpu: first.device.cpu(),
                register: first.register,
            });
        }
        Ok(())
    }
}

/// Reads the energy unit of every package and selects the register for
/// `domain`.
///
/// # Errors
///
/// Returns [`Error::DomainUnavailable`] if the detected CPU model cannot
/// meter `domain`, and any device error from opening or reading the MSRs.
pub fn calibrate(
    detector: Detector<PackagesEnumerated>,
    domain: RaplDomain,
) -> Result<RaplMeter, Error> {
    let model = detector.model();
    let (unit_register, package_register) = match model.vendor {
        Vendor::Intel => (INTEL_POWER_UNIT, INTEL_PKG_ENERGY_STATUS),
        Vendor::Amd => (AMD_POWER_UNIT, AMD_PKG_ENERGY_STATUS),
    };

    let unavailable = || Error::DomainUnavailable { domain, model };
    let (register, fixed_unit) = match domain {
        RaplDomain::Package => (package_register, None),
        RaplDomain::Dram => match dram_support(model) {
            DramSupport::SameUnit => (INTEL_DRAM_ENERGY_STATUS, None),
            DramSupport::FixedUnit => (
                INTEL_DRAM_ENERGY_STATUS,
                Some(EnergyUnit::from_exponent(DRAM_FIXED_UNIT)),
            ),
            DramSupport::Unavailable => return Err(unavailable()),
        },
        RaplDomain::Psys if model.vendor == Vendor::Intel => (INTEL_PLATFORM_ENERGY_STATUS, None),
        RaplDomain::Psys => return Err(unavailable()),
    };

    let mut packages = Vec::with_capacity(detector.packages().len());
    for package in detector.packages() {
        let device = MsrDevice::open(detector.devfs_root(), package.cpu)?;
        let unit = match fixed_unit {
            Some(unit) => unit,
            None => EnergyUnit::from_power_unit_register(device.read(unit_register)?),
        };
        log::debug!(
            "{domain}_{} (physical package {}) on CPU {}: energy unit 2^-{} J",
            package.index,
            package.package_id,
            package.cpu,
            unit.exponent()
        );
        packages.push(RaplPackage {
            label: format!("{domain}_{}", package.index),
            device,
            register,
            unit,
        });
    }

    Ok(RaplMeter {
        domain,
        model,
        topology: detector.topology_dir(),
        packages,
    })
}
