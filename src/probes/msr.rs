use crate::error::ProbeError;
use crate::msr::rapl::{RaplPackage, energy_delta_mj};
use crate::msr::throttling::{ThrottlePackage, ThrottleStatus};
use crate::sampler::{DeltaSource, Value};

/// Energy of one package and domain in millijoules.
#[derive(Debug)]
pub struct RaplSource(RaplPackage);

impl From<RaplPackage> for RaplSource {
    fn from(package: RaplPackage) -> Self {
        Self(package)
    }
}

impl DeltaSource for RaplSource {
    type Raw = u32;
    type Context = ();

    fn label(&self) -> Option<&str> {
        Some(self.0.label())
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<u32, ProbeError> {
        Ok(self.0.read_counter()?)
    }

    /// A wrapped 32-bit counter yields no reading for the interval.
    fn normalize(&self, before: u32, after: u32, _: Option<u64>) -> Result<Value, ProbeError> {
        energy_delta_mj(self.0.unit(), before, after)
            .map(Value::Single)
            .ok_or_else(|| ProbeError::Overflow {
                label: self.0.label().to_owned(),
                before: u64::from(before),
                after: u64::from(after),
            })
    }
}

/// Thermal and power-limit throttling flags of one package.
#[derive(Debug)]
pub struct ThrottlingSource(ThrottlePackage);

impl From<ThrottlePackage> for ThrottlingSource {
    fn from(package: ThrottlePackage) -> Self {
        Self(package)
    }
}

impl DeltaSource for ThrottlingSource {
    type Raw = ThrottleStatus;
    type Context = ();
    const GAUGE: bool = true;

    fn label(&self) -> Option<&str> {
        Some(self.0.label())
    }

    fn snapshot(&mut self, _: &mut ()) -> Result<ThrottleStatus, ProbeError> {
        Ok(self.0.read_status()?)
    }

    fn normalize(&self, _: ThrottleStatus, after: ThrottleStatus, _: Option<u64>) -> Result<Value, ProbeError> {
        Ok(Value::Pair(
            u64::from(after.thermal),
            u64::from(after.power_limit),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::msr::rapl::{self, RaplDomain};
    use crate::msr::testing::{write_cpuinfo, write_register, write_topology};
    use crate::msr::Detector;
    use crate::msr::throttling::ThrottleMeter;
    use crate::sampler::DeltaSampler;

    const POWER_UNIT: u32 = 0x606;
    const PKG_ENERGY: u32 = 0x611;

    fn intel_host(tmp: &std::path::Path, packages: &[usize]) {
        write_cpuinfo(&tmp.join("proc"), "GenuineIntel", 6, 85);
        write_topology(&tmp.join("sys"), packages);
    }

    fn rapl_sources(tmp: &std::path::Path) -> Vec<RaplSource> {
        let detector = Detector::new(tmp.join("proc"), tmp.join("sys"), tmp.join("dev"))
            .detect_vendor()
            .unwrap()
            .enumerate_packages()
            .unwrap();
        rapl::calibrate(detector, RaplDomain::Package)
            .unwrap()
            .into_packages()
            .into_iter()
            .map(RaplSource::from)
            .collect()
    }

    #[test]
    fn test_energy_in_millijoules() {
        let tmp = tempfile::tempdir().unwrap();
        intel_host(tmp.path(), &[0]);
        let dev = tmp.path().join("dev");
        // 2^-14 J per count
        write_register(&dev, 0, POWER_UNIT, 14 << 8);
        write_register(&dev, 0, PKG_ENERGY, 0xFFFF_0000_0000_1000);

        let mut sources = rapl_sources(tmp.path());
        let source = &mut sources[0];
        let before = source.snapshot(&mut ()).unwrap();
        assert_eq!(before, 0x1000);

        write_register(&dev, 0, PKG_ENERGY, 0x1000 + 16384);
        let after = source.snapshot(&mut ()).unwrap();
        assert_eq!(source.normalize(before, after, None).unwrap(), Value::Single(1000));
        assert_eq!(source.label(), Some("Package_0"));
    }

    #[test]
    fn test_wrapped_counter_suppresses_one_package() {
        let tmp = tempfile::tempdir().unwrap();
        intel_host(tmp.path(), &[0, 1]);
        let dev = tmp.path().join("dev");
        for cpu in [0, 1] {
            write_register(&dev, cpu, POWER_UNIT, 14 << 8);
        }
        write_register(&dev, 0, PKG_ENERGY, 0xFFFF_FF00);
        write_register(&dev, 1, PKG_ENERGY, 100);

        let mut sources = rapl_sources(tmp.path());
        let before: Vec<u32> = sources
            .iter_mut()
            .map(|s| s.snapshot(&mut ()).unwrap())
            .collect();
        write_register(&dev, 0, PKG_ENERGY, 0x10);
        write_register(&dev, 1, PKG_ENERGY, 100 + 32768);

        let err = sources[0].normalize(before[0], 0x10, None).unwrap_err();
        assert!(matches!(err, ProbeError::Overflow { .. }));
        assert!(err.is_recoverable());
        assert_eq!(
            sources[1].normalize(before[1], 100 + 32768, None).unwrap(),
            Value::Single(2000)
        );
    }

    #[test]
    fn test_throttling_gauge() {
        let tmp = tempfile::tempdir().unwrap();
        let (sys, dev) = (tmp.path().join("sys"), tmp.path().join("dev"));
        write_topology(&sys, &[0, 1]);
        write_register(&dev, 0, 0x19C, 0);
        write_register(&dev, 1, 0x19C, (1 << 10) | 1);

        let sources = ThrottleMeter::open(&sys, &dev)
            .unwrap()
            .into_packages()
            .into_iter()
            .map(ThrottlingSource::from)
            .collect();
        let mut sampler = DeltaSampler::new(sources, (), Duration::ZERO);
        let readings = sampler.sample_all(&mut Clock::with_offset(0)).unwrap();

        let lines: Vec<String> = readings.iter().map(|r| r.to_string()).collect();
        assert!(lines[0].ends_with(" 0 0 Package_0"));
        assert!(lines[1].ends_with(" 1 1 Package_1"));
    }
}
