//! The delta-sampling loop shared by every probe.
//!
//! One tick captures a timestamp, reads every active target back to back
//! ("before"), sleeps for the interval, reads every target again ("after")
//! and turns each pair into a [`Reading`]. Keeping the reads of all targets
//! in two tight passes keeps their windows aligned to within microseconds.
//!
//! A target whose source disappears is dropped for the rest of the run. A
//! counter that goes backwards costs that target one reading, and a host
//! baseline that cannot be read costs the tick. Any other error ends the run.

use std::convert::Infallible;
use std::fmt;
use std::thread;
use std::time::Duration;

use crate::clock::{Clock, Timestamp};
use crate::error::ProbeError;
use crate::output::ReadingWriter;

/// A normalized measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Single(u64),
    Pair(u64, u64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Single(v) => write!(f, "{v}"),
            Value::Pair(a, b) => write!(f, "{a} {b}"),
        }
    }
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub timestamp: Timestamp,
    pub value: Value,
    pub label: Option<String>,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp, self.value)?;
        if let Some(label) = &self.label {
            write!(f, " {label}")?;
        }
        Ok(())
    }
}

/// A counter source the sampler can drive.
pub trait DeltaSource {
    /// One snapshot of the counter.
    type Raw: Copy;
    /// State shared by all sources of a kind, e.g. the current namespace.
    type Context;

    /// Gauges report the "after" snapshot alone, so their "before" read is
    /// skipped.
    const GAUGE: bool = false;

    /// Entity label appended to every reading, if any.
    fn label(&self) -> Option<&str>;

    fn snapshot(&mut self, ctx: &mut Self::Context) -> Result<Self::Raw, ProbeError>;

    /// Turns a snapshot pair into a value. `host_delta` is the host baseline
    /// delta of the same window when the sampler has a baseline.
    ///
    /// Returns [`ProbeError::Overflow`] when the counter went backwards.
    fn normalize(
        &self,
        before: Self::Raw,
        after: Self::Raw,
        host_delta: Option<u64>,
    ) -> Result<Value, ProbeError>;
}

/// A host-wide reference counter sampled in the same window as the targets.
pub trait Baseline {
    fn snapshot(&mut self) -> Result<u64, ProbeError>;
}

/// Baseline type for samplers that do not need one.
#[derive(Debug)]
pub enum NoBaseline {}

impl Baseline for NoBaseline {
    fn snapshot(&mut self) -> Result<u64, ProbeError> {
        match *self {}
    }
}

/// Checked counter difference, reporting a decrease as
/// [`ProbeError::Overflow`].
pub fn counter_delta(label: Option<&str>, before: u64, after: u64) -> Result<u64, ProbeError> {
    after.checked_sub(before).ok_or_else(|| ProbeError::Overflow {
        label: label.unwrap_or("host").to_owned(),
        before,
        after,
    })
}

struct Slot<S: DeltaSource> {
    source: S,
    active: bool,
    before: Option<S::Raw>,
}

pub struct DeltaSampler<S: DeltaSource, B: Baseline = NoBaseline> {
    slots: Vec<Slot<S>>,
    ctx: S::Context,
    baseline: Option<B>,
    interval: Duration,
}

impl<S: DeltaSource> DeltaSampler<S, NoBaseline> {
    pub fn new(sources: Vec<S>, ctx: S::Context, interval: Duration) -> Self {
        Self::build(sources, ctx, None, interval)
    }
}

impl<S: DeltaSource, B: Baseline> DeltaSampler<S, B> {
    pub fn with_baseline(sources: Vec<S>, ctx: S::Context, baseline: B, interval: Duration) -> Self {
        Self::build(sources, ctx, Some(baseline), interval)
    }

    fn build(sources: Vec<S>, ctx: S::Context, baseline: Option<B>, interval: Duration) -> Self {
        let slots = sources
            .into_iter()
            .map(|source| Slot {
                source,
                active: true,
                before: None,
            })
            .collect();
        Self {
            slots,
            ctx,
            baseline,
            interval,
        }
    }

    /// Number of targets still being sampled.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Reads every source and the baseline once. Any error fails the check,
    /// including a source that vanished.
    pub fn check(&mut self) -> Result<(), ProbeError> {
        for slot in &mut self.slots {
            slot.source.snapshot(&mut self.ctx)?;
        }
        if let Some(baseline) = self.baseline.as_mut() {
            baseline.snapshot()?;
        }
        Ok(())
    }

    /// Runs one tick and returns its readings, all stamped with the time the
    /// tick started.
    pub fn sample_all(&mut self, clock: &mut Clock) -> Result<Vec<Reading>, ProbeError> {
        let window = self.begin_tick(clock)?;
        thread::sleep(self.interval);
        self.finish_tick(window)
    }

    /// Captures T0 and runs the "before" pass over every active target and
    /// the baseline.
    pub fn begin_tick(&mut self, clock: &mut Clock) -> Result<Window, ProbeError> {
        let t0 = clock.now()?;
        for slot in self.slots.iter_mut().filter(|s| s.active) {
            slot.before = None;
            if S::GAUGE {
                continue;
            }
            match slot.source.snapshot(&mut self.ctx) {
                Ok(raw) => slot.before = Some(raw),
                Err(err) => deactivate(slot, err)?,
            }
        }
        let host_before = read_host(self.baseline.as_mut())?;
        Ok(Window { t0, host_before })
    }

    /// Runs the "after" pass and normalizes every before/after pair of the
    /// window.
    pub fn finish_tick(&mut self, window: Window) -> Result<Vec<Reading>, ProbeError> {
        if window.host_before == HostRead::Failed {
            return Ok(Vec::new());
        }

        let Self {
            slots,
            ctx,
            baseline,
            ..
        } = self;

        let mut afters = Vec::with_capacity(slots.len());
        for (idx, slot) in slots.iter_mut().enumerate() {
            if !slot.active || (!S::GAUGE && slot.before.is_none()) {
                continue;
            }
            match slot.source.snapshot(ctx) {
                Ok(raw) => afters.push((idx, raw)),
                Err(err) => deactivate(slot, err)?,
            }
        }
        let host_after = read_host(baseline.as_mut())?;

        let host_delta = match (window.host_before, host_after) {
            (HostRead::Taken(before), HostRead::Taken(after)) => {
                match counter_delta(None, before, after) {
                    Ok(delta) => Some(delta),
                    Err(err) => {
                        log::warn!(target: "sampler", "Skipping tick: {err}");
                        return Ok(Vec::new());
                    }
                }
            }
            (_, HostRead::Failed) => return Ok(Vec::new()),
            _ => None,
        };

        let mut readings = Vec::with_capacity(afters.len());
        for (idx, after) in afters {
            let slot = &slots[idx];
            let before = slot.before.unwrap_or(after);
            match slot.source.normalize(before, after, host_delta) {
                Ok(value) => readings.push(Reading {
                    timestamp: window.t0,
                    value,
                    label: slot.source.label().map(str::to_owned),
                }),
                Err(err) if err.is_recoverable() => {
                    log::debug!(target: "sampler", "Suppressing reading: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(readings)
    }

    /// Samples forever, writing every reading as soon as its tick completes.
    pub fn run<W: ReadingWriter>(
        &mut self,
        clock: &mut Clock,
        out: &mut W,
    ) -> Result<Infallible, ProbeError> {
        loop {
            for reading in self.sample_all(clock)? {
                out.write_reading(&reading)?;
            }
        }
    }
}

/// The "before" half of one tick, consumed by [`DeltaSampler::finish_tick`].
#[derive(Debug)]
pub struct Window {
    t0: Timestamp,
    host_before: HostRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostRead {
    Absent,
    Taken(u64),
    Failed,
}

/// A recoverable baseline error costs the whole tick.
fn read_host<B: Baseline>(baseline: Option<&mut B>) -> Result<HostRead, ProbeError> {
    let Some(baseline) = baseline else {
        return Ok(HostRead::Absent);
    };
    match baseline.snapshot() {
        Ok(value) => Ok(HostRead::Taken(value)),
        Err(err) if err.is_recoverable() => {
            log::warn!(target: "sampler", "Skipping tick, host baseline unreadable: {err}");
            Ok(HostRead::Failed)
        }
        Err(err) => Err(err),
    }
}

fn deactivate<S: DeltaSource>(slot: &mut Slot<S>, err: ProbeError) -> Result<(), ProbeError> {
    match err {
        ProbeError::TargetVanished { .. } => {
            log::warn!(
                target: "sampler",
                "Dropping `{}`: {err}",
                slot.source.label().unwrap_or("host")
            );
            slot.active = false;
            slot.before = None;
            Ok(())
        }
        err => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;

    /// Replays scripted snapshots; `None` simulates a vanished source.
    struct Scripted {
        label: String,
        values: VecDeque<Option<u64>>,
    }

    impl Scripted {
        fn new(label: &str, values: &[Option<u64>]) -> Self {
            Self {
                label: label.to_owned(),
                values: values.iter().copied().collect(),
            }
        }
    }

    impl DeltaSource for Scripted {
        type Raw = u64;
        type Context = usize;

        fn label(&self) -> Option<&str> {
            Some(&self.label)
        }

        fn snapshot(&mut self, reads: &mut usize) -> Result<u64, ProbeError> {
            *reads += 1;
            match self.values.pop_front().flatten() {
                Some(v) => Ok(v),
                None => Err(ProbeError::TargetVanished {
                    path: self.label.clone().into(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                }),
            }
        }

        fn normalize(&self, before: u64, after: u64, host: Option<u64>) -> Result<Value, ProbeError> {
            let delta = counter_delta(self.label(), before, after)?;
            Ok(match host {
                Some(h) => Value::Pair(delta, h),
                None => Value::Single(delta),
            })
        }
    }

    struct Gauge(VecDeque<u64>);

    impl DeltaSource for Gauge {
        type Raw = u64;
        type Context = ();
        const GAUGE: bool = true;

        fn label(&self) -> Option<&str> {
            None
        }

        fn snapshot(&mut self, _: &mut ()) -> Result<u64, ProbeError> {
            Ok(self.0.pop_front().unwrap_or(0))
        }

        fn normalize(&self, _: u64, after: u64, _: Option<u64>) -> Result<Value, ProbeError> {
            Ok(Value::Single(after))
        }
    }

    struct Host(VecDeque<u64>);

    impl Baseline for Host {
        fn snapshot(&mut self) -> Result<u64, ProbeError> {
            Ok(self.0.pop_front().unwrap_or(0))
        }
    }

    fn values(readings: &[Reading]) -> Vec<(Option<&str>, Value)> {
        readings
            .iter()
            .map(|r| (r.label.as_deref(), r.value))
            .collect()
    }

    #[test]
    fn test_reading_display() {
        let reading = Reading {
            timestamp: Timestamp::from_micros(1_690_000_000_123_456),
            value: Value::Single(4821),
            label: Some("my-container-id".into()),
        };
        assert_eq!(reading.to_string(), "1690000000123456 4821 my-container-id");

        let reading = Reading {
            timestamp: Timestamp::from_micros(1_000_000),
            value: Value::Pair(5000, 3000),
            label: None,
        };
        assert_eq!(reading.to_string(), "1000000 5000 3000");
    }

    #[test]
    fn test_before_pass_precedes_after_pass() {
        let sources = vec![
            Scripted::new("a", &[Some(10), Some(15)]),
            Scripted::new("b", &[Some(100), Some(130)]),
        ];
        let mut sampler = DeltaSampler::new(sources, 0usize, Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        let readings = sampler.sample_all(&mut clock).unwrap();
        assert_eq!(
            values(&readings),
            [(Some("a"), Value::Single(5)), (Some("b"), Value::Single(30))]
        );
        assert_eq!(sampler.ctx, 4);
        assert_eq!(readings[0].timestamp, readings[1].timestamp);
    }

    #[test]
    fn test_overflow_suppresses_only_that_target() {
        let sources = vec![
            Scripted::new("Package_0", &[Some(u32::MAX as u64), Some(3)]),
            Scripted::new("Package_1", &[Some(10), Some(20)]),
        ];
        let mut sampler = DeltaSampler::new(sources, 0usize, Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        let readings = sampler.sample_all(&mut clock).unwrap();
        assert_eq!(values(&readings), [(Some("Package_1"), Value::Single(10))]);
        assert_eq!(sampler.active(), 2);
    }

    #[test]
    fn test_vanished_target_is_dropped_for_the_run() {
        let sources = vec![
            Scripted::new("gone", &[Some(1), None, Some(5), Some(6)]),
            Scripted::new("stays", &[Some(1), Some(2), Some(3), Some(5)]),
        ];
        let mut sampler = DeltaSampler::new(sources, 0usize, Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        let first = sampler.sample_all(&mut clock).unwrap();
        assert_eq!(values(&first), [(Some("stays"), Value::Single(1))]);
        assert_eq!(sampler.active(), 1);

        let second = sampler.sample_all(&mut clock).unwrap();
        assert_eq!(values(&second), [(Some("stays"), Value::Single(2))]);
        assert!(second[0].timestamp > first[0].timestamp);
    }

    #[test]
    fn test_vanished_in_before_pass_skips_after_read() {
        let sources = vec![Scripted::new("gone", &[None, Some(1)])];
        let mut sampler = DeltaSampler::new(sources, 0usize, Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        assert!(sampler.sample_all(&mut clock).unwrap().is_empty());
        assert_eq!(sampler.ctx, 1);
    }

    #[test]
    fn test_baseline_delta_is_passed_through() {
        let sources = vec![Scripted::new("c", &[Some(1_000_000), Some(1_500_000)])];
        let host = Host(VecDeque::from([20_000_000, 25_000_000]));
        let mut sampler = DeltaSampler::with_baseline(sources, 0usize, host, Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        let readings = sampler.sample_all(&mut clock).unwrap();
        assert_eq!(readings[0].value, Value::Pair(500_000, 5_000_000));
    }

    #[test]
    fn test_decreasing_baseline_skips_tick() {
        let sources = vec![Scripted::new("c", &[Some(1), Some(2)])];
        let host = Host(VecDeque::from([10, 5]));
        let mut sampler = DeltaSampler::with_baseline(sources, 0usize, host, Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        assert!(sampler.sample_all(&mut clock).unwrap().is_empty());
        assert_eq!(sampler.active(), 1);
    }

    #[test]
    fn test_gauge_reads_once_per_tick() {
        let gauge = Gauge(VecDeque::from([7, 9]));
        let mut sampler = DeltaSampler::new(vec![gauge], (), Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        let first = sampler.sample_all(&mut clock).unwrap();
        let second = sampler.sample_all(&mut clock).unwrap();
        assert_eq!(first[0].value, Value::Single(7));
        assert_eq!(second[0].value, Value::Single(9));
    }

    #[test]
    fn test_check_reads_once_and_fails_on_vanished() {
        let sources = vec![Scripted::new("a", &[Some(1)]), Scripted::new("b", &[Some(2)])];
        let host = Host(VecDeque::from([1]));
        let mut sampler = DeltaSampler::with_baseline(sources, 0usize, host, Duration::ZERO);
        sampler.check().unwrap();
        assert_eq!(sampler.ctx, 2);

        let mut sampler = DeltaSampler::new(vec![Scripted::new("gone", &[None])], 0usize, Duration::ZERO);
        assert!(matches!(
            sampler.check().unwrap_err(),
            ProbeError::TargetVanished { .. }
        ));
    }

    #[test]
    fn test_fatal_error_propagates() {
        struct Broken;
        impl DeltaSource for Broken {
            type Raw = u64;
            type Context = ();
            fn label(&self) -> Option<&str> {
                None
            }
            fn snapshot(&mut self, _: &mut ()) -> Result<u64, ProbeError> {
                Err(ProbeError::NoTargets)
            }
            fn normalize(&self, _: u64, _: u64, _: Option<u64>) -> Result<Value, ProbeError> {
                Ok(Value::Single(0))
            }
        }

        let mut sampler = DeltaSampler::new(vec![Broken], (), Duration::ZERO);
        let err = sampler.sample_all(&mut Clock::with_offset(0)).unwrap_err();
        assert!(matches!(err, ProbeError::NoTargets));
    }

    struct FlakyHost(VecDeque<Option<u64>>);

    impl Baseline for FlakyHost {
        fn snapshot(&mut self) -> Result<u64, ProbeError> {
            self.0
                .pop_front()
                .flatten()
                .ok_or_else(|| ProbeError::TargetVanished {
                    path: "/proc/stat".into(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                })
        }
    }

    #[test]
    fn test_unreadable_baseline_skips_tick() {
        let sources = vec![Scripted::new("c", &[Some(1), Some(2), Some(3), Some(4), Some(9)])];
        let host = FlakyHost(VecDeque::from([None, Some(10), None, Some(20), Some(30)]));
        let mut sampler = DeltaSampler::with_baseline(sources, 0usize, host, Duration::ZERO);
        let mut clock = Clock::with_offset(0);

        // before side unreadable: no after pass at all
        assert!(sampler.sample_all(&mut clock).unwrap().is_empty());
        assert_eq!(sampler.ctx, 1);

        // after side unreadable
        assert!(sampler.sample_all(&mut clock).unwrap().is_empty());
        assert_eq!(sampler.ctx, 3);

        let readings = sampler.sample_all(&mut clock).unwrap();
        assert_eq!(values(&readings), [(Some("c"), Value::Pair(5, 10))]);
        assert_eq!(sampler.active(), 1);
    }

    #[test]
    fn test_fatal_baseline_error_propagates() {
        struct Broken;
        impl Baseline for Broken {
            fn snapshot(&mut self) -> Result<u64, ProbeError> {
                Err(ProbeError::NoTargets)
            }
        }

        let sources = vec![Scripted::new("c", &[Some(1), Some(2)])];
        let mut sampler = DeltaSampler::with_baseline(sources, 0usize, Broken, Duration::ZERO);
        let err = sampler.sample_all(&mut Clock::with_offset(0)).unwrap_err();
        assert!(matches!(err, ProbeError::NoTargets));
    }

    mod end_to_end {
        use std::fs;
        use std::path::Path;

        use super::*;
        use crate::cgroup::{CgroupResolver, EntityId};
        use crate::msr::rapl::{self, RaplDomain};
        use crate::msr::testing::{write_cpuinfo, write_register, write_topology};
        use crate::msr::Detector;
        use crate::probes::{CpuMode, CpuUsageSource, ProcStatBaseline, RaplSource};
        use crate::stats::UserHz;

        fn write(path: &Path, content: &str) {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        #[test]
        fn test_relative_cpu_against_proc_stat() {
            let root = tempfile::tempdir().unwrap();
            let cpu_stat = root.path().join("cgroup/system.slice/docker-abc.scope/cpu.stat");
            let proc_stat = root.path().join("proc/stat");
            write(&cpu_stat, "usage_usec 1000000\n");
            // 2000 ticks
            write(&proc_stat, "cpu  1000 0 500 400 100 0 0 0 0 0\n");

            let resolver = CgroupResolver::new(root.path().join("cgroup"));
            let source = CpuUsageSource::open(
                &resolver,
                0,
                &EntityId::new("abc").unwrap(),
                CpuMode::Relative,
            )
            .unwrap();
            let baseline =
                ProcStatBaseline::open(&root.path().join("proc"), UserHz::new(100).unwrap()).unwrap();
            let mut sampler = DeltaSampler::with_baseline(vec![source], (), baseline, Duration::ZERO);

            let window = sampler.begin_tick(&mut Clock::with_offset(0)).unwrap();
            write(&cpu_stat, "usage_usec 1500000\n");
            // 2500 ticks
            write(&proc_stat, "cpu  1300 0 600 500 100 0 0 0 0 0\n");
            let readings = sampler.finish_tick(window).unwrap();

            // 500000 us out of 500 ticks at 100 Hz
            assert_eq!(values(&readings), [(Some("abc"), Value::Single(1000))]);
        }

        #[test]
        fn test_wrapped_rapl_package_is_suppressed() {
            const POWER_UNIT: u32 = 0x606;
            const PKG_ENERGY: u32 = 0x611;

            let root = tempfile::tempdir().unwrap();
            let dev = root.path().join("dev");
            write_cpuinfo(&root.path().join("proc"), "GenuineIntel", 6, 85);
            write_topology(&root.path().join("sys"), &[0, 1]);
            for cpu in [0, 1] {
                write_register(&dev, cpu, POWER_UNIT, 14 << 8);
            }
            write_register(&dev, 0, PKG_ENERGY, 0xFFFF_FF00);
            write_register(&dev, 1, PKG_ENERGY, 100);

            let detector = Detector::new(root.path().join("proc"), root.path().join("sys"), dev.clone())
                .detect_vendor()
                .unwrap()
                .enumerate_packages()
                .unwrap();
            let sources = rapl::calibrate(detector, RaplDomain::Package)
                .unwrap()
                .into_packages()
                .into_iter()
                .map(RaplSource::from)
                .collect();
            let mut sampler = DeltaSampler::new(sources, (), Duration::ZERO);

            let window = sampler.begin_tick(&mut Clock::with_offset(0)).unwrap();
            write_register(&dev, 0, PKG_ENERGY, 0x10);
            write_register(&dev, 1, PKG_ENERGY, 100 + 32768);
            let readings = sampler.finish_tick(window).unwrap();

            assert_eq!(values(&readings), [(Some("Package_1"), Value::Single(2000))]);
            assert_eq!(sampler.active(), 2);
        }
    }
}
