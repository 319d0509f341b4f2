//! Parsing of the cgroup v2 `io.stat` file.
//!
//! Each line reports one block device as `MAJ:MIN` followed by `key=value`
//! pairs. Read and written bytes are summed over whole physical disks only:
//! lines for virtual device classes are dropped by major number, and lines
//! whose minor number is not a multiple of 16 are partitions of a disk that
//! is already counted.
//!
//! # Example
//!
//! ```rust
//! use metering_probes::stats::{IoStat, KeyValueStat};
//!
//! let data = "\
//! 8:0 rbytes=1024 wbytes=2048 rios=12 wios=24 dbytes=0 dios=0
//! 8:1 rbytes=512 wbytes=512 rios=1 wios=1 dbytes=0 dios=0
//! 7:0 rbytes=4096 wbytes=0 rios=4 wios=0 dbytes=0 dios=0
//! ";
//! let stat = IoStat::from_reader(&mut data.as_bytes()).unwrap();
//! assert_eq!(stat.rbytes, 1024);
//! assert_eq!(stat.wbytes, 2048);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use super::{KeyValueStat, StatParseError};

/// Major numbers that never back a physical disk: ram disks, loop devices,
/// optical drives, sound devices, network block devices and device-mapper.
const EXCLUDED_MAJORS: [u32; 6] = [1, 7, 11, 14, 43, 253];

/// Aggregated byte counters over all accepted devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStat {
    /// Bytes read.
    pub rbytes: u64,
    /// Bytes written.
    pub wbytes: u64,
}

impl IoStat {
    fn add_rbytes(&mut self, rbytes: u64) {
        self.rbytes = self.rbytes.saturating_add(rbytes);
    }

    fn add_wbytes(&mut self, wbytes: u64) {
        self.wbytes = self.wbytes.saturating_add(wbytes);
    }
}

/// Returns `true` if the device is a whole physical disk.
pub(super) fn is_counted_device(major: u32, minor: u32) -> bool {
    !EXCLUDED_MAJORS.contains(&major) && minor % 16 == 0
}

fn parse_device(token: &str, lineno: usize) -> Result<(u32, u32), StatParseError> {
    let (major, minor) = token.split_once(':').ok_or(StatParseError::Malformed {
        line: lineno,
        reason: "device is not in MAJ:MIN form",
    })?;
    let parse = |s: &str| {
        s.parse::<u32>()
            .map_err(|source| StatParseError::InvalidValue {
                value: token.to_string(),
                line: lineno,
                source,
            })
    };
    Ok((parse(major)?, parse(minor)?))
}

type Accumulator = fn(&mut IoStat, u64);

static ACCUMULATORS: LazyLock<HashMap<&'static str, Accumulator>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Accumulator> = HashMap::with_capacity(2);

    m.insert("rbytes", IoStat::add_rbytes);
    m.insert("wbytes", IoStat::add_wbytes);

    m
});

impl KeyValueStat for IoStat {
    const SPLIT_CHAR: Option<char> = Some('=');
    const SKIP_LINES: usize = 0;
    const SKIP_VALUES: usize = 1;
    const ALLOW_DUPLICATE_KEYS: bool = true;
    const ALLOW_MULTIPLE_KV_PER_LINE: bool = true;

    #[inline]
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &ACCUMULATORS
    }

    fn accept_line(line: &str, lineno: usize) -> Result<bool, StatParseError> {
        let Some(device) = line.split_whitespace().next() else {
            return Ok(false);
        };
        let (major, minor) = parse_device(device, lineno)?;
        Ok(is_counted_device(major, minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_io_stat() {
        let stat = IoStat::from_reader(&mut "".as_bytes()).unwrap();
        assert_eq!(stat, IoStat::default());
    }

    #[test]
    fn test_sums_whole_disks() {
        let data = "\
8:0 rbytes=1000 wbytes=2000 rios=1 wios=2 dbytes=0 dios=0
8:16 rbytes=10 wbytes=20 rios=1 wios=2 dbytes=0 dios=0
259:0 rbytes=5 wbytes=6 rios=1 wios=1 dbytes=0 dios=0
";
        let stat = IoStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.rbytes, 1015);
        assert_eq!(stat.wbytes, 2026);
    }

    #[test]
    fn test_only_excluded_majors_yield_zero() {
        let data = "\
7:0 rbytes=4096 wbytes=4096 rios=1 wios=1 dbytes=0 dios=0
7:16 rbytes=4096 wbytes=4096 rios=1 wios=1 dbytes=0 dios=0
253:0 rbytes=99 wbytes=99 rios=1 wios=1 dbytes=0 dios=0
11:0 rbytes=7 wbytes=0 rios=1 wios=0 dbytes=0 dios=0
";
        let stat = IoStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat, IoStat::default());
    }

    #[test]
    fn test_partitions_are_skipped() {
        let data = "\
8:0 rbytes=100 wbytes=200
8:1 rbytes=60 wbytes=120
8:2 rbytes=40 wbytes=80
";
        let stat = IoStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat, IoStat { rbytes: 100, wbytes: 200 });
    }

    #[test]
    fn test_malformed_device_token() {
        let err = IoStat::from_reader(&mut "sda rbytes=1 wbytes=1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, StatParseError::Malformed { line: 1, .. }));

        let err = IoStat::from_reader(&mut "8:x rbytes=1 wbytes=1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, StatParseError::InvalidValue { line: 1, .. }));
    }

    #[test]
    fn test_invalid_byte_value() {
        let err = IoStat::from_reader(&mut "8:0 rbytes=abc wbytes=1\n".as_bytes()).unwrap_err();
        match err {
            StatParseError::InvalidKeyValue { key, value, .. } => {
                assert_eq!(key, "rbytes");
                assert_eq!(value, "abc");
            }
            other => panic!("expected InvalidKeyValue, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let stat = IoStat::from_reader(&mut "\n8:0 rbytes=1 wbytes=2\n\n".as_bytes()).unwrap();
        assert_eq!(stat, IoStat { rbytes: 1, wbytes: 2 });
    }
}
