//! Parsing of `/proc/diskstats`.
//!
//! One line per block device: major, minor, name, then the I/O counters.
//! Sector counts are in 512-byte units regardless of the device's sector
//! size. The same whole-disk filter as for `io.stat` applies.

use std::io::BufRead;

use super::StatParseError;
use super::io::is_counted_device;

const SECTOR_BYTES: u64 = 512;

/// Column positions, counting the major number as 0.
const SECTORS_READ_FIELD: usize = 5;
const SECTORS_WRITTEN_FIELD: usize = 9;

/// Cumulative bytes moved by one disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskBytes {
    pub read: u64,
    pub written: u64,
}

/// Every whole physical disk listed in one snapshot, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskStats {
    disks: Vec<(String, DiskBytes)>,
}

impl DiskStats {
    /// Parses a `/proc/diskstats` formatted buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::Malformed`] for a line with too few columns
    /// and [`StatParseError::InvalidValue`] if a number does not parse.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut stats = DiskStats::default();
        let mut line = String::new();
        let mut lineno = 0;

        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                line.clear();
                continue;
            }
            if fields.len() <= SECTORS_WRITTEN_FIELD {
                return Err(StatParseError::Malformed {
                    line: lineno,
                    reason: "device line has too few columns",
                });
            }

            let major = parse_field::<u32>(fields[0], lineno)?;
            let minor = parse_field::<u32>(fields[1], lineno)?;
            if is_counted_device(major, minor) {
                let sectors_read = parse_field::<u64>(fields[SECTORS_READ_FIELD], lineno)?;
                let sectors_written = parse_field::<u64>(fields[SECTORS_WRITTEN_FIELD], lineno)?;
                stats.disks.push((
                    fields[2].to_owned(),
                    DiskBytes {
                        read: sectors_read.saturating_mul(SECTOR_BYTES),
                        written: sectors_written.saturating_mul(SECTOR_BYTES),
                    },
                ));
            }
            line.clear();
        }

        Ok(stats)
    }

    pub fn get(&self, device: &str) -> Option<DiskBytes> {
        self.disks
            .iter()
            .find(|(name, _)| name == device)
            .map(|(_, bytes)| *bytes)
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.disks.iter().map(|(name, _)| name.as_str())
    }
}

fn parse_field<T>(value: &str, lineno: usize) -> Result<T, StatParseError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    value
        .parse::<T>()
        .map_err(|source| StatParseError::InvalidValue {
            value: value.to_string(),
            line: lineno,
            source,
        })
}
