use std::io::BufRead;

use super::StatParseError;

/// Byte counters from `/proc/net/dev`, summed over every interface except
/// loopback.
///
/// The file is namespace-relative: read from inside a container's network
/// namespace it lists that container's interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetDevStat {
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
}

const HEADER_LINES: usize = 2;
const LOOPBACK: &str = "lo";

/// Position of the transmitted bytes column after the interface name.
const TX_BYTES_FIELD: usize = 8;

fn parse_counter(value: &str, lineno: usize) -> Result<u64, StatParseError> {
    value
        .parse::<u64>()
        .map_err(|source| StatParseError::InvalidValue {
            value: value.to_string(),
            line: lineno,
            source,
        })
}

impl NetDevStat {
    /// Parses a `/proc/net/dev` formatted buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::Malformed`] for an interface line without a
    /// `:` separator or with too few columns, and
    /// [`StatParseError::InvalidValue`] if a byte counter is not a number.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut stat = NetDevStat::default();
        let mut line = String::new();
        let mut lineno = 0;

        for _ in 0..HEADER_LINES {
            buf.read_line(&mut line)?;
            lineno += 1;
            line.clear();
        }

        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            if line.trim().is_empty() {
                line.clear();
                continue;
            }

            let (iface, data) = line.trim().split_once(':').ok_or(StatParseError::Malformed {
                line: lineno,
                reason: "interface line without ':'",
            })?;
            if iface.trim() != LOOPBACK {
                let mut fields = data.split_whitespace();
                let rx = fields.next();
                let tx = fields.nth(TX_BYTES_FIELD - 1);
                let (Some(rx), Some(tx)) = (rx, tx) else {
                    return Err(StatParseError::Malformed {
                        line: lineno,
                        reason: "interface line has too few columns",
                    });
                };
                stat.rx_bytes = stat.rx_bytes.saturating_add(parse_counter(rx, lineno)?);
                stat.tx_bytes = stat.tx_bytes.saturating_add(parse_counter(tx, lineno)?);
            }
            line.clear();
        }

        Ok(stat)
    }

    /// Combined received and transmitted bytes.
    pub fn total(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
";

    #[test]
    fn test_only_headers() {
        let stat = NetDevStat::from_reader(&mut HEADER.as_bytes()).unwrap();
        assert_eq!(stat, NetDevStat::default());
    }

    #[test]
    fn test_loopback_is_excluded() {
        let data = format!(
            "{HEADER}    lo: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0
  eth0: 5000 10 0 0 0 0 0 0 3000 8 0 0 0 0 0 0
"
        );
        let stat = NetDevStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.rx_bytes, 5000);
        assert_eq!(stat.tx_bytes, 3000);
        assert_eq!(stat.total(), 8000);
    }

    #[test]
    fn test_multiple_interfaces_are_summed() {
        let data = format!(
            "{HEADER}  eth0: 10 1 0 0 0 0 0 0 20 2 0 0 0 0 0 0
 veth1: 30 3 0 0 0 0 0 0 40 4 0 0 0 0 0 0
"
        );
        let stat = NetDevStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat, NetDevStat { rx_bytes: 40, tx_bytes: 60 });
    }

    #[test]
    fn test_interface_prefixed_by_lo_is_counted() {
        let data = format!("{HEADER} lo2: 7 1 0 0 0 0 0 0 9 1 0 0 0 0 0 0\n");
        let stat = NetDevStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat, NetDevStat { rx_bytes: 7, tx_bytes: 9 });
    }

    #[test]
    fn test_too_few_columns() {
        let data = format!("{HEADER} badif: 123 456\n");
        let err = NetDevStat::from_reader(&mut data.as_bytes()).unwrap_err();
        assert!(matches!(err, StatParseError::Malformed { line: 3, .. }));
    }

    #[test]
    fn test_missing_separator() {
        let data = format!("{HEADER}eth0 1 2 3\n");
        let err = NetDevStat::from_reader(&mut data.as_bytes()).unwrap_err();
        assert!(matches!(err, StatParseError::Malformed { line: 3, .. }));
    }

    #[test]
    fn test_unparsable_values() {
        let data = format!("{HEADER}  eth0: xyz 0 0 0 0 0 0 0 20480 200 0 0 0 0 0 0\n");
        let err = NetDevStat::from_reader(&mut data.as_bytes()).unwrap_err();
        match err {
            StatParseError::InvalidValue { value, line, .. } => {
                assert_eq!(value, "xyz");
                assert_eq!(line, 3);
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }
}
