// # Lease Database Parser
//
// Parses the ISC dhcpd lease journal:
//
// ```text
// lease 192.168.1.10 {
//   starts 4 2024/11/21 10:00:00;
//   ends 4 2024/11/21 16:00:00;
//   cltt 4 2024/11/21 10:00:00;
//   binding state active;
//   next binding state free;
//   hardware ethernet 00:1a:2b:3c:4d:5e;
//   client-hostname "sonic0";
// }
// ```
//
// Times are UTC, written as `<weekday> <Y/m/d> <H:M:S>`, `epoch <secs>` or
// `never`. The file is a journal: a later block for the same address
// supersedes an earlier one.
//
// Blocks that are malformed (bad address, unterminated) or lack an address
// or hostname are dropped and counted, never fatal. Only a file that is
// not text at all fails the parse.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{BindingState, LeaseRecord};
use crate::error::{Error, Result};

/// Output of [`parse_leases`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    /// Well-formed leases, one per address, in order of first appearance
    pub records: Vec<LeaseRecord>,
    /// Number of blocks that were dropped
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct PendingLease {
    address: Option<IpAddr>,
    hostname: Option<String>,
    hardware_address: Option<String>,
    starts: Option<DateTime<Utc>>,
    ends: Option<DateTime<Utc>>,
    cltt: Option<DateTime<Utc>>,
    binding_state: Option<BindingState>,
}

impl PendingLease {
    fn apply(&mut self, statement: &str) {
        let mut tokens = statement.split_whitespace();
        let Some(keyword) = tokens.next() else {
            return;
        };

        match keyword {
            "starts" => self.starts = parse_time(tokens),
            "ends" => self.ends = parse_time(tokens),
            "cltt" => self.cltt = parse_time(tokens),
            "binding" => {
                if tokens.next() == Some("state")
                    && let Some(state) = tokens.next()
                {
                    self.binding_state = state.parse().ok();
                }
            }
            "hardware" => {
                // hardware <type> <address>
                self.hardware_address = tokens.nth(1).map(str::to_ascii_lowercase);
            }
            "client-hostname" => {
                let rest = statement["client-hostname".len()..].trim();
                let name = rest.trim_matches('"').trim();
                if !name.is_empty() {
                    self.hostname = Some(name.to_string());
                }
            }
            _ => {}
        }
    }

    fn finish(self, device_ip: &str) -> Option<LeaseRecord> {
        Some(LeaseRecord {
            device_ip: device_ip.to_string(),
            ip_address: self.address?,
            hostname: self.hostname?,
            hardware_address: self.hardware_address,
            starts: self.starts,
            ends: self.ends,
            cltt: self.cltt,
            binding_state: self.binding_state.unwrap_or(BindingState::Unknown),
        })
    }
}

/// Parse a lease database fetched from `device_ip`
///
/// # Errors
///
/// [`Error::Parse`] if `content` is not valid UTF-8.
pub fn parse_leases(device_ip: &str, content: &[u8]) -> Result<ParseReport> {
    let text = std::str::from_utf8(content)
        .map_err(|e| Error::parse(format!("lease file from {} is not text: {}", device_ip, e)))?;

    let mut report = ParseReport::default();
    let mut by_address: HashMap<IpAddr, usize> = HashMap::new();
    let mut current: Option<PendingLease> = None;
    let mut skip_depth = 0usize;

    let mut keep = |lease: PendingLease, report: &mut ParseReport| match lease.finish(device_ip) {
        Some(record) => match by_address.get(&record.ip_address) {
            Some(&index) => report.records[index] = record,
            None => {
                by_address.insert(record.ip_address, report.records.len());
                report.records.push(record);
            }
        },
        None => report.dropped += 1,
    };

    for raw in text.lines() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("lease")
            && rest.starts_with(char::is_whitespace)
            && skip_depth == 0
        {
            if current.take().is_some() {
                // previous block never closed
                report.dropped += 1;
            }
            let address = rest
                .trim()
                .trim_end_matches('{')
                .trim()
                .parse::<IpAddr>()
                .ok();
            current = Some(PendingLease {
                address,
                ..PendingLease::default()
            });
            continue;
        }

        if line.starts_with('}') {
            if let Some(lease) = current.take() {
                keep(lease, &mut report);
            } else {
                skip_depth = skip_depth.saturating_sub(1);
            }
            continue;
        }

        match current.as_mut() {
            Some(lease) => lease.apply(line.trim_end_matches(';').trim()),
            // host/failover/class blocks and top-level statements
            None if line.ends_with('{') => skip_depth += 1,
            None => {}
        }
    }

    if current.is_some() {
        report.dropped += 1;
    }

    Ok(report)
}

fn parse_time<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Option<DateTime<Utc>> {
    match tokens.next()? {
        "never" => None,
        "epoch" => tokens
            .next()?
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _weekday => {
            let date = tokens.next()?;
            let time = tokens.next()?;
            NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y/%m/%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        }
    }
}

/// Drop a `#` comment that is not inside a quoted string
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_blocks(n: usize) -> String {
        let mut content = String::new();
        for i in 0..n {
            content.push_str(&format!(
                "\nlease 192.168.1.{i} {{\n  starts 4 2024/11/21 10:00:00;\n  ends 4 2024/11/21 16:00:00;\n  cltt 4 2024/11/21 10:00:00;\n  binding state active;\n  hardware ethernet 00:1a:2b:3c:4d:5e;\n  client-hostname sonic{i};\n}}\n"
            ));
        }
        content
    }

    #[test]
    fn test_parses_well_formed_blocks() {
        let report = parse_leases("10.10.229.124", sample_blocks(10).as_bytes()).unwrap();
        assert_eq!(report.records.len(), 10);
        assert_eq!(report.dropped, 0);
        assert!(report.records.iter().all(|r| r.hostname.starts_with("sonic")));

        let first = &report.records[0];
        assert_eq!(first.device_ip, "10.10.229.124");
        assert_eq!(first.ip_address, "192.168.1.0".parse::<IpAddr>().unwrap());
        assert_eq!(first.hostname, "sonic0");
        assert_eq!(first.hardware_address.as_deref(), Some("00:1a:2b:3c:4d:5e"));
        assert_eq!(first.binding_state, BindingState::Active);
        assert_eq!(
            first.starts,
            Some(Utc.with_ymd_and_hms(2024, 11, 21, 10, 0, 0).unwrap())
        );
        assert_eq!(
            first.ends,
            Some(Utc.with_ymd_and_hms(2024, 11, 21, 16, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_real_journal_syntax() {
        let content = br#"# The format of this file is documented in the dhcpd.leases(5) manual page.
# This lease file was written by isc-dhcp-4.4.1

# authoring-byte-order entry is generated, DO NOT DELETE
authoring-byte-order little-endian;

server-duid "\000\001\000\001";

failover peer "dhcp-failover" state {
  my state normal at 1 2024/11/18 09:00:00;
}

lease 10.0.0.20 {
  starts 1 2024/11/18 09:12:44;
  ends never;
  tstp 1 2024/11/18 21:12:44;
  cltt epoch 1731920000; # Mon Nov 18 09:33:20 2024
  binding state active;
  next binding state free;
  rewind binding state free;
  hardware ethernet 52:54:00:AB:CD:EF;
  uid "\001RT\000\253\315\357";
  set vendor-class-identifier = "PXEClient";
  client-hostname "leaf#1";
}
"#;
        let report = parse_leases("d", content).unwrap();
        assert_eq!(report.dropped, 0);
        assert_eq!(report.records.len(), 1);

        let lease = &report.records[0];
        assert_eq!(lease.hostname, "leaf#1");
        assert_eq!(lease.ends, None);
        assert_eq!(lease.cltt, DateTime::from_timestamp(1_731_920_000, 0));
        assert_eq!(lease.binding_state, BindingState::Active);
        assert_eq!(lease.hardware_address.as_deref(), Some("52:54:00:ab:cd:ef"));
    }

    #[test]
    fn test_drops_incomplete_and_malformed_blocks() {
        let content = b"
lease 10.0.0.1 {
  binding state active;
  client-hostname \"ok\";
}
lease 10.0.0.2 {
  binding state active;
}
lease not-an-ip {
  client-hostname \"bad-address\";
}
lease 10.0.0.3 {
  client-hostname \"unterminated\";
lease 10.0.0.4 {
  client-hostname \"ok-too\";
}
lease 10.0.0.5 {
  client-hostname \"eof\";
";
        let report = parse_leases("d", content).unwrap();
        let hosts: Vec<&str> = report.records.iter().map(|r| r.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["ok", "ok-too"]);
        assert_eq!(report.dropped, 4);
    }

    #[test]
    fn test_later_block_for_same_address_wins() {
        let content = b"
lease 10.0.0.1 {
  binding state active;
  client-hostname \"first\";
}
lease 10.0.0.2 {
  client-hostname \"other\";
}
lease 10.0.0.1 {
  binding state free;
  client-hostname \"second\";
}
";
        let report = parse_leases("d", content).unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].hostname, "second");
        assert_eq!(report.records[0].binding_state, BindingState::Free);
        assert_eq!(report.records[1].hostname, "other");
    }

    #[test]
    fn test_non_utf8_is_parse_error() {
        let err = parse_leases("d", &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_empty_file_is_empty_report() {
        assert_eq!(parse_leases("d", b"").unwrap(), ParseReport::default());
    }
}
