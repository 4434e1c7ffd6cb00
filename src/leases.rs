//! `dhcpd.leases` parsing and lease table publication.
//!
//! The leases file is an append-only history: the same client shows up in
//! many `lease <ip> { ... }` blocks as it renews. Parsing folds the history
//! into one entry per hardware address, with later blocks replacing earlier
//! ones. The finished table is published into [`Settings`] in a single step,
//! and a failed read leaves the previously published table alone.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::directive::{normalize_line, statement_value, strip_keyword, unquoted_chars};
use crate::error::{Error, Result};
use crate::settings::Settings;

/// Timestamp layout dhcpd writes after the weekday digit.
const LEASE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Runtime leases keyed by hardware address.
pub type LeaseTable = HashMap<String, DhcpdLease>;

/// One address handed out by the server, as last recorded in the leases file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpdLease {
    pub ip_address: String,
    pub mac_address: String,
    pub device_name: Option<String>,
    /// `YYYY/MM/DD HH:MM:SS` as written after `starts <weekday>`.
    pub lease_start: Option<String>,
    /// `YYYY/MM/DD HH:MM:SS` as written after `ends <weekday>`.
    pub lease_end: Option<String>,
    pub lease_state: Option<String>,
}

impl DhcpdLease {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            mac_address: String::new(),
            device_name: None,
            lease_start: None,
            lease_end: None,
            lease_state: None,
        }
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        self.lease_start.as_deref().and_then(parse_lease_time)
    }

    /// Lease end in UTC; `None` for `ends never;` or an unreadable stamp.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.lease_end.as_deref().and_then(parse_lease_time)
    }

    pub fn is_expired(&self) -> bool {
        self.ends_at().is_some_and(|ends| Utc::now() > ends)
    }

    /// Returns seconds remaining until the lease ends, or 0 if it has ended.
    pub fn remaining_seconds(&self) -> Option<i64> {
        self.ends_at()
            .map(|ends| (ends - Utc::now()).num_seconds().max(0))
    }
}

fn parse_lease_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, LEASE_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// `starts 3 2024/05/01 10:00:00;` -> `2024/05/01 10:00:00`
fn lease_time(rest: &str) -> Option<String> {
    let tokens: Vec<&str> = statement_value(rest).split_whitespace().collect();
    if tokens.len() > 2 {
        Some(format!("{} {}", tokens[1], tokens[2]))
    } else {
        None
    }
}

/// One syntactic piece of a leases line.
#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    /// Block header, the text before an unquoted `{`.
    Open(&'a str),
    Statement(&'a str),
    Close,
}

/// Splits a line at unquoted `{`, `;` and `}`. Text after the last
/// delimiter counts as a statement.
fn pieces(line: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (at, c) in unquoted_chars(line).filter(|(_, c)| matches!(c, '{' | ';' | '}')) {
        let text = line[start..at].trim();
        start = at + 1;
        if c == '{' {
            pieces.push(Piece::Open(text));
            continue;
        }
        if !text.is_empty() {
            pieces.push(Piece::Statement(text));
        }
        if c == '}' {
            pieces.push(Piece::Close);
        }
    }
    let tail = line[start..].trim();
    if !tail.is_empty() {
        pieces.push(Piece::Statement(tail));
    }
    pieces
}

#[derive(Debug)]
enum Block {
    Outside,
    /// A `lease` block; `nested` counts unknown sub-blocks being skipped.
    Lease { lease: DhcpdLease, nested: usize },
    /// Any other `{ }` block (`host`, `failover peer`, ...), skipped by depth.
    Other(usize),
}

const LEASE_FIELDS: [&str; 5] = [
    "hardware ethernet",
    "client-hostname",
    "starts",
    "ends",
    "binding state",
];

fn is_lease_field(statement: &str) -> bool {
    LEASE_FIELDS
        .iter()
        .any(|field| strip_keyword(statement, field).is_some())
}

fn open_block(header: &str) -> Block {
    match strip_keyword(header, "lease") {
        Some(ip) => Block::Lease {
            lease: DhcpdLease::new(ip.trim()),
            nested: 0,
        },
        None => Block::Other(1),
    }
}

fn apply_field(lease: &mut DhcpdLease, statement: &str) {
    if let Some(rest) = strip_keyword(statement, "hardware ethernet") {
        lease.mac_address = statement_value(rest).to_string();
    } else if let Some(rest) = strip_keyword(statement, "client-hostname") {
        lease.device_name = Some(statement_value(rest).trim_matches('"').to_string());
    } else if let Some(rest) = strip_keyword(statement, "starts") {
        if let Some(start) = lease_time(rest) {
            lease.lease_start = Some(start);
        }
    } else if let Some(rest) = strip_keyword(statement, "ends") {
        if let Some(end) = lease_time(rest) {
            lease.lease_end = Some(end);
        }
    } else if let Some(rest) = strip_keyword(statement, "binding state")
        && let Some(state) = statement_value(rest).split_whitespace().next()
    {
        lease.lease_state = Some(state.to_string());
    }
}

fn commit(table: &mut LeaseTable, lease: DhcpdLease) {
    if lease.mac_address.is_empty() {
        debug!("Skipping lease {} without hardware address", lease.ip_address);
    } else {
        table.insert(lease.mac_address.clone(), lease);
    }
}

/// Folds `dhcpd.leases` text into one lease per hardware address.
///
/// A lease field outside any block is reported as
/// [`Error::MalformedDirective`]. Blocks without a hardware address are
/// dropped since they cannot be keyed. Braces and semicolons inside quoted
/// strings (`uid`, `client-hostname`, `set`) are plain text.
pub fn parse_leases(text: &str) -> Result<LeaseTable> {
    let mut table = LeaseTable::new();
    let mut block = Block::Outside;

    for (index, raw) in text.lines().enumerate() {
        let line = normalize_line(raw);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        for piece in pieces(&line) {
            block = match (block, piece) {
                (Block::Outside, Piece::Open(header)) => open_block(header),
                (Block::Outside, Piece::Statement(statement)) if is_lease_field(statement) => {
                    return Err(Error::MalformedDirective {
                        line_number: index + 1,
                        line: line.clone(),
                    });
                }
                (Block::Outside, _) => Block::Outside,

                (Block::Lease { lease, nested: 0 }, Piece::Open(header))
                    if strip_keyword(header, "lease").is_some() =>
                {
                    debug!("Discarding unterminated lease {}", lease.ip_address);
                    open_block(header)
                }
                (Block::Lease { lease, nested }, Piece::Open(_)) => Block::Lease {
                    lease,
                    nested: nested + 1,
                },
                (Block::Lease { mut lease, nested }, Piece::Statement(statement)) => {
                    if nested == 0 {
                        apply_field(&mut lease, statement);
                    }
                    Block::Lease { lease, nested }
                }
                (Block::Lease { lease, nested: 0 }, Piece::Close) => {
                    commit(&mut table, lease);
                    Block::Outside
                }
                (Block::Lease { lease, nested }, Piece::Close) => Block::Lease {
                    lease,
                    nested: nested - 1,
                },

                (Block::Other(depth), Piece::Open(_)) => Block::Other(depth + 1),
                (Block::Other(1), Piece::Close) => Block::Outside,
                (Block::Other(depth), Piece::Close) => Block::Other(depth - 1),
                (Block::Other(depth), Piece::Statement(_)) => Block::Other(depth),
            };
        }
    }

    if let Block::Lease { lease, .. } = block {
        debug!("Discarding unterminated lease {}", lease.ip_address);
    }

    Ok(table)
}

/// Reads and parses the leases file, then publishes the result.
///
/// Returns the number of published leases. On any error the table already
/// held by `settings` stays as it was.
pub async fn reload_leases(path: &Path, settings: &Settings) -> Result<usize> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::LeaseFileUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let table = parse_leases(&text)?;
    let count = table.len();
    settings.replace_dhcpd_leases(table).await;

    info!("Published {} lease(s) from {}", count, path.display());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const HISTORY: &str = r#"# The format of this file is documented in the dhcpd.leases(5) manual page.
# This lease file was written by isc-dhcp-4.4.3

authoring-byte-order little-endian;
server-duid "\000\001\000\001";

lease 192.168.1.100 {
  starts 3 2024/05/01 10:00:00;
  ends 3 2024/05/01 10:10:00;
  cltt 3 2024/05/01 10:00:00;
  binding state active;
  next binding state free;
  rewind binding state free;
  hardware ethernet aa:bb:cc:dd:ee:01;
  client-hostname "phone";
}
lease 192.168.1.101 {
  starts 3 2024/05/01 10:01:00;
  ends 3 2024/05/01 10:11:00;
  binding state active;
  hardware ethernet aa:bb:cc:dd:ee:02;
}
host laptop {
  dynamic;
  hardware ethernet aa:bb:cc:dd:ee:09;
  fixed-address 192.168.1.50;
}
lease 192.168.1.102 {
  starts 3 2024/05/01 10:05:00;
  ends 3 2024/05/01 10:15:00;
  binding state free;
  hardware ethernet aa:bb:cc:dd:ee:01;
  client-hostname "phone-renamed";
}
"#;

    #[test]
    fn test_last_block_wins_per_hardware_address() {
        let table = parse_leases(HISTORY).unwrap();
        assert_eq!(table.len(), 2);

        let phone = &table["aa:bb:cc:dd:ee:01"];
        assert_eq!(phone.ip_address, "192.168.1.102");
        assert_eq!(phone.device_name.as_deref(), Some("phone-renamed"));
        assert_eq!(phone.lease_start.as_deref(), Some("2024/05/01 10:05:00"));
        assert_eq!(phone.lease_end.as_deref(), Some("2024/05/01 10:15:00"));
        assert_eq!(phone.lease_state.as_deref(), Some("free"));
    }

    #[test]
    fn test_next_binding_state_ignored() {
        let table = parse_leases(HISTORY).unwrap();
        let other = &table["aa:bb:cc:dd:ee:02"];
        assert_eq!(other.lease_state.as_deref(), Some("active"));
        assert_eq!(other.device_name, None);
    }

    #[test]
    fn test_host_blocks_are_not_leases() {
        let table = parse_leases(HISTORY).unwrap();
        assert!(!table.contains_key("aa:bb:cc:dd:ee:09"));
    }

    #[test]
    fn test_lease_without_hardware_address_skipped() {
        let text = "lease 10.0.0.5 {\n  binding state free;\n}\n";
        assert!(parse_leases(text).unwrap().is_empty());
    }

    #[test]
    fn test_ends_never() {
        let text = "lease 10.0.0.5 {\n  starts 1 2024/01/01 00:00:00;\n  ends never;\n  hardware ethernet 00:11:22:33:44:55;\n}\n";
        let table = parse_leases(text).unwrap();
        let lease = &table["00:11:22:33:44:55"];
        assert_eq!(lease.lease_end, None);
        assert!(!lease.is_expired());
        assert_eq!(lease.remaining_seconds(), None);
    }

    #[test]
    fn test_field_outside_block_is_malformed() {
        let text = "lease 10.0.0.5 {\n  hardware ethernet 00:11:22:33:44:55;\n}\nbinding state active;\n";
        assert!(matches!(
            parse_leases(text),
            Err(Error::MalformedDirective { line_number: 4, .. })
        ));
    }

    #[test]
    fn test_quoted_brace_stays_in_lease() {
        let text = "lease 10.0.0.5 {\n  starts 1 2024/01/01 00:00:00;\n  binding state active;\n  hardware ethernet 00:11:22:33:44:55;\n  uid \"\\001\\000}\\243\";\n  client-hostname \"cam\";\n}\n";
        let table = parse_leases(text).unwrap();
        let lease = &table["00:11:22:33:44:55"];
        assert_eq!(lease.ip_address, "10.0.0.5");
        assert_eq!(lease.device_name.as_deref(), Some("cam"));
    }

    #[test]
    fn test_quoted_semicolon_in_hostname() {
        let text = "lease 10.0.0.5 {\n  hardware ethernet 00:11:22:33:44:55;\n  client-hostname \"a;b{c}\";\n}\n";
        let table = parse_leases(text).unwrap();
        assert_eq!(
            table["00:11:22:33:44:55"].device_name.as_deref(),
            Some("a;b{c}")
        );
    }

    #[test]
    fn test_unterminated_lease_replaced_by_next() {
        let text = "lease 10.0.0.5 {\n  hardware ethernet 00:00:00:00:00:01;\nlease 10.0.0.6 {\n  hardware ethernet 00:00:00:00:00:02;\n}\n";
        let table = parse_leases(text).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table["00:00:00:00:00:02"].ip_address, "10.0.0.6");
        assert!(!table.contains_key("00:00:00:00:00:01"));
    }

    #[test]
    fn test_unterminated_lease_at_end_dropped() {
        let text = "lease 10.0.0.5 {\n  hardware ethernet 00:00:00:00:00:01;\n";
        assert!(parse_leases(text).unwrap().is_empty());
    }

    #[test]
    fn test_single_line_lease() {
        let text = "lease 10.0.0.7 { hardware ethernet 00:00:00:00:00:07; binding state active; }\nlease 10.0.0.8 { hardware ethernet 00:00:00:00:00:08; }";
        let table = parse_leases(text).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["00:00:00:00:00:07"].ip_address, "10.0.0.7");
        assert_eq!(table["00:00:00:00:00:07"].lease_state.as_deref(), Some("active"));
        assert_eq!(table["00:00:00:00:00:08"].ip_address, "10.0.0.8");
    }

    #[test]
    fn test_nested_block_inside_lease_skipped() {
        let text = "lease 10.0.0.5 {\n  on expiry {\n    binding state free;\n  }\n  hardware ethernet 00:11:22:33:44:55;\n  binding state active;\n}\n";
        let table = parse_leases(text).unwrap();
        let lease = &table["00:11:22:33:44:55"];
        assert_eq!(lease.lease_state.as_deref(), Some("active"));
    }

    #[test]
    fn test_pieces() {
        assert_eq!(
            pieces("lease 10.0.0.5 { uid \"}{;\"; }"),
            vec![
                Piece::Open("lease 10.0.0.5"),
                Piece::Statement("uid \"}{;\""),
                Piece::Close,
            ]
        );
        assert_eq!(pieces("ends never"), vec![Piece::Statement("ends never")]);
    }

    #[test]
    fn test_lease_times() {
        let mut lease = DhcpdLease::new("10.0.0.5");
        let ends = Utc::now() + TimeDelta::seconds(3600);
        lease.lease_end = Some(ends.format(LEASE_TIME_FORMAT).to_string());
        assert!(!lease.is_expired());
        assert!(lease.remaining_seconds().unwrap() > 3500);

        lease.lease_end = Some("2001/01/01 00:00:00".to_string());
        assert!(lease.is_expired());
        assert_eq!(lease.remaining_seconds(), Some(0));

        lease.lease_start = Some("garbage".to_string());
        assert_eq!(lease.starts_at(), None);
    }

    #[tokio::test]
    async fn test_reload_publishes_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd.leases");
        std::fs::write(&path, HISTORY).unwrap();

        let settings = Settings::default();
        let count = reload_leases(&path, &settings).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(settings.snapshot().await.dhcpd_leases.len(), 2);
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd.leases");
        std::fs::write(&path, HISTORY).unwrap();

        let settings = Settings::default();
        reload_leases(&path, &settings).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        let result = reload_leases(&path, &settings).await;
        assert!(matches!(result, Err(Error::LeaseFileUnreadable { .. })));
        assert_eq!(settings.snapshot().await.dhcpd_leases.len(), 2);

        std::fs::write(&path, "binding state active;\n").unwrap();
        assert!(reload_leases(&path, &settings).await.is_err());
        assert_eq!(settings.snapshot().await.dhcpd_leases.len(), 2);
    }
}
