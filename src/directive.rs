//! `dhcpd.conf` directive parsing and rendering.
//!
//! Only the handful of directives the settings model cares about are
//! understood. Parsing is line-oriented and lenient: a recognized line whose
//! value does not parse is skipped and the previous value is kept. The one
//! structural error is a host field (`hardware ethernet`, `fixed-address`)
//! appearing outside a `host { }` block.

use std::net::Ipv4Addr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::settings::{SettingsModel, StaticLease};

pub const CONFIG_HEADER: &str = "#dhcpd.conf created by dhcpdctl";

const INDENT: &str = "   ";

/// Collapses whitespace runs to one space and trims the ends.
pub(crate) fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the text after `keyword` if the line starts with it as a whole word.
pub(crate) fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    match rest.chars().next() {
        None | Some(' ') | Some(';') | Some('{') => Some(rest),
        Some(_) => None,
    }
}

/// Characters of `line` that sit outside double-quoted strings, with their
/// byte offsets. Backslash escapes inside quotes are honored.
pub(crate) fn unquoted_chars(line: &str) -> impl Iterator<Item = (usize, char)> + '_ {
    let mut quoted = false;
    let mut escaped = false;
    line.char_indices().filter(move |&(_, c)| {
        if escaped {
            escaped = false;
            return false;
        }
        match c {
            '\\' if quoted => {
                escaped = true;
                false
            }
            '"' => {
                quoted = !quoted;
                false
            }
            _ => !quoted,
        }
    })
}

/// Whether the line carries a `}` that is not part of a quoted string.
pub(crate) fn closes_block(line: &str) -> bool {
    unquoted_chars(line).any(|(_, c)| c == '}')
}

/// The statement value: everything up to the first unquoted `;`, trimmed.
pub(crate) fn statement_value(rest: &str) -> &str {
    let end = unquoted_chars(rest)
        .find(|&(_, c)| c == ';')
        .map_or(rest.len(), |(at, _)| at);
    rest[..end].trim()
}

fn parse_ip(token: &str) -> Option<Ipv4Addr> {
    token.trim_end_matches([';', ',']).parse().ok()
}

fn parse_seconds(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|seconds| *seconds > 0)
}

/// Host block being assembled while its fields are read.
#[derive(Debug)]
enum HostBlock {
    Closed,
    Open {
        device_name: String,
        mac_address: String,
        ip_address: String,
    },
}

/// Parses `dhcpd.conf` text into `model`.
///
/// The static lease list is cleared first and rebuilt in file order. Other
/// fields are only overwritten by values that parse. On error `model` may be
/// partially updated, so callers parse into a draft (see
/// [`Settings::try_update`](crate::Settings::try_update)).
pub fn parse_config(text: &str, model: &mut SettingsModel) -> Result<()> {
    model.static_leases.clear();
    let mut host = HostBlock::Closed;

    for (index, raw) in text.lines().enumerate() {
        let line = normalize_line(raw);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = || Error::MalformedDirective {
            line_number: index + 1,
            line: line.clone(),
        };

        if let Some(rest) = strip_keyword(&line, "default-lease-time") {
            if let Some(seconds) = parse_seconds(statement_value(rest)) {
                model.default_lease_time = seconds;
            }
        } else if let Some(rest) = strip_keyword(&line, "max-lease-time") {
            if let Some(seconds) = parse_seconds(statement_value(rest)) {
                model.max_lease_time = seconds;
            }
        } else if let Some(rest) = strip_keyword(&line, "subnet") {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if let Some(subnet) = tokens.first().and_then(|token| parse_ip(token)) {
                model.subnet = Some(subnet);
            }
            if tokens.len() > 2
                && tokens[1].contains("netmask")
                && let Some(mask) = parse_ip(tokens[2])
            {
                model.subnet_mask = Some(mask);
            }
        } else if let Some(rest) = strip_keyword(&line, "range") {
            let tokens: Vec<&str> = statement_value(rest).split_whitespace().collect();
            if let Some(start) = tokens.first().and_then(|token| parse_ip(token)) {
                model.ip_range_start = Some(start);
            }
            if let Some(end) = tokens.get(1).and_then(|token| parse_ip(token)) {
                model.ip_range_end = Some(end);
            }
        } else if let Some(rest) = strip_keyword(&line, "option") {
            parse_option(statement_value(rest), model);
        } else if let Some(rest) = strip_keyword(&line, "host") {
            if let HostBlock::Open { device_name, .. } = &host {
                debug!("Discarding unterminated host block {}", device_name);
            }
            let device_name = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_end_matches('{')
                .to_string();
            host = HostBlock::Open {
                device_name,
                mac_address: String::new(),
                ip_address: String::new(),
            };
        } else if let Some(rest) = strip_keyword(&line, "hardware ethernet") {
            match &mut host {
                HostBlock::Open { mac_address, .. } => {
                    *mac_address = statement_value(rest).to_string();
                }
                HostBlock::Closed => return Err(malformed()),
            }
        } else if let Some(rest) = strip_keyword(&line, "fixed-address") {
            match &mut host {
                HostBlock::Open { ip_address, .. } => {
                    *ip_address = statement_value(rest).to_string();
                }
                HostBlock::Closed => return Err(malformed()),
            }
        }

        if closes_block(&line)
            && let HostBlock::Open {
                device_name,
                mac_address,
                ip_address,
            } = std::mem::replace(&mut host, HostBlock::Closed)
        {
            model.static_leases.push(StaticLease {
                id: (model.static_leases.len() + 1).to_string(),
                device_name,
                mac_address,
                ip_address,
            });
        }
    }

    debug!(
        "Parsed configuration with {} static lease(s)",
        model.static_leases.len()
    );
    Ok(())
}

fn parse_option(value: &str, model: &mut SettingsModel) {
    let Some((name, arguments)) = value.split_once(' ') else {
        return;
    };
    let mut addresses = arguments
        .split([',', ' '])
        .filter(|token| !token.is_empty())
        .map(parse_ip);

    match name {
        "routers" => {
            if let Some(Some(gateway)) = addresses.next() {
                model.gateway = Some(gateway);
            }
        }
        "domain-name-servers" => {
            if let Some(Some(primary)) = addresses.next() {
                model.primary_dns = Some(primary);
            }
            if let Some(Some(secondary)) = addresses.next() {
                model.secondary_dns = Some(secondary);
            }
        }
        "subnet-mask" => {
            if let Some(Some(mask)) = addresses.next() {
                model.host_subnet_mask = Some(mask);
            }
        }
        _ => {}
    }
}

/// Renders the model as `dhcpd.conf` text that [`parse_config`] reads back.
pub fn render_config(model: &SettingsModel) -> String {
    let mut lines = vec![
        CONFIG_HEADER.to_string(),
        "one-lease-per-client true;".to_string(),
        "update-static-leases true;".to_string(),
        format!("default-lease-time {};", model.default_lease_time),
        format!("max-lease-time {};", model.max_lease_time),
    ];

    if let Some(mask) = model.host_subnet_mask {
        lines.push(format!("option subnet-mask {};", mask));
    }

    if let (Some(subnet), Some(mask)) = (model.subnet, model.subnet_mask) {
        lines.push(format!("subnet {} netmask {} {{", subnet, mask));
        if let (Some(start), Some(end)) = (model.ip_range_start, model.ip_range_end) {
            lines.push(format!("{INDENT}range {} {};", start, end));
        }
        if let Some(gateway) = model.gateway {
            lines.push(format!("{INDENT}option routers {};", gateway));
        }
        if let Some(primary) = model.primary_dns {
            match model.secondary_dns {
                Some(secondary) => lines.push(format!(
                    "{INDENT}option domain-name-servers {}, {};",
                    primary, secondary
                )),
                None => lines.push(format!("{INDENT}option domain-name-servers {};", primary)),
            }
        }
        for lease in &model.static_leases {
            lines.push(format!("{INDENT}host {} {{", lease.device_name));
            lines.push(format!("{INDENT}{INDENT}hardware ethernet {};", lease.mac_address));
            lines.push(format!("{INDENT}{INDENT}fixed-address {};", lease.ip_address));
            lines.push(format!("{INDENT}}}"));
        }
        lines.push("}".to_string());
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}
