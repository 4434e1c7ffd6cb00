use std::net::Ipv4Addr;

use proptest::prelude::*;

use dhcpdctl::SettingsModel;
use dhcpdctl::directive::{parse_config, render_config};
use dhcpdctl::leases::parse_leases;
use dhcpdctl::service_default::rewrite_interfaces;

fn ipv4() -> impl Strategy<Value = Ipv4Addr> {
    any::<u32>().prop_map(Ipv4Addr::from)
}

fn mac() -> impl Strategy<Value = String> {
    prop::array::uniform6(any::<u8>()).prop_map(|bytes| {
        bytes
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":")
    })
}

fn static_leases() -> impl Strategy<Value = Vec<(String, String, Ipv4Addr)>> {
    prop::collection::vec(("[a-z][a-z0-9-]{0,15}", mac(), ipv4()), 1..6)
}

fn full_model() -> impl Strategy<Value = SettingsModel> {
    (
        (1u32..=604_800, 1u32..=604_800),
        (ipv4(), ipv4(), ipv4(), ipv4()),
        (ipv4(), ipv4(), ipv4(), ipv4()),
        static_leases(),
    )
        .prop_map(
            |(
                (default_lease_time, max_lease_time),
                (subnet, subnet_mask, range_start, range_end),
                (gateway, primary, secondary, host_mask),
                hosts,
            )| {
                let mut model = SettingsModel {
                    default_lease_time,
                    max_lease_time,
                    subnet: Some(subnet),
                    subnet_mask: Some(subnet_mask),
                    ip_range_start: Some(range_start),
                    ip_range_end: Some(range_end),
                    gateway: Some(gateway),
                    primary_dns: Some(primary),
                    secondary_dns: Some(secondary),
                    host_subnet_mask: Some(host_mask),
                    ..Default::default()
                };
                for (name, mac, ip) in hosts {
                    model.add_static_lease(name, mac, ip.to_string());
                }
                model
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn parse_config_never_panics(text in "\\PC*") {
        let mut model = SettingsModel::default();
        let _ = parse_config(&text, &mut model);
    }

    #[test]
    fn parse_config_never_panics_on_directive_soup(
        lines in prop::collection::vec(
            prop_oneof![
                Just("default-lease-time".to_string()),
                Just("max-lease-time ;".to_string()),
                Just("subnet netmask {".to_string()),
                Just("range ;".to_string()),
                Just("option".to_string()),
                Just("option routers".to_string()),
                Just("option domain-name-servers ,,;".to_string()),
                Just("host {".to_string()),
                Just("}".to_string()),
                "[ -~]{0,40}",
            ],
            0..40,
        )
    ) {
        let mut model = SettingsModel::default();
        let _ = parse_config(&lines.join("\n"), &mut model);
    }

    #[test]
    fn parse_leases_never_panics(text in "\\PC*") {
        let _ = parse_leases(&text);
    }

    #[test]
    fn config_roundtrips(model in full_model()) {
        let mut parsed = SettingsModel::default();
        parse_config(&render_config(&model), &mut parsed).unwrap();
        prop_assert_eq!(parsed, model);
    }

    #[test]
    fn render_is_stable_after_reparse(model in full_model()) {
        let first = render_config(&model);
        let mut parsed = SettingsModel::default();
        parse_config(&first, &mut parsed).unwrap();
        prop_assert_eq!(render_config(&parsed), first);
    }

    #[test]
    fn lease_history_keeps_last_block(
        entries in prop::collection::vec((ipv4(), 0usize..4), 1..20)
    ) {
        let macs = ["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:03", "00:00:00:00:00:04"];
        let mut text = String::new();
        for (ip, which) in &entries {
            text.push_str(&format!(
                "lease {} {{\n  binding state active;\n  hardware ethernet {};\n}}\n",
                ip, macs[*which]
            ));
        }

        let table = parse_leases(&text).unwrap();
        for (index, mac) in macs.iter().enumerate() {
            let last = entries.iter().rev().find(|(_, which)| *which == index);
            match last {
                Some((ip, _)) => prop_assert_eq!(&table[*mac].ip_address, &ip.to_string()),
                None => prop_assert!(!table.contains_key(*mac)),
            }
        }
    }

    #[test]
    fn rewrite_preserves_other_lines(
        lines in prop::collection::vec("[ -~]{0,30}", 0..20),
        interface in "[a-z][a-z0-9]{0,8}"
    ) {
        let output = rewrite_interfaces(lines.iter().map(String::as_str), &interface);
        prop_assert_eq!(output.len(), lines.len() + 1);
        for (original, rewritten) in lines.iter().zip(output.iter().skip(1)) {
            let trimmed = original.trim_start();
            if trimmed.starts_with("INTERFACES") || trimmed.starts_with("#INTERFACES") {
                prop_assert_eq!(rewritten, &format!("INTERFACES=\"{}\"", interface));
            } else {
                prop_assert_eq!(rewritten, original);
            }
        }
    }
}
