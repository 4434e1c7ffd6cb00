//! Reading and patching the service environment file
//! (`/etc/default/isc-dhcp-server`), which names the interface dhcpd binds to.

pub const SERVICE_DEFAULT_HEADER: &str = "#configfile modified by dhcpdctl";

fn is_interfaces_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("INTERFACES") || line.starts_with("#INTERFACES")
}

/// Replaces every `INTERFACES`/`#INTERFACES` line with
/// `INTERFACES="<interface>"`, passing other lines through untouched, and
/// prepends a header comment.
pub fn rewrite_interfaces<'a, I>(lines: I, interface: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    std::iter::once(SERVICE_DEFAULT_HEADER.to_string())
        .chain(lines.into_iter().map(|line| {
            if is_interfaces_line(line) {
                format!("INTERFACES=\"{}\"", interface)
            } else {
                line.to_string()
            }
        }))
        .collect()
}

/// The interface named by the last active `INTERFACES=` assignment, if any.
pub fn read_interfaces(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("INTERFACES"))
        .filter_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().trim_matches('"').trim().to_string())
        .filter(|value| !value.is_empty())
        .last()
}

/// Joins rewritten lines into file content with a trailing newline.
pub fn render_lines(lines: &[String]) -> String {
    let mut content = lines.join("\n");
    content.push('\n');
    content
}
