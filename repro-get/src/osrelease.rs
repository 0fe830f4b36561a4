//! Distro autodetection from `/etc/os-release`.

use std::io::BufRead;

use tracing::warn;

/// Returns the `ID=` value from `/etc/os-release`, or an empty string when
/// it cannot be determined (with a warning).
pub fn distro_id() -> String {
    let file = match std::fs::File::open("/etc/os-release") {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to open /etc/os-release: {e}");
            return String::new();
        }
    };
    match parse_distro_id(std::io::BufReader::new(file)) {
        Some(id) => id,
        None => {
            warn!("failed to get ID from /etc/os-release");
            String::new()
        }
    }
}

fn parse_distro_id<R: BufRead>(reader: R) -> Option<String> {
    for line in reader.lines() {
        let line = line.ok()?;
        if let Some(("ID", v)) = os_release_attrib(&line) {
            return Some(v.to_owned());
        }
    }
    None
}

/// Splits one os-release line into a key/value pair, dropping comments and
/// surrounding quotes.
fn os_release_attrib(line: &str) -> Option<(&str, &str)> {
    let line = line.split('#').next().unwrap_or(line).trim();
    let (k, v) = line.split_once('=')?;
    Some((k.trim(), v.trim().trim_matches('"')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_id() {
        let input = b"NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n" as &[u8];
        assert_eq!(parse_distro_id(input), Some("ubuntu".to_owned()));
    }

    #[test]
    fn parses_quoted_id() {
        let input = b"PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=\"debian\"\n" as &[u8];
        assert_eq!(parse_distro_id(input), Some("debian".to_owned()));
    }

    #[test]
    fn ignores_comments() {
        let input = b"# header\nID=alpine # trailing\n" as &[u8];
        assert_eq!(parse_distro_id(input), Some("alpine".to_owned()));
    }

    #[test]
    fn missing_id() {
        let input = b"NAME=Something\n" as &[u8];
        assert_eq!(parse_distro_id(input), None);
    }
}
