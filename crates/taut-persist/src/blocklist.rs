use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;

use tracing::warn;

/// Read an IPv4 blocklist: one `first-last` range or single address per
/// line, `#` starts a comment. Returns `None` when the file does not exist;
/// unparseable lines are skipped with a warning.
///
/// # Errors
///
/// Returns the underlying error when the file exists but cannot be read.
pub fn read_blocklist(path: &Path) -> io::Result<Option<Vec<(Ipv4Addr, Ipv4Addr)>>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut ranges = Vec::new();
    for (number, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(range) => ranges.push(range),
            None => warn!(
                path = %path.display(),
                line = number + 1,
                "skipping unparseable blocklist line"
            ),
        }
    }
    Ok(Some(ranges))
}

fn parse_line(line: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    if let Some((first, last)) = line.split_once('-') {
        let first: Ipv4Addr = first.trim().parse().ok()?;
        let last: Ipv4Addr = last.trim().parse().ok()?;
        Some((first, last))
    } else {
        let addr: Ipv4Addr = line.parse().ok()?;
        Some((addr, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(read_blocklist(&dir.path().join("absent.txt")).unwrap().is_none());
    }

    #[test]
    fn parses_ranges_singles_and_comments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocklist.txt");
        fs::write(
            &path,
            "# header\n10.0.0.0-10.0.0.255\n192.168.1.7   # single\nnot-an-address\n\n",
        )
        .unwrap();

        let ranges = read_blocklist(&path).unwrap().unwrap();
        assert_eq!(
            ranges,
            vec![
                (Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 255)),
                (Ipv4Addr::new(192, 168, 1, 7), Ipv4Addr::new(192, 168, 1, 7)),
            ]
        );
    }
}
