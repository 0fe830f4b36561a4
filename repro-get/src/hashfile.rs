//! Parser and writer for the `SHA256SUMS` hash file format.
//!
//! The format is the GNU coreutils `sha256sum` text format: one
//! `<sha256>  <filename>` record per line, `#` comments, and an optional
//! mode prefix (`*` for binary, a space for text) in front of the filename.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use crate::Error;

/// Parses a single hash file line.
///
/// Returns `Ok(None)` for empty and comment lines. The digest is only
/// length-checked here; full validation happens when the file specification
/// is built. Trailing whitespace inside the filename is preserved.
pub fn parse_line(orig_line: &str) -> Result<Option<(String, String)>, Error> {
    if orig_line.trim().is_empty() {
        return Ok(None);
    }
    let line = orig_line.trim_start();
    if line.starts_with('#') {
        return Ok(None);
    }
    let Some((sum, rest)) = line.split_once(' ') else {
        return Err(Error::HashFile {
            line: 0,
            reason: format!("invalid line {orig_line:?}"),
        });
    };
    if sum.len() != 64 {
        return Err(Error::HashFile {
            line: 0,
            reason: format!("invalid sha256 sum {sum:?}"),
        });
    }
    if rest.is_empty() {
        return Err(Error::HashFile {
            line: 0,
            reason: format!("invalid line {orig_line:?}"),
        });
    }
    // Exactly one byte after the separating space may be a mode prefix.
    let filename = match rest.as_bytes()[0] {
        b' ' | b'*' => &rest[1..],
        _ => rest,
    };
    Ok(Some((sum.to_owned(), filename.to_owned())))
}

/// Parses a hash file into a `filename -> digest` map.
///
/// Pseudo filenames such as `/ipfs/<CID>` are retained as keys; the file
/// specification builder reclassifies them. Errors carry the 1-based line
/// number.
pub fn parse<R: BufRead>(reader: R) -> Result<BTreeMap<String, String>, Error> {
    let mut map = BTreeMap::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some((sum, filename))) => {
                map.insert(filename, sum);
            }
            Ok(None) => {}
            Err(Error::HashFile { reason, .. }) => {
                return Err(Error::HashFile {
                    line: i + 1,
                    reason,
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(map)
}

/// Writes one `<digest>  <filename>` record.
///
/// No sorting is applied here; callers sort when determinism matters.
pub fn write_line<W: Write + ?Sized>(w: &mut W, sum: &str, filename: &str) -> io::Result<()> {
    writeln!(w, "{sum}  {filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUM: &str = "35b1508eeee9c1dfba798c4c04304ef0f266990f936a51f165571edf53325cbc";
    const NAME: &str = "pool/main/h/hello/hello_2.10-2_amd64.deb";

    #[test]
    fn skips_empty_and_comments() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line(" ").unwrap().is_none());
        assert!(parse_line("# foo").unwrap().is_none());
        assert!(parse_line(" # foo").unwrap().is_none());
    }

    #[test]
    fn rejects_invalid_lines() {
        assert!(parse_line("foo").is_err());
        assert!(parse_line("foo bar").is_err());
        assert!(parse_line(&format!("{SUM} ")).is_err());
    }

    #[test]
    fn text_mode() {
        let (sum, filename) = parse_line(&format!("{SUM}  {NAME}")).unwrap().unwrap();
        assert_eq!(sum, SUM);
        assert_eq!(filename, NAME);
    }

    #[test]
    fn binary_mode() {
        let (_, filename) = parse_line(&format!("{SUM} *{NAME}")).unwrap().unwrap();
        assert_eq!(filename, NAME);
    }

    #[test]
    fn no_mode_prefix() {
        let (_, filename) = parse_line(&format!("{SUM} {NAME}")).unwrap().unwrap();
        assert_eq!(filename, NAME);
    }

    #[test]
    fn filename_with_leading_space() {
        // Three spaces: separator, mode prefix, then a filename that
        // genuinely starts with a space.
        let (_, filename) = parse_line(&format!("{SUM}   {NAME}")).unwrap().unwrap();
        assert_eq!(filename, format!(" {NAME}"));
    }

    #[test]
    fn filename_with_trailing_space() {
        let (_, filename) = parse_line(&format!("{SUM}  {NAME} ")).unwrap().unwrap();
        assert_eq!(filename, format!("{NAME} "));
    }

    #[test]
    fn indented_entry() {
        let (sum, filename) = parse_line(&format!(" {SUM}  {NAME}")).unwrap().unwrap();
        assert_eq!(sum, SUM);
        assert_eq!(filename, NAME);
    }

    #[test]
    fn pseudo_filename_is_kept() {
        let line = format!("{SUM}  /ipfs/QmRY19HEWeTJtRC6vAdz7rDfX3PjSMgXmd1KYi9guAACUj");
        let (_, filename) = parse_line(&line).unwrap().unwrap();
        assert!(filename.starts_with("/ipfs/"));
    }

    #[test]
    fn parse_reports_line_numbers() {
        let input = format!("# header\n{SUM}  {NAME}\nbogus\n");
        let err = parse(input.as_bytes()).unwrap_err();
        match err {
            Error::HashFile { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn parse_and_emit_roundtrip() {
        let input = format!("{SUM}  {NAME}\n");
        let map = parse(input.as_bytes()).unwrap();
        assert_eq!(map.len(), 1);
        let mut out = Vec::new();
        for (filename, sum) in &map {
            write_line(&mut out, sum, filename).unwrap();
        }
        assert_eq!(String::from_utf8(out).unwrap(), input);
    }
}
