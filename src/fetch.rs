use crate::encoding::{clean_slash_path, EncodedPath};
use regex::Regex;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Syntax error at line: {0}")]
    Syntax(usize),
    #[error("Out of scope path at line: {0}")]
    OutOfScopePath(usize),
}

/// One `fetch.txt` line. The engine records these but never resolves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEntry {
    pub url: String,
    /// Declared size in bytes, or `-` when unknown. Kept opaque.
    pub size: String,
    /// In-bag destination, decoded to filesystem form.
    pub path: PathBuf,
}

/// Parses `fetch.txt`: `<url> <size> <encoded-path>` per line, empty lines
/// skipped, entry order preserved.
pub fn parse_fetch(text: &str) -> Result<Vec<FetchEntry>, FetchError> {
    let line_re = Regex::new(r"^(\S+)\s+(\S+)\s+(.*)$").unwrap();
    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_num = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let caps = line_re.captures(line).ok_or(FetchError::Syntax(line_num))?;
        let clean = clean_slash_path(caps[3].trim());
        if clean.starts_with("..") {
            return Err(FetchError::OutOfScopePath(line_num));
        }
        entries.push(FetchEntry {
            url: caps[1].to_string(),
            size: caps[2].to_string(),
            path: EncodedPath::from_wire(clean).decode(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_entries() {
        let text = "\
http://example.org/a.txt 13 data/a.txt

https://example.org/b%20c.bin - data/dir/with%0Anewline.bin
";
        let entries = parse_fetch(text).unwrap();
        assert_eq!(
            entries,
            vec![
                FetchEntry {
                    url: "http://example.org/a.txt".to_string(),
                    size: "13".to_string(),
                    path: PathBuf::from("data/a.txt"),
                },
                FetchEntry {
                    url: "https://example.org/b%20c.bin".to_string(),
                    size: "-".to_string(),
                    path: PathBuf::from("data/dir/with\nnewline.bin"),
                },
            ]
        );
    }

    #[test]
    fn rejects_bad_lines() {
        for (input, output) in [
            ("http://example.org/a.txt", FetchError::Syntax(1)),
            ("http://example.org/a.txt 13", FetchError::Syntax(1)),
            (
                "ok 1 data/x\nhttp://example.org 13 ../escape",
                FetchError::OutOfScopePath(2),
            ),
        ] {
            assert_eq!(parse_fetch(input), Err(output), "failing on `{input}`");
        }
    }

    #[test]
    fn empty_input_is_empty_list() {
        assert_eq!(parse_fetch(""), Ok(vec![]));
    }
}
