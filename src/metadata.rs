use regex::Regex;

pub const KEY_VERSION: &str = "BagIt-Version";
pub const KEY_ENCODING: &str = "Tag-File-Character-Encoding";
pub const KEY_BAGGING_DATE: &str = "Bagging-Date";
pub const KEY_SOFTWARE_AGENT: &str = "Bag-Software-Agent";
pub const KEY_OXUM: &str = "Payload-Oxum";

/// Serialized tag lines wrap once they would pass this column.
const WRAP_COLUMN: usize = 79;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TagFileError {
    #[error("Syntax error at line: {0}")]
    Syntax(usize),
    #[error("bagit.txt must declare exactly `{KEY_VERSION}` then `{KEY_ENCODING}`")]
    MalformedDeclaration,
    #[error("Invalid BagIt version: {0}")]
    InvalidVersion(String),
    #[error("Invalid tag file encoding: {0}")]
    InvalidEncoding(String),
}

/// The version and encoding a bag declares in `bagit.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagDeclaration {
    pub version: (u32, u32),
    pub encoding: String,
}

/// An ordered sequence of `label: value` tags. Labels may repeat; insertion
/// order is preserved through parse and serialize.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFile {
    tags: Vec<(String, String)>,
    has_bom: bool,
}

impl TagFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// A minimal `bagit.txt` for the given version and encoding.
    pub fn declaration(version: (u32, u32), encoding: &str) -> Self {
        let mut tags = Self::new();
        tags.append(KEY_VERSION, format!("{}.{}", version.0, version.1));
        tags.append(KEY_ENCODING, encoding);
        tags
    }

    pub fn append(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.tags.push((label.into(), value.into()));
    }

    /// Replaces the first value under `label`, appending if absent.
    pub fn set(&mut self, label: &str, value: impl Into<String>) {
        match self.tags.iter_mut().find(|(l, _)| l.as_str() == label) {
            Some((_, v)) => *v = value.into(),
            None => self.append(label, value),
        }
    }

    pub fn values<'a, 'b>(&'a self, label: &'b str) -> impl Iterator<Item = &'a str> + 'b
    where
        'a: 'b,
    {
        self.tags
            .iter()
            .filter(move |(l, _)| l == label)
            .map(move |(_, v)| v.as_str())
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.values(label).next()
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Whether the parsed source started with a byte order mark. Only
    /// BagIt 1.0 tolerates one on `bagit.txt`.
    pub fn has_bom(&self) -> bool {
        self.has_bom
    }

    pub fn parse(text: &str) -> Result<Self, TagFileError> {
        let label_re = Regex::new(r"^([^:\s][^:]*):(.*)$").unwrap();
        let mut tags = Self::new();
        for (index, line) in text.lines().enumerate() {
            let line_num = index + 1;
            let line = if line_num == 1 {
                match line.strip_prefix('\u{feff}') {
                    Some(rest) => {
                        tags.has_bom = true;
                        rest
                    }
                    None => line,
                }
            } else {
                line
            };
            if line.trim().is_empty() {
                continue;
            }
            // continuation of the previous value
            if line.starts_with(|c: char| c.is_whitespace()) {
                match tags.tags.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None => return Err(TagFileError::Syntax(line_num)),
                }
                continue;
            }
            let caps = label_re
                .captures(line)
                .ok_or(TagFileError::Syntax(line_num))?;
            tags.append(caps[1].trim(), caps[2].trim());
        }
        Ok(tags)
    }

    /// Serializes as `label: value` lines, wrapping at column 79 with a
    /// two-space continuation indent. A single word wider than the limit
    /// gets its own wrapped line.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (label, value) in &self.tags {
            out.push_str(label);
            out.push(':');
            let mut col = label.chars().count() + 1;
            for word in value.split_whitespace() {
                let width = word.chars().count();
                if col + 1 + width > WRAP_COLUMN && col > 2 {
                    out.push_str("\n  ");
                    out.push_str(word);
                    col = 2 + width;
                } else {
                    out.push(' ');
                    out.push_str(word);
                    col += 1 + width;
                }
            }
            out.push('\n');
        }
        out
    }

    /// Validates this tag file as a `bagit.txt` declaration: exactly two
    /// labels, in order, with a `major.minor` version and a single-token
    /// encoding.
    pub fn bag_declaration(&self) -> Result<BagDeclaration, TagFileError> {
        let version_re = Regex::new(r"^(\d+)\.(\d+)$").unwrap();
        match self.tags.as_slice() {
            [(l1, version), (l2, encoding)] if l1 == KEY_VERSION && l2 == KEY_ENCODING => {
                let caps = version_re
                    .captures(version)
                    .ok_or_else(|| TagFileError::InvalidVersion(version.clone()))?;
                let major = caps[1]
                    .parse()
                    .map_err(|_| TagFileError::InvalidVersion(version.clone()))?;
                let minor = caps[2]
                    .parse()
                    .map_err(|_| TagFileError::InvalidVersion(version.clone()))?;
                if encoding.is_empty() || encoding.contains(char::is_whitespace) {
                    return Err(TagFileError::InvalidEncoding(encoding.clone()));
                }
                Ok(BagDeclaration {
                    version: (major, minor),
                    encoding: encoding.clone(),
                })
            }
            _ => Err(TagFileError::MalformedDeclaration),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_label_lines() {
        for (input, expect_valid) in [
            ("Field1: Val1\nField1: Val2", true),
            ("Field1: Val1\n\nField1: Val2", true),
            ("Field1: Val\n On\n  Several\n  Lines\nField2: Val2", true),
            ("Field-With: colon: in value", true),
            ("", true),
            ("   \n\t\n", true),
            ("Field1", false),
            ("Field1 Val1", false),
            (" Field1: Val1", false),
        ] {
            let result = TagFile::parse(input);
            assert_eq!(
                result.is_ok(),
                expect_valid,
                "failing on input `{}`: {result:?}",
                input.escape_debug()
            );
        }
    }

    #[test]
    fn continuation_lines_join_with_one_space() {
        let tags = TagFile::parse("Field1: Val\n On\n  Several\n  Lines\nField2: Val2").unwrap();
        assert_eq!(tags.get("Field1"), Some("Val On Several Lines"));
        assert_eq!(tags.get("Field2"), Some("Val2"));
    }

    #[test]
    fn leading_continuation_is_an_error() {
        assert_eq!(
            TagFile::parse("\n\n  dangling"),
            Err(TagFileError::Syntax(3))
        );
    }

    #[test]
    fn repeated_labels_stay_ordered() {
        let tags = TagFile::parse("Field1: Val1\nField1: Val2").unwrap();
        assert_eq!(tags.values("Field1").collect::<Vec<_>>(), ["Val1", "Val2"]);
    }

    #[test]
    fn bom_is_recorded() {
        let tags = TagFile::parse("\u{feff}Field1: Val1").unwrap();
        assert!(tags.has_bom());
        assert_eq!(tags.get("Field1"), Some("Val1"));
        assert!(!TagFile::parse("Field1: Val1").unwrap().has_bom());
    }

    #[test]
    fn serialize_wraps_long_values() {
        let mut tags = TagFile::new();
        tags.append(
            "Long-Text-Entry",
            "This is very very long text that should trigger the line wrap \
             functions. Hope it works! It needs a few more words to spill \
             past the second line as well.",
        );
        let text = tags.serialize();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.len() > 2, "expected wrapping, got:\n{text}");
        for line in &lines[1..] {
            assert!(line.starts_with("  "), "bad continuation indent: `{line}`");
        }
        for line in &lines {
            assert!(
                line.chars().count() <= 79,
                "line too long ({}): `{line}`",
                line.chars().count()
            );
        }
    }

    #[test]
    fn serialize_overlong_word_gets_its_own_line() {
        let mut tags = TagFile::new();
        let long_word = "x".repeat(100);
        tags.append("Label", format!("short {long_word} tail"));
        let text = tags.serialize();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Label: short");
        assert_eq!(lines[1], format!("  {long_word}"));
        assert_eq!(lines[2], "  tail");
    }

    #[test]
    fn parse_serialize_round_trip() {
        let source = "Field1: Val1\nField1: Val2\nLong: word ".to_string()
            + &"again word ".repeat(20)
            + "\nField2: Val3";
        let first = TagFile::parse(&source).unwrap();
        let second = TagFile::parse(&first.serialize()).unwrap();
        assert_eq!(
            first.tags().collect::<Vec<_>>(),
            second.tags().collect::<Vec<_>>()
        );
    }

    #[test]
    fn declaration_round_trip() {
        let tags = TagFile::declaration((0, 97), "UTF-8");
        assert_eq!(
            tags.serialize(),
            "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n"
        );
        let decl = tags.bag_declaration().unwrap();
        assert_eq!(decl.version, (0, 97));
        assert_eq!(decl.encoding, "UTF-8");
    }

    #[test]
    fn declaration_rejects_malformed_files() {
        for (input, output) in [
            (
                "Tag-File-Character-Encoding: UTF-8\nBagIt-Version: 1.0",
                TagFileError::MalformedDeclaration,
            ),
            ("BagIt-Version: 1.0", TagFileError::MalformedDeclaration),
            (
                "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF-8\nExtra: tag",
                TagFileError::MalformedDeclaration,
            ),
            (
                "BagIt-Version: one.zero\nTag-File-Character-Encoding: UTF-8",
                TagFileError::InvalidVersion("one.zero".to_string()),
            ),
            (
                "BagIt-Version: 1.0\nTag-File-Character-Encoding: UTF 8",
                TagFileError::InvalidEncoding("UTF 8".to_string()),
            ),
        ] {
            assert_eq!(
                TagFile::parse(input).unwrap().bag_declaration(),
                Err(output),
                "failing on input `{input}`"
            );
        }
    }
}
