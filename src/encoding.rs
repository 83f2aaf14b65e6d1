use std::fmt::Display;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use unicode_normalization::UnicodeNormalization;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unrecognized encoding: {0}")]
    Unsupported(String),
    #[error("Text is not valid {0}")]
    Malformed(&'static str),
}

/// A path in its manifest wire form: Unicode NFC, `%`/CR/LF percent-escaped,
/// forward-slash separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedPath(String);

/// NFC form of an [EncodedPath]. The unique key in payload and manifest maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedPath(String);

impl EncodedPath {
    /// Encodes a filesystem path for inclusion in a manifest. `%` is escaped
    /// before CR and LF so a literal `%0A` in a filename survives the trip.
    pub fn from_raw(path: &Path) -> Self {
        let s: String = path.to_string_lossy().nfc().collect();
        let s = s
            .replace('%', "%25")
            .replace('\r', "%0D")
            .replace('\n', "%0A")
            .replace(MAIN_SEPARATOR, "/");
        EncodedPath(s)
    }

    /// Wraps a string already in wire form (a cleaned manifest field).
    pub fn from_wire(s: impl Into<String>) -> Self {
        EncodedPath(s.into())
    }

    /// Decodes back to a filesystem path. CR and LF substitutions run before
    /// `%25` so `%250A` decodes to a literal `%0A`, not a newline.
    pub fn decode(&self) -> PathBuf {
        let s = self.0.replace('/', &MAIN_SEPARATOR.to_string());
        let s = s
            .replace("%0A", "\n")
            .replace("%0a", "\n")
            .replace("%0D", "\r")
            .replace("%0d", "\r")
            .replace("%25", "%");
        PathBuf::from(s)
    }

    pub fn normalized(&self) -> NormalizedPath {
        NormalizedPath(self.0.nfc().collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EncodedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lexically cleans a forward-slash path: drops `.` and empty segments,
/// resolves `..` against prior segments. A result starting with `..` means
/// the path escapes its root.
pub(crate) fn clean_slash_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(out.last(), Some(&"..") | None) {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}

/// Decodes tag-file bytes under a declared character encoding.
///
/// `bagit.txt` itself must always be decoded as UTF-8, whatever encoding it
/// declares for the rest of the bag.
pub fn decode_tag_bytes(bytes: &[u8], encoding: &str) -> Result<String, EncodingError> {
    match encoding.to_lowercase().as_str() {
        "utf-8" => String::from_utf8(bytes.to_vec()).map_err(|_| EncodingError::Malformed("UTF-8")),
        "utf-16" => {
            let (text, _, malformed) = encoding_rs::UTF_16LE.decode(bytes);
            if malformed {
                return Err(EncodingError::Malformed("UTF-16"));
            }
            Ok(text.into_owned())
        }
        // Latin-1 maps bytes straight to the first 256 scalar values.
        "iso-8859-1" => Ok(bytes.iter().map(|&b| b as char).collect()),
        other => Err(EncodingError::Unsupported(other.to_string())),
    }
}
