use crate::algorithm::{Algorithm, UnknownAlgorithm};
use crate::checksum::Checksum;
use crate::encoding::{clean_slash_path, EncodedPath, NormalizedPath};
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Covers files under `data/`, filename `manifest-<alg>.txt`.
    Payload,
    /// Covers tag files at the bag root, filename `tagmanifest-<alg>.txt`.
    Tag,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Syntax error at line: {0}")]
    Syntax(usize),
    #[error("Out of scope path at line: {0}")]
    OutOfScopePath(usize),
    #[error("Invalid checksum at line: {0}")]
    InvalidChecksum(usize),
    #[error("Duplicate entry at line: {0}")]
    DuplicateEntry(usize),
    #[error("Empty manifest")]
    Empty,
    #[error("Badly formed manifest filename: {0}")]
    Filename(String),
    #[error(transparent)]
    Algorithm(#[from] UnknownAlgorithm),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Duplicate manifest entry: {0}")]
pub struct DuplicateEntry(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Filesystem form of the entry's path.
    pub raw_path: PathBuf,
    pub sum: Checksum,
}

/// One manifest file: an algorithm plus a map from normalized path to
/// checksum. Duplicate normalized paths are rejected on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    kind: ManifestKind,
    algorithm: Algorithm,
    entries: HashMap<NormalizedPath, ManifestEntry>,
}

impl Manifest {
    pub fn new(kind: ManifestKind, algorithm: Algorithm) -> Self {
        Self {
            kind,
            algorithm,
            entries: HashMap::new(),
        }
    }

    /// Decodes a manifest filename (`(tag)?manifest-<alg>.txt`) into an
    /// empty manifest of the right kind and algorithm.
    pub fn from_filename(name: &str) -> Result<Self, ManifestError> {
        let filename_re = Regex::new(r"^(tag)?manifest-(\w+)\.txt$").unwrap();
        let caps = filename_re
            .captures(name)
            .ok_or_else(|| ManifestError::Filename(name.to_string()))?;
        let kind = match caps.get(1) {
            Some(_) => ManifestKind::Tag,
            None => ManifestKind::Payload,
        };
        let algorithm = Algorithm::from_str(&caps[2])?;
        Ok(Self::new(kind, algorithm))
    }

    pub fn filename(&self) -> String {
        match self.kind {
            ManifestKind::Payload => format!("manifest-{}.txt", self.algorithm),
            ManifestKind::Tag => format!("tagmanifest-{}.txt", self.algorithm),
        }
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn entries(&self) -> impl Iterator<Item = (&NormalizedPath, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn get(&self, path: &NormalizedPath) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &NormalizedPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds an entry under the path's normalized key; the stored raw path is
    /// the decoded filesystem form.
    pub fn append(&mut self, path: EncodedPath, sum: Checksum) -> Result<(), DuplicateEntry> {
        let key = path.normalized();
        if self.entries.contains_key(&key) {
            return Err(DuplicateEntry(path.to_string()));
        }
        self.entries.insert(
            key,
            ManifestEntry {
                raw_path: path.decode(),
                sum,
            },
        );
        Ok(())
    }

    /// Parses manifest text into this manifest, failing fast on the first
    /// defective line.
    pub fn parse(&mut self, text: &str) -> Result<(), ManifestError> {
        let line_re = Regex::new(r"^(\S+)\s+(\S.*)$").unwrap();
        let mut line_num = 0;
        for line in text.lines() {
            line_num += 1;
            let caps = line_re
                .captures(line)
                .ok_or(ManifestError::Syntax(line_num))?;
            let clean = clean_slash_path(&caps[2]);
            if clean.starts_with("..") {
                return Err(ManifestError::OutOfScopePath(line_num));
            }
            let sum = Checksum::from_hex(&caps[1])
                .map_err(|_| ManifestError::InvalidChecksum(line_num))?;
            self.append(EncodedPath::from_wire(clean), sum)
                .map_err(|_| ManifestError::DuplicateEntry(line_num))?;
        }
        if line_num == 0 {
            return Err(ManifestError::Empty);
        }
        Ok(())
    }

    /// One `<hex-sum> <encoded-path>` line per entry, in no particular order.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.values() {
            let _ = writeln!(
                out,
                "{} {}",
                entry.sum,
                EncodedPath::from_raw(&entry.raw_path)
            );
        }
        out
    }
}
