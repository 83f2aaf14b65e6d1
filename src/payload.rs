use crate::backend::FileInfo;
use crate::encoding::{EncodedPath, NormalizedPath};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Path encoding collision: {0}")]
pub struct PathCollision(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    /// Filesystem path relative to the bag root.
    pub raw_path: PathBuf,
    pub size: u64,
}

/// The files under `data/`, keyed by normalized path. Two distinct files
/// whose paths normalize to the same key cannot be told apart in a
/// manifest, so inserting the second one fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(HashMap<NormalizedPath, PayloadEntry>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: FileInfo) -> Result<(), PathCollision> {
        let key = EncodedPath::from_raw(&info.path).normalized();
        if self.0.contains_key(&key) {
            return Err(PathCollision(info.path.display().to_string()));
        }
        self.0.insert(
            key,
            PayloadEntry {
                raw_path: info.path,
                size: info.size,
            },
        );
        Ok(())
    }

    pub fn contains(&self, path: &NormalizedPath) -> bool {
        self.0.contains_key(path)
    }

    pub fn get(&self, path: &NormalizedPath) -> Option<&PayloadEntry> {
        self.0.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NormalizedPath, &PayloadEntry)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Payload-Oxum` figures: total octet count and stream (file) count.
    pub fn oxum(&self) -> (u64, usize) {
        let octets = self.0.values().map(|e| e.size).sum();
        (octets, self.0.len())
    }
}
