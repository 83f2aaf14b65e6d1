//! Create and validate BagIt packages (RFC 8493 and the 0.9x drafts).
//!
//! A bag is a directory with a `bagit.txt` declaration, payload files under
//! `data/`, and manifests of checksums covering the payload and the tag
//! files. [open_bag] hydrates an existing bag from disk, [Bag::validate]
//! re-hashes everything against its manifests, and [create_bag] packages a
//! source directory in place or into a destination.

mod algorithm;
mod backend;
mod checksum;
mod encoding;
mod fetch;
mod generate;
mod manifest;
mod metadata;
mod payload;
mod read;

pub use algorithm::{Algorithm, Hasher, UnknownAlgorithm, ALGORITHMS};
pub use backend::{Backend, BackendError, FileInfo, FsBackend};
pub use checksum::{Checksum, ChecksumError, ChecksumJob, Checksumer, JobPusher};
pub use encoding::{decode_tag_bytes, EncodedPath, EncodingError, NormalizedPath};
pub use fetch::{parse_fetch, FetchEntry, FetchError};
pub use generate::{create_bag, CreateOptions, GenerateError};
pub use manifest::{DuplicateEntry, Manifest, ManifestEntry, ManifestError, ManifestKind};
pub use metadata::{
    BagDeclaration, TagFile, TagFileError, KEY_BAGGING_DATE, KEY_ENCODING, KEY_OXUM,
    KEY_SOFTWARE_AGENT, KEY_VERSION,
};
pub use payload::{PathCollision, Payload, PayloadEntry};
pub use read::{open_bag, ReadError};

use std::collections::HashSet;
use std::sync::Arc;

pub(crate) const BAGIT_TXT: &str = "bagit.txt";
pub(crate) const BAG_INFO: &str = "bag-info.txt";
pub(crate) const FETCH_TXT: &str = "fetch.txt";
pub(crate) const DATA_DIR: &str = "data";

/// Bag versions this crate recognizes.
pub const SUPPORTED_VERSIONS: [(u32, u32); 6] =
    [(1, 0), (0, 97), (0, 96), (0, 95), (0, 94), (0, 93)];

/// A defect found while checking a bag. [Bag::check_complete] and
/// [Bag::validate] report every defect they find, never only the first.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BagError {
    #[error("Bag version {0}.{1} is not recognized")]
    UnknownVersion(u32, u32),
    #[error("Bag has no payload manifest")]
    NoManifests,
    #[error("Manifest file missing from payload: {0}")]
    NotInPayload(String),
    #[error("Payload file missing from manifests: {0}")]
    NotInManifests(String),
    #[error("Missing tag file: {0}")]
    MissingTagFile(String),
    #[error("Checksum failed for `{path}` ({algorithm})")]
    ChecksumMismatch { path: String, algorithm: Algorithm },
    #[error("Could not checksum `{path}`: {source}")]
    Checksum {
        path: String,
        source: ChecksumError,
    },
    #[error("Checksum jobs aborted: {0}")]
    Pusher(BackendError),
}

/// A fully hydrated bag. Obtained from [open_bag] or [create_bag]; the
/// loaded component files are immutable from here on.
pub struct Bag {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) version: (u32, u32),
    pub(crate) encoding: String,
    pub(crate) payload: Payload,
    pub(crate) info: TagFile,
    pub(crate) manifests: Vec<Manifest>,
    pub(crate) tag_manifests: Vec<Manifest>,
    pub(crate) fetch: Vec<FetchEntry>,
}

impl Bag {
    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Contents of `bag-info.txt`; empty when the bag has none.
    pub fn info(&self) -> &TagFile {
        &self.info
    }

    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    pub fn tag_manifests(&self) -> &[Manifest] {
        &self.tag_manifests
    }

    pub fn fetch(&self) -> &[FetchEntry] {
        &self.fetch
    }

    /// Checks the completeness conditions, reporting every failure through
    /// `report`. `threshold` is how many payload manifests a payload file
    /// may be absent from before that counts as a defect.
    pub async fn check_complete_with_threshold(
        &self,
        threshold: usize,
        report: &mut dyn FnMut(BagError),
    ) -> bool {
        let mut complete = true;

        if self.encoding.is_empty() || !SUPPORTED_VERSIONS.contains(&self.version) {
            report(BagError::UnknownVersion(self.version.0, self.version.1));
            complete = false;
        }
        if self.manifests.is_empty() {
            report(BagError::NoManifests);
            complete = false;
        }

        // Manifest entries must resolve to a payload file or a fetch entry.
        let fetched: HashSet<NormalizedPath> = self
            .fetch
            .iter()
            .map(|f| EncodedPath::from_raw(&f.path).normalized())
            .collect();
        for manifest in &self.manifests {
            for (norm, entry) in manifest.entries() {
                if !self.payload.contains(norm) && !fetched.contains(norm) {
                    report(BagError::NotInPayload(entry.raw_path.display().to_string()));
                    complete = false;
                }
            }
        }

        // Payload files must appear in (enough of) the payload manifests.
        for (norm, entry) in self.payload.iter() {
            let absent = self
                .manifests
                .iter()
                .filter(|m| !m.contains(norm))
                .count();
            if absent > threshold {
                report(BagError::NotInManifests(
                    entry.raw_path.display().to_string(),
                ));
                complete = false;
            }
        }

        // Tag manifest entries must resolve to readable files.
        for manifest in &self.tag_manifests {
            for (_, entry) in manifest.entries() {
                if self.backend.stat(&entry.raw_path).await.is_err() {
                    report(BagError::MissingTagFile(
                        entry.raw_path.display().to_string(),
                    ));
                    complete = false;
                }
            }
        }

        complete
    }

    pub async fn check_complete(&self, report: &mut dyn FnMut(BagError)) -> bool {
        self.check_complete_with_threshold(0, report).await
    }

    pub async fn is_complete(&self) -> bool {
        self.check_complete(&mut |_| {}).await
    }

    /// Completeness plus a checksum pass over every payload- and
    /// tag-manifest entry. The checksum pass runs even when the bag is
    /// incomplete, so mismatches, job failures, and completeness defects
    /// all reach `report`; nothing is silently dropped.
    pub async fn validate(&self, workers: usize, report: &mut dyn FnMut(BagError)) -> bool {
        let complete = self.check_complete(report).await;
        let jobs: Vec<ChecksumJob> = self
            .manifests
            .iter()
            .chain(&self.tag_manifests)
            .flat_map(|manifest| {
                manifest.entries().map(move |(_, entry)| {
                    ChecksumJob::expecting(
                        entry.raw_path.clone(),
                        manifest.algorithm(),
                        entry.sum.clone(),
                    )
                })
            })
            .collect();

        let mut sumer = Checksumer::new(workers, self.backend.clone(), move |push| async move {
            for job in jobs {
                push.push(job).await;
            }
            Ok(())
        });
        let mut valid = true;
        while let Some(job) = sumer.recv().await {
            if let Some(source) = job.error {
                report(BagError::Checksum {
                    path: job.path.display().to_string(),
                    source,
                });
                valid = false;
            } else if !job.sum_is_expected() {
                report(BagError::ChecksumMismatch {
                    path: job.path.display().to_string(),
                    algorithm: job.algorithm,
                });
                valid = false;
            }
        }
        if let Some(err) = sumer.push_error().await {
            report(BagError::Pusher(err));
            valid = false;
        }
        complete && valid
    }

    pub async fn is_valid(&self, workers: usize) -> bool {
        self.validate(workers, &mut |_| {}).await
    }
}
