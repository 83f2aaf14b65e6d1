use crate::algorithm::Algorithm;
use crate::backend::{Backend, BackendError, FsBackend};
use crate::checksum::{ChecksumError, ChecksumJob, Checksumer};
use crate::encoding::EncodedPath;
use crate::manifest::{DuplicateEntry, Manifest, ManifestKind};
use crate::metadata::{TagFile, KEY_BAGGING_DATE, KEY_OXUM, KEY_SOFTWARE_AGENT};
use crate::payload::{PathCollision, Payload};
use crate::read::{open_bag, ReadError};
use crate::{Bag, BAGIT_TXT, BAG_INFO, DATA_DIR};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const DEFAULT_VERSION: (u32, u32) = (0, 97);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Can't make a manifest without an algorithm")]
    NoAlgorithms,
    #[error("Could not determine absolute path for {0}")]
    AbsolutePath(String),
    #[error("{dst} is a subdirectory of {src}")]
    DestinationInsideSource { dst: String, src: String },
    #[error("Expected a directory: {0}")]
    NotADirectory(String),
    #[error("Failed to prepare {path}")]
    Prepare {
        path: String,
        kind: std::io::ErrorKind,
    },
    #[error("Failed to write {path}")]
    Write {
        path: String,
        kind: std::io::ErrorKind,
    },
    #[error("Failed to move {path}")]
    Rename {
        path: String,
        kind: std::io::ErrorKind,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Could not checksum `{path}`: {source}")]
    Checksum {
        path: String,
        source: ChecksumError,
    },
    #[error(transparent)]
    Duplicate(#[from] DuplicateEntry),
    #[error(transparent)]
    Collision(#[from] PathCollision),
    #[error("Failed to re-open the created bag: {0}")]
    Reopen(#[from] ReadError),
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub src_dir: PathBuf,
    /// Parent directory for the new bag. `None` turns the source directory
    /// into a bag in place.
    pub dst_path: Option<PathBuf>,
    pub algorithms: Vec<Algorithm>,
    /// Tags for `bag-info.txt`, on top of the generated ones.
    pub info: TagFile,
    pub workers: usize,
    pub version: (u32, u32),
    /// Value of the `Bag-Software-Agent` tag.
    pub software_agent: String,
}

impl CreateOptions {
    pub fn new(src_dir: impl Into<PathBuf>) -> Self {
        Self {
            src_dir: src_dir.into(),
            dst_path: None,
            algorithms: vec![Algorithm::Sha512],
            info: TagFile::new(),
            workers: 1,
            version: DEFAULT_VERSION,
            software_agent: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Packages `src_dir` as a bag: checksums the tree, writes the component
/// files into a build directory, then relocates the tree under `data/`.
/// In-place creation stages in a sibling temp directory and atomically
/// renames it over the source at the end. The finished bag is re-opened
/// from disk, so what you get back is what was actually written.
pub async fn create_bag(opts: CreateOptions) -> Result<Bag, GenerateError> {
    if opts.algorithms.is_empty() {
        return Err(GenerateError::NoAlgorithms);
    }
    let workers = opts.workers.max(1);
    let src = absolute(&opts.src_dir)?;

    let (build_dir, final_path) = match &opts.dst_path {
        None => {
            let parent = src
                .parent()
                .ok_or_else(|| GenerateError::AbsolutePath(src.display().to_string()))?;
            let name = src.file_name().and_then(|n| n.to_str()).unwrap_or(DATA_DIR);
            let staging = tempfile::Builder::new()
                .prefix(name)
                .tempdir_in(parent)
                .map_err(|e| GenerateError::Prepare {
                    path: parent.display().to_string(),
                    kind: e.kind(),
                })?;
            (staging.keep(), src.clone())
        }
        Some(dst) => {
            let dst = absolute(dst)?;
            if dst.starts_with(&src) {
                return Err(GenerateError::DestinationInsideSource {
                    dst: dst.display().to_string(),
                    src: src.display().to_string(),
                });
            }
            let dst = match fs::metadata(&dst).await {
                // An existing destination is the parent for the new bag.
                Ok(meta) if meta.is_dir() => dst.join(
                    src.file_name()
                        .ok_or_else(|| GenerateError::AbsolutePath(src.display().to_string()))?,
                ),
                Ok(_) => return Err(GenerateError::NotADirectory(dst.display().to_string())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => dst,
                Err(e) => {
                    return Err(GenerateError::Prepare {
                        path: dst.display().to_string(),
                        kind: e.kind(),
                    })
                }
            };
            fs::create_dir(&dst).await.map_err(|e| GenerateError::Prepare {
                path: dst.display().to_string(),
                kind: e.kind(),
            })?;
            (dst.clone(), dst)
        }
    };

    // Component files are staged first; a failure here removes the build
    // directory. Once the payload has moved in, nothing is deleted.
    if let Err(err) = stage(&opts, workers, &src, &build_dir).await {
        let _ = fs::remove_dir_all(&build_dir).await;
        return Err(err);
    }

    fs::rename(&src, build_dir.join(DATA_DIR))
        .await
        .map_err(|e| GenerateError::Rename {
            path: src.display().to_string(),
            kind: e.kind(),
        })?;
    if opts.dst_path.is_none() {
        fs::rename(&build_dir, &final_path)
            .await
            .map_err(|e| GenerateError::Rename {
                path: build_dir.display().to_string(),
                kind: e.kind(),
            })?;
    }
    debug!(path = %final_path.display(), "created bag");

    Ok(open_bag(&final_path).await?)
}

/// Writes every component file except the payload into `build_dir`.
async fn stage(
    opts: &CreateOptions,
    workers: usize,
    src: &Path,
    build_dir: &Path,
) -> Result<(), GenerateError> {
    let manifests = manifests_for_dir(
        src,
        ManifestKind::Payload,
        &opts.algorithms,
        workers,
        Some(Path::new(DATA_DIR)),
    )
    .await?;
    let backend = FsBackend::new(build_dir);
    for manifest in &manifests {
        write_file(&backend, &manifest.filename(), &manifest.serialize()).await?;
    }
    write_file(
        &backend,
        BAGIT_TXT,
        &TagFile::declaration(opts.version, "UTF-8").serialize(),
    )
    .await?;

    let mut info = opts.info.clone();
    info.set(KEY_BAGGING_DATE, jiff::Zoned::now().date().to_string());
    info.set(KEY_SOFTWARE_AGENT, opts.software_agent.clone());
    let (octets, streams) = payload_oxum(src).await?;
    info.set(KEY_OXUM, format!("{octets}.{streams}"));
    write_file(&backend, BAG_INFO, &info.serialize()).await?;

    // Tag manifests cover everything staged so far; the payload is still at
    // the source and is covered by the payload manifests.
    let tag_manifests = manifests_for_dir(
        build_dir,
        ManifestKind::Tag,
        &opts.algorithms,
        workers,
        None,
    )
    .await?;
    for manifest in &tag_manifests {
        write_file(&backend, &manifest.filename(), &manifest.serialize()).await?;
    }
    Ok(())
}

/// Checksums every regular file under `dir` with every requested algorithm
/// and collects the results into one manifest per algorithm. Entry paths
/// get `prefix` prepended.
pub async fn manifests_for_dir(
    dir: &Path,
    kind: ManifestKind,
    algorithms: &[Algorithm],
    workers: usize,
    prefix: Option<&Path>,
) -> Result<Vec<Manifest>, GenerateError> {
    if algorithms.is_empty() {
        return Err(GenerateError::NoAlgorithms);
    }
    let backend: Arc<dyn Backend> = Arc::new(FsBackend::new(dir));
    let walker = backend.clone();
    let algs = algorithms.to_vec();
    let mut sumer = Checksumer::new(workers, backend, move |push| async move {
        for file in walker.walk(Path::new("")).await? {
            for alg in &algs {
                push.push(ChecksumJob::new(file.path.clone(), *alg)).await;
            }
        }
        Ok(())
    });

    let mut built: HashMap<Algorithm, Manifest> = HashMap::new();
    while let Some(job) = sumer.recv().await {
        if let Some(source) = job.error {
            return Err(GenerateError::Checksum {
                path: job.path.display().to_string(),
                source,
            });
        }
        let Some(sum) = job.sum else { continue };
        let path = match prefix {
            Some(prefix) => prefix.join(&job.path),
            None => job.path.clone(),
        };
        built
            .entry(job.algorithm)
            .or_insert_with(|| Manifest::new(kind, job.algorithm))
            .append(EncodedPath::from_raw(&path), sum)?;
    }
    if let Some(err) = sumer.push_error().await {
        return Err(err.into());
    }
    Ok(algorithms
        .iter()
        .map(|alg| {
            built
                .remove(alg)
                .unwrap_or_else(|| Manifest::new(kind, *alg))
        })
        .collect())
}

async fn payload_oxum(dir: &Path) -> Result<(u64, usize), GenerateError> {
    let mut payload = Payload::new();
    for file in FsBackend::new(dir).walk(Path::new("")).await? {
        payload.insert(file)?;
    }
    Ok(payload.oxum())
}

async fn write_file(
    backend: &FsBackend,
    name: &str,
    contents: &str,
) -> Result<(), GenerateError> {
    let write_err = |e: std::io::Error| GenerateError::Write {
        path: name.to_string(),
        kind: e.kind(),
    };
    let mut writer = backend.create(Path::new(name)).await?;
    writer
        .write_all(contents.as_bytes())
        .await
        .map_err(write_err)?;
    writer.shutdown().await.map_err(write_err)?;
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf, GenerateError> {
    std::path::absolute(path)
        .map_err(|_| GenerateError::AbsolutePath(path.display().to_string()))
}
