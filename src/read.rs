use crate::backend::{Backend, BackendError, FsBackend};
use crate::encoding::{decode_tag_bytes, EncodingError};
use crate::fetch::{parse_fetch, FetchError};
use crate::manifest::{Manifest, ManifestError, ManifestKind};
use crate::metadata::{TagFile, TagFileError};
use crate::payload::{Payload, PathCollision};
use crate::{Bag, BAG_INFO, BAGIT_TXT, DATA_DIR, FETCH_TXT};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("Failed to read {file}")]
    Io {
        file: String,
        kind: std::io::ErrorKind,
    },
    #[error("While parsing {file}: {source}")]
    TagFile { file: String, source: TagFileError },
    #[error("While parsing {file}: {source}")]
    Manifest { file: String, source: ManifestError },
    #[error("While parsing fetch.txt: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Collision(#[from] PathCollision),
    #[error("Byte order mark in bagit.txt requires BagIt 1.0")]
    UnexpectedBom,
}

/// Opens and fully hydrates the bag at `path`. An error means the bag is
/// unusable; completeness and validity are separate questions.
pub async fn open_bag(path: impl AsRef<Path>) -> Result<Bag, ReadError> {
    let backend: Arc<dyn Backend> = Arc::new(FsBackend::new(path.as_ref()));
    Bag::hydrate(backend).await
}

impl Bag {
    /// Loads every component file reachable through `backend`: the
    /// `bagit.txt` declaration, optional `bag-info.txt` and `fetch.txt`,
    /// the payload map, and all payload and tag manifests.
    pub async fn hydrate(backend: Arc<dyn Backend>) -> Result<Self, ReadError> {
        // bagit.txt is required to be UTF-8 no matter what it declares.
        let bytes = read_file(backend.as_ref(), BAGIT_TXT).await?;
        let text = decode_tag_bytes(&bytes, "UTF-8")?;
        let declaration = TagFile::parse(&text).map_err(|source| ReadError::TagFile {
            file: BAGIT_TXT.to_string(),
            source,
        })?;
        let decl = declaration
            .bag_declaration()
            .map_err(|source| ReadError::TagFile {
                file: BAGIT_TXT.to_string(),
                source,
            })?;
        if declaration.has_bom() && decl.version < (1, 0) {
            return Err(ReadError::UnexpectedBom);
        }

        let info = match read_optional(backend.as_ref(), BAG_INFO).await? {
            Some(bytes) => {
                let text = decode_tag_bytes(&bytes, &decl.encoding)?;
                TagFile::parse(&text).map_err(|source| ReadError::TagFile {
                    file: BAG_INFO.to_string(),
                    source,
                })?
            }
            None => TagFile::new(),
        };

        let fetch = match read_optional(backend.as_ref(), FETCH_TXT).await? {
            Some(bytes) => parse_fetch(&decode_tag_bytes(&bytes, &decl.encoding)?)?,
            None => Vec::new(),
        };

        let mut payload = Payload::new();
        for file in backend.walk(Path::new(DATA_DIR)).await? {
            payload.insert(file)?;
        }

        let mut manifests = Vec::new();
        let mut tag_manifests = Vec::new();
        let mut candidates = backend.all_manifests().await?;
        candidates.sort();
        for name in candidates {
            let name = name.to_string_lossy().into_owned();
            let mut manifest =
                Manifest::from_filename(&name).map_err(|source| ReadError::Manifest {
                    file: name.clone(),
                    source,
                })?;
            let bytes = read_file(backend.as_ref(), &name).await?;
            manifest
                .parse(&decode_tag_bytes(&bytes, &decl.encoding)?)
                .map_err(|source| ReadError::Manifest {
                    file: name.clone(),
                    source,
                })?;
            match manifest.kind() {
                ManifestKind::Payload => manifests.push(manifest),
                ManifestKind::Tag => tag_manifests.push(manifest),
            }
        }
        debug!(
            major = decl.version.0,
            minor = decl.version.1,
            payload_files = payload.len(),
            manifests = manifests.len(),
            tag_manifests = tag_manifests.len(),
            "hydrated bag"
        );

        Ok(Bag {
            backend,
            version: decl.version,
            encoding: decl.encoding,
            payload,
            info,
            manifests,
            tag_manifests,
            fetch,
        })
    }
}

async fn read_file(backend: &dyn Backend, name: &str) -> Result<Vec<u8>, ReadError> {
    let mut reader = backend.open(Path::new(name)).await?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| ReadError::Io {
            file: name.to_string(),
            kind: e.kind(),
        })?;
    Ok(bytes)
}

/// Reads a bag-root file that is allowed to be absent.
async fn read_optional(backend: &dyn Backend, name: &str) -> Result<Option<Vec<u8>>, ReadError> {
    match backend.stat(Path::new(name)).await {
        Ok(_) => Ok(Some(read_file(backend, name).await?)),
        Err(BackendError::Stat { kind, .. }) if kind == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
