use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to stat `{path}`")]
    Stat { path: String, kind: std::io::ErrorKind },
    #[error("`{0}` is a directory")]
    IsDirectory(String),
    #[error("Failed to open `{path}`")]
    Open { path: String, kind: std::io::ErrorKind },
    #[error("Failed to create `{path}`")]
    Create { path: String, kind: std::io::ErrorKind },
    #[error("Failed to walk `{path}`")]
    Walk { path: String, kind: std::io::ErrorKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the backend root.
    pub path: PathBuf,
    pub size: u64,
}

pub type Reader = Box<dyn AsyncRead + Send + Unpin>;
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Storage abstraction the bag engine reads and writes through. All paths
/// are relative to the bag root. Read-side methods are called concurrently
/// from checksum workers; implementations must be shareable.
#[async_trait]
pub trait Backend: Send + Sync {
    /// File metadata. Fails on directories and on missing files.
    async fn stat(&self, path: &Path) -> Result<FileInfo, BackendError>;

    async fn open(&self, path: &Path) -> Result<Reader, BackendError>;

    async fn create(&self, path: &Path) -> Result<Writer, BackendError>;

    /// Every regular file under `root`, with paths relative to the backend
    /// root. Directories and symlinks are not reported.
    async fn walk(&self, root: &Path) -> Result<Vec<FileInfo>, BackendError>;

    /// Candidate manifest files (`*manifest-*.txt`) at the backend root.
    async fn all_manifests(&self) -> Result<Vec<PathBuf>, BackendError>;
}

/// Filesystem driver rooted at a bag directory.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn stat(&self, path: &Path) -> Result<FileInfo, BackendError> {
        let meta = fs::metadata(self.root.join(path)).await.map_err(|e| {
            BackendError::Stat {
                path: path.display().to_string(),
                kind: e.kind(),
            }
        })?;
        if meta.is_dir() {
            return Err(BackendError::IsDirectory(path.display().to_string()));
        }
        Ok(FileInfo {
            path: path.to_path_buf(),
            size: meta.len(),
        })
    }

    async fn open(&self, path: &Path) -> Result<Reader, BackendError> {
        let file = fs::File::open(self.root.join(path)).await.map_err(|e| {
            BackendError::Open {
                path: path.display().to_string(),
                kind: e.kind(),
            }
        })?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &Path) -> Result<Writer, BackendError> {
        let file = fs::File::create(self.root.join(path)).await.map_err(|e| {
            BackendError::Create {
                path: path.display().to_string(),
                kind: e.kind(),
            }
        })?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn walk(&self, root: &Path) -> Result<Vec<FileInfo>, BackendError> {
        let walk_err = |e: std::io::Error| BackendError::Walk {
            path: root.display().to_string(),
            kind: e.kind(),
        };
        let mut files = Vec::new();
        let mut stack = vec![self.root.join(root)];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(walk_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(walk_err)? {
                // file_type() does not follow symlinks, so a link out of the
                // bag never enters the traversal.
                let file_type = entry.file_type().await.map_err(walk_err)?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    let meta = entry.metadata().await.map_err(walk_err)?;
                    if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                        files.push(FileInfo {
                            path: rel.to_path_buf(),
                            size: meta.len(),
                        });
                    }
                }
            }
        }
        Ok(files)
    }

    async fn all_manifests(&self) -> Result<Vec<PathBuf>, BackendError> {
        let walk_err = |e: std::io::Error| BackendError::Walk {
            path: self.root.display().to_string(),
            kind: e.kind(),
        };
        let mut manifests = Vec::new();
        let mut entries = fs::read_dir(&self.root).await.map_err(walk_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(walk_err)? {
            if !entry.file_type().await.map_err(walk_err)?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if name.contains("manifest-") && name.ends_with(".txt") {
                    manifests.push(PathBuf::from(name));
                }
            }
        }
        Ok(manifests)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn scratch() -> (tempfile::TempDir, FsBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn stat_files_only() {
        let (dir, backend) = scratch();
        std::fs::write(dir.path().join("file.txt"), "twelve bytes").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let info = backend.stat(Path::new("file.txt")).await.unwrap();
        assert_eq!(info.size, 12);
        assert_eq!(info.path, PathBuf::from("file.txt"));

        assert_eq!(
            backend.stat(Path::new("subdir")).await,
            Err(BackendError::IsDirectory("subdir".to_string()))
        );
        assert!(matches!(
            backend.stat(Path::new("nope.txt")).await,
            Err(BackendError::Stat { kind, .. }) if kind == std::io::ErrorKind::NotFound
        ));
    }

    #[tokio::test]
    async fn open_and_create_round_trip() {
        let (_dir, backend) = scratch();
        let mut writer = backend.create(Path::new("out.txt")).await.unwrap();
        writer.write_all(b"round trip").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = backend.open(Path::new("out.txt")).await.unwrap();
        let mut contents = String::new();
        reader.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "round trip");
    }

    #[tokio::test]
    async fn walk_collects_nested_regular_files() {
        let (dir, backend) = scratch();
        std::fs::create_dir_all(dir.path().join("data/dir1/dir2")).unwrap();
        std::fs::write(dir.path().join("data/a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("data/dir1/b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("data/dir1/dir2/c.txt"), "ccc").unwrap();

        let mut files = backend.walk(Path::new("data")).await.unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            files,
            vec![
                FileInfo {
                    path: "data/a.txt".into(),
                    size: 1
                },
                FileInfo {
                    path: "data/dir1/b.txt".into(),
                    size: 2
                },
                FileInfo {
                    path: "data/dir1/dir2/c.txt".into(),
                    size: 3
                },
            ]
        );
    }

    #[tokio::test]
    async fn walk_missing_root_is_an_error() {
        let (_dir, backend) = scratch();
        assert!(matches!(
            backend.walk(Path::new("data")).await,
            Err(BackendError::Walk { .. })
        ));
    }

    #[tokio::test]
    async fn manifest_glob() {
        let (dir, backend) = scratch();
        for name in [
            "manifest-md5.txt",
            "manifest-sha512.txt",
            "tagmanifest-md5.txt",
            "bagit.txt",
            "manifest-md5.txt.bak",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("data")).unwrap();

        let mut found = backend.all_manifests().await.unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                PathBuf::from("manifest-md5.txt"),
                PathBuf::from("manifest-sha512.txt"),
                PathBuf::from("tagmanifest-md5.txt"),
            ]
        );
    }
}
