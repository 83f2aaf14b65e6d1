use crate::algorithm::Algorithm;
use crate::backend::{Backend, BackendError};
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot, Mutex};

/// Read chunk size when streaming a file into a hasher (64 KiB).
const HASH_CHUNK_SIZE: usize = 64 * 1024;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Failed to read file")]
    ReadFile(std::io::ErrorKind),
}

/// A digest held as raw bytes. Hex encoding only happens at the manifest
/// wire boundary.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum(Vec<u8>);

impl Checksum {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Checksum {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// One unit of work for the [Checksumer]: hash `path` with `algorithm`.
///
/// A completed job either carries a computed sum or a non-nil error. Jobs
/// that enter the pipeline already carrying an error pass through unhashed.
#[derive(Clone, Debug)]
pub struct ChecksumJob {
    pub path: PathBuf,
    pub algorithm: Algorithm,
    pub expected: Option<Checksum>,
    pub sum: Option<Checksum>,
    pub error: Option<ChecksumError>,
}

impl ChecksumJob {
    pub fn new(path: impl Into<PathBuf>, algorithm: Algorithm) -> Self {
        Self {
            path: path.into(),
            algorithm,
            expected: None,
            sum: None,
            error: None,
        }
    }

    pub fn expecting(path: impl Into<PathBuf>, algorithm: Algorithm, expected: Checksum) -> Self {
        Self {
            expected: Some(expected),
            ..Self::new(path, algorithm)
        }
    }

    /// Whether the computed digest matches the expected one. False when
    /// either side is missing.
    pub fn sum_is_expected(&self) -> bool {
        matches!((&self.sum, &self.expected), (Some(sum), Some(expected)) if sum == expected)
    }
}

/// Handed to the caller's push function to enqueue jobs.
#[derive(Clone)]
pub struct JobPusher {
    jobs: mpsc::Sender<ChecksumJob>,
    cancel: Arc<AtomicBool>,
}

impl JobPusher {
    /// Queues a job, blocking while all workers are busy. After
    /// [Checksumer::cancel] the job is silently dropped.
    pub async fn push(&self, job: ChecksumJob) {
        if self.cancel.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.jobs.send(job).await;
    }
}

/// A pool of hashing workers fed by a caller-supplied push function.
///
/// The push function runs on its own task; each `push` hands one job to an
/// idle worker (or blocks until one frees up, which is the pipeline's flow
/// control). Workers stream file bytes from the backend into the job's
/// hasher and emit completed jobs in completion order, not push order.
/// [Checksumer::recv] returns `None` once every pushed job has been drained.
pub struct Checksumer {
    results: mpsc::Receiver<ChecksumJob>,
    push_error: Option<oneshot::Receiver<Result<(), BackendError>>>,
    cancel: Arc<AtomicBool>,
}

impl Checksumer {
    pub fn new<F, Fut>(workers: usize, backend: Arc<dyn Backend>, push_fn: F) -> Self
    where
        F: FnOnce(JobPusher) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BackendError>> + Send + 'static,
    {
        let workers = workers.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = mpsc::channel(1);
        let (push_error_tx, push_error_rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let pusher = JobPusher {
            jobs: jobs_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            // The pusher holds the only job sender; returning closes the
            // channel and lets the workers wind down.
            let outcome = push_fn(pusher).await;
            let _ = push_error_tx.send(outcome);
        });

        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        for _ in 0..workers {
            let jobs_rx = jobs_rx.clone();
            let results_tx = results_tx.clone();
            let backend = backend.clone();
            tokio::spawn(async move {
                loop {
                    let job = { jobs_rx.lock().await.recv().await };
                    let Some(mut job) = job else { break };
                    check(backend.as_ref(), &mut job).await;
                    if results_tx.send(job).await.is_err() {
                        break;
                    }
                }
            });
        }
        // Workers hold the remaining result senders; the channel closes when
        // the last worker exits.
        drop(results_tx);

        Self {
            results: results_rx,
            push_error: Some(push_error_rx),
            cancel,
        }
    }

    /// Next completed job, or `None` once the pipeline has drained.
    pub async fn recv(&mut self) -> Option<ChecksumJob> {
        self.results.recv().await
    }

    /// Terminal error from the push function, if any. Resolves after the
    /// push function has returned.
    pub async fn push_error(&mut self) -> Option<BackendError> {
        match self.push_error.take() {
            Some(rx) => rx.await.ok().and_then(Result::err),
            None => None,
        }
    }

    /// Stops new jobs from entering the pipeline. In-flight jobs complete
    /// normally and are still emitted. Idempotent.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

async fn check(backend: &dyn Backend, job: &mut ChecksumJob) {
    if job.error.is_some() {
        return;
    }
    let mut file = match backend.open(&job.path).await {
        Ok(file) => file,
        Err(err) => {
            job.error = Some(err.into());
            return;
        }
    };
    let mut hasher = job.algorithm.hasher();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(err) => {
                job.error = Some(ChecksumError::ReadFile(err.kind()));
                return;
            }
        }
    }
    job.sum = Some(hasher.finalize());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::FsBackend;
    use std::collections::BTreeMap;

    fn scratch_backend(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<dyn Backend>) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }
        let backend: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path()));
        (dir, backend)
    }

    #[test]
    fn hex_round_trip() {
        let sum = Checksum::from_hex("b1946ac92492d2347c6235b4d2611184").unwrap();
        assert_eq!(sum.to_string(), "b1946ac92492d2347c6235b4d2611184");
        assert!(Checksum::from_hex("notahexstring!").is_err());
    }

    #[test]
    fn expectation() {
        let mut job = ChecksumJob::expecting(
            "a.txt",
            Algorithm::Md5,
            Checksum::from_hex("b1946ac92492d2347c6235b4d2611184").unwrap(),
        );
        assert!(!job.sum_is_expected());
        job.sum = Some(Checksum::from_hex("b1946ac92492d2347c6235b4d2611184").unwrap());
        assert!(job.sum_is_expected());
        job.sum = Some(Checksum::from_hex("d41d8cd98f00b204e9800998ecf8427e").unwrap());
        assert!(!job.sum_is_expected());
    }

    #[tokio::test]
    async fn basic() {
        let (_dir, backend) = scratch_backend(&[
            ("one.txt", "first file"),
            ("two.txt", "second file"),
            ("three.txt", "third file"),
            ("four.txt", "fourth file"),
        ]);
        for workers in 1..4 {
            let mut sumer = Checksumer::new(workers, backend.clone(), |push| async move {
                push.push(ChecksumJob::new("one.txt", Algorithm::Md5)).await;
                push.push(ChecksumJob::new("two.txt", Algorithm::Sha1)).await;
                push.push(ChecksumJob::new("three.txt", Algorithm::Sha256)).await;
                push.push(ChecksumJob::new("four.txt", Algorithm::Sha512)).await;
                Ok(())
            });
            let mut results = Vec::new();
            while let Some(job) = sumer.recv().await {
                assert!(job.error.is_none(), "unexpected error: {:?}", job.error);
                results.push(job.sum.unwrap());
            }
            assert_eq!(results.len(), 4, "with {workers} workers");
            assert_eq!(sumer.push_error().await, None);
        }
    }

    #[tokio::test]
    async fn result_multiset_matches_pushed_jobs() {
        let (_dir, backend) = scratch_backend(&[
            ("one.txt", "first file"),
            ("two.txt", "second file"),
            ("three.txt", "third file"),
        ]);
        let files = ["one.txt", "two.txt", "three.txt"];
        for workers in [1, 2, 4, 8] {
            let mut sumer = Checksumer::new(workers, backend.clone(), move |push| async move {
                for file in files {
                    for alg in [Algorithm::Md5, Algorithm::Sha256] {
                        push.push(ChecksumJob::new(file, alg)).await;
                    }
                }
                Ok(())
            });
            let mut seen: BTreeMap<(PathBuf, Algorithm), usize> = BTreeMap::new();
            while let Some(job) = sumer.recv().await {
                *seen.entry((job.path.clone(), job.algorithm)).or_default() += 1;
            }
            let mut expected: BTreeMap<(PathBuf, Algorithm), usize> = BTreeMap::new();
            for file in files {
                for alg in [Algorithm::Md5, Algorithm::Sha256] {
                    *expected.entry((PathBuf::from(file), alg)).or_default() += 1;
                }
            }
            assert_eq!(seen, expected, "with {workers} workers");
        }
    }

    #[tokio::test]
    async fn cancel_mid_stream() {
        let (_dir, backend) = scratch_backend(&[("file.txt", "some payload")]);
        let total = 1000;
        let mut sumer = Checksumer::new(2, backend, move |push| async move {
            for _ in 0..total {
                push.push(ChecksumJob::new("file.txt", Algorithm::Md5)).await;
            }
            Ok(())
        });
        let mut received = 0;
        while let Some(job) = sumer.recv().await {
            assert!(job.error.is_none());
            received += 1;
            if received == 5 {
                sumer.cancel();
                assert!(sumer.canceled());
            }
        }
        assert!(received >= 5);
        assert!(
            received < total,
            "cancellation should drop most of the queue, got {received}"
        );
    }

    #[tokio::test]
    async fn cancel_before_any_push() {
        let (_dir, backend) = scratch_backend(&[("file.txt", "some payload")]);
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut sumer = Checksumer::new(1, backend, move |push| async move {
            // Wait until the test has flipped the latch.
            let _ = ready_rx.await;
            push.push(ChecksumJob::new("file.txt", Algorithm::Md5)).await;
            Ok(())
        });
        sumer.cancel();
        ready_tx.send(()).unwrap();
        assert!(sumer.recv().await.is_none());
    }

    #[tokio::test]
    async fn push_error_is_delivered() {
        let (_dir, backend) = scratch_backend(&[("file.txt", "some payload")]);
        let mut sumer = Checksumer::new(1, backend, |push| async move {
            push.push(ChecksumJob::new("file.txt", Algorithm::Md5)).await;
            Err(BackendError::Walk {
                path: "file.txt".into(),
                kind: std::io::ErrorKind::Other,
            })
        });
        let mut results = 0;
        while let Some(job) = sumer.recv().await {
            assert!(job.error.is_none());
            results += 1;
        }
        assert_eq!(results, 1);
        assert!(sumer.push_error().await.is_some());
    }

    #[tokio::test]
    async fn job_errors_pass_through() {
        let (_dir, backend) = scratch_backend(&[]);
        let mut sumer = Checksumer::new(2, backend, |push| async move {
            let mut poisoned = ChecksumJob::new("never-opened.txt", Algorithm::Md5);
            poisoned.error = Some(ChecksumError::ReadFile(std::io::ErrorKind::Other));
            push.push(poisoned).await;
            push.push(ChecksumJob::new("missing.txt", Algorithm::Md5)).await;
            Ok(())
        });
        let mut errors = 0;
        while let Some(job) = sumer.recv().await {
            assert!(job.sum.is_none());
            assert!(job.error.is_some());
            errors += 1;
        }
        assert_eq!(errors, 2);
    }
}
