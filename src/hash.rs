//! Content hashing with a read-through cache and a bounded worker pool.
//!
//! Hashing is deliberately throttled: the workload is checksums of small
//! settings files, and bursts of hashing must not compete with the IDE for
//! CPU. Between any two hash starts the pool enforces the configured
//! minimum interval. When the job queue is full, callers fall back to
//! hashing inline rather than blocking forever.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Minimum number of pool workers.
const MIN_WORKERS: usize = 2;
/// Maximum number of pool workers.
const MAX_WORKERS: usize = 8;
/// How long a caller waits on the result channel before giving up.
const RESULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Sleep between attempts in the polling variant.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("hash calculation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of one pool job: the hashed path and its outcome.
struct HashOutcome {
    path: PathBuf,
    hash: Result<String, HashError>,
}

/// Shared throttle state: the instant the last hash started.
type ThrottleGate = Mutex<Option<Instant>>;

/// SHA-256 hasher with cache, throttle, and a fixed worker pool.
///
/// Workers are sized to the CPU count, clamped to 2..=8. Dropping the
/// hasher closes the job channel and the workers exit.
pub struct Hasher {
    cache: RwLock<HashMap<PathBuf, String>>,
    job_tx: mpsc::Sender<PathBuf>,
    result_rx: Mutex<mpsc::Receiver<HashOutcome>>,
    throttle: Arc<ThrottleGate>,
    throttle_delay: Duration,
    polling_timeout: Duration,
}

impl Hasher {
    /// Create a hasher and start its worker pool.
    pub fn new(throttle_delay: Duration, polling_timeout: Duration) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_WORKERS)
            .clamp(MIN_WORKERS, MAX_WORKERS);

        let (job_tx, job_rx) = mpsc::channel::<PathBuf>(workers * 2);
        let (result_tx, result_rx) = mpsc::channel::<HashOutcome>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let throttle = Arc::new(Mutex::new(None));

        debug!("starting {} hash workers", workers);
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let gate = throttle.clone();
            tokio::spawn(async move {
                loop {
                    let path = {
                        let mut rx = jobs.lock().await;
                        rx.recv().await
                    };
                    let Some(path) = path else { break };

                    let hash = throttled_hash(&path, &gate, throttle_delay).await;
                    if results.send(HashOutcome { path, hash }).await.is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            cache: RwLock::new(HashMap::new()),
            job_tx,
            result_rx: Mutex::new(result_rx),
            throttle,
            throttle_delay,
            polling_timeout,
        }
    }

    /// Hash a file, consulting the cache first.
    ///
    /// Submits the path to the worker pool and reads the next result. If the
    /// job queue is full the hash runs inline so the caller never blocks on
    /// a saturated pool.
    pub async fn hash(&self, path: &Path) -> Result<String, HashError> {
        if let Some(hash) = self.cache.read().await.get(path) {
            return Ok(hash.clone());
        }

        match self.job_tx.try_send(path.to_path_buf()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("hash job queue full, hashing {} inline", path.display());
                let hash = throttled_hash(path, &self.throttle, self.throttle_delay).await?;
                self.cache
                    .write()
                    .await
                    .insert(path.to_path_buf(), hash.clone());
                return Ok(hash);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Pool already shut down; hash inline.
                let hash = throttled_hash(path, &self.throttle, self.throttle_delay).await?;
                return Ok(hash);
            }
        }

        let mut rx = self.result_rx.lock().await;
        let outcome = timeout(RESULT_TIMEOUT, rx.recv())
            .await
            .map_err(|_| HashError::Timeout(RESULT_TIMEOUT))?;
        drop(rx);

        let Some(outcome) = outcome else {
            return Err(HashError::Timeout(RESULT_TIMEOUT));
        };

        let hash = outcome.hash?;
        self.cache.write().await.insert(outcome.path, hash.clone());
        Ok(hash)
    }

    /// Hash with retries, for files briefly unreadable while the IDE is
    /// mid-write. Retries every 100 ms up to the configured polling timeout.
    pub async fn hash_with_polling(&self, path: &Path) -> Result<String, HashError> {
        let start = Instant::now();
        loop {
            match self.hash(path).await {
                Ok(hash) => return Ok(hash),
                Err(e) => {
                    if start.elapsed() >= self.polling_timeout {
                        warn!(
                            "hash polling for {} gave up after {:?}: {}",
                            path.display(),
                            self.polling_timeout,
                            e
                        );
                        return Err(HashError::Timeout(self.polling_timeout));
                    }
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Drop a single cache entry, or the whole cache when `path` is `None`.
    pub async fn clear_cache(&self, path: Option<&Path>) {
        let mut cache = self.cache.write().await;
        match path {
            Some(p) => {
                cache.remove(p);
            }
            None => cache.clear(),
        }
    }
}

/// Hash a file, first sleeping long enough that hash starts are at least
/// the throttle delay apart across the whole pool.
async fn throttled_hash(
    path: &Path,
    gate: &ThrottleGate,
    delay: Duration,
) -> Result<String, HashError> {
    if !delay.is_zero() {
        let wait = {
            let last = gate.lock().await;
            last.and_then(|t| delay.checked_sub(t.elapsed()))
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                debug!("throttling hash of {} for {:?}", path.display(), wait);
                sleep(wait).await;
            }
        }
    }

    *gate.lock().await = Some(Instant::now());
    compute_file_hash(path).await
}

/// Compute the SHA-256 of a file's contents, streamed in 8 KiB chunks.
pub async fn compute_file_hash(path: &Path) -> Result<String, HashError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| HashError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|source| HashError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_compute_file_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");
        tokio::fs::write(&path, "hello world").await.unwrap();

        let hash = compute_file_hash(&path).await.unwrap();
        // SHA-256 of "hello world"
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_hash_through_pool_and_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{"a":1}"#).await.unwrap();

        let hasher = Hasher::new(Duration::ZERO, Duration::from_secs(1));
        let first = hasher.hash(&path).await.unwrap();

        // Change the file on disk; the cached value must still be returned
        // until the cache is cleared.
        tokio::fs::write(&path, r#"{"a":2}"#).await.unwrap();
        let second = hasher.hash(&path).await.unwrap();
        assert_eq!(first, second);

        hasher.clear_cache(Some(&path)).await;
        let third = hasher.hash(&path).await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_hash_unreadable_file_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");

        let hasher = Hasher::new(Duration::ZERO, Duration::from_millis(200));
        assert!(hasher.hash(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_polling_times_out_for_missing_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");

        let hasher = Hasher::new(Duration::ZERO, Duration::from_millis(250));
        let result = hasher.hash_with_polling(&missing).await;
        assert!(matches!(result, Err(HashError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_polling_succeeds_once_file_appears() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("late.json");

        let hasher = Arc::new(Hasher::new(Duration::ZERO, Duration::from_secs(5)));
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            tokio::fs::write(&writer_path, "content").await.unwrap();
        });

        let hash = hasher.hash_with_polling(&path).await.unwrap();
        writer.await.unwrap();
        assert_eq!(hash, compute_file_hash(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_throttle_spaces_hash_starts() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        tokio::fs::write(&a, "aaa").await.unwrap();
        tokio::fs::write(&b, "bbb").await.unwrap();

        let throttle = Duration::from_millis(120);
        let hasher = Hasher::new(throttle, Duration::from_secs(1));

        let start = Instant::now();
        hasher.hash(&a).await.unwrap();
        hasher.hash(&b).await.unwrap();
        // The second hash start must wait out the throttle window.
        assert!(start.elapsed() >= throttle);
    }
}
