use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of appending a chunk to a partial upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Chunk written; the new received byte count.
    Appended(u64),
    /// Offset did not match; the current received byte count.
    OffsetMismatch(u64),
    /// Chunk would push the object past the size limit.
    TooLarge,
}

/// Result of finishing an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// Object moved into place; hex SHA-256 of its bytes.
    Stored { digest: String },
    /// Bytes on disk hash to `digest`, not the expected value.
    HashMismatch { digest: String },
    /// Nothing was uploaded.
    Empty,
    /// No partial object for this upload.
    Missing,
}

/// On-disk object storage.
///
/// Uploads grow as flat files under `{dir}/partial/{upload_id}` and are
/// renamed into `{dir}/objects/{key}` on completion, so a reader never sees
/// a half-written object.
pub struct ObjectStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl ObjectStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(dir.join("partial")).await?;
        fs::create_dir_all(dir.join("objects")).await?;
        info!("Object storage directory: {}", dir.display());
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn partial_path(&self, upload_id: &str) -> PathBuf {
        self.dir.join("partial").join(upload_id)
    }

    /// Callers build keys from a room UUID and a fixed object name.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.dir.join("objects").join(key)
    }

    /// Start an empty partial object.
    pub async fn begin(&self, upload_id: &str) -> Result<()> {
        fs::File::create(self.partial_path(upload_id)).await?;
        Ok(())
    }

    /// Bytes received so far, or `None` for an unknown upload.
    pub async fn received(&self, upload_id: &str) -> Result<Option<u64>> {
        match fs::metadata(self.partial_path(upload_id)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Append `data` if `offset` equals the bytes already received.
    pub async fn append(
        &self,
        upload_id: &str,
        offset: u64,
        data: &[u8],
        max_bytes: u64,
    ) -> Result<AppendOutcome> {
        let _guard = self.lock.lock().await;

        let path = self.partial_path(upload_id);
        let mut file = fs::OpenOptions::new().append(true).open(&path).await?;
        let received = file.metadata().await?.len();

        if offset != received {
            return Ok(AppendOutcome::OffsetMismatch(received));
        }
        if received + data.len() as u64 > max_bytes {
            return Ok(AppendOutcome::TooLarge);
        }

        file.write_all(data).await?;
        file.flush().await?;

        Ok(AppendOutcome::Appended(received + data.len() as u64))
    }

    /// Verify a partial object against `expected_sha256` and move it into
    /// place under `key`, replacing any previous object.
    ///
    /// Appends are locked out from hashing through the rename, so the stored
    /// object is exactly the bytes the digest covered.
    pub async fn complete(
        &self,
        upload_id: &str,
        key: &str,
        expected_sha256: &str,
    ) -> Result<CompleteOutcome> {
        let _guard = self.lock.lock().await;

        let path = self.partial_path(upload_id);
        let received = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CompleteOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };
        if received == 0 {
            return Ok(CompleteOutcome::Empty);
        }

        let digest = sha256_file(&path).await?;
        if !digest.eq_ignore_ascii_case(expected_sha256.trim()) {
            return Ok(CompleteOutcome::HashMismatch { digest });
        }

        let target = self.object_path(key);
        let Some(parent) = target.parent() else {
            bail!("object key '{}' has no parent", key);
        };
        fs::create_dir_all(parent).await?;
        fs::rename(&path, &target).await?;
        info!("Stored object {} ({} bytes)", key, received);
        Ok(CompleteOutcome::Stored { digest })
    }

    /// Open a stored object for reading, or `None` if absent.
    pub async fn open(&self, key: &str) -> Result<Option<(fs::File, u64)>> {
        match fs::File::open(self.object_path(key)).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok(Some((file, len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop a partial upload. Missing files are fine.
    pub async fn discard(&self, upload_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        match fs::remove_file(self.partial_path(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Partial upload {} already gone", upload_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Hex SHA-256 of a file.
async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
