//! Disk-based cache of encoded image bytes, persisted across sessions.
//!
//! Every filesystem operation runs on one background worker fed by a
//! command queue, so operations are applied in submission order.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Errors opening the disk cache. Reads and writes never fail visibly.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DiskCacheError {
    #[error("failed to create cache dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Total size and file count of the cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Sum of file sizes in bytes.
    pub bytes: u64,
    /// Number of cached files.
    pub files: usize,
}

/// Result of one eviction pass.
#[derive(Debug, Clone, Default)]
pub struct EvictionResult {
    /// Number of files deleted.
    pub files_deleted: usize,
    /// Total bytes freed.
    pub bytes_freed: u64,
    /// Cache size before eviction.
    pub size_before: u64,
    /// Cache size after eviction.
    pub size_after: u64,
}

enum DiskCommand {
    Get {
        key: CacheKey,
        reply: oneshot::Sender<Option<Bytes>>,
    },
    Set {
        key: CacheKey,
        bytes: Bytes,
    },
    Remove {
        key: CacheKey,
    },
    Contains {
        key: CacheKey,
        reply: oneshot::Sender<bool>,
    },
    Usage {
        reply: oneshot::Sender<DiskUsage>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Disk cache keyed by the SHA-256 of the cache key.
///
/// File modification time is the recency signal: reads refresh it and
/// eviction removes the oldest files first. When the directory grows past
/// `max_size`, files are deleted until it is at most 75% of `max_size`.
pub struct DiskCache {
    cache_dir: PathBuf,
    max_size: u64,
    commands: mpsc::UnboundedSender<DiskCommand>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl DiskCache {
    /// Opens a cache in `cache_dir`, creating it if needed.
    ///
    /// Spawns the I/O worker, whose first job is an eviction pass over
    /// whatever a previous session left behind. Must be called within a
    /// Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub async fn open(cache_dir: PathBuf, max_size: u64) -> Result<Self, DiskCacheError> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|source| DiskCacheError::CreateDir {
                path: cache_dir.clone(),
                source,
            })?;

        let (commands, rx) = mpsc::unbounded_channel();
        let worker = DiskWorker {
            cache_dir: cache_dir.clone(),
            max_size,
            current_size: 0,
        };
        tokio::spawn(worker.run(rx));

        debug!(path = %cache_dir.display(), max_size, "Opened disk cache");

        Ok(Self {
            cache_dir,
            max_size,
            commands,
        })
    }

    /// Cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Size ceiling in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Path of the file backing `key`.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    /// Reads the bytes stored for `key` and refreshes their recency.
    /// Missing, empty, or unreadable entries are all a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let (reply, rx) = oneshot::channel();
        self.send(DiskCommand::Get {
            key: key.clone(),
            reply,
        });
        rx.await.ok().flatten()
    }

    /// Queues a write of `bytes` under `key`. Failures are logged and dropped.
    pub fn set(&self, key: CacheKey, bytes: Bytes) {
        self.send(DiskCommand::Set { key, bytes });
    }

    /// Queues removal of the entry for `key`.
    pub fn remove(&self, key: CacheKey) {
        self.send(DiskCommand::Remove { key });
    }

    /// Returns true if an entry exists for `key`. Does not refresh recency.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(DiskCommand::Contains {
            key: key.clone(),
            reply,
        });
        rx.await.unwrap_or(false)
    }

    /// Scans the cache directory.
    pub async fn usage(&self) -> DiskUsage {
        let (reply, rx) = oneshot::channel();
        self.send(DiskCommand::Usage { reply });
        rx.await.unwrap_or_default()
    }

    /// Removes the cache directory and recreates it empty.
    pub async fn clear(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(DiskCommand::Clear { reply });
        let _ = rx.await;
    }

    /// Waits until every previously queued operation has been applied.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(DiskCommand::Flush { reply });
        let _ = rx.await;
    }

    fn send(&self, command: DiskCommand) {
        if self.commands.send(command).is_err() {
            warn!("Disk cache worker has stopped; dropping operation");
        }
    }
}

/// Owns the cache directory on the I/O worker.
///
/// `current_size` is a running total kept in step with writes, removals and
/// clears. The directory is only rescanned when the total passes `max_size`.
struct DiskWorker {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: u64,
}

impl DiskWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<DiskCommand>) {
        self.current_size = self.scan().await.iter().map(|f| f.size).sum();
        if let Some(result) = self.evict_if_needed().await {
            info!(
                files_deleted = result.files_deleted,
                bytes_freed = result.bytes_freed,
                size_after = result.size_after,
                "Startup disk cache eviction complete"
            );
        }

        while let Some(command) = commands.recv().await {
            match command {
                DiskCommand::Get { key, reply } => {
                    let _ = reply.send(self.read(&key).await);
                }
                DiskCommand::Set { key, bytes } => {
                    self.write(&key, &bytes).await;
                    self.evict_if_needed().await;
                }
                DiskCommand::Remove { key } => self.delete(&key).await,
                DiskCommand::Contains { key, reply } => {
                    let exists = fs::try_exists(self.path_for(&key)).await.unwrap_or(false);
                    let _ = reply.send(exists);
                }
                DiskCommand::Usage { reply } => {
                    let files = self.scan().await;
                    self.current_size = files.iter().map(|f| f.size).sum();
                    let _ = reply.send(DiskUsage {
                        bytes: self.current_size,
                        files: files.len(),
                    });
                }
                DiskCommand::Clear { reply } => {
                    self.clear().await;
                    let _ = reply.send(());
                }
                DiskCommand::Flush { reply } => {
                    let _ = reply.send(());
                }
            }
        }

        trace!("Disk cache worker stopped");
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    async fn read(&self, key: &CacheKey) -> Option<Bytes> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                touch(path).await;
                Some(Bytes::from(bytes))
            }
            Ok(_) => {
                debug!(key = %key, "Empty disk cache entry treated as miss");
                None
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to read disk cache entry");
                }
                trace!(key = %key, "Disk cache miss");
                None
            }
        }
    }

    async fn write(&mut self, key: &CacheKey, bytes: &[u8]) {
        let path = self.path_for(key);
        let replaced = file_size(&path).await;
        self.current_size = self.current_size.saturating_sub(replaced);

        let result = async {
            let mut file = fs::File::create(&path).await?;
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.current_size += bytes.len() as u64;
                debug!(key = %key, path = %path.display(), size = bytes.len(), "Stored image in disk cache");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to write disk cache entry");
                let _ = fs::remove_file(&path).await;
            }
        }
    }

    async fn delete(&mut self, key: &CacheKey) {
        let path = self.path_for(key);
        let size = file_size(&path).await;
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to remove disk cache entry");
            }
        } else {
            self.current_size = self.current_size.saturating_sub(size);
            debug!(key = %key, "Removed disk cache entry");
        }
    }

    async fn clear(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.cache_dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(error = %e, "Failed to remove disk cache directory");
        }
        if let Err(e) = fs::create_dir_all(&self.cache_dir).await {
            warn!(error = %e, "Failed to recreate disk cache directory");
        }
        self.current_size = 0;
        debug!("Cleared disk cache");
    }

    async fn scan(&self) -> Vec<CachedFile> {
        let mut files = Vec::new();
        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return files;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            files.push(CachedFile {
                path: entry.path(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: meta.len(),
            });
        }

        files
    }

    /// Deletes oldest files until the directory is at most 75% of the ceiling.
    /// Does nothing while the running size is within the ceiling.
    async fn evict_if_needed(&mut self) -> Option<EvictionResult> {
        if self.current_size <= self.max_size {
            return None;
        }

        let mut files = self.scan().await;
        let size_before: u64 = files.iter().map(|f| f.size).sum();
        self.current_size = size_before;
        if size_before <= self.max_size {
            return None;
        }

        let target = eviction_target(self.max_size);
        debug!(
            current_size = size_before,
            max_size = self.max_size,
            target,
            "Disk cache over limit, cleaning up"
        );

        files.sort_by_key(|f| f.modified);

        let mut result = EvictionResult {
            size_before,
            size_after: size_before,
            ..EvictionResult::default()
        };

        for file in files {
            if result.size_after <= target {
                break;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    trace!(path = %file.path.display(), "Removed old cache file");
                    result.size_after -= file.size;
                    result.bytes_freed += file.size;
                    result.files_deleted += 1;
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Failed to remove old cache file");
                }
            }
        }

        debug!(
            freed_size = result.bytes_freed,
            freed_count = result.files_deleted,
            size_after = result.size_after,
            "Disk cache cleanup complete"
        );

        self.current_size = result.size_after;
        Some(result)
    }
}

/// 75% of `max_size`, rounded down.
const fn eviction_target(max_size: u64) -> u64 {
    max_size / 4 * 3 + max_size % 4 * 3 / 4
}

struct CachedFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Size of the file at `path`, or 0 if it does not exist.
async fn file_size(path: &Path) -> u64 {
    fs::metadata(path).await.map_or(0, |meta| meta.len())
}

/// Refreshes a file's modification time. Best-effort.
async fn touch(path: PathBuf) {
    let result = tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await;

    if let Ok(Err(e)) = result {
        trace!(error = %e, "Failed to refresh cache entry recency");
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "imgkit").map_or_else(
        || std::env::temp_dir().join("imgkit").join("cache").join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}
