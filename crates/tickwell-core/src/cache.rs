//! Two-tier cache: bounded in-memory map in front of on-disk entries.
//!
//! Keyed by `(namespace, key)`. The disk tier holds one file per entry under
//! a namespace subdirectory; the filename is a one-way hash of the key so
//! arbitrary caller-supplied strings can never escape into the filesystem
//! namespace. Entry freshness is derived from the file's modification time,
//! never stored redundantly inside the payload.
//!
//! The cache is a best-effort optimization: read-path I/O failures degrade
//! to "absent" rather than raising, and the acquisition pipeline stays
//! correct with the cache directory wiped.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use crate::error::CacheError;

const ENTRY_EXT: &str = "cache";

/// A successful cache lookup: the payload plus how old it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub payload: Vec<u8>,
    pub age: Duration,
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub hit_rate: f64,
    pub memory_entries: usize,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    payload: Vec<u8>,
    written_at: SystemTime,
    /// Insertion order for FIFO-by-write eviction.
    seq: u64,
}

#[derive(Debug)]
struct MemoryTier {
    map: HashMap<(String, String), MemoryEntry>,
    capacity: usize,
    next_seq: u64,
}

impl MemoryTier {
    fn insert(&mut self, namespace: &str, hashed_key: &str, payload: Vec<u8>, written_at: SystemTime) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.map.insert(
            (namespace.to_string(), hashed_key.to_string()),
            MemoryEntry {
                payload,
                written_at,
                seq,
            },
        );

        // FIFO-by-write: one eviction per insert keeps the tier bounded.
        if self.map.len() > self.capacity {
            if let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone())
            {
                self.map.remove(&oldest);
            }
        }
    }
}

/// Two-level `(namespace, key)` cache with a bounded memory tier.
pub struct TieredCache {
    base_dir: PathBuf,
    memory: Mutex<MemoryTier>,
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

impl TieredCache {
    pub const DEFAULT_MEMORY_CAPACITY: usize = 100;

    /// Open (creating if needed) a cache rooted at `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>, memory_capacity: usize) -> Result<Self, CacheError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|source| CacheError::BaseDir {
            path: base_dir.display().to_string(),
            source,
        })?;

        Ok(Self {
            base_dir,
            memory: Mutex::new(MemoryTier {
                map: HashMap::new(),
                capacity: memory_capacity.max(1),
                next_seq: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            saves: AtomicU64::new(0),
        })
    }

    /// Look up an entry no older than `max_age`.
    ///
    /// Memory tier first; a memory hit is still subject to the same age
    /// check, not assumed valid. On a memory miss the disk tier is consulted
    /// and a fresh-enough entry is promoted into memory before returning.
    pub fn get(&self, namespace: &str, key: &str, max_age: Duration) -> Option<Hit> {
        let Ok(namespace) = valid_namespace(namespace) else {
            return self.record_miss();
        };
        let hashed = hash_key(key);

        if let Some(hit) = self.memory_lookup(namespace, &hashed, Some(max_age)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }

        match self.disk_lookup(namespace, &hashed, Some(max_age)) {
            Some((payload, written_at, age)) => {
                let mut memory = self.memory.lock().expect("memory tier lock is not poisoned");
                memory.insert(namespace, &hashed, payload.clone(), written_at);
                drop(memory);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Hit { payload, age })
            }
            None => self.record_miss(),
        }
    }

    /// Look up an entry of any age.
    ///
    /// Used only by the stale rung of the degradation ladder. Stale reads do
    /// not repopulate the memory tier.
    pub fn get_any_age(&self, namespace: &str, key: &str) -> Option<Hit> {
        let Ok(namespace) = valid_namespace(namespace) else {
            return self.record_miss();
        };
        let hashed = hash_key(key);

        if let Some(hit) = self.memory_lookup(namespace, &hashed, None) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(hit);
        }

        match self.disk_lookup(namespace, &hashed, None) {
            Some((payload, _, age)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Hit { payload, age })
            }
            None => self.record_miss(),
        }
    }

    /// Store an entry, superseding any previous value for `(namespace, key)`.
    ///
    /// The disk entry is written first (atomically, temp-then-rename) so a
    /// crash can leave at most a stale-but-valid entry, never a memory-only
    /// ghost. The memory tier is updated only after the disk write lands.
    pub fn set(&self, namespace: &str, key: &str, payload: &[u8]) -> Result<(), CacheError> {
        let namespace = valid_namespace(namespace)?;
        let hashed = hash_key(key);

        let dir = self.namespace_dir(namespace);
        self.persist_entry(namespace, &dir, &hashed, payload)?;

        let mut memory = self.memory.lock().expect("memory tier lock is not poisoned");
        memory.insert(namespace, &hashed, payload.to_vec(), SystemTime::now());
        drop(memory);

        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove one entry from both tiers. Returns whether anything existed.
    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let Ok(namespace) = valid_namespace(namespace) else {
            return false;
        };
        let hashed = hash_key(key);

        let mut memory = self.memory.lock().expect("memory tier lock is not poisoned");
        let in_memory = memory
            .map
            .remove(&(namespace.to_string(), hashed.clone()))
            .is_some();
        drop(memory);

        let on_disk = fs::remove_file(self.entry_path(namespace, &hashed)).is_ok();
        in_memory || on_disk
    }

    /// Drop every entry in one namespace. Returns the number of disk entries
    /// removed.
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let Ok(namespace) = valid_namespace(namespace) else {
            return 0;
        };

        let mut memory = self.memory.lock().expect("memory tier lock is not poisoned");
        memory.map.retain(|(ns, _), _| ns != namespace);
        drop(memory);

        let mut removed = 0;
        if let Ok(entries) = fs::read_dir(self.namespace_dir(namespace)) {
            for entry in entries.flatten() {
                if is_cache_entry(&entry.path()) && fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Sweep every namespace, dropping entries older than `max_age` from
    /// both tiers. Returns the number of disk entries removed.
    pub fn clean_expired(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();

        let mut memory = self.memory.lock().expect("memory tier lock is not poisoned");
        memory.map.retain(|_, entry| {
            now.duration_since(entry.written_at)
                .map(|age| age <= max_age)
                .unwrap_or(true)
        });
        drop(memory);

        let mut removed = 0;
        let Ok(namespaces) = fs::read_dir(&self.base_dir) else {
            return 0;
        };
        for namespace in namespaces.flatten() {
            let Ok(entries) = fs::read_dir(namespace.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_cache_entry(&path) {
                    continue;
                }
                let expired = entry_age(&path, now).map(|age| age > max_age).unwrap_or(false);
                if expired && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let memory_entries = self
            .memory
            .lock()
            .expect("memory tier lock is not poisoned")
            .map
            .len();

        CacheStats {
            hits,
            misses,
            saves: self.saves.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            memory_entries,
        }
    }

    fn record_miss(&self) -> Option<Hit> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn memory_lookup(&self, namespace: &str, hashed: &str, max_age: Option<Duration>) -> Option<Hit> {
        let memory = self.memory.lock().expect("memory tier lock is not poisoned");
        let entry = memory
            .map
            .get(&(namespace.to_string(), hashed.to_string()))?;
        let age = SystemTime::now()
            .duration_since(entry.written_at)
            .unwrap_or_default();
        if let Some(max_age) = max_age {
            if age > max_age {
                return None;
            }
        }
        Some(Hit {
            payload: entry.payload.clone(),
            age,
        })
    }

    fn disk_lookup(
        &self,
        namespace: &str,
        hashed: &str,
        max_age: Option<Duration>,
    ) -> Option<(Vec<u8>, SystemTime, Duration)> {
        let path = self.entry_path(namespace, hashed);
        let metadata = fs::metadata(&path).ok()?;
        let written_at = metadata.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(written_at)
            .unwrap_or_default();
        if let Some(max_age) = max_age {
            if age > max_age {
                return None;
            }
        }
        match fs::read(&path) {
            Ok(payload) => Some((payload, written_at, age)),
            Err(error) => {
                tracing::warn!(namespace, %error, "cache disk read failed, treating as absent");
                None
            }
        }
    }

    fn persist_entry(
        &self,
        namespace: &str,
        dir: &Path,
        hashed: &str,
        payload: &[u8],
    ) -> Result<(), CacheError> {
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(payload)?;
            tmp.flush()?;
            // Atomic rename: concurrent writers race whole entries, never
            // interleave partial bytes.
            tmp.persist(dir.join(entry_file_name(hashed)))
                .map_err(|persist| persist.error)?;
            Ok(())
        };

        write().map_err(|source| {
            tracing::warn!(namespace, error = %source, "cache disk write failed");
            CacheError::DiskWrite {
                namespace: namespace.to_string(),
                source,
            }
        })
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.base_dir.join(namespace)
    }

    fn entry_path(&self, namespace: &str, hashed: &str) -> PathBuf {
        self.namespace_dir(namespace).join(entry_file_name(hashed))
    }
}

fn entry_file_name(hashed: &str) -> String {
    format!("{hashed}.{ENTRY_EXT}")
}

fn is_cache_entry(path: &Path) -> bool {
    path.extension().map(|ext| ext == ENTRY_EXT).unwrap_or(false)
}

fn entry_age(path: &Path, now: SystemTime) -> Option<Duration> {
    let written_at = fs::metadata(path).ok()?.modified().ok()?;
    Some(now.duration_since(written_at).unwrap_or_default())
}

/// Deterministic one-way hash of a caller-supplied key.
fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

fn valid_namespace(namespace: &str) -> Result<&str, CacheError> {
    let ok = !namespace.is_empty()
        && namespace
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if ok {
        Ok(namespace)
    } else {
        Err(CacheError::InvalidNamespace(namespace.to_string()))
    }
}
