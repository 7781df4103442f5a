//! Sharded, size-bounded local cache of PLM item records (spec.md §4.4).
//!
//! Every lookup the domain API performs for an item by number goes through
//! this cache before it falls back to a network call. Entries are split
//! across numbered shard files addressed by a stable hash of the item
//! number, the same way a sparse registry index spreads crates across
//! `{2}/{2}/{name}`-style paths rather than one giant file — here the split
//! is by shard count rather than name length, because item numbers don't
//! have the crates.io convention of meaningful short prefixes.
//!
//! # Example
//!
//! ```
//! use plm_sync_cache::ItemCache;
//! use plm_sync_types::CacheEntry;
//! use tempfile::tempdir;
//!
//! let dir = tempdir().unwrap();
//! let mut cache = ItemCache::open(dir.path()).unwrap();
//! cache.upsert(CacheEntry {
//!     id: "id-1".into(),
//!     number: "CABLE-9".into(),
//!     name: "Patch cable".into(),
//!     description: None,
//!     revision: Some("A".into()),
//!     is_assembly: false,
//!     assembly_type: None,
//!     category_name: None,
//!     lifecycle_name: None,
//! }).unwrap();
//! cache.save().unwrap();
//!
//! let reopened = ItemCache::open(dir.path()).unwrap();
//! assert!(reopened.get("CABLE-9").is_some());
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use plm_sync_types::{CacheEntry, PlmError, Result};
use serde::{Deserialize, Serialize};

/// Soft per-shard size ceiling (spec.md §4.4: "~90KB"). A shard that grows
/// past this on save triggers a doubling reshard on the next `save`.
pub const SHARD_SOFT_CEILING_BYTES: u64 = 90 * 1024;

/// Safety envelope for a single `refresh()` payload, before it is split
/// across shards (spec.md §4.4, §8). A full item pull that serializes past
/// this is trimmed to its first entries rather than accepted whole — bigger
/// than one shard's ceiling since it bounds the entire pull, not one shard
/// of it after the fact.
pub const REFRESH_SAFETY_ENVELOPE_BYTES: usize = 2 * 1024 * 1024;

const MANIFEST_FILE: &str = "manifest.json";
const DEFAULT_SHARD_COUNT: u32 = 4;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    shard_count: u32,
    entry_count: usize,
}

impl Default for Manifest {
    fn default() -> Self {
        Self { shard_count: DEFAULT_SHARD_COUNT, entry_count: 0 }
    }
}

/// The local item cache: an in-memory index backed by numbered shard files
/// under `root`.
#[derive(Debug)]
pub struct ItemCache {
    root: PathBuf,
    manifest: Manifest,
    entries: BTreeMap<String, CacheEntry>,
    dirty: bool,
}

impl ItemCache {
    /// Open (and if absent, initialize) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| PlmError::Configuration(e.to_string()))?;

        let manifest_path = root.join(MANIFEST_FILE);
        let manifest: Manifest = if manifest_path.exists() {
            let content = fs::read_to_string(&manifest_path)
                .map_err(|e| PlmError::Configuration(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| PlmError::Configuration(e.to_string()))?
        } else {
            Manifest::default()
        };

        let mut entries = BTreeMap::new();
        for shard in 0..manifest.shard_count {
            let path = shard_path(&root, shard, manifest.shard_count);
            if !path.exists() {
                continue;
            }
            let content =
                fs::read_to_string(&path).map_err(|e| PlmError::Configuration(e.to_string()))?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let entry: CacheEntry = serde_json::from_str(line)
                    .map_err(|e| PlmError::Configuration(e.to_string()))?;
                entries.insert(entry.number.clone(), entry);
            }
        }

        Ok(Self { root, manifest, entries, dirty: false })
    }

    /// Look up a cached entry by item number.
    pub fn get(&self, number: &str) -> Option<&CacheEntry> {
        self.entries.get(number)
    }

    /// Insert or replace an entry.
    pub fn upsert(&mut self, entry: CacheEntry) -> Result<()> {
        self.entries.insert(entry.number.clone(), entry);
        self.dirty = true;
        Ok(())
    }

    /// Remove an entry (the item was deleted or is no longer reachable).
    pub fn invalidate(&mut self, number: &str) -> Result<()> {
        if self.entries.remove(number).is_some() {
            self.dirty = true;
        }
        Ok(())
    }

    /// Replace the entire cache contents, as produced by a full item pull.
    ///
    /// If the serialized payload exceeds [`REFRESH_SAFETY_ENVELOPE_BYTES`],
    /// it is trimmed to its first entries (sorted by number, for a
    /// deterministic cut) with a warning logged. An item dropped this way
    /// simply isn't cached; a lookup for it falls through to a live fetch.
    pub fn refresh(&mut self, fresh: impl IntoIterator<Item = CacheEntry>) -> Result<()> {
        let mut entries: Vec<CacheEntry> = fresh.into_iter().collect();
        entries.sort_by(|a, b| a.number.cmp(&b.number));

        let mut total = 0usize;
        let mut cutoff = entries.len();
        for (idx, entry) in entries.iter().enumerate() {
            total += serde_json::to_vec(entry).map(|bytes| bytes.len()).unwrap_or(0);
            if total > REFRESH_SAFETY_ENVELOPE_BYTES {
                cutoff = idx;
                break;
            }
        }

        if cutoff < entries.len() {
            log::warn!(
                "item cache refresh payload exceeds safety envelope ({REFRESH_SAFETY_ENVELOPE_BYTES} bytes); trimming to first {cutoff} of {} entries",
                entries.len()
            );
            entries.truncate(cutoff);
        }

        self.entries = entries.into_iter().map(|e| (e.number.clone(), e)).collect();
        self.dirty = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Persist the cache to disk, resharding first if any shard would exceed
    /// [`SHARD_SOFT_CEILING_BYTES`].
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        loop {
            self.write_shards()?;
            if self.oversized_shard_count()? == 0 {
                break;
            }
            self.manifest.shard_count *= 2;
            log::debug!(
                "cache reshard: doubling to {} shards under {}",
                self.manifest.shard_count,
                self.root.display()
            );
            self.clear_shard_files()?;
        }

        self.manifest.entry_count = self.entries.len();
        let manifest_json = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| PlmError::Configuration(e.to_string()))?;
        fs::write(self.root.join(MANIFEST_FILE), manifest_json)
            .map_err(|e| PlmError::Configuration(e.to_string()))?;
        self.dirty = false;
        Ok(())
    }

    fn write_shards(&self) -> Result<()> {
        let mut buckets: Vec<String> = vec![String::new(); self.manifest.shard_count as usize];
        for entry in self.entries.values() {
            let idx = shard_index(&entry.number, self.manifest.shard_count);
            let line = serde_json::to_string(entry)
                .map_err(|e| PlmError::Configuration(e.to_string()))?;
            buckets[idx as usize].push_str(&line);
            buckets[idx as usize].push('\n');
        }
        for (idx, content) in buckets.into_iter().enumerate() {
            let path = shard_path(&self.root, idx as u32, self.manifest.shard_count);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| PlmError::Configuration(e.to_string()))?;
            }
            fs::write(&path, content).map_err(|e| PlmError::Configuration(e.to_string()))?;
        }
        Ok(())
    }

    fn oversized_shard_count(&self) -> Result<usize> {
        let mut count = 0;
        for idx in 0..self.manifest.shard_count {
            let path = shard_path(&self.root, idx, self.manifest.shard_count);
            if let Ok(meta) = fs::metadata(&path) {
                if meta.len() > SHARD_SOFT_CEILING_BYTES {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn clear_shard_files(&self) -> Result<()> {
        if self.root.exists() {
            for entry in fs::read_dir(&self.root).map_err(|e| PlmError::Configuration(e.to_string()))? {
                let entry = entry.map_err(|e| PlmError::Configuration(e.to_string()))?;
                if entry.path().is_dir() {
                    fs::remove_dir_all(entry.path())
                        .map_err(|e| PlmError::Configuration(e.to_string()))?;
                }
            }
        }
        Ok(())
    }
}

/// Stable (version-independent) hash used to address shards. `DefaultHasher`
/// is explicitly not used here: its output is not guaranteed stable across
/// Rust releases, and shard addressing is persisted to disk.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}

fn shard_index(number: &str, shard_count: u32) -> u32 {
    (fnv1a(number.as_bytes()) % shard_count as u64) as u32
}

/// Compute the on-disk path for shard `index` out of `shard_count`, using a
/// `{2}/{2}` directory split once the shard count grows past single-level
/// addressing (mirroring a sparse registry index's name-length scheme).
fn shard_path(root: &Path, index: u32, shard_count: u32) -> PathBuf {
    let name = format!("{index:04}.jsonl");
    if shard_count <= 64 {
        root.join("shards").join(name)
    } else {
        let bucket = format!("{:02}", index % 64);
        root.join("shards").join(bucket).join(name)
    }
}
