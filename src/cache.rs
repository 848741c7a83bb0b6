//! Disk-backed cache for extraction results.
//!
//! Layout: `<dir>/index.json` maps key -> file name, one `<key>.json` per value.
//! Eviction removes the entries whose files were *written* longest ago once the
//! index grows past `max_size`. Reading an entry does not refresh it.

use crate::{config::Hashing, util::{ensure_dir, hash_file, sha256_hex}};
use anyhow::{Context, Result, bail};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

const INDEX_FILE: &str = "index.json";

/// Identity of a source document for cache-key purposes.
///
/// Part of the key rather than a freshness check: a changed file simply
/// produces a different key and the stale entry ages out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_path(cfg: &Hashing, path: &Path) -> Result<Self> {
        hash_file(cfg, path)
            .map(Fingerprint)
            .with_context(|| format!("fingerprint {}", path.display()))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Fingerprint(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `sha256(operation, canonical JSON args, fingerprint)` as hex.
///
/// Always 64 lowercase hex digits, so it is safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

const KEY_LEN: usize = 64;

impl CacheKey {
    pub fn new<A: Serialize + ?Sized>(
        operation: &str,
        args: &A,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<Self> {
        let args = serde_json::to_value(args).with_context(|| "serializing cache key args")?;
        let material = serde_json::json!([operation, args, fingerprint.map(Fingerprint::as_str)]);
        Ok(CacheKey(sha256_hex(material.to_string().as_bytes())))
    }

    /// Accept a key previously produced by [`CacheKey::new`].
    pub fn from_hex(raw: &str) -> Result<Self> {
        let valid = raw.len() == KEY_LEN
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            bail!("invalid cache key: {raw:?}");
        }
        Ok(CacheKey(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub dir: PathBuf,
    pub entries: usize,
    pub max_size: usize,
}

pub struct TableExtractionCache {
    dir: PathBuf,
    max_size: usize,
    index: BTreeMap<String, String>,
}

impl TableExtractionCache {
    pub fn open(dir: &Path, max_size: usize) -> Result<Self> {
        ensure_dir(dir)?;
        let index = load_index(&dir.join(INDEX_FILE));
        debug!("cache open dir={} entries={}", dir.display(), index.len());
        Ok(Self {
            dir: dir.to_path_buf(),
            max_size: max_size.max(1),
            index,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains_key(key.as_str())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            dir: self.dir.clone(),
            entries: self.index.len(),
            max_size: self.max_size,
        }
    }

    /// On-disk file holding the value for `key`, if indexed.
    pub fn entry_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.index.get(key.as_str()).map(|f| self.dir.join(f))
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let path = self.entry_path(key)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache entry unreadable {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("cache entry malformed {}: {e}", path.display());
                None
            }
        }
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let v = self.get(key)?;
        match serde_json::from_value(v) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!("cache entry {key} has unexpected shape: {e}");
                None
            }
        }
    }

    /// Store `value` under `key`. I/O failures are logged, never returned.
    pub fn set(&mut self, key: &CacheKey, value: &Value) {
        let file_name = key.file_name();
        let path = self.dir.join(&file_name);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache value for {key} not serializable: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, raw) {
            error!("cache write failed {}: {e}", path.display());
            return;
        }
        self.index.insert(key.as_str().to_string(), file_name);
        if self.index.len() > self.max_size {
            self.evict();
        }
        self.save_index();
    }

    pub fn clear(&mut self) {
        for file_name in self.index.values() {
            let path = self.dir.join(file_name);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("cache remove failed {}: {e}", path.display());
            }
        }
        let removed = self.index.len();
        self.index.clear();
        self.save_index();
        info!("cache cleared entries={removed}");
    }

    /// Serve `compute()` from the cache, storing fresh results.
    ///
    /// With `enabled == false` the store is neither read nor written. Results that
    /// cannot be represented as JSON are returned uncached.
    pub fn cached<T, F>(&mut self, key: &CacheKey, enabled: bool, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if !enabled {
            return compute();
        }
        if let Some(hit) = self.get_as::<T>(key) {
            debug!("cache hit {key}");
            return hit;
        }
        let value = compute();
        match serde_json::to_value(&value) {
            Ok(v) => self.set(key, &v),
            Err(e) => warn!("result not cacheable for {key}: {e}"),
        }
        value
    }

    fn evict(&mut self) {
        let excess = self.index.len().saturating_sub(self.max_size);
        if excess == 0 {
            return;
        }
        let mut aged: Vec<(SystemTime, String, String)> = self
            .index
            .iter()
            .map(|(k, f)| {
                let written = std::fs::metadata(self.dir.join(f))
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (written, f.clone(), k.clone())
            })
            .collect();
        aged.sort();

        for (_, file_name, key) in aged.into_iter().take(excess) {
            let path = self.dir.join(&file_name);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("cache evict remove failed {}: {e}", path.display());
            }
            self.index.remove(&key);
            debug!("cache evicted {key}");
        }
    }

    fn save_index(&self) {
        let path = self.dir.join(INDEX_FILE);
        let raw = match serde_json::to_string_pretty(&self.index) {
            Ok(raw) => raw,
            Err(e) => {
                error!("cache index not serializable: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&path, raw) {
            error!("cache index write failed {}: {e}", path.display());
        }
    }
}

fn load_index(path: &Path) -> BTreeMap<String, String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeMap::new(),
    };
    let index: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!("cache index malformed {}, starting empty: {e}", path.display());
        BTreeMap::new()
    });
    // Entries must name their own `<key>.json` inside the cache dir.
    index
        .into_iter()
        .filter(|(k, f)| match CacheKey::from_hex(k) {
            Ok(key) if key.file_name() == *f => true,
            _ => {
                warn!("cache index entry {k:?} -> {f:?} rejected");
                false
            }
        })
        .collect()
}
