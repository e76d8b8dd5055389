//! Query-hash keyed result cache with on-disk persistence.
//!
//! Caches the final fused [`SearchResult`] keyed by [`Query::hash`]. Each
//! entry lives in memory and, once flushed, in its own `{hash}.json` file
//! under the cache directory, so individual entries can be deleted by hand
//! to force a refresh.
//!
//! Freshness is checked on read with an exclusive boundary: an entry is a
//! hit only while `now - timestamp < ttl`. Expired entries are not evicted
//! on read; [`SearchCache::flush_to_disk`] drops them from memory and disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::seconds;
use crate::error::{Result, SearchError};
use crate::persist::{remove_if_exists, DiskWrites};
use crate::query::Query;
use crate::types::{Material, SearchResult};

/// One cached search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query: Query,
    pub result: SearchResult,
    pub timestamp: DateTime<Utc>,
    /// Lifetime in seconds, fixed when the entry was written.
    pub ttl: u64,
}

impl CacheEntry {
    /// Whether this entry is still valid at `now`. Exclusive at `timestamp + ttl`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) < seconds(self.ttl)
    }
}

/// Search result cache.
#[derive(Debug)]
pub struct SearchCache {
    ttl_seconds: u64,
    entries: HashMap<String, CacheEntry>,
    dirty: HashSet<String>,
    materials: HashMap<String, Material>,
    dir: Option<PathBuf>,
}

impl SearchCache {
    /// In-memory cache with no persistence.
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            entries: HashMap::new(),
            dirty: HashSet::new(),
            materials: HashMap::new(),
            dir: None,
        }
    }

    /// Cache persisted under `dir`, restoring every still-fresh entry.
    ///
    /// Unreadable entry files are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>, ttl_seconds: u64) -> Self {
        let mut cache = Self::new(ttl_seconds);
        cache.dir = Some(dir.into());
        match cache.load_from_disk() {
            Ok(n) => tracing::debug!(entries = n, "search cache loaded"),
            Err(e) => tracing::warn!(error = %e, "search cache not loaded"),
        }
        cache
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Read every `*.json` entry under the cache directory, keeping only
    /// entries fresh right now. Returns the number restored.
    pub fn load_from_disk(&mut self) -> Result<usize> {
        let Some(dir) = self.dir.clone() else {
            return Ok(0);
        };
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut restored = 0;
        for entry in read_dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(hash) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                continue;
            };
            let parsed = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<CacheEntry>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(cached) if cached.is_fresh_at(now) => {
                    self.index_materials(&cached.result);
                    self.entries.insert(hash, cached);
                    restored += 1;
                }
                Ok(_) => tracing::trace!(%hash, "skipping expired cache file"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable cache file"),
            }
        }
        Ok(restored)
    }

    /// Look up a fresh result for `query`.
    pub fn get(&self, query: &Query) -> Option<SearchResult> {
        self.get_at(query, Utc::now())
    }

    pub fn get_at(&self, query: &Query, now: DateTime<Utc>) -> Option<SearchResult> {
        let hash = query.hash();
        let entry = self.entries.get(&hash)?;
        if entry.is_fresh_at(now) {
            Some(entry.result.clone())
        } else {
            tracing::trace!(%hash, "cache entry expired");
            None
        }
    }

    /// Store `result` for `query`, replacing any previous entry.
    pub fn put(&mut self, query: &Query, result: SearchResult) {
        self.put_at(query, result, Utc::now());
    }

    pub fn put_at(&mut self, query: &Query, result: SearchResult, now: DateTime<Utc>) {
        let hash = query.hash();
        self.index_materials(&result);
        self.entries.insert(
            hash.clone(),
            CacheEntry {
                query: query.clone(),
                result,
                timestamp: now,
                ttl: self.ttl_seconds,
            },
        );
        self.dirty.insert(hash);
    }

    /// Write dirty entries and evict expired ones. Returns the number of
    /// files written.
    pub fn flush_to_disk(&mut self) -> Result<usize> {
        self.flush_at(Utc::now())
    }

    pub fn flush_at(&mut self, now: DateTime<Utc>) -> Result<usize> {
        self.take_flush_at(now)?.apply()
    }

    /// Evict expired entries from memory and serialise dirty ones, returning
    /// the file changes still to be applied.
    pub(crate) fn take_flush_at(&mut self, now: DateTime<Utc>) -> Result<DiskWrites> {
        let mut ops = DiskWrites::default();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_fresh_at(now))
            .map(|(h, _)| h.clone())
            .collect();
        for hash in &expired {
            self.entries.remove(hash);
            self.dirty.remove(hash);
            if let Some(dir) = &self.dir {
                ops.remove(entry_path(dir, hash));
            }
        }
        if !expired.is_empty() {
            tracing::debug!(evicted = expired.len(), "expired cache entries evicted");
            self.rebuild_index();
        }

        let Some(dir) = self.dir.clone() else {
            self.dirty.clear();
            return Ok(ops);
        };

        let mut pending: Vec<String> = self.dirty.drain().collect();
        pending.sort();
        for hash in pending {
            if let Some(entry) = self.entries.get(&hash) {
                let json = serde_json::to_string_pretty(entry).map_err(|e| {
                    SearchError::Parse(format!("cannot serialize cache entry: {e}"))
                })?;
                ops.write(entry_path(&dir, &hash), json);
            }
        }
        Ok(ops)
    }

    /// A material seen in any cached result. Not authoritative.
    pub fn lookup_material(&self, id: &str) -> Option<&Material> {
        self.materials.get(id)
    }

    /// Drop every entry from memory and delete every entry file.
    pub fn clear(&mut self) -> Result<usize> {
        self.entries.clear();
        self.dirty.clear();
        self.materials.clear();

        let Some(dir) = &self.dir else {
            return Ok(0);
        };
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in read_dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                remove_if_exists(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_materials(&mut self, result: &SearchResult) {
        for material in &result.materials {
            self.materials.insert(material.id.clone(), material.clone());
        }
    }

    fn rebuild_index(&mut self) {
        self.materials = self
            .entries
            .values()
            .flat_map(|e| e.result.materials.iter())
            .map(|m| (m.id.clone(), m.clone()))
            .collect();
    }
}

fn entry_path(dir: &Path, hash: &str) -> PathBuf {
    dir.join(format!("{hash}.json"))
}
