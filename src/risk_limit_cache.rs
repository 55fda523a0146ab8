//! Risk-limit cache: a persisted `symbol -> {tiers, cached_at}` mapping
//! with a TTL, guarding against symlink targets and unbounded file
//! size. Grounded on §6's external-interfaces description, no direct
//! original-source file was needed; the contract is fully pinned in
//! spec text.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::executor::RiskLimitTier;

const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    tiers: Vec<RiskLimitTier>,
    cached_at: DateTime<Utc>,
}

pub struct RiskLimitCache {
    path: PathBuf,
    ttl: Duration,
    max_file_bytes: u64,
    entries: HashMap<String, CacheEntry>,
}

impl RiskLimitCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { path: path.into(), ttl, max_file_bytes: DEFAULT_MAX_FILE_BYTES, entries: HashMap::new() }
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn load(&mut self) -> Result<(), PersistenceError> {
        if !self.path.exists() {
            return Ok(());
        }
        let metadata = fs::symlink_metadata(&self.path)?;
        if metadata.file_type().is_symlink() {
            return Err(PersistenceError::SymlinkRejected(self.path.display().to_string()));
        }
        if metadata.len() > self.max_file_bytes {
            return Err(PersistenceError::TooLarge { path: self.path.display().to_string(), bytes: metadata.len(), limit: self.max_file_bytes });
        }
        let raw = fs::read_to_string(&self.path)?;
        self.entries = serde_json::from_str(&raw)?;
        Ok(())
    }

    /// Returns cached tiers for `symbol` only if the entry is still
    /// within TTL; an expired or absent entry is `None`, signalling the
    /// caller to refetch from the exchange.
    pub fn get(&self, symbol: &str, now: DateTime<Utc>) -> Option<&[RiskLimitTier]> {
        self.entries.get(symbol).filter(|e| (now - e.cached_at).to_std().map(|age| age < self.ttl).unwrap_or(false)).map(|e| e.tiers.as_slice())
    }

    pub fn put(&mut self, symbol: impl Into<String>, tiers: Vec<RiskLimitTier>, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.entries.insert(symbol.into(), CacheEntry { tiers, cached_at: now });
        self.persist()
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&self.entries)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
