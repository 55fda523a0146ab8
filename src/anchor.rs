//! Anchor Store: durable `strat_id -> (anchor_price, grid_step,
//! grid_count)` persistence across restarts. Grounded on the teacher's
//! `persistence.rs` load/save function shape, adapted to atomic
//! tmp-then-rename writes per §6 ("MUST be atomically replaceable");
//! the teacher's plain `fs::write` was not atomic and is not carried
//! over here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub anchor_price: Decimal,
    pub grid_step: f64,
    pub grid_count: i32,
}

/// In-memory cache backed by a single JSON file, written atomically.
/// Reads are served from memory once loaded; `load` MUST be called
/// before first use.
pub struct AnchorStore {
    path: PathBuf,
    records: HashMap<String, AnchorRecord>,
}

impl AnchorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), records: HashMap::new() }
    }

    /// Loads the backing file into memory, if it exists. A missing file
    /// is not an error, a fresh deployment has nothing to load yet.
    pub fn load(&mut self) -> Result<(), PersistenceError> {
        if !self.path.exists() {
            return Ok(());
        }
        reject_symlink(&self.path)?;
        let raw = fs::read_to_string(&self.path)?;
        self.records = serde_json::from_str(&raw)?;
        Ok(())
    }

    /// Returns the stored anchor for `strat_id` only if its `grid_step`
    /// and `grid_count` match the current configuration; a mismatch
    /// means the strategy was reconfigured and the stale anchor is
    /// discarded rather than silently reused (§3).
    pub fn get_matching(&self, strat_id: &str, grid_step: f64, grid_count: i32) -> Option<Decimal> {
        self.records.get(strat_id).filter(|r| r.grid_step == grid_step && r.grid_count == grid_count).map(|r| r.anchor_price)
    }

    /// Updates the in-memory record and atomically persists the whole
    /// map: write to a sibling temp file, then rename over the target;
    /// a reader never observes a partially written file.
    pub fn put(&mut self, strat_id: impl Into<String>, record: AnchorRecord) -> Result<(), PersistenceError> {
        self.records.insert(strat_id.into(), record);
        self.persist()
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&self.records)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn reject_symlink(path: &Path) -> Result<(), PersistenceError> {
    if fs::symlink_metadata(path)?.file_type().is_symlink() {
        return Err(PersistenceError::SymlinkRejected(path.display().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("grid_bot_core_anchor_test_{name}_{}.json", std::process::id()))
    }

    #[test]
    fn test_put_then_load_roundtrips() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_file(&path);
        let mut store = AnchorStore::new(&path);
        store.put("strat-1", AnchorRecord { anchor_price: dec!(100000.0), grid_step: 0.2, grid_count: 50 }).unwrap();

        let mut reloaded = AnchorStore::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get_matching("strat-1", 0.2, 50), Some(dec!(100000.0)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_mismatched_config_discards_anchor() {
        let path = temp_path("mismatch");
        let _ = fs::remove_file(&path);
        let mut store = AnchorStore::new(&path);
        store.put("strat-1", AnchorRecord { anchor_price: dec!(100000.0), grid_step: 0.2, grid_count: 50 }).unwrap();
        assert_eq!(store.get_matching("strat-1", 0.3, 50), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_loads_as_empty() {
        let path = temp_path("missing");
        let _ = fs::remove_file(&path);
        let mut store = AnchorStore::new(&path);
        store.load().unwrap();
        assert_eq!(store.get_matching("anything", 0.2, 50), None);
    }
}
