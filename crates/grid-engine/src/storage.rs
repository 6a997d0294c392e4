//! Reconciliation record sink.
//!
//! The engine hands every successful pass to a [`Storage`]. Persistence is
//! best-effort: a failing sink is logged by the caller and never affects the
//! ledger.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Outcome of one reconciliation pass for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRecord {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub exchange: String,
    pub symbol: String,
    pub local_position: f64,
    pub exchange_position: f64,
    /// `exchange_position - local_position`. Recorded, never corrected.
    pub position_diff: f64,
    pub active_buy_orders: usize,
    pub active_sell_orders: usize,
    pub pending_sell_qty: f64,
    /// `total_sell_qty * price_interval`. Advisory.
    pub estimated_profit: f64,
    /// Wallet balance change since the first successful pass.
    pub actual_profit: f64,
    /// Local orders overwritten or reset from exchange state.
    pub repaired_orders: usize,
    /// Exchange orders with our prefix bound to a slot.
    pub adopted_orders: usize,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encode: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait Storage: Send + Sync {
    fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// Keeps records in memory. Used when no history path is configured.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<ReconciliationRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ReconciliationRecord> {
        self.records.lock().clone()
    }

    pub fn last(&self) -> Option<ReconciliationRecord> {
        self.records.lock().last().cloned()
    }
}

impl Storage for MemoryStorage {
    fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), StorageError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlStorage
// ---------------------------------------------------------------------------

/// Appends one JSON object per line.
pub struct JsonlStorage {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlStorage {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for JsonlStorage {
    fn save_reconciliation(&self, record: &ReconciliationRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(symbol: &str) -> ReconciliationRecord {
        ReconciliationRecord {
            id: "r1".into(),
            timestamp: 1_700_000_000_000,
            exchange: "mexc".into(),
            symbol: symbol.into(),
            local_position: 1.0,
            exchange_position: 1.5,
            position_diff: 0.5,
            active_buy_orders: 2,
            active_sell_orders: 1,
            pending_sell_qty: 1.0,
            estimated_profit: 10.0,
            actual_profit: 9.5,
            repaired_orders: 1,
            adopted_orders: 0,
        }
    }

    #[test]
    fn memory_storage_keeps_order() {
        let storage = MemoryStorage::new();
        storage.save_reconciliation(&record("BTCUSDT")).unwrap();
        storage.save_reconciliation(&record("ETHUSDT")).unwrap();
        assert_eq!(storage.records().len(), 2);
        assert_eq!(storage.last().unwrap().symbol, "ETHUSDT");
    }

    #[test]
    fn jsonl_storage_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("reconcile.jsonl");

        let storage = JsonlStorage::open(&path).unwrap();
        storage.save_reconciliation(&record("BTCUSDT")).unwrap();
        drop(storage);
        let storage = JsonlStorage::open(&path).unwrap();
        storage.save_reconciliation(&record("ETHUSDT")).unwrap();

        let content = std::fs::read_to_string(storage.path()).unwrap();
        let lines: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["symbol"], "BTCUSDT");
        assert_eq!(lines[1]["position_diff"], 0.5);
    }
}
