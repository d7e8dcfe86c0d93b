//! Watermark Store
//!
//! Highest transaction timestamp already processed, one entry per monitored
//! address. Values only move forward: `write` of a lower value keeps the
//! stored one. A missing or corrupt entry reads as 0.
//!
//! File layout: `<dir>/last_utime_<key>.txt`, decimal ASCII, replaced
//! atomically (temp file + rename).
//!
//! Created: 2026-03-04

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::error::WatermarkError;

pub trait WatermarkStore: Send + Sync {
    /// Last committed timestamp for `key`, 0 if none.
    fn read(&self, key: &str) -> u64;

    /// Advance `key` to `timestamp`. Returns the value now stored.
    fn write(&self, key: &str, timestamp: u64) -> Result<u64, WatermarkError>;
}

pub struct FileWatermarkStore {
    dir: PathBuf,
    // serialises read-modify-write
    write_lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, WatermarkError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| WatermarkError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("last_utime_{}.txt", safe))
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn read(&self, key: &str) -> u64 {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ts) => ts,
                Err(_) => {
                    warn!("Corrupt watermark in {} ({:?}), starting from 0", path.display(), raw.trim());
                    0
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!("Cannot read watermark {}: {}, starting from 0", path.display(), e);
                0
            }
        }
    }

    fn write(&self, key: &str, timestamp: u64) -> Result<u64, WatermarkError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.read(key);
        if timestamp <= current {
            return Ok(current);
        }

        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");
        let io_err = |source: std::io::Error| WatermarkError::Io {
            path: path.clone(),
            source,
        };
        std::fs::write(&temp_path, timestamp.to_string()).map_err(io_err)?;
        std::fs::rename(&temp_path, &path).map_err(io_err)?;
        Ok(timestamp)
    }
}

/// In-process store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    entries: DashMap<String, u64>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn read(&self, key: &str) -> u64 {
        self.entries.get(key).map(|v| *v).unwrap_or(0)
    }

    fn write(&self, key: &str, timestamp: u64) -> Result<u64, WatermarkError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert(0);
        if timestamp > *entry {
            *entry = timestamp;
        }
        Ok(*entry)
    }
}
