// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Persistent key-value store
//!
//! A write-through map from string keys to serializable values. Each store is
//! one DuckDB file holding a single `entries` table; every record carries a
//! format version and a SHA-256 checksum of its JSON encoding, so a damaged
//! record is detected and reported as absent instead of surfacing a decoding
//! error. An in-memory shadow serves repeated lookups.
//!
//! The database is opened for the duration of a single operation, which lets
//! several processes share one cache directory. Opening is retried briefly
//! when another process holds the file lock.

use crate::error::{Error, Result};
use backon::{BlockingRetryable, ConstantBuilder};
use diagnostics::*;
use duckdb::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Bumped whenever the record encoding changes; older records read as absent
pub const STORE_FORMAT_VERSION: i32 = 1;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS entries (
    key VARCHAR PRIMARY KEY,
    format_version INTEGER NOT NULL,
    checksum VARCHAR NOT NULL,
    value VARCHAR NOT NULL
)";

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);
const LOCK_RETRIES: usize = 40;

type Validator<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;

enum Opened {
    Ready(Connection),
    Unreadable(String),
}

pub struct Store<V> {
    path: PathBuf,
    shadow: Mutex<HashMap<String, V>>,
    is_value_valid: Option<Validator<V>>,
}

impl<V> Store<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// A store backed by the file at `path`; nothing is touched until first use
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            shadow: Mutex::new(HashMap::new()),
            is_value_valid: None,
        }
    }

    /// Treat values failing `predicate` as absent, and refuse to store them
    pub fn with_validator<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        self.is_value_valid = Some(Box::new(predicate));
        self
    }

    /// Look up `key`. Corrupt, outdated, and invalid records read as `None`.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        if let Some(value) = self.shadow_get(key) {
            if self.is_valid(&value) {
                debug!("cache hit in memory for {key}", key: key);
                return Ok(Some(value));
            }
            self.shadow_remove(key);
        }

        let conn = match self.open()? {
            Opened::Ready(conn) => conn,
            Opened::Unreadable(reason) => {
                let path = self.path.display().to_string();
                warn!("ignoring unreadable cache store {path}: {reason}", path: path.as_str(), reason: reason.as_str());
                return Ok(None);
            }
        };

        let row = conn.query_row(
            "SELECT format_version, checksum, value FROM entries WHERE key = ?",
            params![key],
            |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        );

        let (format_version, checksum, encoded) = match row {
            Ok(row) => row,
            Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => {
                let reason = e.to_string();
                warn!("cannot read cache record {key}: {reason}", key: key, reason: reason.as_str());
                return Ok(None);
            }
        };

        match decode_record::<V>(key, format_version, &checksum, &encoded) {
            Ok(value) => {
                if !self.is_valid(&value) {
                    debug!("cached value for {key} is no longer valid", key: key);
                    return Ok(None);
                }
                self.shadow_insert(key, value.clone());
                Ok(Some(value))
            }
            Err(err) => {
                let reason = err.to_string();
                warn!("treating cache record as absent: {reason}", reason: reason.as_str());
                Ok(None)
            }
        }
    }

    /// Look up `key`, falling back to `default`
    pub fn get_or(&self, key: &str, default: V) -> Result<V> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Write `value` under `key`, replacing any previous record
    pub fn put(&self, key: &str, value: V) -> Result<()> {
        self.put_many([(key.to_string(), value)])
    }

    /// Write every record in one transaction. If any value fails the
    /// validator nothing is written. A key given twice keeps its last value.
    pub fn put_many<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut encoded: Vec<(String, V, String)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (key, value) in records {
            if !self.is_valid(&value) {
                return Err(Error::InvalidValue { key });
            }
            let json = serde_json::to_string(&value)?;
            match positions.get(&key) {
                Some(&at) => encoded[at] = (key, value, json),
                None => {
                    let _ = positions.insert(key.clone(), encoded.len());
                    encoded.push((key, value, json));
                }
            }
        }
        if encoded.is_empty() {
            return Ok(());
        }

        let mut conn = self.open_for_write()?;
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO entries (key, format_version, checksum, value) VALUES (?, ?, ?, ?)",
            )?;
            for (key, _, json) in &encoded {
                let _ = insert.execute(params![key, STORE_FORMAT_VERSION, checksum(json), json])?;
            }
        }
        tx.commit()?;

        let count = encoded.len();
        debug!("stored {count} cache records", count: count);
        for (key, value, _) in encoded {
            self.shadow_insert(&key, value);
        }
        Ok(())
    }

    fn open_for_write(&self) -> Result<Connection> {
        match self.open()? {
            Opened::Ready(conn) => Ok(conn),
            Opened::Unreadable(reason) => {
                let path = self.path.display().to_string();
                warn!("replacing unreadable cache store {path}: {reason}", path: path.as_str(), reason: reason.as_str());
                self.discard_backing_files()?;
                match self.open()? {
                    Opened::Ready(conn) => Ok(conn),
                    Opened::Unreadable(reason) => Err(Error::CacheCorrupted { key: path, reason }),
                }
            }
        }
    }

    fn is_valid(&self, value: &V) -> bool {
        self.is_value_valid
            .as_ref()
            .is_none_or(|predicate| predicate(value))
    }

    fn open(&self) -> Result<Opened> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = (|| Connection::open(&self.path))
            .retry(
                ConstantBuilder::default()
                    .with_delay(LOCK_RETRY_DELAY)
                    .with_max_times(LOCK_RETRIES),
            )
            .sleep(std::thread::sleep)
            .when(is_lock_conflict)
            .notify(|_, _| debug!("cache store is locked, retrying"))
            .call();

        let conn = match result {
            Ok(conn) => conn,
            Err(e) if is_lock_conflict(&e) => {
                return Err(Error::StoreBusy {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Ok(Opened::Unreadable(e.to_string())),
        };

        match conn.execute_batch(SCHEMA) {
            Ok(()) => Ok(Opened::Ready(conn)),
            Err(e) => Ok(Opened::Unreadable(e.to_string())),
        }
    }

    fn discard_backing_files(&self) -> Result<()> {
        let mut wal = self.path.clone().into_os_string();
        wal.push(".wal");
        for path in [self.path.clone(), PathBuf::from(wal)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn shadow_get(&self, key: &str) -> Option<V> {
        self.shadow
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn shadow_insert(&self, key: &str, value: V) {
        let _ = self
            .shadow
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value);
    }

    fn shadow_remove(&self, key: &str) {
        let _ = self
            .shadow
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }
}

fn is_lock_conflict(err: &duckdb::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("could not set lock") || message.contains("conflicting lock")
}

fn checksum(encoded: &str) -> String {
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

fn decode_record<V: DeserializeOwned>(
    key: &str,
    format_version: i32,
    stored_checksum: &str,
    encoded: &str,
) -> Result<V> {
    let corrupted = |reason: String| Error::CacheCorrupted {
        key: key.to_string(),
        reason,
    };

    if format_version != STORE_FORMAT_VERSION {
        return Err(corrupted(format!(
            "record format version {format_version}, expected {STORE_FORMAT_VERSION}"
        )));
    }
    if checksum(encoded) != stored_checksum {
        return Err(corrupted("checksum mismatch".to_string()));
    }
    serde_json::from_str(encoded).map_err(|e| corrupted(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tamper(path: &Path, sql: &str) {
        let conn = Connection::open(path).expect("open store");
        conn.execute_batch(sql).expect("tamper");
    }

    #[test]
    fn test_basic_get_put() -> Result<()> {
        let dir = tempdir()?;
        let store: Store<String> = Store::new(dir.path().join("test.cache.duckdb"));
        store.put("key1", "value1".to_string())?;
        assert_eq!(store.get("key1")?, Some("value1".to_string()));
        Ok(())
    }

    #[test]
    fn test_cache_hit_and_miss() -> Result<()> {
        let dir = tempdir()?;
        let store: Store<String> = Store::new(dir.path().join("test.cache.duckdb"));
        store.put("key2", "value2".to_string())?;
        assert_eq!(store.get_or("key2", "default".to_string())?, "value2");
        assert_eq!(store.get_or("key3", "default".to_string())?, "default");
        Ok(())
    }

    #[test]
    fn test_values_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("test.cache.duckdb");
        {
            let store: Store<Vec<u32>> = Store::new(&path);
            store.put("k", vec![1, 2, 3])?;
            store.put("k", vec![4])?;
        }
        let store: Store<Vec<u32>> = Store::new(&path);
        assert_eq!(store.get("k")?, Some(vec![4]));
        Ok(())
    }

    #[test]
    fn test_put_many_writes_one_batch() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cache.duckdb");
        {
            let store: Store<String> = Store::new(&path);
            store.put("a", "old".to_string())?;
            store.put_many([
                ("a".to_string(), "first".to_string()),
                ("b".to_string(), "bee".to_string()),
                ("a".to_string(), "last".to_string()),
            ])?;
        }
        let store: Store<String> = Store::new(&path);
        assert_eq!(store.get("a")?, Some("last".to_string()));
        assert_eq!(store.get("b")?, Some("bee".to_string()));
        Ok(())
    }

    #[test]
    fn test_put_many_rejects_whole_batch() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cache.duckdb");
        let store: Store<i64> = Store::new(&path).with_validator(|v| *v > 0);

        let err = store
            .put_many([("good".to_string(), 1), ("bad".to_string(), -1)])
            .expect_err("predicate rejects");
        assert!(matches!(err, Error::InvalidValue { ref key } if key == "bad"));
        assert_eq!(Store::<i64>::new(&path).get("good")?, None);
        Ok(())
    }

    #[test]
    fn test_value_validity_check() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cache.duckdb");

        let plain: Store<i64> = Store::new(&path);
        plain.put("negative", -5)?;

        let store: Store<i64> = Store::new(&path).with_validator(|v| *v > 0);
        store.put("key4", 10)?;
        assert_eq!(store.get("key4")?, Some(10));

        // stored before the predicate applied, rejected on read
        assert_eq!(store.get_or("negative", 0)?, 0);

        let err = store.put("key5", -5).expect_err("predicate rejects");
        assert!(matches!(err, Error::InvalidValue { ref key } if key == "key5"));
        assert_eq!(store.get("key5")?, None);
        Ok(())
    }

    #[test]
    fn test_validity_rechecked_for_shadow_hits() -> Result<()> {
        let dir = tempdir()?;
        let marker = dir.path().join("marker");
        std::fs::write(&marker, b"x")?;

        let store: Store<PathBuf> =
            Store::new(dir.path().join("paths.cache.duckdb")).with_validator(|p: &PathBuf| p.exists());
        store.put("k", marker.clone())?;
        assert_eq!(store.get("k")?, Some(marker.clone()));

        std::fs::remove_file(&marker)?;
        assert_eq!(store.get("k")?, None);
        Ok(())
    }

    #[test]
    fn test_garbage_backing_file_reads_as_default() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cache.duckdb");
        std::fs::write(&path, b"invalid data")?;

        let store: Store<String> = Store::new(&path);
        assert_eq!(store.get_or("key7", "default".to_string())?, "default");

        // the next write replaces the unreadable file
        store.put("key7", "value7".to_string())?;
        let reopened: Store<String> = Store::new(&path);
        assert_eq!(reopened.get("key7")?, Some("value7".to_string()));
        Ok(())
    }

    #[test]
    fn test_tampered_record_is_absent_until_rewritten() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cache.duckdb");
        {
            let store: Store<String> = Store::new(&path);
            store.put("k", "v".to_string())?;
        }

        tamper(&path, "UPDATE entries SET value = '\"w\"' WHERE key = 'k'");
        let store: Store<String> = Store::new(&path);
        assert_eq!(store.get("k")?, None);

        store.put("k", "v2".to_string())?;
        assert_eq!(Store::<String>::new(&path).get("k")?, Some("v2".to_string()));
        Ok(())
    }

    #[test]
    fn test_outdated_format_version_is_absent() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cache.duckdb");
        Store::<String>::new(&path).put("k", "v".to_string())?;

        tamper(&path, "UPDATE entries SET format_version = 0");
        assert_eq!(Store::<String>::new(&path).get("k")?, None);
        Ok(())
    }

    #[test]
    fn test_undecodable_value_is_absent() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cache.duckdb");
        Store::<String>::new(&path).put("k", "v".to_string())?;

        // a number with a correct checksum still fails to decode as a String
        let encoded = "42";
        let sql = format!(
            "UPDATE entries SET value = '{encoded}', checksum = '{}'",
            checksum(encoded)
        );
        tamper(&path, &sql);
        assert_eq!(Store::<String>::new(&path).get("k")?, None);
        Ok(())
    }

    #[test]
    fn test_decode_record_reports_corruption() {
        let err = decode_record::<String>("k", STORE_FORMAT_VERSION, "00", "\"v\"")
            .expect_err("checksum mismatch");
        assert!(matches!(err, Error::CacheCorrupted { ref key, .. } if key == "k"));
    }
}
