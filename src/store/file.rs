//! A store persisted as a single JSON document.
//!
//! Every write applies to a copy of the tables, writes the copy to a
//! sibling temp file and renames it over the store file. The in-memory
//! tables only change once the rename succeeded.

use chrono::{DateTime, Utc};
use log::debug;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use super::{BrowserCounterRow, Store, Tables};
use crate::errors::{RankerError, Result};
use crate::key::Namespace;
use crate::ranker::{Rank, Ranker, RankerKind};

/// A [`Store`] backed by a JSON file on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Tables::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                RankerError::corruption(format!(
                    "store file {} is not a valid store document",
                    path.display()
                ))
                .with_source(e)
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Store file {} not found, starting empty", path.display());
                Tables::default()
            }
            Err(e) => {
                return Err(RankerError::store(format!(
                    "Failed to read store file {}",
                    path.display()
                ))
                .with_source(e))
            }
        };
        Ok(Self { path, tables: Mutex::new(tables) })
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<T>(&self, query: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.lock().await;
        query(&tables)
    }

    async fn write<T>(&self, update: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let mut tables = self.tables.lock().await;
        let mut next = tables.clone();
        let output = update(&mut next);
        self.persist(&next).await?;
        *tables = next;
        Ok(output)
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(tables).map_err(|e| {
            RankerError::store("Failed to serialize store").with_source(e)
        })?;

        let temp = temp_path(&self.path);
        fs::write(&temp, bytes).await.map_err(|e| {
            RankerError::store(format!("Failed to write {}", temp.display()))
                .with_source(e)
        })?;
        fs::rename(&temp, &self.path).await.map_err(|e| {
            RankerError::store(format!(
                "Failed to replace store file {}",
                self.path.display()
            ))
            .with_source(e)
        })?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("store"));
    name.push(".tmp");
    path.with_file_name(name)
}

impl Store for JsonFileStore {
    async fn get_rankers(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Result<Vec<Option<Ranker>>> {
        Ok(self
            .read(|tables| tables.get_rankers(namespace, kind, key_names))
            .await)
    }

    async fn get_or_insert_ranker(
        &self,
        namespace: Namespace,
        key_name: &str,
        default: Ranker,
    ) -> Result<Ranker> {
        let key_names = [key_name.to_string()];
        let existing = self
            .read(|tables| tables.get_rankers(namespace, default.kind(), &key_names))
            .await;
        // Skip rewriting the file when the row is already there.
        if let Some(Some(ranker)) = existing.into_iter().next() {
            return Ok(ranker);
        }
        self.write(|tables| {
            tables.get_or_insert_ranker(namespace, key_name, default)
        })
        .await
    }

    async fn put_rankers(
        &self,
        namespace: Namespace,
        rows: &[(String, Ranker)],
    ) -> Result<()> {
        self.write(|tables| tables.put_rankers(namespace, rows)).await
    }

    async fn delete_rankers(
        &self,
        namespace: Namespace,
        kind: RankerKind,
        key_names: &[String],
    ) -> Result<()> {
        self.write(|tables| tables.delete_rankers(namespace, kind, key_names))
            .await
    }

    async fn scan_rankers(
        &self,
        namespace: Namespace,
        limit: usize,
    ) -> Result<Vec<(String, Ranker)>> {
        Ok(self.read(|tables| tables.scan_rankers(namespace, limit)).await)
    }

    async fn update_counter<F>(
        &self,
        key_name: &str,
        update: F,
    ) -> Result<BrowserCounterRow>
    where
        F: FnOnce(Option<BrowserCounterRow>) -> BrowserCounterRow + Send,
    {
        self.write(|tables| tables.update_counter(key_name, update)).await
    }

    async fn counters_for_category(
        &self,
        category: &str,
    ) -> Result<Vec<BrowserCounterRow>> {
        Ok(self.read(|tables| tables.counters_for_category(category)).await)
    }

    async fn get_marker(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read(|tables| tables.get_marker(name)).await)
    }

    async fn set_marker(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        self.write(|tables| tables.set_marker(name, at)).await
    }

    async fn clear_marker(&self, name: &str) -> Result<()> {
        self.write(|tables| tables.clear_marker(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "browser-ranker-{}-{}.json",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn test_reopen_sees_persisted_rows() {
        let path = scratch_path("reopen");
        let _ = std::fs::remove_file(&path);

        let mut ranker = Ranker::empty(RankerKind::Sample, 100);
        ranker.add(250);
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store
                .put_rankers(Namespace::Staging, &[("k".to_string(), ranker.clone())])
                .await
                .unwrap();
            store.set_marker("rankers_dirty", Utc::now()).await.unwrap();
        }

        let store = JsonFileStore::open(&path).await.unwrap();
        let rows = store
            .get_rankers(Namespace::Staging, RankerKind::Sample, &["k".to_string()])
            .await
            .unwrap();
        assert_eq!(rows, vec![Some(ranker)]);
        assert!(store.get_marker("rankers_dirty").await.unwrap().is_some());
        assert!(!temp_path(&path).exists());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let path = scratch_path("missing");
        let _ = std::fs::remove_file(&path);

        let store = JsonFileStore::open(&path).await.unwrap();
        let rows = store.scan_rankers(Namespace::Live, 10).await.unwrap();
        assert!(rows.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_garbage_file_is_corruption() {
        let path = scratch_path("garbage");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Corruption);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let temp = temp_path(Path::new("/var/data/store.json"));
        assert_eq!(temp, PathBuf::from("/var/data/store.json.tmp"));
    }
}
