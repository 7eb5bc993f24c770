//! JSON file persistence for connection configs.

use std::io::Write;
use std::path::{Path, PathBuf};

use common::errors::{AppError, AppResult};
use common::models::ConnectionConfig;
use tempfile::NamedTempFile;

/// Whole-file store: the collection is read once and rewritten on each change.
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    path: PathBuf,
}

impl ConnectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the collection. A missing file is an empty collection.
    pub fn load(&self) -> AppResult<Vec<ConnectionConfig>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            AppError::Storage(format!("invalid {}: {}", self.path.display(), e))
        })
    }

    /// Replaces the collection on disk off the async workers.
    pub async fn save(&self, configs: Vec<ConnectionConfig>) -> AppResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(&configs))
            .await
            .map_err(|e| AppError::Internal(format!("connection store task failed: {}", e)))?
    }

    /// Replaces the collection on disk. Readers see either the old or the new
    /// file, never a partial write.
    pub fn save_blocking(&self, configs: &[ConnectionConfig]) -> AppResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(configs)
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| AppError::Storage(format!("failed to replace {}: {}", self.path.display(), e.error)))?;

        tracing::debug!(path = %self.path.display(), count = configs.len(), "Connections saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::ConnectionRequest;

    fn config(id: &str, name: &str) -> ConnectionConfig {
        ConnectionRequest {
            kind: Some("mysql".to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
        .into_config(id.to_string())
        .unwrap()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConnectionStore::new(dir.path().join("connections.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConnectionStore::new(dir.path().join("nested").join("connections.json"));
        store
            .save_blocking(&[config("b", "second"), config("a", "first")])
            .unwrap();

        let loaded = store.load().unwrap();
        let ids: Vec<_> = loaded.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(loaded[0].name.as_deref(), Some("second"));
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        std::fs::write(&path, "{oops").unwrap();
        let err = ConnectionStore::new(path).load().unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConnectionStore::new(dir.path().join("connections.json"));
        store.save_blocking(&[config("a", "one")]).unwrap();
        store.save_blocking(&[]).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_async_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConnectionStore::new(dir.path().join("data").join("connections.json"));
        store.save(vec![config("x", "async")]).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "x");
    }

    #[tokio::test]
    async fn test_async_save_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = ConnectionStore::new(blocker.join("connections.json"));

        let err = store.save(Vec::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
