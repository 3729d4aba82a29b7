//! Key/value persistence for the directory actor. The directory only ever
//! touches a single key (`"games"`), so this stays a minimal `get`/`put`
//! abstraction rather than a general store.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// Abstracts where the directory's snapshot lives so the actor itself
/// doesn't know about the filesystem.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), String>;
}

/// Stores each key as a file named `<key>.json` under a base directory.
/// Mirrors the relay's habit of keeping its one piece of persisted state
/// (`GameConfig.json`) as a plain file next to the binary.
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(key, error = ?err, "Failed to read persisted key.");
                None
            }
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), String> {
        if let Some(parent) = self.path_for(key).parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create storage directory: {e}"))?;
        }
        fs::write(self.path_for(key), value)
            .await
            .map_err(|e| format!("Failed to write key {key}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_a_temp_directory() {
        let dir = std::env::temp_dir().join(format!("lobby-server-storage-test-{}", std::process::id()));
        let storage = FileStorage::new(&dir);
        assert_eq!(storage.get("games").await, None);
        storage.put("games", b"hello".to_vec()).await.unwrap();
        assert_eq!(storage.get("games").await, Some(b"hello".to_vec()));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
