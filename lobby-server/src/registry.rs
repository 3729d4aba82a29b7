//! Maps room names to their actor handles.
//!
//! A single `Mutex<HashMap<..>>` guards only the name -> handle mapping;
//! everything about a room's internal state still goes through that
//! room's own actor. Stale handles (actor exited, e.g. after
//! `close_room_and_kick_all`) are reaped lazily on the next lookup or
//! creation attempt, following the same pattern as the teacher's
//! `cleanup_dead_rooms`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::directory::{DirectoryEntryUpdate, DirectoryHandle};
use crate::room::{self, RoomHandle};

pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    directory: DirectoryHandle,
    config: Arc<Config>,
}

/// Why a room could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    AlreadyExists,
    VersionMismatch,
}

impl RoomRegistry {
    pub fn new(directory: DirectoryHandle, config: Arc<Config>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            directory,
            config,
        }
    }

    /// Creates a fresh room named `name`, unless a live one already exists.
    pub async fn create(
        &self,
        name: String,
        password: Vec<u8>,
        difficulty: u32,
        host_version: Option<u32>,
    ) -> Result<RoomHandle, CreateError> {
        let Some(host_version) = host_version else {
            return Err(CreateError::VersionMismatch);
        };
        let mut rooms = self.rooms.lock().await;
        if let Some(existing) = rooms.get(&name) {
            if !existing.is_closed() {
                return Err(CreateError::AlreadyExists);
            }
            rooms.remove(&name);
        }
        let seed: u32 = rand::random();
        let handle = room::spawn(
            name.clone(),
            password,
            difficulty,
            Some(host_version),
            seed,
            self.directory.clone(),
            self.config.clone(),
        );
        rooms.insert(name, handle.clone());
        Ok(handle)
    }

    /// Pre-encoded `GameListResponse` frame for the current directory snapshot.
    pub async fn directory_snapshot(&self) -> bytes::Bytes {
        self.directory.list().await
    }

    /// Publishes a directory entry directly, bypassing room creation.
    /// Exposed for the administrative HTTP surface, not the lobby handshake.
    pub async fn directory_upsert(&self, update: DirectoryEntryUpdate) {
        self.directory.upsert(update).await;
    }

    /// Retracts a directory entry directly.
    pub async fn directory_remove(&self, name: String) {
        self.directory.remove(name).await;
    }

    /// Looks up a live room by name, reaping the entry if its actor has exited.
    pub async fn lookup(&self, name: &str) -> Option<RoomHandle> {
        let mut rooms = self.rooms.lock().await;
        match rooms.get(name) {
            Some(handle) if !handle.is_closed() => Some(handle.clone()),
            Some(_) => {
                rooms.remove(name);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory;
    use crate::storage::FileStorage;

    fn test_registry() -> RoomRegistry {
        let dir = std::env::temp_dir()
            .join(format!("lobby-server-registry-test-{}", std::process::id()));
        let directory = directory::spawn(Arc::new(FileStorage::new(dir)));
        RoomRegistry::new(directory, Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn create_then_lookup_finds_the_room() {
        let registry = test_registry();
        registry
            .create("arena".to_string(), Vec::new(), 0, Some(1))
            .await
            .unwrap();
        assert!(registry.lookup("arena").await.is_some());
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let registry = test_registry();
        registry
            .create("arena".to_string(), Vec::new(), 0, Some(1))
            .await
            .unwrap();
        let err = registry
            .create("arena".to_string(), Vec::new(), 0, Some(1))
            .await
            .unwrap_err();
        assert_eq!(err, CreateError::AlreadyExists);
    }

    #[tokio::test]
    async fn create_without_client_info_is_rejected() {
        let registry = test_registry();
        let err = registry
            .create("arena".to_string(), Vec::new(), 0, None)
            .await
            .unwrap_err();
        assert_eq!(err, CreateError::VersionMismatch);
    }

    #[tokio::test]
    async fn lookup_of_unknown_room_is_none() {
        let registry = test_registry();
        assert!(registry.lookup("nope").await.is_none());
    }
}
