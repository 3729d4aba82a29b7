//! The directory actor: the single writer for "which rooms currently
//! exist", exposed both to other internal actors (gateway, rooms) over a
//! channel and to the outside world as a tiny HTTP contract
//! (`/upsert`, `/remove`, `/list.bin`).
//!
//! Like [`crate::room`], this is a single task serializing all mutation
//! through one input channel — no lock is taken on the entry map itself.

use bytes::Bytes;
use protocol::{GameListEntry, Packet, encode_packet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::storage::Storage;

const DIRECTORY_KEY: &str = "games";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirectoryEntryRecord {
    name: String,
    game_type: u32,
    slots_used: u32,
    slots_total: u32,
    /// Seconds since the Unix epoch, set by the actor on every upsert.
    updated_at: i64,
}

/// Fields a caller supplies for an upsert; `updated_at` is stamped by the actor.
pub struct DirectoryEntryUpdate {
    pub name: String,
    pub game_type: u32,
    pub slots_used: u32,
    pub slots_total: u32,
}

enum DirectoryCommand {
    Upsert(DirectoryEntryUpdate),
    Remove(String),
    List(oneshot::Sender<Bytes>),
}

/// Cloneable handle to the directory actor's input channel.
#[derive(Clone)]
pub struct DirectoryHandle {
    tx: mpsc::Sender<DirectoryCommand>,
}

impl DirectoryHandle {
    /// Records or refreshes a room's directory entry.
    pub async fn upsert(&self, update: DirectoryEntryUpdate) {
        let _ = self.tx.send(DirectoryCommand::Upsert(update)).await;
    }

    /// Removes a room's directory entry.
    pub async fn remove(&self, name: String) {
        let _ = self.tx.send(DirectoryCommand::Remove(name)).await;
    }

    /// Returns a pre-encoded `GameListResponse` frame for the current snapshot.
    pub async fn list(&self) -> Bytes {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(DirectoryCommand::List(reply_tx)).await.is_err() {
            return encode_packet(&Packet::GameListResponse(Vec::new()));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| encode_packet(&Packet::GameListResponse(Vec::new())))
    }
}

/// Spawns the directory actor and returns a handle to it. Persistence is
/// lazy: nothing is read from `storage` until the first command arrives.
pub fn spawn(storage: Arc<dyn Storage>) -> DirectoryHandle {
    let (tx, rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
    tokio::spawn(run(storage, rx));
    DirectoryHandle { tx }
}

async fn run(storage: Arc<dyn Storage>, mut rx: mpsc::Receiver<DirectoryCommand>) {
    let mut entries: Option<HashMap<String, DirectoryEntryRecord>> = None;

    while let Some(command) = rx.recv().await {
        if entries.is_none() {
            entries = Some(load(&storage).await);
        }
        let map = entries.as_mut().expect("just loaded above");

        match command {
            DirectoryCommand::Upsert(update) => {
                let updated_at = now_unix();
                map.insert(
                    update.name.clone(),
                    DirectoryEntryRecord {
                        name: update.name,
                        game_type: update.game_type,
                        slots_used: update.slots_used,
                        slots_total: update.slots_total,
                        updated_at,
                    },
                );
                persist(&storage, map).await;
            }
            DirectoryCommand::Remove(name) => {
                if map.remove(&name).is_some() {
                    persist(&storage, map).await;
                }
            }
            DirectoryCommand::List(reply) => {
                let mut records: Vec<&DirectoryEntryRecord> = map.values().collect();
                records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                let listing = records
                    .into_iter()
                    .map(|record| GameListEntry {
                        game_type: record.game_type,
                        name: record.name.clone(),
                    })
                    .collect();
                let frame = encode_packet(&Packet::GameListResponse(listing));
                let _ = reply.send(frame);
            }
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn load(storage: &Arc<dyn Storage>) -> HashMap<String, DirectoryEntryRecord> {
    let Some(raw) = storage.get(DIRECTORY_KEY).await else {
        return HashMap::new();
    };
    match serde_json::from_slice::<Vec<DirectoryEntryRecord>>(&raw) {
        Ok(records) => records.into_iter().map(|r| (r.name.clone(), r)).collect(),
        Err(err) => {
            tracing::error!(error = ?err, "Failed to parse persisted directory, starting empty.");
            HashMap::new()
        }
    }
}

async fn persist(storage: &Arc<dyn Storage>, map: &HashMap<String, DirectoryEntryRecord>) {
    let mut records: Vec<&DirectoryEntryRecord> = map.values().collect();
    records.sort_by(|a, b| a.name.cmp(&b.name));
    match serde_json::to_vec(&records) {
        Ok(bytes) => {
            if let Err(err) = storage.put(DIRECTORY_KEY, bytes).await {
                tracing::error!(error = err, "Failed to persist directory.");
            }
        }
        Err(err) => tracing::error!(error = ?err, "Failed to serialize directory."),
    }
}
