//! The room actor: single writer for one room's four player slots.
//!
//! Every mutation — admission, message routing, turn relay, drops — goes
//! through [`RoomActor::run`]'s input channel, so there is never a lock
//! to take on room state. This mirrors the relay's original `Room`
//! bookkeeping (see `lobby.rs` in the teacher), generalized from a
//! two-party host/client split to four admitted slots with routing.

use bytes::Bytes;
use protocol::{DecodeError, JoinRejectReason, Packet, decode_top_level, encode_packet};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::Config;
use crate::directory::{DirectoryEntryUpdate, DirectoryHandle};

const ROOM_CAPACITY: usize = 4;

/// Sent back to the gateway task for a connection attached to a room.
#[derive(Debug)]
pub enum RoomOutbound {
    /// Forward as a WebSocket binary frame.
    Frame(Bytes),
    /// Send a WebSocket close frame with this code, then stop relaying.
    Close(u16),
}

/// One admission attempt's outcome, encoded already as the frame to send back.
pub struct AdmissionReply {
    pub frame: Bytes,
    pub accepted: bool,
}

enum RoomCommand {
    Create {
        conn_id: u64,
        cookie: u32,
        outbound: mpsc::Sender<RoomOutbound>,
        reply: oneshot::Sender<AdmissionReply>,
    },
    Join {
        conn_id: u64,
        cookie: u32,
        password: Vec<u8>,
        client_info_version: Option<u32>,
        outbound: mpsc::Sender<RoomOutbound>,
        reply: oneshot::Sender<AdmissionReply>,
    },
    Frame {
        conn_id: u64,
        frame: Bytes,
    },
    Disconnect {
        conn_id: u64,
    },
}

/// Cloneable handle to a room actor's input channel.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// A handle is stale once its actor has exited and dropped its receiver.
    /// Mirrors the teacher's `to_host_sender.is_closed()` liveness check.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn create(
        &self,
        conn_id: u64,
        cookie: u32,
        outbound: mpsc::Sender<RoomOutbound>,
    ) -> AdmissionReply {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .tx
            .send(RoomCommand::Create {
                conn_id,
                cookie,
                outbound,
                reply: reply_tx,
            })
            .await;
        if sent.is_err() {
            return reject(cookie, JoinRejectReason::NotFound);
        }
        reply_rx.await.unwrap_or_else(|_| reject(cookie, JoinRejectReason::NotFound))
    }

    pub async fn join(
        &self,
        conn_id: u64,
        cookie: u32,
        password: Vec<u8>,
        client_info_version: Option<u32>,
        outbound: mpsc::Sender<RoomOutbound>,
    ) -> AdmissionReply {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .tx
            .send(RoomCommand::Join {
                conn_id,
                cookie,
                password,
                client_info_version,
                outbound,
                reply: reply_tx,
            })
            .await;
        if sent.is_err() {
            return reject(cookie, JoinRejectReason::NotFound);
        }
        reply_rx.await.unwrap_or_else(|_| reject(cookie, JoinRejectReason::NotFound))
    }

    /// Forwards an already-framed message from `conn_id` for the room to decode and route.
    pub async fn forward(&self, conn_id: u64, frame: Bytes) {
        let _ = self.tx.send(RoomCommand::Frame { conn_id, frame }).await;
    }

    /// Reports that `conn_id`'s transport has closed.
    pub async fn disconnected(&self, conn_id: u64) {
        let _ = self.tx.send(RoomCommand::Disconnect { conn_id }).await;
    }
}

fn reject(cookie: u32, reason: JoinRejectReason) -> AdmissionReply {
    AdmissionReply {
        frame: encode_packet(&Packet::JoinReject {
            cookie,
            reason: reason.as_u8(),
        }),
        accepted: false,
    }
}

struct Slot {
    conn_id: u64,
    outbound: mpsc::Sender<RoomOutbound>,
}

/// Owns one room's four slots and all of its routing/admission logic.
struct RoomActor {
    name: String,
    password: Vec<u8>,
    difficulty: u32,
    seed: u32,
    /// `ClientInfo` version recorded by whoever created the room; later
    /// joiners must match it if it is set.
    version: Option<u32>,
    slots: [Option<Slot>; ROOM_CAPACITY],
    /// Reason to report in the `Disconnect` broadcast once the transport for
    /// a connection actually closes — set at the moment a packet (not the
    /// transport) decided the connection should leave.
    pending_close_reason: HashMap<u64, u32>,
    invalid_packet_counts: HashMap<u64, u32>,
    /// Sliding flood-control window per connection: window start and the
    /// count of packets dispatched since then.
    rate_limit: HashMap<u64, (Instant, u32)>,
    directory: DirectoryHandle,
    config: Arc<Config>,
}

/// Spawns a fresh room and returns a handle to it. The directory entry is
/// published once, here, at creation; it is retracted in
/// [`RoomActor::close_room_and_kick_all`].
pub fn spawn(
    name: String,
    password: Vec<u8>,
    difficulty: u32,
    host_version: Option<u32>,
    seed: u32,
    directory: DirectoryHandle,
    config: Arc<Config>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
    let actor = RoomActor {
        name,
        password,
        difficulty,
        seed,
        version: host_version,
        slots: Default::default(),
        pending_close_reason: HashMap::new(),
        invalid_packet_counts: HashMap::new(),
        rate_limit: HashMap::new(),
        directory,
        config,
    };
    tokio::spawn(actor.run(rx));
    RoomHandle { tx }
}

impl RoomActor {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        self.publish_directory().await;
        while let Some(command) = rx.recv().await {
            match command {
                RoomCommand::Create {
                    conn_id,
                    cookie,
                    outbound,
                    reply,
                } => {
                    let outcome = self.admit_host(conn_id, cookie, outbound).await;
                    let _ = reply.send(outcome);
                }
                RoomCommand::Join {
                    conn_id,
                    cookie,
                    password,
                    client_info_version,
                    outbound,
                    reply,
                } => {
                    let outcome = self
                        .admit_join(conn_id, cookie, password, client_info_version, outbound)
                        .await;
                    let _ = reply.send(outcome);
                }
                RoomCommand::Frame { conn_id, frame } => {
                    self.handle_frame(conn_id, &frame).await;
                }
                RoomCommand::Disconnect { conn_id } => {
                    self.on_disconnect(conn_id).await;
                }
            }
        }
        // Input channel dropped with no teardown request: clean up regardless.
        self.directory.remove(self.name.clone()).await;
    }

    fn slot_of(&self, conn_id: u64) -> Option<u8> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref()
                .filter(|s| s.conn_id == conn_id)
                .map(|_| i as u8)
        })
    }

    fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    fn slots_used(&self) -> u32 {
        self.slots.iter().filter(|slot| slot.is_some()).count() as u32
    }

    async fn publish_directory(&self) {
        self.directory
            .upsert(DirectoryEntryUpdate {
                name: self.name.clone(),
                game_type: 0,
                slots_used: self.slots_used(),
                slots_total: ROOM_CAPACITY as u32,
            })
            .await;
    }

    async fn admit_host(
        &mut self,
        conn_id: u64,
        cookie: u32,
        outbound: mpsc::Sender<RoomOutbound>,
    ) -> AdmissionReply {
        if self.version.is_none() {
            return reject(cookie, JoinRejectReason::VersionMismatch);
        }
        debug_assert!(self.slots[0].is_none(), "host slot claimed twice");
        self.slots[0] = Some(Slot { conn_id, outbound });
        self.publish_directory().await;
        AdmissionReply {
            frame: encode_packet(&Packet::JoinAccept {
                cookie,
                index: 0,
                seed: self.seed,
                difficulty: self.difficulty,
            }),
            accepted: true,
        }
    }

    async fn admit_join(
        &mut self,
        conn_id: u64,
        cookie: u32,
        password: Vec<u8>,
        client_info_version: Option<u32>,
        outbound: mpsc::Sender<RoomOutbound>,
    ) -> AdmissionReply {
        if self.slot_of(conn_id).is_some() {
            return reject(cookie, JoinRejectReason::AlreadyInGame);
        }
        if password != self.password {
            return reject(cookie, JoinRejectReason::IncorrectPassword);
        }
        match (self.version, client_info_version) {
            (Some(room_version), Some(joiner_version)) if room_version != joiner_version => {
                return reject(cookie, JoinRejectReason::VersionMismatch);
            }
            (Some(_), None) => {
                return reject(cookie, JoinRejectReason::VersionMismatch);
            }
            _ => {}
        }
        let Some(index) = self.first_free_slot() else {
            return reject(cookie, JoinRejectReason::Full);
        };
        self.slots[index] = Some(Slot { conn_id, outbound });
        self.broadcast_except(index, &Packet::Connect { id: index as u8 })
            .await;
        self.publish_directory().await;
        AdmissionReply {
            frame: encode_packet(&Packet::JoinAccept {
                cookie,
                index: index as u8,
                seed: self.seed,
                difficulty: self.difficulty,
            }),
            accepted: true,
        }
    }

    async fn handle_frame(&mut self, conn_id: u64, frame: &[u8]) {
        if frame.len() > self.config.max_frame_bytes {
            if let Some(slot) = self.slots.iter().flatten().find(|s| s.conn_id == conn_id) {
                let _ = slot.outbound.send(RoomOutbound::Close(1009)).await;
            }
            return;
        }
        let packets = match decode_top_level(frame) {
            Ok(packets) => packets,
            Err(err) => {
                self.note_invalid_packet(conn_id, err).await;
                return;
            }
        };
        if self.note_flood(conn_id, packets.len() as u32).await {
            return;
        }
        for packet in packets {
            self.dispatch(conn_id, packet).await;
        }
    }

    /// Sliding-window flood control: returns `true` if `conn_id` was just
    /// closed for exceeding `max_messages_per_window`.
    async fn note_flood(&mut self, conn_id: u64, packets_in_frame: u32) -> bool {
        let now = Instant::now();
        let window = self.config.rate_limit_window;
        let (start, count) = self
            .rate_limit
            .entry(conn_id)
            .or_insert((now, 0));
        if now.duration_since(*start) > window {
            *start = now;
            *count = 0;
        }
        *count += packets_in_frame;
        if *count > self.config.max_messages_per_window
            && let Some(slot) = self.slots.iter().flatten().find(|s| s.conn_id == conn_id)
        {
            tracing::warn!(conn_id, "Closing connection for exceeding the message rate limit.");
            let _ = slot.outbound.send(RoomOutbound::Close(1008)).await;
            return true;
        }
        false
    }

    async fn note_invalid_packet(&mut self, conn_id: u64, err: DecodeError) {
        tracing::warn!(conn_id, error = %err, "Dropping undecodable frame from room connection.");
        let count = self.invalid_packet_counts.entry(conn_id).or_insert(0);
        *count += 1;
        if *count > self.config.max_invalid_packets
            && let Some(slot) = self.slots.iter().flatten().find(|s| s.conn_id == conn_id)
        {
            let _ = slot.outbound.send(RoomOutbound::Close(1002)).await;
        }
    }

    async fn dispatch(&mut self, conn_id: u64, packet: Packet) {
        let Some(sender_index) = self.slot_of(conn_id) else {
            tracing::warn!(conn_id, "Frame from a connection not occupying any slot.");
            return;
        };
        match packet {
            Packet::Message { id, payload } => {
                let relayed = Packet::Message {
                    id: sender_index,
                    payload,
                };
                if id == 0xFF {
                    self.broadcast_except(sender_index as usize, &relayed).await;
                } else if let Some(slot) = self.slots.get(id as usize).and_then(|s| s.as_ref()) {
                    let _ = slot
                        .outbound
                        .send(RoomOutbound::Frame(encode_packet(&relayed)))
                        .await;
                }
            }
            Packet::TurnRequest { turn } => {
                let broadcast = Packet::TurnBroadcast {
                    id: sender_index,
                    turn,
                };
                self.broadcast_except(sender_index as usize, &broadcast).await;
            }
            Packet::DropPlayer { id, reason } => {
                if sender_index != 0 {
                    tracing::warn!(conn_id, "Non-host attempted to drop a player.");
                    if let Some(slot) = self.slots[sender_index as usize].as_ref() {
                        let _ = slot.outbound.send(RoomOutbound::Close(1008)).await;
                    }
                    return;
                }
                if id == 0 {
                    self.close_room_and_kick_all(reason).await;
                } else if let Some(slot) = self.slots.get(id as usize).and_then(|s| s.as_ref()) {
                    self.pending_close_reason.insert(slot.conn_id, reason);
                    let _ = slot.outbound.send(RoomOutbound::Close(1000)).await;
                }
            }
            Packet::LeaveGame => {
                if sender_index == 0 {
                    self.close_room_and_kick_all(3).await;
                } else if let Some(slot) = self.slots[sender_index as usize].as_ref() {
                    self.pending_close_reason.insert(slot.conn_id, 3);
                    let _ = slot.outbound.send(RoomOutbound::Close(1000)).await;
                }
            }
            other => {
                tracing::debug!(conn_id, ?other, "Ignoring non-actionable packet inside a room.");
            }
        }
    }

    async fn broadcast_except(&self, except_index: usize, packet: &Packet) {
        let frame = encode_packet(packet);
        for (index, slot) in self.slots.iter().enumerate() {
            if index == except_index {
                continue;
            }
            if let Some(slot) = slot {
                let _ = slot.outbound.send(RoomOutbound::Frame(frame.clone())).await;
            }
        }
    }

    async fn on_disconnect(&mut self, conn_id: u64) {
        let Some(index) = self.slot_of(conn_id) else {
            return;
        };
        let reason = self.pending_close_reason.remove(&conn_id).unwrap_or(0);
        self.invalid_packet_counts.remove(&conn_id);
        self.rate_limit.remove(&conn_id);
        self.slots[index as usize] = None;
        if index == 0 {
            // The host's transport went away without an explicit LeaveGame;
            // the room cannot continue without slot 0.
            self.close_room_and_kick_all(reason).await;
            return;
        }
        self.broadcast_except(
            ROOM_CAPACITY,
            &Packet::Disconnect {
                id: index,
                reason,
            },
        )
        .await;
        if self.slots_used() > 0 {
            self.publish_directory().await;
        } else {
            self.directory.remove(self.name.clone()).await;
        }
    }

    async fn close_room_and_kick_all(&mut self, reason: u32) {
        let occupied: Vec<u8> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i as u8))
            .collect();
        for id in occupied {
            self.broadcast_except(ROOM_CAPACITY, &Packet::Disconnect { id, reason })
                .await;
        }
        for slot in self.slots.iter().flatten() {
            let _ = slot.outbound.send(RoomOutbound::Close(1000)).await;
        }
        self.slots = Default::default();
        self.pending_close_reason.clear();
        self.invalid_packet_counts.clear();
        self.rate_limit.clear();
        self.directory.remove(self.name.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory;
    use crate::storage::FileStorage;

    fn test_config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    fn test_directory() -> DirectoryHandle {
        let dir =
            std::env::temp_dir().join(format!("lobby-server-room-test-{}", std::process::id()));
        directory::spawn(Arc::new(FileStorage::new(dir)))
    }

    #[tokio::test]
    async fn host_create_occupies_slot_zero() {
        let handle = spawn(
            "arena".to_string(),
            b"secret".to_vec(),
            0,
            Some(1),
            42,
            test_directory(),
            test_config(),
        );
        let (out_tx, _out_rx) = mpsc::channel(8);
        let reply = handle.create(1, 7, out_tx).await;
        assert!(reply.accepted);
        let decoded = decode_top_level(&reply.frame).unwrap();
        assert_eq!(
            decoded,
            vec![Packet::JoinAccept {
                cookie: 7,
                index: 0,
                seed: 42,
                difficulty: 0,
            }]
        );
    }

    #[tokio::test]
    async fn join_rejects_wrong_password() {
        let handle = spawn(
            "arena".to_string(),
            b"secret".to_vec(),
            0,
            Some(1),
            1,
            test_directory(),
            test_config(),
        );
        let (host_tx, _host_rx) = mpsc::channel(8);
        handle.create(1, 1, host_tx).await;

        let (join_tx, _join_rx) = mpsc::channel(8);
        let reply = handle.join(2, 2, b"wrong".to_vec(), Some(1), join_tx).await;
        assert!(!reply.accepted);
        let decoded = decode_top_level(&reply.frame).unwrap();
        assert_eq!(
            decoded,
            vec![Packet::JoinReject {
                cookie: 2,
                reason: JoinRejectReason::IncorrectPassword.as_u8(),
            }]
        );
    }

    #[tokio::test]
    async fn join_rejects_when_full() {
        let handle = spawn(
            "arena".to_string(),
            Vec::new(),
            0,
            Some(1),
            1,
            test_directory(),
            test_config(),
        );
        let (host_tx, _r0) = mpsc::channel(8);
        handle.create(1, 1, host_tx).await;
        for conn_id in 2..=4u64 {
            let (tx, _rx) = mpsc::channel(8);
            let reply = handle
                .join(conn_id, conn_id as u32, Vec::new(), Some(1), tx)
                .await;
            assert!(reply.accepted);
        }
        let (tx, _rx) = mpsc::channel(8);
        let reply = handle.join(5, 5, Vec::new(), Some(1), tx).await;
        assert!(!reply.accepted);
        let decoded = decode_top_level(&reply.frame).unwrap();
        assert_eq!(
            decoded,
            vec![Packet::JoinReject {
                cookie: 5,
                reason: JoinRejectReason::Full.as_u8(),
            }]
        );
    }

    #[tokio::test]
    async fn broadcast_message_reaches_other_slots_but_not_sender() {
        let handle = spawn(
            "arena".to_string(),
            Vec::new(),
            0,
            Some(1),
            1,
            test_directory(),
            test_config(),
        );
        let (host_tx, mut host_rx) = mpsc::channel(8);
        handle.create(1, 1, host_tx).await;
        let (peer_tx, mut peer_rx) = mpsc::channel(8);
        handle.join(2, 2, Vec::new(), Some(1), peer_tx).await;
        // Drain the Connect{id:1} broadcast sent to the host on peer join.
        let _ = host_rx.recv().await;

        let frame = encode_packet(&Packet::Message {
            id: 0xFF,
            payload: Bytes::from_static(b"hi"),
        });
        handle.forward(2, frame).await;

        match host_rx.recv().await {
            Some(RoomOutbound::Frame(frame)) => {
                let decoded = decode_top_level(&frame).unwrap();
                assert_eq!(
                    decoded,
                    vec![Packet::Message {
                        id: 1,
                        payload: Bytes::from_static(b"hi"),
                    }]
                );
            }
            _ => panic!("expected a frame"),
        }
        assert!(peer_rx.try_recv().is_err(), "sender should not receive its own broadcast");
    }

    #[tokio::test]
    async fn oversize_frame_closes_with_capacity_code() {
        let mut config = Config::default();
        config.max_frame_bytes = 8;
        let handle = spawn(
            "arena".to_string(),
            Vec::new(),
            0,
            Some(1),
            1,
            test_directory(),
            Arc::new(config),
        );
        let (host_tx, mut host_rx) = mpsc::channel(8);
        handle.create(1, 1, host_tx).await;
        handle.forward(1, Bytes::from(vec![0u8; 64])).await;
        match host_rx.recv().await {
            Some(RoomOutbound::Close(code)) => assert_eq!(code, 1009),
            other => panic!("expected a capacity close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn flooding_closes_with_policy_code() {
        let mut config = Config::default();
        config.max_messages_per_window = 2;
        let handle = spawn(
            "arena".to_string(),
            Vec::new(),
            0,
            Some(1),
            1,
            test_directory(),
            Arc::new(config),
        );
        let (host_tx, mut host_rx) = mpsc::channel(16);
        handle.create(1, 1, host_tx).await;
        let turn = encode_packet(&Packet::TurnRequest { turn: 0 });
        for _ in 0..4 {
            handle.forward(1, turn.clone()).await;
        }
        let mut saw_policy_close = false;
        while let Ok(message) = host_rx.try_recv() {
            if matches!(message, RoomOutbound::Close(1008)) {
                saw_policy_close = true;
            }
        }
        assert!(saw_policy_close, "flooding host should be closed with 1008");
    }

    #[tokio::test]
    async fn host_leave_kicks_everyone() {
        let handle = spawn(
            "arena".to_string(),
            Vec::new(),
            0,
            Some(1),
            1,
            test_directory(),
            test_config(),
        );
        let (host_tx, mut host_rx) = mpsc::channel(8);
        handle.create(1, 1, host_tx).await;
        let (peer_tx, mut peer_rx) = mpsc::channel(8);
        handle.join(2, 2, Vec::new(), Some(1), peer_tx).await;

        handle.forward(1, encode_packet(&Packet::LeaveGame)).await;

        let mut saw_close = false;
        while let Some(message) = peer_rx.recv().await {
            if let RoomOutbound::Close(code) = message {
                assert_eq!(code, 1000);
                saw_close = true;
                break;
            }
        }
        assert!(saw_close, "peer should be closed when host leaves");
        // Host's own channel also gets closed.
        let mut saw_host_close = false;
        while let Some(message) = host_rx.recv().await {
            if matches!(message, RoomOutbound::Close(1000)) {
                saw_host_close = true;
                break;
            }
        }
        assert!(saw_host_close);
    }
}
