//! Per-connection state machine: every socket starts out `Sniffing`
//! unclassified frames, transitions through `Bridging` once a
//! `CreateGame`/`JoinGame` intent is recognized and admitted, and then
//! spends the rest of its life `Bridged` — plain frame relay to and from
//! its room, exactly like the teacher's `handle_client_logic`/
//! `handle_server_logic` pair, just both sides running the same code
//! since every connection here is a "client" of a room.

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use protocol::{Packet, encode_packet, sniff_lobby_action};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::registry::{CreateError, RoomRegistry};
use crate::room::{RoomHandle, RoomOutbound};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

struct PendingBuffer {
    frames: Vec<Bytes>,
    bytes: usize,
    max_messages: usize,
    max_bytes: usize,
}

impl PendingBuffer {
    fn new(max_messages: usize, max_bytes: usize) -> Self {
        Self {
            frames: Vec::new(),
            bytes: 0,
            max_messages,
            max_bytes,
        }
    }

    /// Returns `false` if accepting `frame` would exceed this buffer's limits.
    fn push(&mut self, frame: Bytes) -> bool {
        if self.frames.len() >= self.max_messages || self.bytes + frame.len() > self.max_bytes {
            return false;
        }
        self.bytes += frame.len();
        self.frames.push(frame);
        true
    }
}

async fn close_with(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Drives one WebSocket connection end to end: sniff, admit, bridge.
pub async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>, config: Arc<Config>) {
    let conn_id = next_conn_id();
    let (mut sender, mut receiver) = socket.split();

    let _ = sender
        .send(Message::Binary(encode_packet(&Packet::ServerInfo {
            version: protocol::PROTOCOL_VERSION,
        })))
        .await;

    let sniff_result = tokio::time::timeout(
        config.connect_timeout,
        sniff_until_bridged(conn_id, &mut sender, &mut receiver, &registry, &config),
    )
    .await;

    let (room, outbound_rx) = match sniff_result {
        Ok(Some(bridged)) => bridged,
        Ok(None) => return, // closed during sniffing, already handled.
        Err(_) => {
            close_with(&mut sender, close_code::ERROR, "connect timeout").await;
            return;
        }
    };

    bridge(conn_id, sender, receiver, room, outbound_rx).await;
}

/// Sniffs frames until a `CreateGame`/`JoinGame` is admitted into a room,
/// or the connection is closed/rejected outright. Frames that arrive
/// before admission but carry no actionable intent are buffered so they
/// are not lost once bridging begins.
async fn sniff_until_bridged(
    conn_id: u64,
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    registry: &Arc<RoomRegistry>,
    config: &Arc<Config>,
) -> Option<(RoomHandle, mpsc::Receiver<RoomOutbound>)> {
    let mut pending = PendingBuffer::new(config.max_pending_messages, config.max_pending_bytes);
    let mut pending_unknown = PendingBuffer::new(
        config.max_pending_unknown_messages,
        config.max_pending_unknown_bytes,
    );
    let mut client_info_version: Option<u32> = None;

    loop {
        let message = match receiver.next().await {
            Some(Ok(message)) => message,
            _ => return None,
        };
        let bytes = match message {
            Message::Binary(bytes) => bytes,
            Message::Close(_) => return None,
            _ => continue,
        };
        if bytes.len() > config.max_frame_bytes {
            close_with(sender, close_code::SIZE, "frame too large").await;
            return None;
        }

        let Some(sniffed) = sniff_lobby_action(&bytes) else {
            if !pending_unknown.push(bytes) {
                close_with(sender, close_code::PROTOCOL, "too many unrecognized frames").await;
                return None;
            }
            continue;
        };

        if let Some(version) = sniffed.client_info_version {
            client_info_version = Some(version);
        }

        if sniffed.wants_game_list {
            let frame = registry_list(registry).await;
            let _ = sender.send(Message::Binary(frame)).await;
        }

        if let Some(create) = sniffed.create {
            let name = match String::from_utf8(create.name) {
                Ok(name) => name,
                Err(_) => {
                    let frame = reject_frame(create.cookie, protocol::JoinRejectReason::NotFound);
                    let _ = sender.send(Message::Binary(frame)).await;
                    continue;
                }
            };
            if !is_valid_room_name(&name) {
                close_with(sender, close_code::PROTOCOL, "invalid name").await;
                return None;
            }
            // password/difficulty live further inside the original frame;
            // re-decode to recover them since the sniffer only lifts name/cookie.
            let Some((password, difficulty)) = extract_create_fields(&bytes) else {
                continue;
            };
            match registry
                .create(name, password, difficulty, client_info_version)
                .await
            {
                Ok(room) => {
                    let (outbound_tx, outbound_rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
                    let reply = room
                        .create(conn_id, create.cookie, outbound_tx)
                        .await;
                    let _ = sender.send(Message::Binary(reply.frame)).await;
                    if reply.accepted {
                        return finish_bridging(sender, pending, pending_unknown, room, outbound_rx)
                            .await;
                    }
                }
                Err(CreateError::AlreadyExists) => {
                    let frame =
                        reject_frame(create.cookie, protocol::JoinRejectReason::CreateExists);
                    let _ = sender.send(Message::Binary(frame)).await;
                }
                Err(CreateError::VersionMismatch) => {
                    let frame =
                        reject_frame(create.cookie, protocol::JoinRejectReason::VersionMismatch);
                    let _ = sender.send(Message::Binary(frame)).await;
                }
            }
            continue;
        }

        if let Some(join) = sniffed.join {
            let name = match std::str::from_utf8(&join.name) {
                Ok(name) => name,
                Err(_) => {
                    let frame = reject_frame(join.cookie, protocol::JoinRejectReason::NotFound);
                    let _ = sender.send(Message::Binary(frame)).await;
                    continue;
                }
            };
            let Some(password) = extract_join_password(&bytes) else {
                continue;
            };
            match registry.lookup(name).await {
                Some(room) => {
                    let (outbound_tx, outbound_rx) = mpsc::channel(protocol::CHANNEL_BUFFER_SIZE);
                    let reply = room
                        .join(conn_id, join.cookie, password, client_info_version, outbound_tx)
                        .await;
                    let _ = sender.send(Message::Binary(reply.frame)).await;
                    if reply.accepted {
                        return finish_bridging(sender, pending, pending_unknown, room, outbound_rx)
                            .await;
                    }
                }
                None => {
                    let frame = reject_frame(join.cookie, protocol::JoinRejectReason::NotFound);
                    let _ = sender.send(Message::Binary(frame)).await;
                }
            }
            continue;
        }

        if !pending.push(bytes) {
            close_with(sender, close_code::SIZE, "too many frames before joining a room").await;
            return None;
        }
    }
}

/// Room names must match `[A-Za-z0-9_-]{1,32}`.
fn is_valid_room_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn reject_frame(cookie: u32, reason: protocol::JoinRejectReason) -> Bytes {
    encode_packet(&Packet::JoinReject {
        cookie,
        reason: reason.as_u8(),
    })
}

async fn registry_list(registry: &Arc<RoomRegistry>) -> Bytes {
    registry.directory_snapshot().await
}

/// Re-decodes a raw frame to recover the password and difficulty of a
/// `CreateGame` packet within it. The sniffer only surfaces cookie/name so
/// callers don't have to carry a `Vec<u8>` password through every
/// intermediate step unless they act on it.
fn extract_create_fields(bytes: &[u8]) -> Option<(Vec<u8>, u32)> {
    let packets = protocol::decode_top_level(bytes).ok()?;
    packets.into_iter().find_map(|p| match p {
        Packet::CreateGame {
            password, difficulty, ..
        } => Some((password, difficulty)),
        _ => None,
    })
}

fn extract_join_password(bytes: &[u8]) -> Option<Vec<u8>> {
    let packets = protocol::decode_top_level(bytes).ok()?;
    packets.into_iter().find_map(|p| match p {
        Packet::JoinGame { password, .. } => Some(password),
        _ => None,
    })
}

async fn finish_bridging(
    sender: &mut SplitSink<WebSocket, Message>,
    pending: PendingBuffer,
    pending_unknown: PendingBuffer,
    room: RoomHandle,
    mut outbound_rx: mpsc::Receiver<RoomOutbound>,
) -> Option<(RoomHandle, mpsc::Receiver<RoomOutbound>)> {
    // Flush anything buffered before admission directly to the client;
    // it is up to the client to resend lobby-relevant frames if needed.
    for frame in pending.frames.into_iter().chain(pending_unknown.frames) {
        if sender.send(Message::Binary(frame)).await.is_err() {
            return None;
        }
    }
    // Drain any outbound traffic the room already queued (e.g. a Connect
    // broadcast about this very connection) before control moves to `bridge`.
    while let Ok(message) = outbound_rx.try_recv() {
        match message {
            RoomOutbound::Frame(frame) => {
                let _ = sender.send(Message::Binary(frame)).await;
            }
            RoomOutbound::Close(code) => {
                close_with(sender, code, "closed").await;
                return None;
            }
        }
    }
    Some((room, outbound_rx))
}

async fn bridge(
    conn_id: u64,
    sender: SplitSink<WebSocket, Message>,
    receiver: SplitStream<WebSocket>,
    room: RoomHandle,
    outbound_rx: mpsc::Receiver<RoomOutbound>,
) {
    let receive_room = room.clone();
    let mut send_task = tokio::spawn(async move { send_loop(sender, outbound_rx).await });
    let mut receive_task =
        tokio::spawn(async move { receive_loop(conn_id, receiver, receive_room).await });

    tokio::select! {
        _ = &mut send_task => { receive_task.abort(); }
        _ = &mut receive_task => { send_task.abort(); }
    }

    room.disconnected(conn_id).await;
}

async fn send_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<RoomOutbound>,
) {
    while let Some(message) = outbound_rx.recv().await {
        match message {
            RoomOutbound::Frame(frame) => {
                if sender.send(Message::Binary(frame)).await.is_err() {
                    return;
                }
            }
            RoomOutbound::Close(code) => {
                close_with(&mut sender, code, "closed").await;
                return;
            }
        }
    }
}

async fn receive_loop(conn_id: u64, mut receiver: SplitStream<WebSocket>, room: RoomHandle) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Binary(bytes)) => {
                room.forward(conn_id, bytes).await;
            }
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
