//! Wire protocol for the lobby/relay system.
//!
//! Every WebSocket connection — from the moment it opens until it is
//! bridged into a room — speaks the same length-prefixed, little-endian
//! binary protocol. This crate is the single source of truth for that
//! protocol: the [`Packet`] union, framing/batching rules, and the
//! lightweight sniffer the gateway uses to route connections without
//! running any room logic itself.
//!
//! Consistent across client and server (see `lobby-server`).

mod codec;
mod reason;
mod sniff;

pub use codec::{
    CHANNEL_BUFFER_SIZE, DEFAULT_MAX_FRAME_BYTES, DecodeError, GameListEntry, Packet,
    decode_top_level, encode_packet,
};
pub use reason::JoinRejectReason;
pub use sniff::{SniffResult, sniff_lobby_action};

/// The protocol version this crate speaks. Carried in `ClientInfo`/`ServerInfo`
/// and compared against a room's recorded version on join.
pub const PROTOCOL_VERSION: u32 = 1;
