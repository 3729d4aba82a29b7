//! Packet codes, the [`Packet`] union, and the `encode`/`decode` pair that
//! every connection speaks consistently across gateway, room and client.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The buffer sizes for the channels for intra-process communication.
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// Default absolute cap on a single frame's size (14 MiB), enforced at the
/// room's frame gate. Individual deployments may configure a smaller value.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 14 * 1024 * 1024;

/// Nested `Batch` frames are flattened recursively; this bounds how deep
/// that recursion is allowed to go before a frame is treated as malformed.
const MAX_BATCH_DEPTH: usize = 8;

// Packet codes (client/server shared).
const BATCH: u8 = 0x00;
const MESSAGE: u8 = 0x01;
const TURN: u8 = 0x02;
const DROP_PLAYER: u8 = 0x03;
const JOIN_ACCEPT: u8 = 0x12;
const CONNECT: u8 = 0x13;
const DISCONNECT: u8 = 0x14;
const JOIN_REJECT: u8 = 0x15;
const GAME_LIST: u8 = 0x21;
const CREATE_GAME: u8 = 0x22;
const JOIN_GAME: u8 = 0x23;
const LEAVE_GAME: u8 = 0x24;
const CLIENT_INFO: u8 = 0x31;
const SERVER_INFO: u8 = 0x32;

/// One active-game entry as carried in a `GameList` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameListEntry {
    /// Carried through from room creation; fixed at `0` in this implementation,
    /// no further semantics are attached to it here.
    pub game_type: u32,
    /// Room name (already validated against the room name grammar).
    pub name: String,
}

/// A single decoded logical unit. A frame yields one or more of these
/// (via [`Packet::Batch`] expansion during decode).
///
/// `GameList` and `Turn` have different shapes depending on direction
/// (client request vs. server response); rather than collapse that
/// asymmetry, each direction gets its own variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// A container of nested frames. Only ever produced by hand for
    /// encoding — [`decode_top_level`] always flattens batches away.
    Batch(Vec<Packet>),
    /// Unicast (to `id`) or broadcast (`id == 0xFF` on the way in) payload.
    /// Re-encoded with `id` set to the sender's slot before relaying.
    Message { id: u8, payload: Bytes },
    /// Client -> server turn submission. No `id`: the sender is implied.
    TurnRequest { turn: u32 },
    /// Server -> client turn broadcast, `id` is the originating slot.
    TurnBroadcast { id: u8, turn: u32 },
    /// Host-issued player drop. `id == 0` closes the whole room.
    DropPlayer { id: u8, reason: u32 },
    /// Successful `CreateGame`/`JoinGame` response.
    JoinAccept {
        cookie: u32,
        index: u8,
        seed: u32,
        difficulty: u32,
    },
    /// Broadcast when a player attaches to a slot.
    Connect { id: u8 },
    /// Broadcast (or targeted) when a player leaves a slot.
    Disconnect { id: u8, reason: u32 },
    /// Failed `CreateGame`/`JoinGame` response.
    JoinReject { cookie: u32, reason: u8 },
    /// Client -> server: "send me the game list". Carries no payload.
    GameListQuery,
    /// Server -> client: the current game list snapshot.
    GameListResponse(Vec<GameListEntry>),
    /// Request to create and host a new room.
    CreateGame {
        cookie: u32,
        name: Vec<u8>,
        password: Vec<u8>,
        difficulty: u32,
    },
    /// Request to join an existing room.
    JoinGame {
        cookie: u32,
        name: Vec<u8>,
        password: Vec<u8>,
    },
    /// Voluntary departure from the current room.
    LeaveGame,
    /// Client -> server protocol version announcement.
    ClientInfo { version: u32 },
    /// Server -> client protocol version announcement, sent unsolicited on open.
    ServerInfo { version: u32 },
}

/// Why a frame failed to decode. Any variant means the *whole* frame is
/// rejected — the decoder never partially applies a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame was empty (zero bytes).
    EmptyFrame,
    /// Ran out of bytes while reading a field.
    ShortRead,
    /// The leading byte did not match any known packet code.
    UnknownCode(u8),
    /// A `Batch` nested more than [`MAX_BATCH_DEPTH`] frames deep.
    BatchTooDeep,
    /// A `JoinReject` carried a reason byte outside the known enum.
    InvalidReason(u8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::ShortRead => write!(f, "short read while decoding packet"),
            Self::UnknownCode(code) => write!(f, "unknown packet code 0x{code:02x}"),
            Self::BatchTooDeep => write!(f, "batch nesting exceeded depth limit"),
            Self::InvalidReason(reason) => write!(f, "invalid join-reject reason {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}

fn read_u8(buf: &mut Bytes) -> Result<u8, DecodeError> {
    if buf.remaining() < 1 {
        return Err(DecodeError::ShortRead);
    }
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut Bytes) -> Result<u16, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::ShortRead);
    }
    Ok(buf.get_u16_le())
}

fn read_u32(buf: &mut Bytes) -> Result<u32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::ShortRead);
    }
    Ok(buf.get_u32_le())
}

fn read_short_bytes(buf: &mut Bytes) -> Result<Vec<u8>, DecodeError> {
    let len = read_u8(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::ShortRead);
    }
    Ok(buf.copy_to_bytes(len).to_vec())
}

fn read_long_bytes(buf: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = read_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::ShortRead);
    }
    Ok(buf.copy_to_bytes(len))
}

fn put_short_bytes(out: &mut BytesMut, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u8::MAX as usize, "short-string too long");
    out.put_u8(bytes.len() as u8);
    out.put_slice(bytes);
}

fn put_long_bytes(out: &mut BytesMut, bytes: &[u8]) {
    out.put_u32_le(bytes.len() as u32);
    out.put_slice(bytes);
}

fn decode_one(buf: &mut Bytes, depth: usize, out: &mut Vec<Packet>) -> Result<(), DecodeError> {
    if depth > MAX_BATCH_DEPTH {
        return Err(DecodeError::BatchTooDeep);
    }
    let code = read_u8(buf)?;
    match code {
        BATCH => {
            let count = read_u16(buf)?;
            for _ in 0..count {
                decode_one(buf, depth + 1, out)?;
            }
        }
        MESSAGE => {
            let id = read_u8(buf)?;
            let payload = read_long_bytes(buf)?;
            out.push(Packet::Message { id, payload });
        }
        TURN => {
            let turn = read_u32(buf)?;
            out.push(Packet::TurnRequest { turn });
        }
        DROP_PLAYER => {
            let id = read_u8(buf)?;
            let reason = read_u32(buf)?;
            out.push(Packet::DropPlayer { id, reason });
        }
        JOIN_ACCEPT => {
            let cookie = read_u32(buf)?;
            let index = read_u8(buf)?;
            let seed = read_u32(buf)?;
            let difficulty = read_u32(buf)?;
            out.push(Packet::JoinAccept {
                cookie,
                index,
                seed,
                difficulty,
            });
        }
        CONNECT => {
            let id = read_u8(buf)?;
            out.push(Packet::Connect { id });
        }
        DISCONNECT => {
            let id = read_u8(buf)?;
            let reason = read_u32(buf)?;
            out.push(Packet::Disconnect { id, reason });
        }
        JOIN_REJECT => {
            let cookie = read_u32(buf)?;
            let reason = read_u8(buf)?;
            if crate::JoinRejectReason::from_u8(reason).is_none() {
                return Err(DecodeError::InvalidReason(reason));
            }
            out.push(Packet::JoinReject { cookie, reason });
        }
        GAME_LIST => {
            out.push(Packet::GameListQuery);
        }
        CREATE_GAME => {
            let cookie = read_u32(buf)?;
            let name = read_short_bytes(buf)?;
            let password = read_short_bytes(buf)?;
            let difficulty = read_u32(buf)?;
            out.push(Packet::CreateGame {
                cookie,
                name,
                password,
                difficulty,
            });
        }
        JOIN_GAME => {
            let cookie = read_u32(buf)?;
            let name = read_short_bytes(buf)?;
            let password = read_short_bytes(buf)?;
            out.push(Packet::JoinGame {
                cookie,
                name,
                password,
            });
        }
        LEAVE_GAME => {
            out.push(Packet::LeaveGame);
        }
        CLIENT_INFO => {
            let version = read_u32(buf)?;
            out.push(Packet::ClientInfo { version });
        }
        SERVER_INFO => {
            let version = read_u32(buf)?;
            out.push(Packet::ServerInfo { version });
        }
        other => return Err(DecodeError::UnknownCode(other)),
    }
    Ok(())
}

/// Decodes a whole frame (one WebSocket binary message) into a flat
/// sequence of packets, expanding any `Batch` nesting along the way.
///
/// A frame shorter than 1 byte, an unknown code, a short read anywhere,
/// or batch nesting past the depth cap fails the *entire* frame — there
/// is no partial result.
pub fn decode_top_level(bytes: &[u8]) -> Result<Vec<Packet>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }
    let mut buf = Bytes::copy_from_slice(bytes);
    let mut out = Vec::new();
    decode_one(&mut buf, 0, &mut out)?;
    Ok(out)
}

/// Encodes a single packet into its wire representation.
///
/// [`Packet::Batch`] recursively encodes and concatenates its children
/// behind a `u16` count — this is the only way to produce a multi-packet
/// frame.
pub fn encode_packet(packet: &Packet) -> Bytes {
    let mut out = BytesMut::new();
    encode_into(packet, &mut out);
    out.freeze()
}

fn encode_into(packet: &Packet, out: &mut BytesMut) {
    match packet {
        Packet::Batch(children) => {
            out.put_u8(BATCH);
            out.put_u16_le(children.len() as u16);
            for child in children {
                encode_into(child, out);
            }
        }
        Packet::Message { id, payload } => {
            out.put_u8(MESSAGE);
            out.put_u8(*id);
            put_long_bytes(out, payload);
        }
        Packet::TurnRequest { turn } => {
            out.put_u8(TURN);
            out.put_u32_le(*turn);
        }
        Packet::TurnBroadcast { id, turn } => {
            out.put_u8(TURN);
            out.put_u8(*id);
            out.put_u32_le(*turn);
        }
        Packet::DropPlayer { id, reason } => {
            out.put_u8(DROP_PLAYER);
            out.put_u8(*id);
            out.put_u32_le(*reason);
        }
        Packet::JoinAccept {
            cookie,
            index,
            seed,
            difficulty,
        } => {
            out.put_u8(JOIN_ACCEPT);
            out.put_u32_le(*cookie);
            out.put_u8(*index);
            out.put_u32_le(*seed);
            out.put_u32_le(*difficulty);
        }
        Packet::Connect { id } => {
            out.put_u8(CONNECT);
            out.put_u8(*id);
        }
        Packet::Disconnect { id, reason } => {
            out.put_u8(DISCONNECT);
            out.put_u8(*id);
            out.put_u32_le(*reason);
        }
        Packet::JoinReject { cookie, reason } => {
            out.put_u8(JOIN_REJECT);
            out.put_u32_le(*cookie);
            out.put_u8(*reason);
        }
        Packet::GameListQuery => {
            out.put_u8(GAME_LIST);
        }
        Packet::GameListResponse(entries) => {
            out.put_u8(GAME_LIST);
            out.put_u16_le(entries.len() as u16);
            for entry in entries {
                out.put_u32_le(entry.game_type);
                put_short_bytes(out, entry.name.as_bytes());
            }
        }
        Packet::CreateGame {
            cookie,
            name,
            password,
            difficulty,
        } => {
            out.put_u8(CREATE_GAME);
            out.put_u32_le(*cookie);
            put_short_bytes(out, name);
            put_short_bytes(out, password);
            out.put_u32_le(*difficulty);
        }
        Packet::JoinGame {
            cookie,
            name,
            password,
        } => {
            out.put_u8(JOIN_GAME);
            out.put_u32_le(*cookie);
            put_short_bytes(out, name);
            put_short_bytes(out, password);
        }
        Packet::LeaveGame => {
            out.put_u8(LEAVE_GAME);
        }
        Packet::ClientInfo { version } => {
            out.put_u8(CLIENT_INFO);
            out.put_u32_le(*version);
        }
        Packet::ServerInfo { version } => {
            out.put_u8(SERVER_INFO);
            out.put_u32_le(*version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let encoded = encode_packet(&packet);
        let decoded = decode_top_level(&encoded).expect("decode should succeed");
        assert_eq!(decoded, vec![packet]);
    }

    #[test]
    fn roundtrips_every_symmetric_variant() {
        roundtrip(Packet::Message {
            id: 3,
            payload: Bytes::from_static(b"hello"),
        });
        roundtrip(Packet::TurnRequest { turn: 42 });
        roundtrip(Packet::DropPlayer { id: 1, reason: 7 });
        roundtrip(Packet::JoinAccept {
            cookie: 0x01020304,
            index: 2,
            seed: 99,
            difficulty: 3,
        });
        roundtrip(Packet::Connect { id: 0 });
        roundtrip(Packet::Disconnect { id: 1, reason: 3 });
        roundtrip(Packet::JoinReject {
            cookie: 0x11,
            reason: 3,
        });
        roundtrip(Packet::GameListQuery);
        roundtrip(Packet::CreateGame {
            cookie: 1,
            name: b"room1".to_vec(),
            password: b"".to_vec(),
            difficulty: 2,
        });
        roundtrip(Packet::JoinGame {
            cookie: 1,
            name: b"room1".to_vec(),
            password: b"".to_vec(),
        });
        roundtrip(Packet::LeaveGame);
        roundtrip(Packet::ClientInfo { version: 1 });
        roundtrip(Packet::ServerInfo { version: 1 });
    }

    #[test]
    fn server_info_matches_documented_bytes() {
        let encoded = encode_packet(&Packet::ServerInfo { version: 1 });
        assert_eq!(&encoded[..], &[0x32, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn turn_broadcast_omits_id_on_the_way_in() {
        let encoded = encode_packet(&Packet::TurnBroadcast { id: 2, turn: 5 });
        let decoded = decode_top_level(&encoded).unwrap();
        assert_eq!(decoded, vec![Packet::TurnRequest { turn: 5 }]);
    }

    #[test]
    fn game_list_response_decodes_as_empty_query_shape_is_distinct() {
        let response = Packet::GameListResponse(vec![GameListEntry {
            game_type: 0,
            name: "room1".to_string(),
        }]);
        let encoded = encode_packet(&response);
        // Only the first byte (the code) round trips through the decode-form;
        // the count/entries are response-only and not re-derivable from a query.
        assert_eq!(encoded[0], GAME_LIST);
        assert!(encoded.len() > 1);
    }

    #[test]
    fn flat_batch_roundtrips() {
        let batch = Packet::Batch(vec![
            Packet::Connect { id: 0 },
            Packet::Connect { id: 1 },
            Packet::LeaveGame,
        ]);
        let encoded = encode_packet(&batch);
        let decoded = decode_top_level(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![
                Packet::Connect { id: 0 },
                Packet::Connect { id: 1 },
                Packet::LeaveGame,
            ]
        );
    }

    #[test]
    fn nested_batches_flatten() {
        let nested = Packet::Batch(vec![
            Packet::Batch(vec![Packet::Connect { id: 0 }, Packet::Connect { id: 1 }]),
            Packet::LeaveGame,
        ]);
        let encoded = encode_packet(&nested);
        let decoded = decode_top_level(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![
                Packet::Connect { id: 0 },
                Packet::Connect { id: 1 },
                Packet::LeaveGame,
            ]
        );
    }

    #[test]
    fn batch_nesting_past_depth_cap_fails() {
        let mut packet = Packet::Connect { id: 0 };
        for _ in 0..(MAX_BATCH_DEPTH + 2) {
            packet = Packet::Batch(vec![packet]);
        }
        let encoded = encode_packet(&packet);
        assert_eq!(decode_top_level(&encoded), Err(DecodeError::BatchTooDeep));
    }

    #[test]
    fn empty_frame_fails() {
        assert_eq!(decode_top_level(&[]), Err(DecodeError::EmptyFrame));
    }

    #[test]
    fn unknown_code_fails_whole_frame() {
        assert_eq!(decode_top_level(&[0xFE]), Err(DecodeError::UnknownCode(0xFE)));
    }

    #[test]
    fn join_reject_with_unknown_reason_fails() {
        let encoded = encode_packet(&Packet::JoinReject {
            cookie: 1,
            reason: 0xAB,
        });
        assert_eq!(
            decode_top_level(&encoded),
            Err(DecodeError::InvalidReason(0xAB))
        );
    }

    #[test]
    fn short_read_fails() {
        // ClientInfo needs 4 more bytes for the version.
        assert_eq!(
            decode_top_level(&[CLIENT_INFO, 0x01, 0x00]),
            Err(DecodeError::ShortRead)
        );
    }

    #[test]
    fn short_read_inside_batch_fails_whole_frame() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(BATCH);
        bytes.put_u16_le(2);
        encode_into(&Packet::Connect { id: 0 }, &mut bytes);
        bytes.put_u8(CONNECT); // second entry promised but truncated
        assert_eq!(decode_top_level(&bytes), Err(DecodeError::ShortRead));
    }
}
