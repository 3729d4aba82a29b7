//! Side-effect-free decode-and-scan used by the gateway to decide routing
//! before anything is bridged to a room.

use crate::codec::{Packet, decode_top_level};

/// A cookie/name pair extracted from a `CreateGame` or `JoinGame` packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedIntent {
    pub cookie: u32,
    pub name: Vec<u8>,
}

/// The lobby-relevant intents found in one frame, in first-occurrence order
/// per field. A frame can carry more than one kind of intent if it is a
/// batch, but the gateway only ever acts on the first of each kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SniffResult {
    /// The protocol version announced by a `ClientInfo` packet, if any.
    pub client_info_version: Option<u32>,
    /// Set if a bare `GameList` request packet was present.
    pub wants_game_list: bool,
    /// Set if a `CreateGame` packet was present.
    pub create: Option<NamedIntent>,
    /// Set if a `JoinGame` packet was present.
    pub join: Option<NamedIntent>,
}

/// Decodes `bytes` and scans the flattened packet sequence for lobby
/// intent. Returns `None` only if the frame fails to decode — a frame
/// that decodes cleanly but carries no lobby intent yields `Some` with
/// every field left at its default.
pub fn sniff_lobby_action(bytes: &[u8]) -> Option<SniffResult> {
    let packets = decode_top_level(bytes).ok()?;
    let mut result = SniffResult::default();
    for packet in packets {
        match packet {
            Packet::ClientInfo { version } if result.client_info_version.is_none() => {
                result.client_info_version = Some(version);
            }
            Packet::GameListQuery => {
                result.wants_game_list = true;
            }
            Packet::CreateGame { cookie, name, .. } if result.create.is_none() => {
                result.create = Some(NamedIntent { cookie, name });
            }
            Packet::JoinGame { cookie, name, .. } if result.join.is_none() => {
                result.join = Some(NamedIntent { cookie, name });
            }
            _ => {}
        }
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_packet;

    #[test]
    fn undecodable_frame_yields_none() {
        assert_eq!(sniff_lobby_action(&[0xFE]), None);
    }

    #[test]
    fn decodable_frame_with_no_intent_yields_default() {
        let encoded = encode_packet(&Packet::LeaveGame);
        assert_eq!(sniff_lobby_action(&encoded), Some(SniffResult::default()));
    }

    #[test]
    fn finds_create_intent() {
        let encoded = encode_packet(&Packet::CreateGame {
            cookie: 7,
            name: b"room1".to_vec(),
            password: b"".to_vec(),
            difficulty: 0,
        });
        let result = sniff_lobby_action(&encoded).unwrap();
        assert_eq!(
            result.create,
            Some(NamedIntent {
                cookie: 7,
                name: b"room1".to_vec(),
            })
        );
        assert_eq!(result.join, None);
    }

    #[test]
    fn finds_first_occurrence_of_each_kind_in_a_batch() {
        let batch = Packet::Batch(vec![
            Packet::ClientInfo { version: 1 },
            Packet::GameListQuery,
            Packet::ClientInfo { version: 2 },
        ]);
        let encoded = encode_packet(&batch);
        let result = sniff_lobby_action(&encoded).unwrap();
        assert_eq!(result.client_info_version, Some(1));
        assert!(result.wants_game_list);
    }
}
