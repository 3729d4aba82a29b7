//! Rejection reasons carried in a [`JoinReject`](crate::Packet::JoinReject) packet.

/// Why a `CreateGame` or `JoinGame` request was rejected.
///
/// Carried as a single `u8` on the wire; admission stays open on the
/// connection afterwards, it's just the requested action that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinRejectReason {
    /// Never sent on the wire as a rejection, kept for completeness with the reason space.
    Success = 0,
    /// The connection already occupies a slot in a room.
    AlreadyInGame = 1,
    /// No room with that name exists.
    NotFound = 2,
    /// Supplied password does not match the room's password.
    IncorrectPassword = 3,
    /// The connection's `ClientInfo` version does not match the room's version.
    VersionMismatch = 4,
    /// All four slots are occupied.
    Full = 5,
    /// `CreateGame` named a room that already exists.
    CreateExists = 6,
}

impl JoinRejectReason {
    /// Recovers a reason from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Success,
            1 => Self::AlreadyInGame,
            2 => Self::NotFound,
            3 => Self::IncorrectPassword,
            4 => Self::VersionMismatch,
            5 => Self::Full,
            6 => Self::CreateExists,
            _ => return None,
        })
    }

    /// The wire byte for this reason.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
