//! Runtime configuration. Every knob has a spec-mandated default and can
//! be overridden through an environment variable for deployment without
//! a rebuild — there is no config file here, the room directory carries
//! the only thing that would otherwise need one (which games exist).

use std::time::Duration;

/// All tunables the gateway and room actors read. Constructed once at
/// startup and handed around behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP/WS listener binds to.
    pub listen_addr: String,
    /// Absolute cap on a single frame's size, enforced at the room's frame gate.
    pub max_frame_bytes: usize,
    /// How long a gateway connection has, from its first received frame, to
    /// reach `Bridged` before it's closed as `1011 connect timeout`.
    pub connect_timeout: Duration,
    /// Pending-buffer limits for a gateway connection still in `Sniffing`.
    pub max_pending_messages: usize,
    pub max_pending_bytes: usize,
    pub max_pending_unknown_messages: usize,
    pub max_pending_unknown_bytes: usize,
    /// How many consecutive decode failures a room connection tolerates
    /// before it is closed `1002`.
    pub max_invalid_packets: u32,
    /// Sliding-window flood limits enforced per connection inside a room.
    pub max_messages_per_window: u32,
    pub rate_limit_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            max_frame_bytes: protocol::DEFAULT_MAX_FRAME_BYTES,
            connect_timeout: Duration::from_secs(15),
            max_pending_messages: 256,
            max_pending_bytes: 14 * 1024 * 1024,
            max_pending_unknown_messages: 32,
            max_pending_unknown_bytes: 1024 * 1024,
            max_invalid_packets: 2,
            max_messages_per_window: 512,
            rate_limit_window: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Applies environment overrides on top of [`Config::default`].
    ///
    /// Recognized variables: `LOBBY_LISTEN_ADDR`, `LOBBY_MAX_FRAME_BYTES`.
    /// Everything else is a protocol-level constant and not meant to be
    /// tuned per deployment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("LOBBY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(value) = std::env::var("LOBBY_MAX_FRAME_BYTES")
            && let Ok(parsed) = value.parse()
        {
            config.max_frame_bytes = parsed;
        }
        config
    }
}
