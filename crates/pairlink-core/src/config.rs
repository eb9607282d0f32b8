//! Configuration for pairlink

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token length in bytes (128-bit)
pub const TOKEN_LEN: usize = 16;

/// Session secret length in bytes (256-bit)
pub const SECRET_LEN: usize = 32;

/// Handshake nonce length in bytes (128-bit)
pub const NONCE_LEN: usize = 16;

/// Confirm proof length in bytes (HMAC-SHA256 output)
pub const PROOF_LEN: usize = 32;

/// Format version carried by every network frame
pub const WIRE_VERSION: u8 = 1;

/// Format version carried by the pairing code payload
pub const PAYLOAD_VERSION: u8 = 1;

/// Maximum accepted frame size on the message channel (16 KiB)
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Main configuration for a pairing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Address the server binds to
    pub bind_addr: String,
    /// Address advertised in pairing codes (must be reachable by clients)
    pub advertise_addr: String,
    /// Server port (0 picks an ephemeral port)
    pub port: u16,
    /// How long a pairing offer stays claimable
    pub offer_ttl: Duration,
    /// How long the server waits for a claim on an accepted connection
    pub claim_timeout: Duration,
    /// How long the client waits for the confirm response
    pub confirm_timeout: Duration,
    /// How long the client waits for the TCP connect
    pub connect_timeout: Duration,
    /// Idle threshold after which a session is swept
    pub session_idle_timeout: Duration,
    /// Interval between idle-session sweeps
    pub sweep_interval: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            advertise_addr: "127.0.0.1".to_string(),
            port: 5125,
            offer_ttl: Duration::from_secs(120),
            claim_timeout: Duration::from_secs(30),
            confirm_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            session_idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl PairingConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set bind address
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Builder pattern: set advertised address
    pub fn with_advertise_addr(mut self, addr: impl Into<String>) -> Self {
        self.advertise_addr = addr.into();
        self
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set offer time-to-live
    pub fn with_offer_ttl(mut self, ttl: Duration) -> Self {
        self.offer_ttl = ttl;
        self
    }

    /// Builder pattern: set claim timeout
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Builder pattern: set confirm timeout
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Builder pattern: set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder pattern: set session idle timeout
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Builder pattern: set sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
