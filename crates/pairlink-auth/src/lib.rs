//! pairlink Auth - Pairing offers, handshake, and session management
//!
//! Implements the secure pairing flow:
//! 1. Server generates a one-time pairing offer (token + secret) with a
//!    bounded time-to-live
//! 2. The offer's public fields are encoded into a payload the UI renders as
//!    a QR code
//! 3. A client decodes the payload and claims the offer over the network;
//!    exactly one claim per token ever wins
//! 4. The server answers with a confirm proving possession of the secret via
//!    a keyed digest over both handshake nonces
//! 5. Both sides register the authenticated session with their session
//!    manager
//!
//! # Example
//!
//! ```no_run
//! use pairlink_auth::{encode_payload, PairingOffer, ServerHandshake};
//! use std::time::Duration;
//!
//! async fn example() -> pairlink_core::Result<()> {
//!     let offer = PairingOffer::generate("192.168.1.20", 5125, Duration::from_secs(120))?;
//!     let payload = encode_payload(&offer)?;
//!     // hand `payload` to the UI collaborator for QR rendering
//!
//!     let handshake = ServerHandshake::new();
//!     handshake.install_offer(offer).await;
//!     Ok(())
//! }
//! ```

pub mod handshake;
pub mod offer;
pub mod payload;
pub mod session;

pub use handshake::{
    compute_proof, verify_proof, ClientHandshake, ClientPhase, ConfirmContext, ServerHandshake,
    ServerPhase,
};
pub use offer::PairingOffer;
pub use payload::{decode_payload, encode_payload, PairingPayload};
pub use session::{Session, SessionManager, SessionState};
