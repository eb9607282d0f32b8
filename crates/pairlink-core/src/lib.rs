//! pairlink Core - Shared wire model and protocol definitions
//!
//! This crate provides the foundational types used by both the server and
//! client sides of a pairing exchange: message definitions, frame codec,
//! configuration, and the error taxonomy.

pub mod config;
pub mod error;
pub mod framing;
pub mod protocol;

pub use config::{PairingConfig, MAX_FRAME_BYTES, PAYLOAD_VERSION, WIRE_VERSION};
pub use error::{Error, Result};
pub use framing::{read_frame, write_frame};
pub use protocol::{Message, Nonce, Proof, RejectReason, Secret, SessionId, Token};
