//! pairlink Client - Claim a scanned pairing code and hold the session
//!
//! The UI collaborator delivers decoded QR bytes; this crate validates them,
//! runs the claim/confirm exchange against the server named in the payload,
//! verifies the server's proof of the shared secret, and exposes the
//! resulting authenticated session.

pub mod client;

pub use client::{PairClient, PairedSession};
