//! pairlink Server - Rendezvous point for pairing and sessions
//!
//! Listens for inbound connections, arbitrates claims against the single
//! live pairing offer, answers the winner with a confirm, and carries the
//! authenticated session traffic that follows.

pub mod server;

pub use server::{PairServer, PairingStarted};
