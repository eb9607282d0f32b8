//! Pairing code codec
//!
//! Packs the public fields of an offer into the bytes handed to the QR
//! encode/decode collaborator. The layout is a compact JSON object with a
//! leading format-version tag so future incompatible layouts fail closed
//! instead of silently misparsing.

use crate::offer::PairingOffer;
use chrono::{DateTime, Utc};
use pairlink_core::config::PAYLOAD_VERSION;
use pairlink_core::{Error, Result, Secret, Token};
use serde::{Deserialize, Serialize};

/// Read-only view of an offer's public fields as carried by the QR code.
///
/// Never sent over the network channel and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingPayload {
    pub v: u8,
    pub token: Token,
    pub secret: Secret,
    pub server_addr: String,
    pub server_port: u16,
    pub expires_at: DateTime<Utc>,
}

impl PairingPayload {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    v: u8,
}

/// Encode an offer's public fields for the QR collaborator
pub fn encode_payload(offer: &PairingOffer) -> Result<Vec<u8>> {
    let payload = PairingPayload {
        v: PAYLOAD_VERSION,
        token: offer.token,
        secret: offer.secret.clone(),
        server_addr: offer.server_addr.clone(),
        server_port: offer.server_port,
        expires_at: offer.expires_at,
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Decode bytes delivered by the QR collaborator.
///
/// The version tag is checked before any other field; a mismatch yields
/// `UnsupportedVersion` even when the rest of the payload is unreadable.
pub fn decode_payload(bytes: &[u8]) -> Result<PairingPayload> {
    let probe: VersionProbe =
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedPayload(e.to_string()))?;
    if probe.v != PAYLOAD_VERSION {
        return Err(Error::UnsupportedVersion {
            found: probe.v,
            expected: PAYLOAD_VERSION,
        });
    }
    serde_json::from_slice(bytes).map_err(|e| Error::MalformedPayload(e.to_string()))
}
