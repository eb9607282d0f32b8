//! Wire message types for the pairing channel
//!
//! Every frame on the network carries a JSON envelope with a format-version
//! tag and a message-type discriminator. Decoding fails closed: unknown
//! versions are rejected before any field is interpreted.

use crate::config::{NONCE_LEN, PROOF_LEN, SECRET_LEN, TOKEN_LEN, WIRE_VERSION};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

fn decode_fixed<const N: usize>(s: &str) -> std::result::Result<[u8; N], String> {
    let bytes = BASE64
        .decode(s)
        .map_err(|e| format!("invalid base64: {}", e))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected {} bytes, got {}", N, bytes.len()))
}

/// Single-use identifier correlating a claim to its offer.
///
/// Not secret; used for lookup and replay prevention only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token([u8; TOKEN_LEN]);

impl Token {
    pub fn new(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&BASE64.encode(self.0))
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_fixed(&s).map(Token).map_err(D::Error::custom)
    }
}

/// Shared key material proven during the handshake, never sent over the
/// message channel. Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_fixed(&s).map(Secret).map_err(D::Error::custom)
    }
}

/// Fresh random value binding a proof to one specific handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    pub fn new(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_fixed(&s).map(Nonce).map_err(D::Error::custom)
    }
}

/// Keyed digest over both handshake nonces, proving possession of the secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proof([u8; PROOF_LEN]);

impl Proof {
    pub fn new(bytes: [u8; PROOF_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PROOF_LEN] {
        &self.0
    }
}

impl Serialize for Proof {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Proof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_fixed(&s).map(Proof).map_err(D::Error::custom)
    }
}

/// Identifier of an established session, distinct from the pairing token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why the server turned a message away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// Token mismatched, already consumed, or expired
    InvalidToken,
    /// Frame could not be understood
    Malformed,
}

/// Messages carried over the network channel.
///
/// The pairing payload itself never travels on this channel; only the
/// claim/confirm exchange and post-pairing session traffic do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Client claims the live offer named by `token`
    Claim { token: Token, client_nonce: Nonce },
    /// Server accepts the claim and proves possession of the secret
    Confirm {
        session_id: SessionId,
        server_nonce: Nonce,
        proof: Proof,
    },
    /// Server turns a claim or malformed frame away
    Reject { reason: RejectReason },
    /// Session traffic after a completed handshake
    Data { session_id: SessionId, body: String },
    /// Orderly session teardown
    Close { session_id: SessionId },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u8,
    #[serde(flatten)]
    message: Message,
}

#[derive(Deserialize)]
struct VersionProbe {
    v: u8,
}

impl Message {
    /// Message-type name for logging; never includes field contents
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Claim { .. } => "claim",
            Message::Confirm { .. } => "confirm",
            Message::Reject { .. } => "reject",
            Message::Data { .. } => "data",
            Message::Close { .. } => "close",
        }
    }

    /// Serialize into the versioned envelope carried inside a frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = Envelope {
            v: WIRE_VERSION,
            message: self.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Parse a frame payload, rejecting unknown versions before anything else
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        if probe.v != WIRE_VERSION {
            return Err(Error::UnsupportedVersion {
                found: probe.v,
                expected: WIRE_VERSION,
            });
        }
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        Ok(envelope.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> Token {
        Token::new([7u8; TOKEN_LEN])
    }

    fn sample_nonce(fill: u8) -> Nonce {
        Nonce::new([fill; NONCE_LEN])
    }

    #[test]
    fn messages_round_trip() {
        let session_id = SessionId::from_uuid(Uuid::new_v4());
        let messages = vec![
            Message::Claim {
                token: sample_token(),
                client_nonce: sample_nonce(1),
            },
            Message::Confirm {
                session_id,
                server_nonce: sample_nonce(2),
                proof: Proof::new([9u8; PROOF_LEN]),
            },
            Message::Reject {
                reason: RejectReason::InvalidToken,
            },
            Message::Data {
                session_id,
                body: "hello".to_string(),
            },
            Message::Close { session_id },
        ];

        for message in messages {
            let bytes = message.encode().unwrap();
            let decoded = Message::decode(&bytes).unwrap();
            assert_eq!(message, decoded);
        }
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let bytes = Message::Reject {
            reason: RejectReason::Malformed,
        }
        .encode()
        .unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["v"] = serde_json::json!(99);
        let tampered = serde_json::to_vec(&value).unwrap();

        let err = Message::decode(&tampered).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedVersion {
                found: 99,
                expected: WIRE_VERSION
            }
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Message::decode(b"{not json").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));

        let truncated = Message::Close {
            session_id: SessionId::from_uuid(Uuid::new_v4()),
        }
        .encode()
        .unwrap();
        let err = Message::decode(&truncated[..truncated.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn token_material_rejects_wrong_length() {
        let short = format!("\"{}\"", BASE64.encode([0u8; 4]));
        assert!(serde_json::from_str::<Token>(&short).is_err());
        assert!(serde_json::from_str::<Secret>(&short).is_err());
        assert!(serde_json::from_str::<Nonce>(&short).is_err());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new([42u8; SECRET_LEN]);
        assert_eq!(format!("{:?}", secret), "Secret(..)");
    }
}
