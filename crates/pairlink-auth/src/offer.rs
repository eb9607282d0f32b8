//! One-time pairing offers
//!
//! Token and secret are drawn from the operating system's secure random
//! source. A failing random source is the one fatal, non-retriable error in
//! the whole pairing flow.

use chrono::{DateTime, Utc};
use pairlink_core::config::{NONCE_LEN, SECRET_LEN, TOKEN_LEN};
use pairlink_core::{Error, Nonce, Result, Secret, Token};
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::Duration;

pub(crate) fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::Generation(e.to_string()))?;
    Ok(buf)
}

/// Generate a fresh handshake nonce
pub(crate) fn random_nonce() -> Result<Nonce> {
    Ok(Nonce::new(random_array::<NONCE_LEN>()?))
}

/// A server-issued, time-bounded pairing invitation.
///
/// Immutable once created. At most one offer is live per server instance;
/// installing a new one discards any prior unclaimed offer.
#[derive(Debug, Clone)]
pub struct PairingOffer {
    pub token: Token,
    pub secret: Secret,
    pub server_addr: String,
    pub server_port: u16,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PairingOffer {
    /// Draw a new offer from the secure random source.
    ///
    /// Fails with `Error::Generation` only if the random source is
    /// unavailable.
    pub fn generate(addr: impl Into<String>, port: u16, ttl: Duration) -> Result<Self> {
        let token = Token::new(random_array::<TOKEN_LEN>()?);
        let secret = Secret::new(random_array::<SECRET_LEN>()?);
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Generation(format!("offer ttl out of range: {}", e)))?;

        Ok(Self {
            token,
            secret,
            server_addr: addr.into(),
            server_port: port,
            issued_at,
            expires_at: issued_at + ttl,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Seconds until expiry, clamped at zero
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_offers_are_distinct() {
        let a = PairingOffer::generate("127.0.0.1", 5125, Duration::from_secs(60)).unwrap();
        let b = PairingOffer::generate("127.0.0.1", 5125, Duration::from_secs(60)).unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.secret, b.secret);
    }

    #[test]
    fn expiry_is_bounded_by_ttl() {
        let offer = PairingOffer::generate("127.0.0.1", 5125, Duration::from_secs(60)).unwrap();
        assert!(!offer.is_expired());
        assert!(offer.is_expired_at(offer.expires_at + chrono::Duration::seconds(1)));
        assert!(offer.expires_in() <= 60);
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let offer = PairingOffer::generate("127.0.0.1", 5125, Duration::ZERO).unwrap();
        assert!(offer.is_expired_at(offer.expires_at + chrono::Duration::milliseconds(1)));
        assert_eq!(offer.expires_in(), 0);
    }
}
