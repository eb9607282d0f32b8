//! Handshake state machines for both roles
//!
//! The server drives `Idle -> Offered -> Claimed -> Confirmed` (or `Expired` /
//! `Cancelled`); the client mirrors it with `Idle -> HasPayload -> Claiming ->
//! Confirmed` (or `Rejected` / `TimedOut`). State mutation is a single short
//! critical section; the lock is never held across network I/O, so exactly one
//! of any number of concurrent claims can win the `Offered -> Claimed`
//! transition.

use crate::offer::{random_nonce, PairingOffer};
use crate::payload::{decode_payload, PairingPayload};
use hmac::{Hmac, Mac};
use pairlink_core::{Error, Message, Nonce, Proof, RejectReason, Result, Secret, SessionId, Token};
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Keyed digest over `client_nonce || server_nonce` using the offer secret.
///
/// Binds the confirm to this specific handshake instance, so a confirm
/// replayed from an earlier pairing never verifies.
pub fn compute_proof(secret: &Secret, client_nonce: &Nonce, server_nonce: &Nonce) -> Proof {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(client_nonce.as_bytes());
    mac.update(server_nonce.as_bytes());
    let digest = mac.finalize().into_bytes();
    Proof::new(digest.into())
}

/// Constant-time verification of a confirm proof
pub fn verify_proof(
    secret: &Secret,
    client_nonce: &Nonce,
    server_nonce: &Nonce,
    proof: &Proof,
) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(client_nonce.as_bytes());
    mac.update(server_nonce.as_bytes());
    mac.verify_slice(proof.as_bytes()).is_ok()
}

/// Observable server-side handshake phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Idle,
    Offered,
    Claimed,
    Confirmed,
    Expired,
    Cancelled,
}

#[derive(Debug)]
enum ServerState {
    Idle,
    Offered(PairingOffer),
    Claimed {
        secret: Secret,
        session_id: SessionId,
    },
    Confirmed {
        session_id: SessionId,
    },
    Expired,
    Cancelled,
}

/// Everything the server needs to answer a winning claim
#[derive(Debug)]
pub struct ConfirmContext {
    pub session_id: SessionId,
    pub server_nonce: Nonce,
    pub proof: Proof,
    pub secret: Secret,
}

impl ConfirmContext {
    pub fn confirm_message(&self) -> Message {
        Message::Confirm {
            session_id: self.session_id,
            server_nonce: self.server_nonce,
            proof: self.proof,
        }
    }
}

/// Server-side handshake state holder.
///
/// Owns the single live-offer slot; installing a new offer discards any prior
/// unclaimed one.
pub struct ServerHandshake {
    state: Mutex<ServerState>,
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandshake {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::Idle),
        }
    }

    /// Install a fresh offer as the single live offer
    pub async fn install_offer(&self, offer: PairingOffer) {
        let mut state = self.state.lock().await;
        if let ServerState::Offered(old) = &*state {
            info!(token = %old.token, "discarding unclaimed pairing offer");
        }
        debug!(token = %offer.token, expires_at = %offer.expires_at, "pairing offer installed");
        *state = ServerState::Offered(offer);
    }

    /// Attempt the `Offered -> Claimed` transition.
    ///
    /// Exactly one concurrent claim can succeed; all others observe
    /// `InvalidToken`. A claim arriving after expiry moves the state to
    /// `Expired` and is rejected the same way. The lock covers only the
    /// transition; no I/O happens inside.
    pub async fn claim(
        &self,
        token: &Token,
        client_nonce: Nonce,
        session_id: SessionId,
    ) -> Result<ConfirmContext> {
        let mut state = self.state.lock().await;
        match &*state {
            ServerState::Offered(offer) => {
                if offer.token != *token {
                    warn!("claim with mismatched token rejected");
                    return Err(Error::InvalidToken);
                }
                if offer.is_expired() {
                    debug!("claim arrived after offer expiry");
                    *state = ServerState::Expired;
                    return Err(Error::InvalidToken);
                }

                let server_nonce = random_nonce()?;
                let proof = compute_proof(&offer.secret, &client_nonce, &server_nonce);
                let secret = offer.secret.clone();
                *state = ServerState::Claimed {
                    secret: secret.clone(),
                    session_id,
                };

                Ok(ConfirmContext {
                    session_id,
                    server_nonce,
                    proof,
                    secret,
                })
            }
            _ => Err(Error::InvalidToken),
        }
    }

    /// Mark the claim as answered once the confirm has been sent.
    ///
    /// Returns the session id and secret to register with the session
    /// manager.
    pub async fn confirmed(&self) -> Result<(SessionId, Secret)> {
        let mut state = self.state.lock().await;
        match &*state {
            ServerState::Claimed { secret, session_id } => {
                let secret = secret.clone();
                let session_id = *session_id;
                *state = ServerState::Confirmed { session_id };
                info!(session_id = %session_id, "pairing confirmed");
                Ok((session_id, secret))
            }
            _ => Err(Error::Protocol(
                "confirm outside of a claimed handshake".to_string(),
            )),
        }
    }

    /// Explicitly cancel a live offer. Returns whether an offer was live.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        if matches!(&*state, ServerState::Offered(_)) {
            *state = ServerState::Cancelled;
            info!("pairing offer cancelled");
            true
        } else {
            false
        }
    }

    /// Move a live offer to `Expired` if its deadline has passed.
    ///
    /// Used by the periodic refresh; a late claim observes `InvalidToken`
    /// either way.
    pub async fn expire_if_due(&self) -> bool {
        let mut state = self.state.lock().await;
        match &*state {
            ServerState::Offered(offer) if offer.is_expired() => {
                *state = ServerState::Expired;
                debug!("pairing offer expired unclaimed");
                true
            }
            _ => false,
        }
    }

    pub async fn phase(&self) -> ServerPhase {
        match &*self.state.lock().await {
            ServerState::Idle => ServerPhase::Idle,
            ServerState::Offered(_) => ServerPhase::Offered,
            ServerState::Claimed { .. } => ServerPhase::Claimed,
            ServerState::Confirmed { .. } => ServerPhase::Confirmed,
            ServerState::Expired => ServerPhase::Expired,
            ServerState::Cancelled => ServerPhase::Cancelled,
        }
    }
}

/// Observable client-side handshake phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Idle,
    HasPayload,
    Claiming,
    Confirmed,
    Rejected,
    TimedOut,
}

#[derive(Debug)]
enum ClientState {
    Idle,
    HasPayload(PairingPayload),
    Claiming {
        payload: PairingPayload,
        client_nonce: Nonce,
    },
    Confirmed {
        session_id: SessionId,
    },
    Rejected,
    TimedOut,
}

/// Client-side handshake state holder
pub struct ClientHandshake {
    state: Mutex<ClientState>,
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClientState::Idle),
        }
    }

    /// Take decoded bytes from the QR collaborator.
    ///
    /// An already-expired payload is rejected here so the client never
    /// bothers the network with a claim it knows is stale.
    pub async fn accept_payload(&self, bytes: &[u8]) -> Result<PairingPayload> {
        let payload = decode_payload(bytes)?;
        if payload.is_expired() {
            debug!("scanned payload already expired");
            return Err(Error::InvalidToken);
        }

        let mut state = self.state.lock().await;
        *state = ClientState::HasPayload(payload.clone());
        Ok(payload)
    }

    /// Draw a fresh nonce and produce the claim message.
    ///
    /// Transitions `HasPayload -> Claiming`.
    pub async fn start_claim(&self) -> Result<Message> {
        let mut state = self.state.lock().await;
        match &*state {
            ClientState::HasPayload(payload) => {
                if payload.is_expired() {
                    return Err(Error::InvalidToken);
                }
                let client_nonce = random_nonce()?;
                let claim = Message::Claim {
                    token: payload.token,
                    client_nonce,
                };
                *state = ClientState::Claiming {
                    payload: payload.clone(),
                    client_nonce,
                };
                Ok(claim)
            }
            _ => Err(Error::Protocol("claim without a pairing payload".to_string())),
        }
    }

    /// Validate the server's confirm against the locally recomputed proof.
    ///
    /// On success returns the material to register the session; on mismatch
    /// the handshake moves to `Rejected` and no session is ever created.
    pub async fn handle_confirm(
        &self,
        session_id: SessionId,
        server_nonce: Nonce,
        proof: Proof,
    ) -> Result<(SessionId, Secret)> {
        let mut state = self.state.lock().await;
        match &*state {
            ClientState::Claiming {
                payload,
                client_nonce,
            } => {
                if !verify_proof(&payload.secret, client_nonce, &server_nonce, &proof) {
                    warn!("confirm proof mismatch; possible impostor server");
                    *state = ClientState::Rejected;
                    return Err(Error::ProofMismatch);
                }
                let secret = payload.secret.clone();
                *state = ClientState::Confirmed { session_id };
                info!(session_id = %session_id, "pairing confirmed by server");
                Ok((session_id, secret))
            }
            _ => Err(Error::Protocol("confirm outside of a claim".to_string())),
        }
    }

    /// Record a reject from the server and map it to the caller-facing error
    pub async fn handle_reject(&self, reason: RejectReason) -> Error {
        let mut state = self.state.lock().await;
        if matches!(&*state, ClientState::Claiming { .. }) {
            *state = ClientState::Rejected;
        }
        match reason {
            RejectReason::InvalidToken => Error::InvalidToken,
            RejectReason::Malformed => Error::Protocol("server rejected claim as malformed".to_string()),
        }
    }

    /// The bounded confirm wait elapsed.
    ///
    /// A retry must go through a fresh payload; the consumed claim is never
    /// resent.
    pub async fn timed_out(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, ClientState::Claiming { .. }) {
            *state = ClientState::TimedOut;
        }
    }

    /// The channel failed mid-handshake (unexpected close or frame)
    pub async fn fail(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, ClientState::Claiming { .. }) {
            *state = ClientState::Rejected;
        }
    }

    pub async fn phase(&self) -> ClientPhase {
        match &*self.state.lock().await {
            ClientState::Idle => ClientPhase::Idle,
            ClientState::HasPayload(_) => ClientPhase::HasPayload,
            ClientState::Claiming { .. } => ClientPhase::Claiming,
            ClientState::Confirmed { .. } => ClientPhase::Confirmed,
            ClientState::Rejected => ClientPhase::Rejected,
            ClientState::TimedOut => ClientPhase::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::encode_payload;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn offer(ttl: Duration) -> PairingOffer {
        PairingOffer::generate("127.0.0.1", 5125, ttl).unwrap()
    }

    fn fresh_id() -> SessionId {
        SessionId::from_uuid(Uuid::new_v4())
    }

    #[tokio::test]
    async fn claim_moves_offered_to_claimed() {
        let handshake = ServerHandshake::new();
        let offer = offer(Duration::from_secs(60));
        let token = offer.token;
        handshake.install_offer(offer).await;

        let nonce = random_nonce().unwrap();
        let ctx = handshake.claim(&token, nonce, fresh_id()).await.unwrap();
        assert_eq!(handshake.phase().await, ServerPhase::Claimed);

        let (session_id, _secret) = handshake.confirmed().await.unwrap();
        assert_eq!(session_id, ctx.session_id);
        assert_eq!(handshake.phase().await, ServerPhase::Confirmed);
    }

    #[tokio::test]
    async fn mismatched_token_leaves_offer_live() {
        let handshake = ServerHandshake::new();
        let offer = offer(Duration::from_secs(60));
        let good_token = offer.token;
        handshake.install_offer(offer).await;

        let bad_token = Token::new([0u8; 16]);
        let err = handshake
            .claim(&bad_token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
        assert_eq!(handshake.phase().await, ServerPhase::Offered);

        // The live offer is still claimable afterwards.
        handshake
            .claim(&good_token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn second_claim_with_same_token_is_rejected() {
        let handshake = ServerHandshake::new();
        let offer = offer(Duration::from_secs(60));
        let token = offer.token;
        handshake.install_offer(offer).await;

        handshake
            .claim(&token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap();
        let err = handshake
            .claim(&token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_concurrent_claim_wins() {
        let handshake = Arc::new(ServerHandshake::new());
        let offer = offer(Duration::from_secs(60));
        let token = offer.token;
        handshake.install_offer(offer).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handshake = handshake.clone();
            tasks.push(tokio::spawn(async move {
                handshake
                    .claim(&token, random_nonce().unwrap(), fresh_id())
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(handshake.phase().await, ServerPhase::Claimed);
    }

    #[tokio::test]
    async fn claim_after_expiry_is_invalid_even_if_first() {
        let handshake = ServerHandshake::new();
        let offer = offer(Duration::ZERO);
        let token = offer.token;
        handshake.install_offer(offer).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = handshake
            .claim(&token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
        assert_eq!(handshake.phase().await, ServerPhase::Expired);

        // A later claim against the expired token stays invalid.
        let err = handshake
            .claim(&token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
    }

    #[tokio::test]
    async fn cancel_only_affects_live_offers() {
        let handshake = ServerHandshake::new();
        assert!(!handshake.cancel().await);

        handshake.install_offer(offer(Duration::from_secs(60))).await;
        assert!(handshake.cancel().await);
        assert_eq!(handshake.phase().await, ServerPhase::Cancelled);
        assert!(!handshake.cancel().await);
    }

    #[tokio::test]
    async fn new_offer_replaces_unclaimed_one() {
        let handshake = ServerHandshake::new();
        let first = offer(Duration::from_secs(60));
        let first_token = first.token;
        handshake.install_offer(first).await;

        let second = offer(Duration::from_secs(60));
        let second_token = second.token;
        handshake.install_offer(second).await;

        let err = handshake
            .claim(&first_token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
        handshake
            .claim(&second_token, random_nonce().unwrap(), fresh_id())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn proof_binds_to_handshake_nonces() {
        let offer = offer(Duration::from_secs(60));
        let client_a = random_nonce().unwrap();
        let server_a = random_nonce().unwrap();
        let proof_a = compute_proof(&offer.secret, &client_a, &server_a);

        assert!(verify_proof(&offer.secret, &client_a, &server_a, &proof_a));

        // Replaying proof A into a handshake with different nonces fails even
        // though the secret is correct.
        let client_b = random_nonce().unwrap();
        let server_b = random_nonce().unwrap();
        assert!(!verify_proof(&offer.secret, &client_b, &server_b, &proof_a));
        assert!(!verify_proof(&offer.secret, &client_a, &server_b, &proof_a));
    }

    #[tokio::test]
    async fn client_full_flow_confirms() {
        let offer = offer(Duration::from_secs(60));
        let payload_bytes = encode_payload(&offer).unwrap();

        let client = ClientHandshake::new();
        client.accept_payload(&payload_bytes).await.unwrap();
        assert_eq!(client.phase().await, ClientPhase::HasPayload);

        let claim = client.start_claim().await.unwrap();
        assert_eq!(client.phase().await, ClientPhase::Claiming);
        let client_nonce = match claim {
            Message::Claim { client_nonce, .. } => client_nonce,
            other => panic!("unexpected message: {:?}", other),
        };

        let server_nonce = random_nonce().unwrap();
        let proof = compute_proof(&offer.secret, &client_nonce, &server_nonce);
        let session_id = fresh_id();

        let (confirmed_id, secret) = client
            .handle_confirm(session_id, server_nonce, proof)
            .await
            .unwrap();
        assert_eq!(confirmed_id, session_id);
        assert_eq!(secret, offer.secret);
        assert_eq!(client.phase().await, ClientPhase::Confirmed);
    }

    #[tokio::test]
    async fn client_rejects_wrong_proof() {
        let offer = offer(Duration::from_secs(60));
        let payload_bytes = encode_payload(&offer).unwrap();

        let client = ClientHandshake::new();
        client.accept_payload(&payload_bytes).await.unwrap();
        client.start_claim().await.unwrap();

        // Proof computed over unrelated nonces: impostor or replay.
        let bogus = compute_proof(&offer.secret, &random_nonce().unwrap(), &random_nonce().unwrap());
        let err = client
            .handle_confirm(fresh_id(), random_nonce().unwrap(), bogus)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProofMismatch));
        assert_eq!(client.phase().await, ClientPhase::Rejected);
    }

    #[tokio::test]
    async fn client_rejects_expired_payload_locally() {
        let offer = offer(Duration::ZERO);
        let payload_bytes = encode_payload(&offer).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = ClientHandshake::new();
        let err = client.accept_payload(&payload_bytes).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
        assert_eq!(client.phase().await, ClientPhase::Idle);
    }

    #[tokio::test]
    async fn client_timeout_requires_fresh_payload() {
        let offer = offer(Duration::from_secs(60));
        let payload_bytes = encode_payload(&offer).unwrap();

        let client = ClientHandshake::new();
        client.accept_payload(&payload_bytes).await.unwrap();
        client.start_claim().await.unwrap();
        client.timed_out().await;
        assert_eq!(client.phase().await, ClientPhase::TimedOut);

        // The consumed claim cannot be restarted from here.
        assert!(client.start_claim().await.is_err());
    }
}
