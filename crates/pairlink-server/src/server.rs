//! TCP server: accept loop, claim arbitration, session traffic
//!
//! Each inbound connection is served by its own task. The claim transition
//! itself happens inside the handshake's critical section; everything on the
//! wire (reading the claim, writing the confirm or reject) stays outside any
//! lock.

use chrono::{DateTime, Utc};
use pairlink_auth::{encode_payload, PairingOffer, ServerHandshake, SessionManager};
use pairlink_core::{
    read_frame, write_frame, Error, Message, PairingConfig, RejectReason, Result, SessionId,
    MAX_FRAME_BYTES,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of initiating a pairing, handed to the UI collaborator
#[derive(Debug, Clone)]
pub struct PairingStarted {
    /// Encoded payload for the QR renderer
    pub payload: Vec<u8>,
    /// When the offer stops being claimable
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry, for display
    pub expires_in: i64,
}

/// The rendezvous server owning the live-offer slot and the session table
pub struct PairServer {
    config: PairingConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    handshake: Arc<ServerHandshake>,
    sessions: Arc<SessionManager>,
    shutdown_tx: watch::Sender<bool>,
}

impl PairServer {
    /// Bind the listener. Offer and session state start empty; a restart
    /// invalidates everything by design.
    pub async fn bind(config: PairingConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.bind_addr.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = watch::channel(false);
        info!(%local_addr, "pairing server listening");

        Ok(Self {
            config,
            listener,
            local_addr,
            handshake: Arc::new(ServerHandshake::new()),
            sessions: Arc::new(SessionManager::new()),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    pub fn handshake(&self) -> Arc<ServerHandshake> {
        self.handshake.clone()
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Issue a fresh pairing offer and return the payload for the UI.
    ///
    /// Any prior unclaimed offer is discarded.
    pub async fn start_pairing(&self) -> Result<PairingStarted> {
        let offer = PairingOffer::generate(
            self.config.advertise_addr.clone(),
            self.local_addr.port(),
            self.config.offer_ttl,
        )?;
        let payload = encode_payload(&offer)?;
        let expires_at = offer.expires_at;
        let expires_in = offer.expires_in();
        self.handshake.install_offer(offer).await;

        Ok(PairingStarted {
            payload,
            expires_at,
            expires_in,
        })
    }

    /// Cancel the live offer, if any
    pub async fn cancel_pairing(&self) -> bool {
        self.handshake.cancel().await
    }

    /// Signal every task (accept loop, connection handlers, sweeper) to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Accept loop. Runs until `shutdown` is called.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let sweeper = self.sessions.clone().spawn_sweeper(
            self.config.session_idle_timeout,
            self.config.sweep_interval,
            self.shutdown_tx.subscribe(),
        );

        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "connection accepted");
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(server, stream, peer).await {
                                    debug!(%peer, "connection ended: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("accept failed: {}", e);
                        }
                    }
                }
            }
        }

        info!("pairing server stopping");
        let _ = sweeper.await;
        Ok(())
    }
}

async fn send_reject(writer: &mut OwnedWriteHalf, reason: RejectReason) {
    // Best effort: the peer may already be gone.
    if let Ok(bytes) = (Message::Reject { reason }).encode() {
        let _ = write_frame(writer, &bytes).await;
    }
}

async fn handle_connection(
    server: Arc<PairServer>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut shutdown = server.shutdown_tx.subscribe();

    let frame = tokio::select! {
        _ = shutdown.changed() => return Err(Error::Cancelled),
        read = tokio::time::timeout(
            server.config.claim_timeout,
            read_frame(&mut reader, MAX_FRAME_BYTES),
        ) => match read {
            Err(_) => {
                debug!(%peer, "no claim before timeout");
                return Err(Error::Timeout("claim"));
            }
            Ok(frame) => frame?,
        },
    };
    let Some(frame) = frame else {
        // Peer connected and left without claiming.
        return Ok(());
    };

    let message = match Message::decode(&frame) {
        Ok(message) => message,
        Err(e) => {
            warn!(%peer, "unreadable first frame: {}", e);
            send_reject(&mut writer, RejectReason::Malformed).await;
            return Err(e);
        }
    };

    match message {
        Message::Claim {
            token,
            client_nonce,
        } => {
            let session_id = server.sessions.fresh_id().await?;
            match server.handshake.claim(&token, client_nonce, session_id).await {
                Ok(ctx) => {
                    write_frame(&mut writer, &ctx.confirm_message().encode()?).await?;
                    let (session_id, secret) = server.handshake.confirmed().await?;
                    server.sessions.on_confirmed(session_id, secret).await?;
                    info!(%peer, %session_id, "client paired");
                    session_loop(server, reader, session_id).await
                }
                Err(Error::InvalidToken) => {
                    warn!(%peer, "claim rejected: invalid token");
                    send_reject(&mut writer, RejectReason::InvalidToken).await;
                    Err(Error::InvalidToken)
                }
                Err(e) => Err(e),
            }
        }
        other => {
            warn!(%peer, kind = other.kind(), "unexpected first message");
            send_reject(&mut writer, RejectReason::Malformed).await;
            Err(Error::Protocol(format!(
                "expected claim, got {}",
                other.kind()
            )))
        }
    }
}

async fn session_loop(
    server: Arc<PairServer>,
    mut reader: OwnedReadHalf,
    session_id: SessionId,
) -> Result<()> {
    let mut shutdown = server.shutdown_tx.subscribe();
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => {
                server.sessions.close(&session_id).await;
                return Ok(());
            }
            read = read_frame(&mut reader, MAX_FRAME_BYTES) => read,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(%session_id, "peer closed stream");
                server.sessions.close(&session_id).await;
                return Ok(());
            }
            Err(e) => {
                server.sessions.close(&session_id).await;
                return Err(e);
            }
        };

        match Message::decode(&frame) {
            Ok(Message::Data {
                session_id: sid,
                body,
            }) if sid == session_id => {
                server.sessions.touch(&session_id).await?;
                debug!(%session_id, len = body.len(), "session data received");
            }
            Ok(Message::Close { session_id: sid }) if sid == session_id => {
                server.sessions.close(&session_id).await;
                return Ok(());
            }
            Ok(other) => {
                warn!(%session_id, kind = other.kind(), "protocol violation in session");
                server.sessions.close(&session_id).await;
                return Err(Error::Protocol(format!(
                    "unexpected {} in session",
                    other.kind()
                )));
            }
            Err(e) => {
                server.sessions.close(&session_id).await;
                return Err(e);
            }
        }
    }
}
