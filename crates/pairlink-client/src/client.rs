//! Client-side pairing flow and session handle

use pairlink_auth::{ClientHandshake, SessionManager};
use pairlink_core::{
    read_frame, write_frame, Error, Message, PairingConfig, Result, SessionId, MAX_FRAME_BYTES,
};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Drives the client role of the handshake
pub struct PairClient {
    config: PairingConfig,
    handshake: Arc<ClientHandshake>,
    sessions: Arc<SessionManager>,
}

impl PairClient {
    pub fn new(config: PairingConfig) -> Self {
        Self {
            config,
            handshake: Arc::new(ClientHandshake::new()),
            sessions: Arc::new(SessionManager::new()),
        }
    }

    pub fn handshake(&self) -> Arc<ClientHandshake> {
        self.handshake.clone()
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Run the whole pairing flow from decoded QR bytes to a live session.
    ///
    /// Waits for the confirm within the configured timeout; on elapse the
    /// handshake lands in `TimedOut` and a retry needs a fresh pairing code.
    pub async fn pair(&self, payload_bytes: &[u8]) -> Result<PairedSession> {
        let payload = self.handshake.accept_payload(payload_bytes).await?;
        let claim = self.handshake.start_claim().await?;

        let addr = (payload.server_addr.as_str(), payload.server_port);
        debug!(
            addr = %payload.server_addr,
            port = payload.server_port,
            "connecting to pairing server"
        );
        let stream = match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Err(_) => {
                self.handshake.timed_out().await;
                return Err(Error::Timeout("connect"));
            }
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.handshake.fail().await;
                return Err(e.into());
            }
        };
        let (mut reader, mut writer) = stream.into_split();

        write_frame(&mut writer, &claim.encode()?).await?;

        let frame = match tokio::time::timeout(
            self.config.confirm_timeout,
            read_frame(&mut reader, MAX_FRAME_BYTES),
        )
        .await
        {
            Err(_) => {
                self.handshake.timed_out().await;
                return Err(Error::Timeout("confirm"));
            }
            Ok(frame) => frame?,
        };
        let Some(frame) = frame else {
            self.handshake.fail().await;
            return Err(Error::Protocol(
                "server closed the channel during the handshake".to_string(),
            ));
        };

        match Message::decode(&frame)? {
            Message::Confirm {
                session_id,
                server_nonce,
                proof,
            } => {
                let (session_id, secret) = self
                    .handshake
                    .handle_confirm(session_id, server_nonce, proof)
                    .await?;
                self.sessions.on_confirmed(session_id, secret).await?;
                info!(%session_id, "paired with server");
                Ok(PairedSession {
                    session_id,
                    reader,
                    writer,
                    sessions: self.sessions.clone(),
                })
            }
            Message::Reject { reason } => {
                warn!(?reason, "server rejected the claim");
                Err(self.handshake.handle_reject(reason).await)
            }
            other => {
                self.handshake.fail().await;
                Err(Error::Protocol(format!(
                    "expected confirm, got {}",
                    other.kind()
                )))
            }
        }
    }
}

/// An established, authenticated session owned by the client
#[derive(Debug)]
pub struct PairedSession {
    session_id: SessionId,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    sessions: Arc<SessionManager>,
}

impl PairedSession {
    pub fn id(&self) -> SessionId {
        self.session_id
    }

    /// Send a data frame and record the activity
    pub async fn send(&mut self, body: impl Into<String>) -> Result<()> {
        let message = Message::Data {
            session_id: self.session_id,
            body: body.into(),
        };
        write_frame(&mut self.writer, &message.encode()?).await?;
        self.sessions.touch(&self.session_id).await
    }

    /// Receive the next frame from the server, `None` on clean close
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        match read_frame(&mut self.reader, MAX_FRAME_BYTES).await? {
            None => Ok(None),
            Some(frame) => {
                let message = Message::decode(&frame)?;
                self.sessions.touch(&self.session_id).await?;
                Ok(Some(message))
            }
        }
    }

    /// Orderly teardown: notify the server, then drop the local record.
    /// Closing is idempotent on both sides.
    pub async fn close(mut self) -> Result<()> {
        let message = Message::Close {
            session_id: self.session_id,
        };
        // Best effort: the server may already be gone.
        if let Ok(bytes) = message.encode() {
            let _ = write_frame(&mut self.writer, &bytes).await;
        }
        self.sessions.close(&self.session_id).await;
        Ok(())
    }
}
