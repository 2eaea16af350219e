//! Transport seam between the session manager and the remote service.
//!
//! [`Connector`] opens and authenticates a session and hands back a boxed
//! [`Transport`].  The production pair is [`LiveMusicConnector`] /
//! [`WebSocketTransport`] (tokio-tungstenite over TLS); tests plug in
//! in-memory doubles.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::SessionConfig;

use super::error::SessionError;
use super::protocol::{ClientMessage, ServerMessage};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An open, authenticated session.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), SessionError>;

    /// Next inbound frame.  `None` once the remote side has gone away.
    async fn recv(&mut self) -> Option<Result<ServerMessage, SessionError>>;

    async fn close(&mut self);
}

/// Opens sessions.  Shared with the connect task, hence `Send + Sync`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, SessionError>;
}

// ---------------------------------------------------------------------------
// WebSocketTransport
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-over-WebSocket transport.
pub struct WebSocketTransport {
    ws: WsStream,
}

impl WebSocketTransport {
    /// Read until `setupComplete`.  Anything else that shows up first is
    /// logged and dropped.
    async fn await_setup(&mut self) -> Result<(), SessionError> {
        loop {
            match self.recv().await {
                None => {
                    return Err(SessionError::Connection(
                        "connection closed during setup".into(),
                    ))
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(msg)) if msg.setup_complete.is_some() => return Ok(()),
                Some(Ok(_)) => log::debug!("session: ignoring message before setupComplete"),
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), SessionError> {
        let payload = message
            .to_json()
            .map_err(|e| SessionError::Connection(format!("encode failed: {e}")))?;
        self.ws.send(Message::Text(payload.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage, SessionError>> {
        loop {
            let frame = match self.ws.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e.into())),
            };

            let parsed = match frame {
                Message::Text(text) => ServerMessage::from_json(&text),
                Message::Binary(bytes) => serde_json::from_slice::<ServerMessage>(&bytes),
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} ({})", &*f.reason, u16::from(f.code)))
                        .unwrap_or_else(|| "no reason given".into());
                    return Some(Err(SessionError::Connection(format!(
                        "closed by server: {reason}"
                    ))));
                }
                _ => continue,
            };

            match parsed {
                Ok(msg) => return Some(Ok(msg)),
                Err(e) => log::warn!("session: dropping unparseable frame: {e}"),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            log::debug!("session: close handshake failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// LiveMusicConnector
// ---------------------------------------------------------------------------

/// Connects to the realtime music endpoint described by [`SessionConfig`].
pub struct LiveMusicConnector {
    config: SessionConfig,
}

impl LiveMusicConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for LiveMusicConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, SessionError> {
        let api_key = self.config.resolved_api_key().ok_or_else(|| {
            SessionError::Connection("no API key configured (set GEMINI_API_KEY)".into())
        })?;
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let url = format!("{}?key={}", self.config.endpoint, api_key);

        log::info!("session: connecting to {}", self.config.endpoint);
        let (ws, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| SessionError::Connection("timed out connecting".into()))??;

        let mut transport = WebSocketTransport { ws };
        transport
            .send(&ClientMessage::Setup {
                model: self.config.model.clone(),
            })
            .await?;

        tokio::time::timeout(timeout, transport.await_setup())
            .await
            .map_err(|_| SessionError::Connection("timed out waiting for setup".into()))??;

        log::info!("session: setup complete ({})", self.config.model);
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_is_a_connection_error() {
        let mut config = SessionConfig::default();
        config.api_key = None;
        config.api_key_env = "PROMPT_DJ_TEST_UNSET_KEY".into();
        let connector = LiveMusicConnector::new(config);

        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, SessionError::Connection(_)), "{err}");
    }

    #[test]
    fn connector_is_object_safe() {
        let c: Box<dyn Connector> = Box::new(LiveMusicConnector::new(SessionConfig::default()));
        drop(c);
    }
}
