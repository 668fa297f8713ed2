//! Frame-level transport for the live stream.
//!
//! The [`Connector`] / [`FrameSource`] pair abstracts opening a connection and
//! reading text frames from it, so the client can run over a real WebSocket
//! (production) or channels (tests).

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::Endpoint;
use crate::error::TransportError;

/// Opens connections to a stream endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn FrameSource>, TransportError>;
}

/// An open connection delivering text frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame.
    ///
    /// Returns `None` when the peer closed the connection cleanly.
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection. Errors are swallowed; the connection is gone
    /// either way.
    async fn close(&mut self);
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn FrameSource>, TransportError> {
        debug!(url = %endpoint, "Connecting to stream");
        let (ws, response) = connect_async(endpoint.as_str()).await?;
        debug!(status = %response.status(), "Stream handshake complete");
        Ok(Box::new(WsFrameSource { ws }))
    }
}

struct WsFrameSource {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(rx = %text, "Received frame");
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(e) => warn!(error = %e, "Dropping non-UTF-8 binary frame"),
                },
                // tungstenite answers pings itself on the next read
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Stream closed by peer");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "Error closing stream");
        }
    }
}

/// Channel-backed connector for deterministic testing.
///
/// Backed by tokio channels rather than sockets, so it works with paused
/// tokio time. Every `connect` call shows up on the [`MockServer`] as a
/// [`PendingConnect`] that the test accepts or refuses.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use tokio::sync::{mpsc, oneshot};

    pub(crate) struct MockConnector {
        attempts: mpsc::UnboundedSender<PendingConnect>,
    }

    pub(crate) struct MockServer {
        attempts: mpsc::UnboundedReceiver<PendingConnect>,
    }

    pub(crate) struct PendingConnect {
        pub endpoint: String,
        reply: oneshot::Sender<Result<MockFrameSource, TransportError>>,
    }

    /// Test side of an accepted connection.
    pub(crate) struct MockLink {
        frames: mpsc::UnboundedSender<Result<String, TransportError>>,
        closed: oneshot::Receiver<()>,
    }

    pub(crate) struct MockFrameSource {
        frames: mpsc::UnboundedReceiver<Result<String, TransportError>>,
        closed: Option<oneshot::Sender<()>>,
    }

    impl MockConnector {
        pub(crate) fn pair() -> (Self, MockServer) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { attempts: tx }, MockServer { attempts: rx })
        }
    }

    impl MockServer {
        /// Wait for the client's next connection attempt.
        pub(crate) async fn next_attempt(&mut self) -> PendingConnect {
            self.attempts.recv().await.expect("connector dropped")
        }

        /// Connection attempt that is already queued, if any.
        pub(crate) fn try_next_attempt(&mut self) -> Option<PendingConnect> {
            self.attempts.try_recv().ok()
        }
    }

    impl PendingConnect {
        pub(crate) fn accept(self) -> MockLink {
            let (frame_tx, frame_rx) = mpsc::unbounded_channel();
            let (closed_tx, closed_rx) = oneshot::channel();
            let source = MockFrameSource {
                frames: frame_rx,
                closed: Some(closed_tx),
            };
            let _ = self.reply.send(Ok(source));
            MockLink {
                frames: frame_tx,
                closed: closed_rx,
            }
        }

        pub(crate) fn refuse(self) {
            let _ = self
                .reply
                .send(Err(TransportError::Connect("connection refused".into())));
        }
    }

    impl MockLink {
        pub(crate) fn send(&self, text: &str) {
            let _ = self.frames.send(Ok(text.to_string()));
        }

        pub(crate) fn fail(&self) {
            let _ = self
                .frames
                .send(Err(TransportError::Connect("connection reset".into())));
        }

        /// Peer closes the connection cleanly.
        pub(crate) fn close(self) {}

        /// Resolves once the client has closed or dropped its side.
        pub(crate) async fn closed_by_client(self) {
            let _ = self.closed.await;
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn FrameSource>, TransportError> {
            let (reply, response) = oneshot::channel();
            self.attempts
                .send(PendingConnect {
                    endpoint: endpoint.to_string(),
                    reply,
                })
                .map_err(|_| TransportError::Connect("mock server gone".into()))?;
            match response.await {
                Ok(Ok(source)) => Ok(Box::new(source)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(TransportError::Connect("attempt abandoned".into())),
            }
        }
    }

    #[async_trait]
    impl FrameSource for MockFrameSource {
        async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
            match self.frames.recv().await {
                Some(Ok(text)) => Ok(Some(text)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }

        async fn close(&mut self) {
            if let Some(tx) = self.closed.take() {
                let _ = tx.send(());
            }
        }
    }
}
