//! WebSocket transport over tokio-tungstenite

use super::transport::{Transport, TransportConnection, TransportError, TransportEvent, TransportEventSender};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// How long to wait for the upgrade response before reporting a close
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, events: TransportEventSender) -> Result<Box<dyn TransportConnection>, TransportError> {
        let request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", self.url, e)))?;

        let ready = Arc::new(AtomicBool::new(false));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<String>();

        debug!("Opening WebSocket to {}", self.url);
        let task = tokio::spawn(run_socket(
            request,
            self.handshake_timeout,
            outgoing_rx,
            events,
            ready.clone(),
        ));

        Ok(Box::new(WebSocketConnection {
            outgoing: outgoing_tx,
            ready,
            task: Some(task),
        }))
    }
}

struct WebSocketConnection {
    outgoing: mpsc::UnboundedSender<String>,
    ready: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TransportConnection for WebSocketConnection {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotReady);
        }
        self.outgoing
            .send(text.to_string())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn close(&mut self) {
        self.ready.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_socket(
    request: Request,
    handshake_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: TransportEventSender,
    ready: Arc<AtomicBool>,
) {
    let handshake = tokio::time::timeout(handshake_timeout, connect_async(request)).await;
    let stream = match handshake {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed(None));
            return;
        }
        Err(_) => {
            warn!("No WebSocket handshake response within {:?}", handshake_timeout);
            let _ = events.send(TransportEvent::Error(format!(
                "handshake timed out after {:?}",
                handshake_timeout
            )));
            let _ = events.send(TransportEvent::Closed(None));
            return;
        }
    };

    ready.store(true, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Opened);

    let (mut sink, mut source) = stream.split();
    let mut close_reason = None;

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Err(_) => warn!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    close_reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    break;
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    ready.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed(close_reason));
}
