// Stream transports
//
// A transport turns a URL into a `Link`: a pair of text-frame channels plus an
// open flag. The WebSocket transport pumps frames between the socket and the
// channels on two background tasks.

use crate::{FlowscopeError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const LINK_CAPACITY: usize = 1024;

/// Opens links to the gateway
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link>;
}

/// One open bidirectional text-frame connection
pub struct Link {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
    open: Arc<AtomicBool>,
}

impl Link {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            outbound,
            inbound,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    fn with_flag(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<String>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            open,
        }
    }

    /// Two links wired to each other, for in-process peers. Both ends share
    /// one open flag.
    pub fn pair(capacity: usize) -> (Link, Link) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        let open = Arc::new(AtomicBool::new(true));
        (
            Link::with_flag(a_tx, b_rx, Arc::clone(&open)),
            Link::with_flag(b_tx, a_rx, open),
        )
    }

    /// Clear the open flag without closing the channels, as a socket that
    /// died without a close frame would look
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether the peer can still receive frames
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    pub async fn send(&self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .await
            .map_err(|_| FlowscopeError::Transport("link closed".into()))
    }

    /// Next inbound frame; `None` once the peer closed
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<Link> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| FlowscopeError::Transport(format!("{}: {}", url, e)))?;
        let (mut write, mut read) = socket.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(LINK_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));

        let writer_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(target: "transport", error = %e, "WebSocket write failed");
                    break;
                }
            }
            writer_open.store(false, Ordering::Release);
            let _ = write.close().await;
        });

        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        debug!(target: "transport", ?reason, "WebSocket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "transport", error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::Release);
        });

        Ok(Link::with_flag(out_tx, in_rx, open))
    }
}

/// In-process transport: every successful `connect` hands the peer end of a
/// fresh link pair to whoever holds the receiver.
pub struct ChannelTransport {
    peers: mpsc::UnboundedSender<Link>,
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Link>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peers,
            refusing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// Make subsequent connects fail as if refused
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Total connect calls, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, url: &str) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(FlowscopeError::Transport(format!("{}: connection refused", url)));
        }
        let (local, remote) = Link::pair(LINK_CAPACITY);
        self.peers
            .send(remote)
            .map_err(|_| FlowscopeError::Transport(format!("{}: no listener", url)))?;
        Ok(local)
    }
}
