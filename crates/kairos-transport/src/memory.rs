//! In-process multiplexed session.
//!
//! [`pair`] returns the client half ([`MemorySession`], consumed by the
//! engine) and the server half ([`MemoryPeer`], driven by tests or demos).
//! Every stream is a `tokio::io::duplex` pipe, so reads see whatever chunk
//! boundaries the peer writes with.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::endpoint::{EndpointDescriptor, EndpointLocation};
use crate::error::{Result, TransportError};
use crate::traits::{Connector, MultiplexedSession};

/// Per-stream pipe capacity.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Read side of an in-memory stream.
pub type MemoryRecvStream = ReadHalf<DuplexStream>;
/// Write side of an in-memory bidirectional stream.
pub type MemorySendStream = WriteHalf<DuplexStream>;

/// Create a connected client/peer pair.
pub fn pair() -> (MemorySession, MemoryPeer) {
    pair_with_capacity(DEFAULT_PIPE_CAPACITY)
}

/// Create a connected client/peer pair with an explicit per-stream capacity.
pub fn pair_with_capacity(capacity: usize) -> (MemorySession, MemoryPeer) {
    let (uni_tx, uni_rx) = mpsc::unbounded_channel();
    let (bi_tx, bi_rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();

    let session = MemorySession {
        uni_rx: tokio::sync::Mutex::new(uni_rx),
        bi_rx: tokio::sync::Mutex::new(bi_rx),
        closed: closed.clone(),
    };
    let peer = MemoryPeer {
        uni_tx,
        bi_tx,
        closed,
        capacity,
    };
    (session, peer)
}

/// Client half of an in-memory session.
#[derive(Debug)]
pub struct MemorySession {
    uni_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryRecvStream>>,
    bi_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(MemorySendStream, MemoryRecvStream)>>,
    closed: CancellationToken,
}

impl MemorySession {
    /// Whether either side closed the session.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl MultiplexedSession for MemorySession {
    type RecvStream = MemoryRecvStream;
    type SendStream = MemorySendStream;

    async fn accept_uni(&self) -> Result<Self::RecvStream> {
        let mut rx = self.uni_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            stream = rx.recv() => stream.ok_or(TransportError::Closed),
        }
    }

    async fn accept_bi(&self) -> Result<(Self::SendStream, Self::RecvStream)> {
        let mut rx = self.bi_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            stream = rx.recv() => stream.ok_or(TransportError::Closed),
        }
    }

    fn close(&self) {
        debug!("closing in-memory session");
        self.closed.cancel();
    }
}

/// Server half of an in-memory session. Opens streams towards the client.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    uni_tx: mpsc::UnboundedSender<MemoryRecvStream>,
    bi_tx: mpsc::UnboundedSender<(MemorySendStream, MemoryRecvStream)>,
    closed: CancellationToken,
    capacity: usize,
}

impl MemoryPeer {
    /// Open a unidirectional stream; the returned end is write-only by convention.
    pub fn open_uni(&self) -> Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(self.capacity);
        let (recv, _send) = tokio::io::split(client);
        self.uni_tx.send(recv).map_err(|_| TransportError::Closed)?;
        Ok(server)
    }

    /// Open a bidirectional stream.
    pub fn open_bi(&self) -> Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(self.capacity);
        let (recv, send) = tokio::io::split(client);
        self.bi_tx
            .send((send, recv))
            .map_err(|_| TransportError::Closed)?;
        Ok(server)
    }

    /// Close the session from the server side.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether either side closed the session.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// [`Connector`] producing a fresh in-memory pair on every `open`.
///
/// The peer half of each new session is delivered on the receiver returned
/// by [`MemoryConnector::new`]. Resolution can be made to fail a fixed number
/// of times to exercise reconnection.
#[derive(Debug)]
pub struct MemoryConnector {
    descriptor: EndpointDescriptor,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    resolve_failures: AtomicUsize,
    resolved: AtomicUsize,
    opened: AtomicUsize,
    scripted_failures: Mutex<VecDeque<String>>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of server halves.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            descriptor: EndpointDescriptor {
                port: 0,
                hash: vec!["00"; crate::endpoint::CERTIFICATE_HASH_LEN].join(":"),
            },
            peers,
            resolve_failures: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            scripted_failures: Mutex::new(VecDeque::new()),
        };
        (connector, rx)
    }

    /// Make the next `count` resolutions fail.
    pub fn fail_next_resolves(self, count: usize) -> Self {
        self.resolve_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Make the next `open` fail with `reason` (may be called repeatedly).
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        if let Ok(mut failures) = self.scripted_failures.lock() {
            failures.push_back(reason.into());
        }
    }

    /// Number of resolution attempts so far.
    pub fn resolve_count(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }

    /// Number of sessions opened so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn resolve(&self, location: &EndpointLocation) -> Result<EndpointDescriptor> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        let remaining = self.resolve_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.resolve_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Resolve {
                url: location.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(self.descriptor.clone())
    }

    async fn open(
        &self,
        location: &EndpointLocation,
        descriptor: &EndpointDescriptor,
    ) -> Result<MemorySession> {
        let scripted = self
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front());
        if let Some(reason) = scripted {
            return Err(TransportError::Connect {
                url: location.session_url(descriptor),
                reason,
            });
        }

        let (session, peer) = pair();
        self.peers.send(peer).map_err(|_| TransportError::Connect {
            url: location.session_url(descriptor),
            reason: "peer receiver dropped".to_string(),
        })?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }
}
