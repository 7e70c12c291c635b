use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::endpoint::{EndpointDescriptor, EndpointLocation};
use crate::error::Result;

/// A live multiplexed connection carrying many independent byte streams.
///
/// Both accept methods take `&self`: the unidirectional and bidirectional
/// acceptors run concurrently against one shared session handle.
pub trait MultiplexedSession: Send + Sync + 'static {
    /// Read side of an incoming stream.
    type RecvStream: AsyncRead + Send + Unpin + 'static;
    /// Write side of an incoming bidirectional stream.
    type SendStream: AsyncWrite + Send + Unpin + 'static;

    /// Wait for the peer to open the next unidirectional stream.
    fn accept_uni(&self) -> impl Future<Output = Result<Self::RecvStream>> + Send;

    /// Wait for the peer to open the next bidirectional stream.
    fn accept_bi(
        &self,
    ) -> impl Future<Output = Result<(Self::SendStream, Self::RecvStream)>> + Send;

    /// Close the session. Pending accepts fail with [`TransportError::Closed`].
    ///
    /// [`TransportError::Closed`]: crate::TransportError::Closed
    fn close(&self);
}

/// Establishes sessions: endpoint discovery followed by session open.
pub trait Connector: Send + Sync + 'static {
    type Session: MultiplexedSession;

    /// Fetch the ephemeral endpoint descriptor (port + certificate fingerprint).
    fn resolve(
        &self,
        location: &EndpointLocation,
    ) -> impl Future<Output = Result<EndpointDescriptor>> + Send;

    /// Open a session and wait until it is ready.
    fn open(
        &self,
        location: &EndpointLocation,
        descriptor: &EndpointDescriptor,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}
