//! WebTransport client session.
//!
//! Discovery goes over plain HTTP(S) with `reqwest`; the session itself is a
//! `wtransport` connection pinned to the advertised self-signed certificate.

use std::time::Duration;

use tracing::{debug, info};
use wtransport::tls::Sha256Digest;
use wtransport::{ClientConfig, Connection, Endpoint, VarInt};

use crate::endpoint::{EndpointDescriptor, EndpointLocation};
use crate::error::{Result, TransportError};
use crate::traits::{Connector, MultiplexedSession};

/// Timeout applied to the discovery request.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// [`Connector`] for a WebTransport server.
#[derive(Debug, Clone)]
pub struct WebTransportConnector {
    http: reqwest::Client,
}

impl WebTransportConnector {
    /// Create a connector with the default discovery timeout.
    pub fn new() -> Result<Self> {
        Self::with_resolve_timeout(DEFAULT_RESOLVE_TIMEOUT)
    }

    /// Create a connector with an explicit discovery timeout.
    pub fn with_resolve_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Resolve {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self { http })
    }
}

impl Connector for WebTransportConnector {
    type Session = WebTransportSession;

    async fn resolve(&self, location: &EndpointLocation) -> Result<EndpointDescriptor> {
        let url = location.certificate_url()?;
        let resolve_error = |reason: String| TransportError::Resolve {
            url: url.to_string(),
            reason,
        };

        debug!(%url, "requesting endpoint descriptor");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| resolve_error(err.to_string()))?;
        if !response.status().is_success() {
            return Err(resolve_error(format!(
                "response status: {}",
                response.status()
            )));
        }
        let descriptor: EndpointDescriptor = response
            .json()
            .await
            .map_err(|err| resolve_error(err.to_string()))?;

        // Reject a malformed fingerprint before attempting the session.
        descriptor.certificate_hash()?;
        Ok(descriptor)
    }

    async fn open(
        &self,
        location: &EndpointLocation,
        descriptor: &EndpointDescriptor,
    ) -> Result<WebTransportSession> {
        let url = location.session_url(descriptor);
        let connect_error = |reason: String| TransportError::Connect {
            url: url.clone(),
            reason,
        };

        let hash = descriptor.certificate_hash()?;
        let config = ClientConfig::builder()
            .with_bind_default()
            .with_server_certificate_hashes([Sha256Digest::new(hash)])
            .build();

        let endpoint = Endpoint::client(config).map_err(|err| connect_error(err.to_string()))?;
        let connection = endpoint
            .connect(url.as_str())
            .await
            .map_err(|err| connect_error(err.to_string()))?;

        info!(%url, "webtransport session ready");
        Ok(WebTransportSession {
            connection,
            _endpoint: endpoint,
        })
    }
}

/// A ready WebTransport session.
pub struct WebTransportSession {
    connection: Connection,
    // Keeps the QUIC endpoint driver alive for the lifetime of the session.
    _endpoint: Endpoint<wtransport::endpoint::endpoint_side::Client>,
}

impl MultiplexedSession for WebTransportSession {
    type RecvStream = wtransport::RecvStream;
    type SendStream = wtransport::SendStream;

    async fn accept_uni(&self) -> Result<Self::RecvStream> {
        self.connection
            .accept_uni()
            .await
            .map_err(|err| TransportError::Accept(err.to_string()))
    }

    async fn accept_bi(&self) -> Result<(Self::SendStream, Self::RecvStream)> {
        self.connection
            .accept_bi()
            .await
            .map_err(|err| TransportError::Accept(err.to_string()))
    }

    fn close(&self) {
        self.connection.close(VarInt::from_u32(0), b"");
    }
}
