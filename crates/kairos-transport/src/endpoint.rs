//! Endpoint discovery types.
//!
//! The server advertises an ephemeral WebTransport endpoint through a plain
//! HTTP side channel: `GET <location>transport-certificate` returns
//! `{"hash": "AA:BB:...", "port": 3001}`, where `hash` is the SHA-256
//! fingerprint of the self-signed certificate the session must pin.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TransportError};

/// Path (relative to the location) of the endpoint discovery resource.
pub const CERTIFICATE_PATH: &str = "transport-certificate";

/// Location used when the caller has no network origin (e.g. a `file:` URL).
pub const DEFAULT_LOCATION: &str = "http://localhost:3000/";

/// Length of a SHA-256 certificate fingerprint in bytes.
pub const CERTIFICATE_HASH_LEN: usize = 32;

/// Normalised HTTP(S) location of the server: scheme, host, optional port
/// and a path that always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointLocation {
    url: Url,
}

impl EndpointLocation {
    /// Parse and normalise a location string.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: String| TransportError::InvalidLocation {
            location: input.to_string(),
            reason,
        };

        let mut url = Url::parse(input).map_err(|err| invalid(err.to_string()))?;
        if url.scheme() == "file" {
            url = Url::parse(DEFAULT_LOCATION).map_err(|err| invalid(err.to_string()))?;
        }

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self { url })
    }

    /// Host name (IPv6 addresses keep their brackets).
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Normalised path, always ending with `/`.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// URL of the endpoint discovery resource.
    pub fn certificate_url(&self) -> Result<Url> {
        self.url
            .join(CERTIFICATE_PATH)
            .map_err(|err| TransportError::InvalidLocation {
                location: self.url.to_string(),
                reason: err.to_string(),
            })
    }

    /// URL of the session endpoint described by `descriptor`.
    pub fn session_url(&self, descriptor: &EndpointDescriptor) -> String {
        format!("https://{}:{}{}", self.host(), descriptor.port, self.path())
    }
}

impl fmt::Display for EndpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Ephemeral session endpoint advertised by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// UDP port of the session endpoint.
    pub port: u16,
    /// Colon-separated SHA-256 fingerprint of the server certificate.
    pub hash: String,
}

impl EndpointDescriptor {
    /// Decode the certificate fingerprint.
    pub fn certificate_hash(&self) -> Result<[u8; CERTIFICATE_HASH_LEN]> {
        parse_certificate_hash(&self.hash)
    }
}

/// Parse a SHA-256 fingerprint written as `AA:BB:...` (or 64 contiguous hex digits).
pub fn parse_certificate_hash(input: &str) -> Result<[u8; CERTIFICATE_HASH_LEN]> {
    let input = input.trim();
    let parts: Vec<&str> = if input.contains(':') {
        input.split(':').collect()
    } else {
        if !input.is_ascii() || input.len() % 2 != 0 {
            return Err(TransportError::InvalidFingerprint(format!(
                "expected hex digit pairs, got '{input}'"
            )));
        }
        (0..input.len())
            .step_by(2)
            .map(|start| &input[start..start + 2])
            .collect()
    };

    if parts.len() != CERTIFICATE_HASH_LEN {
        return Err(TransportError::InvalidFingerprint(format!(
            "expected {CERTIFICATE_HASH_LEN} bytes, got {}",
            parts.len()
        )));
    }

    let mut hash = [0u8; CERTIFICATE_HASH_LEN];
    for (slot, part) in hash.iter_mut().zip(parts) {
        if part.is_empty() || part.len() > 2 {
            return Err(TransportError::InvalidFingerprint(format!(
                "invalid byte '{part}'"
            )));
        }
        *slot = u8::from_str_radix(part, 16).map_err(|_| {
            TransportError::InvalidFingerprint(format!("invalid byte '{part}'"))
        })?;
    }
    Ok(hash)
}
