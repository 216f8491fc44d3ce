//! Error types.
//!
//! Collaborator failures (HTTP, sockets, wire decoding) are translated into
//! these enums at the boundary where they happen. The resolver only ever sees
//! [`ResolveError`].

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use hickory_proto::error::ProtoError;
use thiserror::Error;

/// Failure of the per-query pipeline.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The query carries no question.
    #[error("malformed query: no question section")]
    MalformedQuery,

    /// The upstream exchange timed out or failed at the transport level.
    #[error("upstream failure: {0}")]
    UpstreamFailure(#[from] UpstreamError),
}

/// Failure of a single exchange with the upstream resolver.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no answer from {addr} within {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    #[error("i/o error talking to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode query: {0}")]
    Encode(#[source] ProtoError),

    #[error("undecodable answer from {addr}: {source}")]
    Decode {
        addr: SocketAddr,
        #[source]
        source: ProtoError,
    },
}

/// Failure to retrieve the raw bytes of a list source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    Status(u16),

    #[error("failed to read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of one blacklist source. Never fatal to the overall build.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("parsing {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: std::str::Utf8Error,
    },
}

impl SourceError {
    pub fn url(&self) -> &str {
        match self {
            SourceError::Fetch { url, .. } | SourceError::Parse { url, .. } => url,
        }
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The forwarder could not be started.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {protocol} listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        protocol: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to set up blacklist fetcher: {0}")]
    Fetcher(#[from] FetchError),

    #[error("failed to wait for shutdown signal: {0}")]
    Signal(#[source] io::Error),
}
