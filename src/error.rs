//! Unified error type.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// The error type returned by the gateway's fallible operations.
///
/// Application-level failures (401, 404, 501, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: reading configuration, binding the listener,
/// and draining connections at shutdown.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("in-flight requests did not finish within {0:?}")]
    DrainTimeout(Duration),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}
