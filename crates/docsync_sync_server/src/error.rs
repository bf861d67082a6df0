//! Error types for the peer server.

use docsync_codec::CodecError;
use docsync_core::CoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a peer.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or size.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Protocol version mismatch.
    #[error("protocol version mismatch: server {server}, client {client}")]
    ProtocolMismatch {
        /// Server version.
        server: u16,
        /// Client version.
        client: u16,
    },

    /// The client's object model differs from the server's.
    #[error("object model mismatch: server {server}, client {client}")]
    ModelMismatch {
        /// Server fingerprint.
        server: String,
        /// Client fingerprint.
        client: String,
    },

    /// Datastore error.
    #[error("datastore error: {0}")]
    Datastore(#[from] CoreError),

    /// Message encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ServerError {
    /// Returns true if the client sent something unacceptable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::ProtocolMismatch { .. }
                | ServerError::ModelMismatch { .. }
                | ServerError::Codec(_)
        )
    }

    /// Returns true if the failure is on the server side.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Datastore(_))
    }
}
