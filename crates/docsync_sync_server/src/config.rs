//! Server configuration.

use docsync_sync_protocol::PROTOCOL_VERSION;

/// Configuration for a peer server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum entries returned by one changes request.
    pub max_changes_batch: u32,
    /// Maximum bundles accepted by one push request.
    pub max_push_batch: u32,
    /// Protocol version this server speaks.
    pub protocol_version: u16,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_changes_batch: 100,
            max_push_batch: 100,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Sets the maximum changes batch size.
    pub fn with_max_changes_batch(mut self, size: u32) -> Self {
        self.max_changes_batch = size.max(1);
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size.max(1);
        self
    }

    /// Sets the protocol version.
    pub fn with_protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
