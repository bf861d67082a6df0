//! Datastore configuration.

/// Configuration for a [`Datastore`](crate::Datastore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreConfig {
    /// Name identifying the datastore in logs and session keys.
    pub name: String,

    /// Maximum number of ancestors sent with a replicated revision.
    pub revision_history_limit: usize,

    /// Number of change events retained for polling.
    pub change_history: usize,

    /// Whether every journal append is synced to disk before the write
    /// returns.
    pub sync_on_write: bool,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            revision_history_limit: 100,
            change_history: 10_000,
            sync_on_write: true,
        }
    }
}

impl DatastoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the datastore name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the replicated ancestry depth. Values below 1 are raised to 1.
    #[must_use]
    pub const fn revision_history_limit(mut self, limit: usize) -> Self {
        self.revision_history_limit = if limit == 0 { 1 } else { limit };
        self
    }

    /// Sets the change feed history size.
    #[must_use]
    pub const fn change_history(mut self, size: usize) -> Self {
        self.change_history = size;
        self
    }

    /// Sets whether journal appends are synced.
    #[must_use]
    pub const fn sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}
