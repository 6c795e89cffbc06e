use thiserror::Error;

/// Errors raised while loading action manifests. Always recoverable: the
/// offending manifest is skipped and the rest of the catalog loads.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Wrapper around IO errors (directory scan, manifest read).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest was not valid TOML.
    #[error("manifest parse error in {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },

    /// Manifest omitted the `kind` entry-point binding.
    #[error("manifest {file} has no `kind`")]
    MissingKind { file: String },

    /// Manifest named a kind absent from the builtin ledger.
    #[error("manifest {file} names unknown kind `{kind}`")]
    UnknownKind { file: String, kind: String },

    /// Kind-specific params failed validation.
    #[error("invalid params for `{kind}`: {reason}")]
    InvalidParams { kind: String, reason: String },
}

/// Failure inside an action's `execute`. Logged and swallowed by the
/// dispatch loop; the unit's last-run timestamp is not advanced.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Node store access failed.
    #[error("store error: {0}")]
    Store(#[from] crate::storage::StoreError),

    /// The outbound message channel is gone (writer side dropped).
    #[error("outbox closed")]
    OutboxClosed,

    /// Anything else an action wants to report.
    #[error("{0}")]
    Other(String),
}

/// Device link failures. Any of these degrades the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A liveness probe or write did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer closed the link.
    #[error("connection closed by device")]
    Closed,

    #[cfg(feature = "serial")]
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
}

/// A reconnect attempt failed. Feeds the fixed-interval retry loop; never
/// terminates the process.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid connection config: {0}")]
    Config(String),
}
