use thiserror::Error;

/// Client-side failure taxonomy. Everything here is local and
/// recoverable; nothing is fatal to the hosting process.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Relay or direct-channel connection lost. Surfaced as a
    /// connectivity state, never a crash.
    #[error("transport error: {0}")]
    Transport(String),
    /// A PeerLink attempt did not open within its window. The relay path
    /// remains authoritative; retries happen on the next snapshot cycle.
    #[error("peer upgrade failed: {0}")]
    Upgrade(String),
    /// A message that failed to decode. Dropped, never propagated.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The relay refused the join.
    #[error("join rejected: {0}")]
    JoinRejected(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// User-visible connectivity indicator, derived from transport state
/// rather than from per-message outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Connecting,
    NotConnected,
}
