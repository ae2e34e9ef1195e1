use ridge_core::layout::LayoutError;
use ridge_core::wire::WireError;

/// Failures reported by a transport send primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("connection lock poisoned")]
    Poisoned,

    #[error("transport does not support {0}")]
    Unsupported(&'static str),
}

/// Errors surfaced by the issuance engine.
///
/// Nothing is retried locally. Whatever the failing call acquired is
/// released before the error reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("out of memory allocating {0}")]
    NoMem(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid operation: packet type 0x{0:02x}")]
    InvalidOperation(u8),

    #[error("invalid layout: {0}")]
    InvalidLayout(&'static str),

    #[error("operation has no result buffer")]
    MissingResult,

    #[error("result buffer holds {result} bytes, target range holds {target}")]
    ResultMismatch { result: usize, target: usize },

    #[error("range {offset}..{end} exceeds origin buffer of {have} bytes")]
    OutOfBounds { offset: i64, end: i64, have: usize },

    #[error("no local completion after {0} polls")]
    Stalled(u64),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}
