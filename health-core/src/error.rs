//! Error taxonomy (spec.md §7). Only the FAIL/Timeout outcomes are errors
//! here — the benign outcomes (connect-in-progress, a zero-byte write, a
//! `WouldBlock` read) never construct a `CheckError`; they're just another
//! iteration of the repoll loops in [`crate::handlers`].

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("probe socket setup failed: {0}")]
    SocketSetup(#[source] std::io::Error),

    #[error("bind to source address failed: {0}")]
    SourceBind(#[source] std::io::Error),

    #[error("transparent-proxy source binding is not supported on this platform")]
    TproxyUnsupported,

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("send failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("short write: sent {sent} of {total} probe bytes")]
    ShortWrite { sent: usize, total: usize },

    #[error("recv failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("probe reply did not match the expected pattern")]
    BadReply,

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("too many concurrent probe sockets (limit {limit})")]
    SocketLimitExceeded { limit: u32 },
}
