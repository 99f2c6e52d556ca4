//! Bridge-wide error taxonomy.
//!
//! Every fallible operation in the bridge returns a [`BridgeError`]. The
//! action dispatcher converts these into OneBot `failed` replies; the
//! orchestrator converts bootstrap-time variants into a fatal exit.

use thiserror::Error;

/// The bridge's error taxonomy.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("server error: HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("protocol error: HTTP {status}: {detail}")]
    Protocol { status: u16, detail: String },

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// OneBot `retcode` to use when surfacing this error on the action
    /// dispatch boundary. The protocol only distinguishes ok (0) from
    /// failed; 1400 is the generic "bad request" code the original bridge
    /// used for every dispatch-time exception.
    pub fn retcode(&self) -> i64 {
        1400
    }
}
