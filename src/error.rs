//! Error taxonomy for the caching orchestrator
//!
//! Network and status failures are recovered inside the strategies by
//! falling through to the next tier; store and decode failures are logged
//! and never abort a response that was already obtained. Only an install
//! abort is fatal, and only to that install attempt.

use crate::lifecycle::LifecycleState;
use crate::network::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The fetch could not complete (timeout, refused connection, DNS)
    #[error("network failure: {0}")]
    NetworkFailure(#[from] FetchError),

    /// The fetch completed but the server reported a failure
    #[error("server responded with status {status}")]
    NonSuccessStatus { status: u16 },

    #[error("no stored entry for {key}")]
    StoreMiss { key: String },

    #[error("store read failed: {0:#}")]
    StoreRead(#[source] anyhow::Error),

    #[error("store write failed: {0:#}")]
    StoreWriteFailure(#[source] anyhow::Error),

    #[error("structured body could not be decoded: {0}")]
    DecodeFailure(#[from] serde_json::Error),

    #[error("install aborted while caching {url}: {reason}")]
    InstallAbort { url: String, reason: String },

    #[error("cannot {action} while {from:?}")]
    InvalidTransition {
        from: LifecycleState,
        action: &'static str,
    },
}

impl CacheError {
    /// Whether the strategies recover from this error by trying the next tier
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::NetworkFailure(_)
                | CacheError::NonSuccessStatus { .. }
                | CacheError::StoreMiss { .. }
        )
    }
}
