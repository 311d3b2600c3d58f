// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::journal::JournalError;
use thiserror::Error;
use tributary_kernel::error::KernelError;
use tributary_kernel::types::{StreamId, SyncCookie};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("stream not found: {0}")]
    NotFound(StreamId),

    #[error("stream already exists: {0}")]
    AlreadyExists(StreamId),

    /// Permission gate: the creator is not a member of the target stream.
    #[error("user cannot post to {stream_id}: not a member")]
    UserCantPost { stream_id: StreamId },

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    /// Client-side protocol invariant violation: the server echoed a cookie
    /// that does not match what we recorded. Fail loudly rather than fold
    /// events onto a desynchronized rollup.
    #[error("sync cookie mismatch on {stream_id}: expected {expected:?}, got {got:?}")]
    SyncCookieMismatch {
        stream_id: StreamId,
        expected: Option<SyncCookie>,
        got: Option<SyncCookie>,
    },

    #[error("no user stream initialized for this client")]
    NoUserStream,

    #[error("sync loop is not running")]
    NotRunning,

    #[error("sync loop already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, ServiceError>;
