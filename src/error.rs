// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    /// Stream id is malformed or carries an unknown kind prefix.
    #[error("bad stream id: {0}")]
    BadStreamId(String),
    /// Inception batch is malformed or does not match the target stream.
    #[error("bad stream creation params: {0}")]
    BadStreamCreationParams(String),
    /// Missing, empty, or unknown causal parents.
    #[error("bad prev events: {0}")]
    BadPrevEvents(String),
    /// Structurally disallowed payload for this stream or position.
    #[error("bad event: {0}")]
    BadEvent(String),
    /// The identity could not produce a signature.
    #[error("signing failed: {0}")]
    SigningError(String),
    /// Content hash or signature does not check out against the event body.
    #[error("bad signature: {0}")]
    BadSignature(String),
}

pub type Result<T> = core::result::Result<T, KernelError>;
