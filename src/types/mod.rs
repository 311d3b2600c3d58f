// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Shared protocol types.

pub mod id;

pub use id::{Address, StreamId, StreamKind};

use serde::{Deserialize, Serialize};

/// Cursor into a stream: the count of events the holder has already consumed.
///
/// Issued by the event store on every create/append; opaque to clients, who
/// only ever echo it back.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SyncCookie(pub u64);

/// A stream paired with the last cookie the caller has consumed from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPosition {
    pub stream_id: StreamId,
    pub cookie: SyncCookie,
}
