// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The transport-agnostic service seam.
//!
//! These are the logical operations a node exposes; whatever RPC binding
//! carries them is someone else's problem. The engine implements the trait
//! in-process and the client is generic over it.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tributary_kernel::event::Event;
use tributary_kernel::types::{StreamId, SyncCookie, SyncPosition};

/// A slice of one stream plus the cookie to resume from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamAndCookie {
    pub events: Vec<Event>,
    /// Cursor covering everything in `events`.
    pub cookie: SyncCookie,
    /// The cookie the caller supplied, echoed back. Present on sync
    /// responses only; full reads carry `None`.
    pub original_cookie: Option<SyncCookie>,
}

/// Result of a `sync_streams` call. Only streams with new events appear;
/// empty on timeout, which is not an error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub streams: HashMap<StreamId, StreamAndCookie>,
}

pub trait StreamService: Send + Sync {
    /// Create the canonical User stream from a single inception event.
    fn create_user(&self, events: Vec<Event>) -> impl Future<Output = Result<SyncCookie>> + Send;

    /// Create a Space stream from an `[inception, join(self)]` batch and fan
    /// out the creator's membership notice.
    fn create_space(&self, events: Vec<Event>) -> impl Future<Output = Result<SyncCookie>> + Send;

    /// Create a Channel stream from an `[inception, join(self)]` batch and
    /// fan out into the parent space and the creator's User stream.
    fn create_channel(&self, events: Vec<Event>)
        -> impl Future<Output = Result<SyncCookie>> + Send;

    /// Full replay of one stream, for cold start / reconnect.
    fn get_event_stream(
        &self,
        stream_id: StreamId,
    ) -> impl Future<Output = Result<StreamAndCookie>> + Send;

    /// The general-purpose append path, validated against the stream rollup.
    fn add_event(
        &self,
        stream_id: StreamId,
        event: Event,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Blocking multi-stream catch-up: returns once at least one position has
    /// new events, or with an empty result when `timeout_ms` elapses.
    fn sync_streams(
        &self,
        positions: Vec<SyncPosition>,
        timeout_ms: u64,
    ) -> impl Future<Output = Result<SyncResult>> + Send;
}

/// Many clients of one in-process node share it through an `Arc`.
impl<T: StreamService> StreamService for Arc<T> {
    async fn create_user(&self, events: Vec<Event>) -> Result<SyncCookie> {
        (**self).create_user(events).await
    }

    async fn create_space(&self, events: Vec<Event>) -> Result<SyncCookie> {
        (**self).create_space(events).await
    }

    async fn create_channel(&self, events: Vec<Event>) -> Result<SyncCookie> {
        (**self).create_channel(events).await
    }

    async fn get_event_stream(&self, stream_id: StreamId) -> Result<StreamAndCookie> {
        (**self).get_event_stream(stream_id).await
    }

    async fn add_event(&self, stream_id: StreamId, event: Event) -> Result<()> {
        (**self).add_event(stream_id, event).await
    }

    async fn sync_streams(&self, positions: Vec<SyncPosition>, timeout_ms: u64) -> Result<SyncResult> {
        (**self).sync_streams(positions, timeout_ms).await
    }
}
