// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Server-side workflows.
//!
//! Every operation is a single validate-then-write transaction: the incoming
//! event or batch is checked against the target stream's rollup, and only
//! then written. A rejected event produces no store mutation on the primary
//! stream.
//!
//! The primary write and a derived-stream fan-out are two separate store
//! calls with no cross-stream transaction. Fan-out is idempotent instead:
//! every derived payload back-references its origin event, and a target
//! stream that already folded that origin is skipped, so retrying a
//! half-applied operation cannot duplicate notices.

use crate::config::NodeConfig;
use crate::errors::{Result, ServiceError};
use crate::service::{StreamAndCookie, StreamService, SyncResult};
use crate::store::EventStore;
use std::time::Duration;
use tributary_kernel::error::KernelError;
use tributary_kernel::event::{Event, Payload};
use tributary_kernel::rollup::StreamRollup;
use tributary_kernel::sign::{make_event, verify_event, SignerContext};
use tributary_kernel::types::{Address, StreamId, StreamKind, SyncCookie, SyncPosition};

pub struct Engine {
    store: EventStore,
    /// Node identity; derived events are signed with this.
    signer: SignerContext,
    min_sync_timeout: Duration,
    max_sync_timeout: Duration,
}

impl Engine {
    /// Open the engine with a fresh node identity, recovering the store from
    /// its journal directory if one is configured.
    pub fn open(config: &NodeConfig) -> Result<Self> {
        Self::with_signer(config, SignerContext::generate())
    }

    pub fn with_signer(config: &NodeConfig, signer: SignerContext) -> Result<Self> {
        Ok(Self {
            store: EventStore::open(config)?,
            signer,
            min_sync_timeout: config.min_sync_timeout,
            max_sync_timeout: config.max_sync_timeout,
        })
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn node_address(&self) -> Address {
        self.signer.creator_address()
    }

    async fn rollup_of(&self, stream_id: &StreamId) -> Result<StreamRollup> {
        let (events, _) = self.store.read(stream_id).await?;
        Ok(StreamRollup::fold(stream_id.clone(), &events)?)
    }

    /// Shared validation for the three creation workflows: signatures check
    /// out, the batch folds cleanly from its own inception, and the inception
    /// kind is the expected one.
    fn validate_creation_batch(
        events: &[Event],
        expected_kind: StreamKind,
    ) -> Result<(StreamId, Option<StreamId>)> {
        for event in events {
            verify_event(event)?;
        }
        let Some(first) = events.first() else {
            return Err(KernelError::BadStreamCreationParams("empty event batch".into()).into());
        };
        let Payload::Inception {
            stream_id,
            kind,
            space_id,
        } = &first.base.payload
        else {
            return Err(KernelError::BadStreamCreationParams(format!(
                "first event must be inception, got {}",
                first.base.payload.kind_name()
            ))
            .into());
        };
        if *kind != expected_kind {
            return Err(KernelError::BadStreamCreationParams(format!(
                "expected {expected_kind:?} inception, got {kind:?}"
            ))
            .into());
        }
        StreamRollup::fold(stream_id.clone(), events)
            .map_err(|e| KernelError::BadStreamCreationParams(e.to_string()))?;
        Ok((stream_id.clone(), space_id.clone()))
    }

    /// The second event of a space/channel batch must be the creator joining
    /// their own stream.
    fn validate_self_join(events: &[Event]) -> Result<()> {
        if events.len() != 2 {
            return Err(KernelError::BadStreamCreationParams(format!(
                "expected [inception, join], got {} events",
                events.len()
            ))
            .into());
        }
        let Payload::Join { user_id } = &events[1].base.payload else {
            return Err(KernelError::BadStreamCreationParams(format!(
                "second event must be join, got {}",
                events[1].base.payload.kind_name()
            ))
            .into());
        };
        if *user_id != events[1].base.creator || *user_id != events[0].base.creator {
            return Err(
                KernelError::BadStreamCreationParams("join must be the creator".into()).into(),
            );
        }
        Ok(())
    }

    /// Append a node-signed derived event to `target`, chained from its
    /// current frontier. Skips silently when the target does not exist
    /// (nowhere to deliver) or has already folded this origin (retry).
    async fn fan_out(&self, target: &StreamId, payload: Payload) -> Result<()> {
        if !self.store.exists(target).await {
            tracing::warn!(target = %target, kind = payload.kind_name(), "fan-out target missing, skipping");
            return Ok(());
        }
        let rollup = self.rollup_of(target).await?;
        if let Some(origin) = payload.origin() {
            if rollup.has_derived_origin(origin) {
                tracing::debug!(target = %target, origin = %origin, "fan-out already applied");
                return Ok(());
            }
        }
        let event = make_event(&self.signer, payload, rollup.leaf_event_hashes())?;
        self.store.append(target, std::slice::from_ref(&event)).await?;
        Ok(())
    }

    /// The derived notice a membership event produces in the target user's
    /// own User stream.
    fn derived_membership(stream_id: &StreamId, event: &Event) -> Option<(Address, Payload)> {
        match &event.base.payload {
            Payload::Join { user_id } => Some((
                *user_id,
                Payload::UserJoined {
                    stream_id: stream_id.clone(),
                    origin: event.hash,
                },
            )),
            Payload::Invite {
                user_id,
                inviter_id,
            } => Some((
                *user_id,
                Payload::UserInvited {
                    stream_id: stream_id.clone(),
                    inviter_id: *inviter_id,
                    origin: event.hash,
                },
            )),
            Payload::Leave { user_id } => Some((
                *user_id,
                Payload::UserLeft {
                    stream_id: stream_id.clone(),
                    origin: event.hash,
                },
            )),
            Payload::Inception { .. }
            | Payload::Message { .. }
            | Payload::UserJoined { .. }
            | Payload::UserInvited { .. }
            | Payload::UserLeft { .. }
            | Payload::ChannelCreated { .. }
            | Payload::ChannelDeleted { .. } => None,
        }
    }
}

impl StreamService for Engine {
    async fn create_user(&self, events: Vec<Event>) -> Result<SyncCookie> {
        if events.len() != 1 {
            return Err(KernelError::BadStreamCreationParams(format!(
                "user stream starts with exactly one inception event, got {}",
                events.len()
            ))
            .into());
        }
        let (stream_id, _) = Self::validate_creation_batch(&events, StreamKind::User)?;
        let expected = StreamId::user(&events[0].base.creator);
        if stream_id != expected {
            return Err(KernelError::BadStreamId(format!(
                "{stream_id} is not the canonical user stream of the creator"
            ))
            .into());
        }
        let cookie = self.store.create_stream(&stream_id, &events).await?;
        tracing::info!(stream = %stream_id, "user created");
        Ok(cookie)
    }

    async fn create_space(&self, events: Vec<Event>) -> Result<SyncCookie> {
        let (stream_id, _) = Self::validate_creation_batch(&events, StreamKind::Space)?;
        Self::validate_self_join(&events)?;
        let cookie = self.store.create_stream(&stream_id, &events).await?;
        tracing::info!(stream = %stream_id, "space created");

        if let Some((user_id, payload)) = Self::derived_membership(&stream_id, &events[1]) {
            self.fan_out(&StreamId::user(&user_id), payload).await?;
        }
        Ok(cookie)
    }

    async fn create_channel(&self, events: Vec<Event>) -> Result<SyncCookie> {
        let (stream_id, space_id) = Self::validate_creation_batch(&events, StreamKind::Channel)?;
        Self::validate_self_join(&events)?;
        // The rollup fold guarantees a channel inception names its space.
        let Some(space_id) = space_id else {
            return Err(
                KernelError::BadStreamCreationParams("channel without parent space".into()).into(),
            );
        };
        if !self.store.exists(&space_id).await {
            return Err(ServiceError::NotFound(space_id));
        }
        let cookie = self.store.create_stream(&stream_id, &events).await?;
        tracing::info!(stream = %stream_id, space = %space_id, "channel created");

        self.fan_out(
            &space_id,
            Payload::ChannelCreated {
                channel_id: stream_id.clone(),
                origin: events[0].hash,
            },
        )
        .await?;
        if let Some((user_id, payload)) = Self::derived_membership(&stream_id, &events[1]) {
            self.fan_out(&StreamId::user(&user_id), payload).await?;
        }
        Ok(cookie)
    }

    async fn get_event_stream(&self, stream_id: StreamId) -> Result<StreamAndCookie> {
        let (events, cookie) = self.store.read(&stream_id).await?;
        Ok(StreamAndCookie {
            events,
            cookie,
            original_cookie: None,
        })
    }

    async fn add_event(&self, stream_id: StreamId, event: Event) -> Result<()> {
        verify_event(&event)?;

        // Inception is rejected as such even though its prev set is empty;
        // every other payload must chain.
        if matches!(event.base.payload, Payload::Inception { .. }) {
            return Err(KernelError::BadEvent(
                "streams are created via the dedicated workflows".into(),
            )
            .into());
        }
        if event.base.payload.is_derived() {
            return Err(KernelError::BadEvent(format!(
                "{} payloads are node-authored",
                event.base.payload.kind_name()
            ))
            .into());
        }
        if event.base.prev_events.is_empty() {
            return Err(
                KernelError::BadPrevEvents(format!("event {} has no prev events", event.hash))
                    .into(),
            );
        }
        let rollup = self.rollup_of(&stream_id).await?;

        // A duplicate submission is a retry of a write that already landed.
        // The primary append is skipped and only the fan-out is re-run; the
        // origin guard makes that a no-op when the notice was delivered too.
        let retry = rollup.contains_event(&event.hash);
        if !retry {
            for prev in &event.base.prev_events {
                if !rollup.contains_event(prev) {
                    return Err(KernelError::BadPrevEvents(format!(
                        "unknown prev event {prev} in {stream_id}"
                    ))
                    .into());
                }
            }
        }

        match &event.base.payload {
            Payload::Join { .. } | Payload::Invite { .. } | Payload::Leave { .. } => {
                if !matches!(
                    rollup.kind(),
                    Some(StreamKind::Space) | Some(StreamKind::Channel)
                ) {
                    return Err(KernelError::BadEvent(format!(
                        "membership events are only valid on space/channel streams, not {stream_id}"
                    ))
                    .into());
                }
                if let Payload::Invite { inviter_id, .. } = &event.base.payload {
                    if *inviter_id != event.base.creator {
                        return Err(KernelError::BadEvent(
                            "invite inviter must be the event creator".into(),
                        )
                        .into());
                    }
                }
                if retry {
                    tracing::info!(stream = %stream_id, event = %event.hash, "duplicate membership event, retrying fan-out only");
                } else {
                    self.store
                        .append(&stream_id, std::slice::from_ref(&event))
                        .await?;
                    tracing::debug!(stream = %stream_id, kind = event.base.payload.kind_name(), "membership event appended");
                }
                if let Some((user_id, payload)) = Self::derived_membership(&stream_id, &event) {
                    self.fan_out(&StreamId::user(&user_id), payload).await?;
                }
                Ok(())
            }
            Payload::Message { .. } => {
                if rollup.kind() != Some(StreamKind::Channel) {
                    return Err(KernelError::BadEvent(format!(
                        "messages are only valid on channel streams, not {stream_id}"
                    ))
                    .into());
                }
                if !rollup.is_joined(&event.base.creator) {
                    return Err(ServiceError::UserCantPost { stream_id });
                }
                if !retry {
                    self.store
                        .append(&stream_id, std::slice::from_ref(&event))
                        .await?;
                }
                Ok(())
            }
            // Both unreachable past the early rejects; kept explicit so a new
            // payload kind fails to compile here instead of falling through.
            Payload::Inception { .. } => Err(KernelError::BadEvent(
                "streams are created via the dedicated workflows".into(),
            )
            .into()),
            Payload::UserJoined { .. }
            | Payload::UserInvited { .. }
            | Payload::UserLeft { .. }
            | Payload::ChannelCreated { .. }
            | Payload::ChannelDeleted { .. } => Err(KernelError::BadEvent(format!(
                "{} payloads are node-authored",
                event.base.payload.kind_name()
            ))
            .into()),
        }
    }

    async fn sync_streams(&self, positions: Vec<SyncPosition>, timeout_ms: u64) -> Result<SyncResult> {
        let timeout =
            Duration::from_millis(timeout_ms).clamp(self.min_sync_timeout, self.max_sync_timeout);
        let streams = self.store.read_new(&positions, timeout).await;
        Ok(SyncResult { streams })
    }
}
