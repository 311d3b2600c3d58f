// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream rollup: the folded, in-memory projection of a stream.
//!
//! `apply` is a pure fold step. Folding a prefix and then the remaining
//! suffix yields the same rollup as folding the whole sequence at any split
//! point; incremental sync depends on that.
//!
//! # Invariants
//! - `frontier` is always exactly the set of events with no successor yet
//! - every `prev_events` member of an accepted event is already known
//! - the first event is the inception, and only the first

use crate::error::{KernelError, Result};
use crate::event::{Event, EventHash, Payload};
use crate::types::{Address, StreamId, StreamKind};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

/// One message in append order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEntry {
    pub hash: EventHash,
    pub sender: Address,
    pub text: String,
}

/// Typed state change produced by folding a single event. Consumers receive
/// these over explicit channels instead of registering callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamUpdate {
    MessageAdded {
        hash: EventHash,
        sender: Address,
        text: String,
    },
    UserJoined {
        user_id: Address,
    },
    UserLeft {
        user_id: Address,
    },
    UserInvited {
        user_id: Address,
        inviter_id: Address,
    },
    /// User-stream only: this identity joined `stream_id`.
    JoinedStream {
        stream_id: StreamId,
    },
    LeftStream {
        stream_id: StreamId,
    },
    InvitedToStream {
        stream_id: StreamId,
        inviter_id: Address,
    },
    /// Space-stream only: a channel was created under this space.
    ChannelCreated {
        channel_id: StreamId,
    },
    ChannelDeleted {
        channel_id: StreamId,
    },
}

/// Folded state of one stream.
pub struct StreamRollup {
    stream_id: StreamId,
    kind: Option<StreamKind>,
    parent_space_id: Option<StreamId>,
    len: u64,
    known: FxHashSet<EventHash>,
    // BTreeSet so the frontier iterates deterministically.
    frontier: BTreeSet<EventHash>,
    joined_users: FxHashSet<Address>,
    invited_users: FxHashSet<Address>,
    messages: Vec<MessageEntry>,
    channels: FxHashSet<StreamId>,
    joined_streams: FxHashSet<StreamId>,
    invited_streams: FxHashSet<StreamId>,
    derived_origins: FxHashSet<EventHash>,
}

impl StreamRollup {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            kind: None,
            parent_space_id: None,
            len: 0,
            known: FxHashSet::default(),
            frontier: BTreeSet::new(),
            joined_users: FxHashSet::default(),
            invited_users: FxHashSet::default(),
            messages: Vec::new(),
            channels: FxHashSet::default(),
            joined_streams: FxHashSet::default(),
            invited_streams: FxHashSet::default(),
            derived_origins: FxHashSet::default(),
        }
    }

    /// Fold a whole event sequence.
    pub fn fold(stream_id: StreamId, events: &[Event]) -> Result<Self> {
        let mut rollup = Self::new(stream_id);
        for event in events {
            rollup.apply(event)?;
        }
        Ok(rollup)
    }

    // --- Read APIs ---

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// `None` until the inception event has been folded.
    pub fn kind(&self) -> Option<StreamKind> {
        self.kind
    }

    pub fn parent_space_id(&self) -> Option<&StreamId> {
        self.parent_space_id.as_ref()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains_event(&self, hash: &EventHash) -> bool {
        self.known.contains(hash)
    }

    pub fn is_joined(&self, user_id: &Address) -> bool {
        self.joined_users.contains(user_id)
    }

    pub fn joined_users(&self) -> &FxHashSet<Address> {
        &self.joined_users
    }

    pub fn invited_users(&self) -> &FxHashSet<Address> {
        &self.invited_users
    }

    pub fn messages(&self) -> &[MessageEntry] {
        &self.messages
    }

    pub fn channels(&self) -> &FxHashSet<StreamId> {
        &self.channels
    }

    /// User-stream only: streams this identity is joined to.
    pub fn joined_streams(&self) -> &FxHashSet<StreamId> {
        &self.joined_streams
    }

    pub fn invited_streams(&self) -> &FxHashSet<StreamId> {
        &self.invited_streams
    }

    /// Origin hashes of derived events already folded into this stream. The
    /// fan-out path consults this to stay idempotent across retries.
    pub fn has_derived_origin(&self, origin: &EventHash) -> bool {
        self.derived_origins.contains(origin)
    }

    /// Current frontier: event hashes with no successor yet. This is the
    /// valid `prev_events` for the next append, and it legitimately holds
    /// more than one hash when the log has concurrent tips.
    pub fn leaf_event_hashes(&self) -> Vec<EventHash> {
        self.frontier.iter().copied().collect()
    }

    // --- Fold step ---

    /// Apply one event, in append order. Returns the typed state changes the
    /// event caused.
    pub fn apply(&mut self, event: &Event) -> Result<Vec<StreamUpdate>> {
        if self.known.contains(&event.hash) {
            return Err(KernelError::BadEvent(format!(
                "duplicate event {} in {}",
                event.hash, self.stream_id
            )));
        }

        if self.len == 0 {
            return self.apply_inception(event);
        }

        if event.base.prev_events.is_empty() {
            return Err(KernelError::BadPrevEvents(format!(
                "event {} has no prev events",
                event.hash
            )));
        }
        for prev in &event.base.prev_events {
            if !self.known.contains(prev) {
                return Err(KernelError::BadPrevEvents(format!(
                    "unknown prev event {prev} referenced by {} in {}",
                    event.hash, self.stream_id
                )));
            }
        }

        let updates = match &event.base.payload {
            Payload::Inception { .. } => {
                return Err(KernelError::BadEvent(format!(
                    "inception after genesis in {}",
                    self.stream_id
                )));
            }
            Payload::Join { user_id } => {
                self.joined_users.insert(*user_id);
                self.invited_users.remove(user_id);
                vec![StreamUpdate::UserJoined { user_id: *user_id }]
            }
            Payload::Leave { user_id } => {
                self.joined_users.remove(user_id);
                vec![StreamUpdate::UserLeft { user_id: *user_id }]
            }
            Payload::Invite {
                user_id,
                inviter_id,
            } => {
                self.invited_users.insert(*user_id);
                vec![StreamUpdate::UserInvited {
                    user_id: *user_id,
                    inviter_id: *inviter_id,
                }]
            }
            Payload::Message { text } => {
                self.messages.push(MessageEntry {
                    hash: event.hash,
                    sender: event.base.creator,
                    text: text.clone(),
                });
                vec![StreamUpdate::MessageAdded {
                    hash: event.hash,
                    sender: event.base.creator,
                    text: text.clone(),
                }]
            }
            Payload::UserJoined { stream_id, origin } => {
                self.joined_streams.insert(stream_id.clone());
                self.derived_origins.insert(*origin);
                vec![StreamUpdate::JoinedStream {
                    stream_id: stream_id.clone(),
                }]
            }
            Payload::UserLeft { stream_id, origin } => {
                self.joined_streams.remove(stream_id);
                self.derived_origins.insert(*origin);
                vec![StreamUpdate::LeftStream {
                    stream_id: stream_id.clone(),
                }]
            }
            Payload::UserInvited {
                stream_id,
                inviter_id,
                origin,
            } => {
                self.invited_streams.insert(stream_id.clone());
                self.derived_origins.insert(*origin);
                vec![StreamUpdate::InvitedToStream {
                    stream_id: stream_id.clone(),
                    inviter_id: *inviter_id,
                }]
            }
            Payload::ChannelCreated { channel_id, origin } => {
                self.channels.insert(channel_id.clone());
                self.derived_origins.insert(*origin);
                vec![StreamUpdate::ChannelCreated {
                    channel_id: channel_id.clone(),
                }]
            }
            Payload::ChannelDeleted { channel_id, origin } => {
                self.channels.remove(channel_id);
                self.derived_origins.insert(*origin);
                vec![StreamUpdate::ChannelDeleted {
                    channel_id: channel_id.clone(),
                }]
            }
        };

        self.record(event);
        Ok(updates)
    }

    /// Apply a batch; convenience for sync results.
    pub fn apply_all(&mut self, events: &[Event]) -> Result<Vec<StreamUpdate>> {
        let mut updates = Vec::new();
        for event in events {
            updates.extend(self.apply(event)?);
        }
        Ok(updates)
    }

    fn apply_inception(&mut self, event: &Event) -> Result<Vec<StreamUpdate>> {
        let Payload::Inception {
            stream_id,
            kind,
            space_id,
        } = &event.base.payload
        else {
            return Err(KernelError::BadEvent(format!(
                "first event of {} must be inception, got {}",
                self.stream_id,
                event.base.payload.kind_name()
            )));
        };
        if !event.base.prev_events.is_empty() {
            return Err(KernelError::BadPrevEvents(
                "inception must not reference prev events".into(),
            ));
        }
        if *stream_id != self.stream_id {
            return Err(KernelError::BadEvent(format!(
                "inception stream id {stream_id} does not match {}",
                self.stream_id
            )));
        }
        if self.stream_id.kind()? != *kind {
            return Err(KernelError::BadEvent(format!(
                "stream id {} does not encode kind {kind:?}",
                self.stream_id
            )));
        }
        match kind {
            StreamKind::Channel => {
                if space_id.is_none() {
                    return Err(KernelError::BadEvent(format!(
                        "channel inception {} missing parent space",
                        self.stream_id
                    )));
                }
            }
            StreamKind::User | StreamKind::Space => {
                if space_id.is_some() {
                    return Err(KernelError::BadEvent(format!(
                        "{kind:?} inception {} must not carry a parent space",
                        self.stream_id
                    )));
                }
            }
        }
        self.kind = Some(*kind);
        self.parent_space_id = space_id.clone();
        self.record(event);
        Ok(Vec::new())
    }

    fn record(&mut self, event: &Event) {
        self.known.insert(event.hash);
        for prev in &event.base.prev_events {
            self.frontier.remove(prev);
        }
        self.frontier.insert(event.hash);
        self.len += 1;
    }
}
