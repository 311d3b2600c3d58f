// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event model.
//!
//! An `Event` is the canonical unit of change: every mutation of a stream is
//! expressed as a signed, hashed, immutable event referencing its causal
//! parents (`prev_events`) within the same stream.
//!
//! # Invariants
//! - `hash` is a pure function of the canonical `EventBase` bytes
//! - `prev_events` is empty only for a stream's inception event
//! - Derived payload kinds are authored by the node identity, never accepted
//!   from a client-submitted event

use crate::types::{Address, StreamId, StreamKind};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content hash of a canonical event body (blake3, 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventHash(pub [u8; 32]);

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight hex chars are plenty for log lines.
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

/// Closed payload taxonomy. This is the ONLY way to express a state
/// transition on a stream; every dispatch site matches exhaustively, so a new
/// kind is a compile error everywhere it matters.
///
/// The first five kinds are client-submitted. The `origin`-carrying kinds are
/// derived: the node writes them into a second stream as a consequence of an
/// action on `stream_id`, with `origin` naming the event they were derived
/// from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// First event of every stream. Channels carry their parent space.
    Inception {
        stream_id: StreamId,
        kind: StreamKind,
        space_id: Option<StreamId>,
    },
    Join {
        user_id: Address,
    },
    Invite {
        user_id: Address,
        inviter_id: Address,
    },
    Leave {
        user_id: Address,
    },
    Message {
        text: String,
    },
    UserJoined {
        stream_id: StreamId,
        origin: EventHash,
    },
    UserInvited {
        stream_id: StreamId,
        inviter_id: Address,
        origin: EventHash,
    },
    UserLeft {
        stream_id: StreamId,
        origin: EventHash,
    },
    ChannelCreated {
        channel_id: StreamId,
        origin: EventHash,
    },
    ChannelDeleted {
        channel_id: StreamId,
        origin: EventHash,
    },
}

impl Payload {
    /// True for node-authored kinds that must never arrive from a client.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Payload::UserJoined { .. }
                | Payload::UserInvited { .. }
                | Payload::UserLeft { .. }
                | Payload::ChannelCreated { .. }
                | Payload::ChannelDeleted { .. }
        )
    }

    /// The originating event a derived payload back-references.
    pub fn origin(&self) -> Option<&EventHash> {
        match self {
            Payload::UserJoined { origin, .. }
            | Payload::UserInvited { origin, .. }
            | Payload::UserLeft { origin, .. }
            | Payload::ChannelCreated { origin, .. }
            | Payload::ChannelDeleted { origin, .. } => Some(origin),
            Payload::Inception { .. }
            | Payload::Join { .. }
            | Payload::Invite { .. }
            | Payload::Leave { .. }
            | Payload::Message { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Inception { .. } => "inception",
            Payload::Join { .. } => "join",
            Payload::Invite { .. } => "invite",
            Payload::Leave { .. } => "leave",
            Payload::Message { .. } => "message",
            Payload::UserJoined { .. } => "user-joined",
            Payload::UserInvited { .. } => "user-invited",
            Payload::UserLeft { .. } => "user-left",
            Payload::ChannelCreated { .. } => "channel-created",
            Payload::ChannelDeleted { .. } => "channel-deleted",
        }
    }
}

/// The signed-over body. The canonical byte form is the bincode (standard
/// config) encoding of this struct; the content hash is blake3 of those
/// bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventBase {
    pub creator: Address,
    /// Random nonce so otherwise-identical payloads hash differently.
    pub salt: [u8; 16],
    /// Hashes of events this one causally follows, within the same stream.
    pub prev_events: Vec<EventHash>,
    pub payload: Payload,
}

/// Wire envelope: content hash, signature over the hash, and the body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub hash: EventHash,
    pub signature: Signature,
    pub base: EventBase,
}
