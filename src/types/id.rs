// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity types.
//!
//! Stream ids carry their kind in a short prefix so a receiver can dispatch
//! on kind without a registry lookup:
//!
//! - `us_<creator hex>` - user stream, canonical per address
//! - `sp_<random hex>`  - space
//! - `ch_<random hex>`  - channel

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const USER_PREFIX: &str = "us_";
const SPACE_PREFIX: &str = "sp_";
const CHANNEL_PREFIX: &str = "ch_";

/// Signer identity: raw ed25519 verifying key bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// The three stream shapes of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// One per identity; receives server-derived membership notices.
    User,
    /// A community; may own channels.
    Space,
    /// Belongs to exactly one space; carries messages.
    Channel,
}

/// Globally unique stream identifier with a kind-encoding prefix.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// The canonical user stream id for an address. Deterministic: one user
    /// stream per identity.
    pub fn user(address: &Address) -> Self {
        Self(format!("{USER_PREFIX}{address}"))
    }

    /// A fresh, random space stream id.
    pub fn unique_space() -> Self {
        Self(format!("{SPACE_PREFIX}{:032x}", rand::random::<u128>()))
    }

    /// A fresh, random channel stream id.
    pub fn unique_channel() -> Self {
        Self(format!("{CHANNEL_PREFIX}{:032x}", rand::random::<u128>()))
    }

    /// Validate an id string received from the outside.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let id = Self(raw);
        id.kind()?;
        Ok(id)
    }

    /// Dispatch on the kind prefix.
    pub fn kind(&self) -> Result<StreamKind> {
        if self.0.starts_with(USER_PREFIX) {
            Ok(StreamKind::User)
        } else if self.0.starts_with(SPACE_PREFIX) {
            Ok(StreamKind::Space)
        } else if self.0.starts_with(CHANNEL_PREFIX) {
            Ok(StreamKind::Channel)
        } else {
            Err(KernelError::BadStreamId(self.0.clone()))
        }
    }

    pub fn is_user(&self) -> bool {
        self.0.starts_with(USER_PREFIX)
    }

    pub fn is_space(&self) -> bool {
        self.0.starts_with(SPACE_PREFIX)
    }

    pub fn is_channel(&self) -> bool {
        self.0.starts_with(CHANNEL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}
