// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical encoding, content hashing, and signatures.
//!
//! The codec is bincode with the standard config: the same bytes the store
//! journals are the bytes that get hashed, so an event's identity never
//! depends on who serialized it.

use crate::error::{KernelError, Result};
use crate::event::{Event, EventBase, EventHash, Payload};
use crate::types::Address;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Signing identity for one participant (a client wallet or the node itself).
#[derive(Clone)]
pub struct SignerContext {
    signing_key: SigningKey,
}

impl SignerContext {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn creator_address(&self) -> Address {
        Address(self.signing_key.verifying_key().to_bytes())
    }
}

/// Canonical byte form of an event body.
pub fn canonical_bytes(base: &EventBase) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(base, bincode::config::standard())
        .map_err(|e| KernelError::BadEvent(format!("encode: {e}")))
}

/// Content hash over the canonical bytes.
pub fn content_hash(base: &EventBase) -> Result<EventHash> {
    Ok(EventHash(*blake3::hash(&canonical_bytes(base)?).as_bytes()))
}

/// Build a fully-formed signed event: fresh salt, canonical hash, signature
/// over the hash.
pub fn make_event(
    signer: &SignerContext,
    payload: Payload,
    prev_events: Vec<EventHash>,
) -> Result<Event> {
    let base = EventBase {
        creator: signer.creator_address(),
        salt: rand::random(),
        prev_events,
        payload,
    };
    let hash = content_hash(&base)?;
    let signature = signer
        .signing_key
        .try_sign(&hash.0)
        .map_err(|e| KernelError::SigningError(e.to_string()))?;
    Ok(Event {
        hash,
        signature,
        base,
    })
}

/// Build a batch where each event chains onto the previous one's hash.
///
/// `prev_events` seeds the first event; an inception batch passes an empty
/// seed.
pub fn make_events(
    signer: &SignerContext,
    payloads: Vec<Payload>,
    mut prev_events: Vec<EventHash>,
) -> Result<Vec<Event>> {
    let mut out = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let event = make_event(signer, payload, prev_events)?;
        prev_events = vec![event.hash];
        out.push(event);
    }
    Ok(out)
}

/// Recompute the canonical hash and check the signature against the creator
/// address. The node runs this on every incoming event before trusting it.
pub fn verify_event(event: &Event) -> Result<()> {
    let hash = content_hash(&event.base)?;
    if hash != event.hash {
        return Err(KernelError::BadSignature(format!(
            "hash mismatch for event {}",
            event.hash
        )));
    }
    let key = VerifyingKey::from_bytes(event.base.creator.as_bytes())
        .map_err(|e| KernelError::BadSignature(format!("bad creator key: {e}")))?;
    key.verify_strict(&hash.0, &event.signature)
        .map_err(|e| KernelError::BadSignature(format!("event {}: {e}", event.hash)))
}
