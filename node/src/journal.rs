// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-Only Stream Journal
//!
//! One file per stream, the canonical durability layer for the event store:
//! - Events are written to disk BEFORE the in-memory commit
//! - Every append batch is fsync'd
//! - No in-place rewriting; recovery only ever cuts a torn tail
//! - Bincode serialization for determinism
//!
//! # File Format
//! ```text
//! [Header: 16 bytes][Record][Record]...
//! ```
//!
//! Header: magic u32, version u32, reserved u64.
//! Record: `[len: u32][crc32: u32][bincode(Event)]`, all little-endian.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tributary_kernel::event::Event;
use tributary_kernel::types::StreamId;

const JOURNAL_MAGIC: u32 = 0x5452_4942; // "TRIB"
const JOURNAL_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;
const RECORD_PREFIX: usize = 8;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid journal header in {0}")]
    InvalidHeader(PathBuf),
}

pub type Result<T> = std::result::Result<T, JournalError>;

#[repr(C)]
struct JournalHeader {
    magic: u32,
    version: u32,
    reserved: u64,
}

impl JournalHeader {
    fn new() -> Self {
        Self {
            magic: JOURNAL_MAGIC,
            version: JOURNAL_VERSION,
            reserved: 0,
        }
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.reserved.to_le_bytes());
        bytes
    }

    fn validate(bytes: &[u8], path: &Path) -> Result<()> {
        if bytes.len() < HEADER_SIZE {
            return Err(JournalError::InvalidHeader(path.to_path_buf()));
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if magic != JOURNAL_MAGIC || version != JOURNAL_VERSION {
            return Err(JournalError::InvalidHeader(path.to_path_buf()));
        }
        Ok(())
    }
}

/// File name for a stream's journal. Stream ids are prefix + hex, safe as a
/// file stem verbatim.
pub fn journal_path(dir: &Path, stream_id: &StreamId) -> PathBuf {
    dir.join(format!("{stream_id}.log"))
}

/// Append-only journal writer for a single stream.
pub struct JournalWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl JournalWriter {
    /// Open or create a journal file. An existing file has its header
    /// validated; a new file gets the header written and synced first.
    pub fn open(path: PathBuf) -> Result<Self> {
        let existing_len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        if existing_len > 0 {
            let mut header = [0u8; HEADER_SIZE];
            File::open(&path)?.read_exact(&mut header)?;
            JournalHeader::validate(&header, &path)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = Self {
            path,
            file: BufWriter::new(file),
        };

        if existing_len == 0 {
            writer.file.write_all(&JournalHeader::new().to_bytes())?;
            writer.sync()?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of events and fsync. The batch is on disk before the
    /// caller commits it to memory.
    pub fn append(&mut self, events: &[Event]) -> Result<()> {
        for event in events {
            let encoded = bincode::serde::encode_to_vec(event, bincode::config::standard())
                .map_err(|e| JournalError::Serialization(e.to_string()))?;
            self.file.write_all(&(encoded.len() as u32).to_le_bytes())?;
            self.file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            self.file.write_all(&encoded)?;
        }
        self.sync()
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }
}

/// Replay a journal file into the events it holds, returning the byte length
/// of the valid prefix alongside them.
///
/// A torn or corrupt tail record (short length, CRC mismatch, undecodable
/// body) ends the replay at the last good record with a warning; everything
/// before it is returned.
pub fn read_journal(path: &Path) -> Result<(Vec<Event>, u64)> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    JournalHeader::validate(&buf, path)?;

    let mut events = Vec::new();
    let mut offset = HEADER_SIZE;
    while offset + RECORD_PREFIX <= buf.len() {
        let len = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) as usize;
        let crc = u32::from_le_bytes([
            buf[offset + 4],
            buf[offset + 5],
            buf[offset + 6],
            buf[offset + 7],
        ]);
        let body_start = offset + RECORD_PREFIX;
        if body_start + len > buf.len() {
            tracing::warn!(path = %path.display(), offset, "torn journal record, truncating replay");
            break;
        }
        let body = &buf[body_start..body_start + len];
        if crc32fast::hash(body) != crc {
            tracing::warn!(path = %path.display(), offset, "journal record CRC mismatch, truncating replay");
            break;
        }
        match bincode::serde::decode_from_slice::<Event, _>(body, bincode::config::standard()) {
            Ok((event, _)) => events.push(event),
            Err(e) => {
                tracing::warn!(path = %path.display(), offset, error = %e, "undecodable journal record, truncating replay");
                break;
            }
        }
        offset = body_start + len;
    }
    Ok((events, offset as u64))
}

/// Cut a torn tail off a journal so recovered appends continue from the last
/// good record.
pub fn truncate_journal(path: &Path, valid_len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len();
    if len > valid_len {
        tracing::warn!(path = %path.display(), dropped = len - valid_len, "cutting torn journal tail");
        file.set_len(valid_len)?;
        file.sync_data()?;
    }
    Ok(())
}
