// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event Store
//!
//! Durable ordered append per stream plus the one blocking primitive of the
//! protocol: `read_new`, which parks the caller until at least one requested
//! stream grows past its cookie or a timeout elapses.
//!
//! # Invariants
//! - Per-stream append order is total: each append wins a position under the
//!   stream's lock, and the cookie it returns covers everything before it
//! - Journal before memory: a batch is fsync'd before it becomes readable
//! - `read_new` never errors on timeout; empty result and timeout are the
//!   same observable outcome

use crate::config::NodeConfig;
use crate::errors::{Result, ServiceError};
use crate::journal::{self, JournalWriter};
use crate::service::StreamAndCookie;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tributary_kernel::event::Event;
use tributary_kernel::types::{StreamId, SyncCookie, SyncPosition};

struct StreamLog {
    events: Vec<Event>,
    journal: Option<JournalWriter>,
}

impl StreamLog {
    fn cookie(&self) -> SyncCookie {
        SyncCookie(self.events.len() as u64)
    }
}

pub struct EventStore {
    streams: RwLock<FxHashMap<StreamId, Arc<Mutex<StreamLog>>>>,
    /// Bumped on every committed append; parked readers re-scan on change.
    append_version: watch::Sender<u64>,
    /// Bounds concurrently parked `read_new` callers, the way a connection
    /// pool bounds blocking reads.
    read_permits: Semaphore,
    journal_dir: Option<PathBuf>,
}

impl EventStore {
    /// Open the store, recovering any stream journals found on disk.
    pub fn open(config: &NodeConfig) -> Result<Self> {
        let mut streams = FxHashMap::default();
        if let Some(dir) = &config.journal_dir {
            std::fs::create_dir_all(dir).map_err(journal::JournalError::Io)?;
            for entry in std::fs::read_dir(dir).map_err(journal::JournalError::Io)? {
                let path = entry.map_err(journal::JournalError::Io)?.path();
                if path.extension().map_or(true, |ext| ext != "log") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let stream_id = StreamId::parse(stem)?;
                let (events, valid_len) = journal::read_journal(&path)?;
                journal::truncate_journal(&path, valid_len)?;
                let writer = JournalWriter::open(path)?;
                tracing::info!(stream = %stream_id, events = events.len(), "recovered stream from journal");
                streams.insert(
                    stream_id,
                    Arc::new(Mutex::new(StreamLog {
                        events,
                        journal: Some(writer),
                    })),
                );
            }
        }
        Ok(Self {
            streams: RwLock::new(streams),
            append_version: watch::channel(0).0,
            read_permits: Semaphore::new(config.max_blocking_reads),
            journal_dir: config.journal_dir.clone(),
        })
    }

    fn bump(&self) {
        self.append_version.send_modify(|v| *v += 1);
    }

    /// Create a stream with its initial event batch. The returned cookie
    /// covers the batch itself.
    pub async fn create_stream(
        &self,
        stream_id: &StreamId,
        events: &[Event],
    ) -> Result<SyncCookie> {
        if events.is_empty() {
            return Err(ServiceError::Kernel(
                tributary_kernel::error::KernelError::BadStreamCreationParams(
                    "empty inception batch".into(),
                ),
            ));
        }
        let mut map = self.streams.write().await;
        if map.contains_key(stream_id) {
            return Err(ServiceError::AlreadyExists(stream_id.clone()));
        }
        let journal = match &self.journal_dir {
            Some(dir) => Some(JournalWriter::open(journal::journal_path(dir, stream_id))?),
            None => None,
        };
        let mut log = StreamLog {
            events: Vec::new(),
            journal,
        };
        if let Some(journal) = log.journal.as_mut() {
            journal.append(events)?;
        }
        log.events.extend_from_slice(events);
        let cookie = log.cookie();
        map.insert(stream_id.clone(), Arc::new(Mutex::new(log)));
        drop(map);
        self.bump();
        tracing::debug!(stream = %stream_id, events = events.len(), "stream created");
        Ok(cookie)
    }

    /// Ordered append. Causal chaining is the workflow layer's job; the store
    /// is an append log plus a wakeup mechanism.
    pub async fn append(&self, stream_id: &StreamId, events: &[Event]) -> Result<SyncCookie> {
        let log = {
            let map = self.streams.read().await;
            map.get(stream_id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(stream_id.clone()))?
        };
        let mut log = log.lock().await;
        if let Some(journal) = log.journal.as_mut() {
            journal.append(events)?;
        }
        log.events.extend_from_slice(events);
        let cookie = log.cookie();
        drop(log);
        self.bump();
        Ok(cookie)
    }

    /// Full replay.
    pub async fn read(&self, stream_id: &StreamId) -> Result<(Vec<Event>, SyncCookie)> {
        let log = {
            let map = self.streams.read().await;
            map.get(stream_id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(stream_id.clone()))?
        };
        let log = log.lock().await;
        Ok((log.events.clone(), log.cookie()))
    }

    pub async fn exists(&self, stream_id: &StreamId) -> bool {
        self.streams.read().await.contains_key(stream_id)
    }

    /// Blocking multi-stream read. Returns as soon as at least one requested
    /// stream has events past its cookie; otherwise parks until an append
    /// bumps the version or the timeout elapses, in which case the result is
    /// empty. Unknown stream ids are skipped, not errors.
    pub async fn read_new(
        &self,
        positions: &[SyncPosition],
        timeout: Duration,
    ) -> HashMap<StreamId, StreamAndCookie> {
        let _permit = match self.read_permits.acquire().await {
            Ok(permit) => permit,
            // Closed semaphore means the store is going away; nothing new.
            Err(_) => return HashMap::new(),
        };
        let mut version = self.append_version.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Mark the current version seen BEFORE scanning, so an append
            // landing mid-scan still wakes us.
            version.borrow_and_update();
            let found = self.collect_new(positions).await;
            if !found.is_empty() {
                return found;
            }
            match tokio::time::timeout_at(deadline, version.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return HashMap::new(),
            }
        }
    }

    async fn collect_new(
        &self,
        positions: &[SyncPosition],
    ) -> HashMap<StreamId, StreamAndCookie> {
        let mut out = HashMap::new();
        let map = self.streams.read().await;
        for pos in positions {
            let Some(log) = map.get(&pos.stream_id) else {
                continue;
            };
            let log = log.lock().await;
            let consumed = pos.cookie.0 as usize;
            if log.events.len() > consumed {
                out.insert(
                    pos.stream_id.clone(),
                    StreamAndCookie {
                        events: log.events[consumed..].to_vec(),
                        cookie: log.cookie(),
                        original_cookie: Some(pos.cookie),
                    },
                );
            }
        }
        out
    }
}
