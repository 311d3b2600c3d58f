// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Client-side sync engine.
//!
//! One `Client` per connected identity. It owns a table of synced streams
//! (rollup + cookie each) and a cooperative long-poll loop with two states,
//! Running and Stopped. State changes flow out over an explicit notification
//! channel; application code receives from it instead of registering
//! callbacks.
//!
//! # Sync loop
//! - build a position list from every known stream's cookie
//! - race `sync_streams` against the stop signal
//! - stop wins: discard the in-flight result, exit
//! - results: check the echoed cookie, fold, advance, notify
//! - empty result (server timeout): reissue immediately; that is how "wait up
//!   to N ms, otherwise poll again" avoids busy-waiting

use crate::errors::{Result, ServiceError};
use crate::service::{StreamAndCookie, StreamService, SyncResult};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tributary_kernel::event::Payload;
use tributary_kernel::rollup::{StreamRollup, StreamUpdate};
use tributary_kernel::sign::{make_event, make_events, SignerContext};
use tributary_kernel::types::{Address, StreamId, StreamKind, SyncCookie, SyncPosition};

/// Matches the long-poll window the node clamps against.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(29);

/// What application code receives from [`Client::subscribe`].
#[derive(Clone, Debug)]
pub enum StreamNotification {
    /// A stream became locally known (cold read or discovered via sync).
    StreamInitialized { stream_id: StreamId },
    /// A folded event changed a stream's state.
    StreamUpdated {
        stream_id: StreamId,
        update: StreamUpdate,
    },
}

struct SyncedStream {
    cookie: Option<SyncCookie>,
    rollup: StreamRollup,
}

#[derive(Default)]
struct ClientState {
    user_stream_id: Option<StreamId>,
    streams: FxHashMap<StreamId, SyncedStream>,
}

pub struct Client<S: StreamService> {
    signer: SignerContext,
    service: S,
    state: Mutex<ClientState>,
    notify_tx: mpsc::UnboundedSender<StreamNotification>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<StreamNotification>>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    stream_added: Notify,
}

impl<S: StreamService> Client<S> {
    pub fn new(signer: SignerContext, service: S) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            signer,
            service,
            state: Mutex::new(ClientState::default()),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            stop_tx: Mutex::new(None),
            stream_added: Notify::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.creator_address()
    }

    /// Take the notification stream. Yields `None` after the first call; one
    /// consumer owns the channel.
    pub async fn subscribe(&self) -> Option<UnboundedReceiverStream<StreamNotification>> {
        self.notify_rx
            .lock()
            .await
            .take()
            .map(UnboundedReceiverStream::new)
    }

    pub async fn user_stream_id(&self) -> Option<StreamId> {
        self.state.lock().await.user_stream_id.clone()
    }

    pub async fn known_streams(&self) -> Vec<StreamId> {
        self.state.lock().await.streams.keys().cloned().collect()
    }

    pub async fn stream_cookie(&self, stream_id: &StreamId) -> Option<SyncCookie> {
        self.state
            .lock()
            .await
            .streams
            .get(stream_id)
            .and_then(|s| s.cookie)
    }

    /// Read a stream's rollup through an immutable snapshot closure. The
    /// rollup itself never leaves its single owner.
    pub async fn with_rollup<R>(
        &self,
        stream_id: &StreamId,
        f: impl FnOnce(&StreamRollup) -> R,
    ) -> Option<R> {
        self.state
            .lock()
            .await
            .streams
            .get(stream_id)
            .map(|s| f(&s.rollup))
    }

    // --- Account bootstrap ---

    /// Create this identity's User stream on the node and initialize it
    /// locally.
    pub async fn create_user(&self) -> Result<StreamId> {
        let stream_id = StreamId::user(&self.address());
        tracing::info!(user = %self.address(), stream = %stream_id, "create user");
        let event = make_event(
            &self.signer,
            Payload::Inception {
                stream_id: stream_id.clone(),
                kind: StreamKind::User,
                space_id: None,
            },
            vec![],
        )?;
        let cookie = self.service.create_user(vec![event.clone()]).await?;
        self.init_user_stream(
            stream_id.clone(),
            StreamAndCookie {
                events: vec![event],
                cookie,
                original_cookie: None,
            },
        )
        .await?;
        Ok(stream_id)
    }

    /// Cold-start an existing account: fetch the User stream and every stream
    /// it says we are joined to.
    pub async fn load_existing_user(&self) -> Result<StreamId> {
        let stream_id = StreamId::user(&self.address());
        tracing::info!(user = %self.address(), stream = %stream_id, "load existing user");
        let stream = self.service.get_event_stream(stream_id.clone()).await?;
        self.init_user_stream(stream_id.clone(), stream).await?;
        Ok(stream_id)
    }

    async fn init_user_stream(&self, stream_id: StreamId, stream: StreamAndCookie) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.user_stream_id.is_some() {
                return Err(ServiceError::AlreadyExists(stream_id));
            }
            state.user_stream_id = Some(stream_id.clone());
        }
        self.init_stream_with(stream_id.clone(), stream).await?;

        let joined: Vec<StreamId> = self
            .with_rollup(&stream_id, |rollup| {
                rollup.joined_streams().iter().cloned().collect()
            })
            .await
            .unwrap_or_default();
        for joined_id in joined {
            self.init_stream(joined_id).await?;
        }
        Ok(())
    }

    /// Fetch and fold a stream we do not know yet. No-op when already known.
    pub async fn init_stream(&self, stream_id: StreamId) -> Result<()> {
        if self.state.lock().await.streams.contains_key(&stream_id) {
            return Ok(());
        }
        let stream = self.service.get_event_stream(stream_id.clone()).await?;
        self.init_stream_with(stream_id, stream).await
    }

    async fn init_stream_with(&self, stream_id: StreamId, stream: StreamAndCookie) -> Result<()> {
        let mut rollup = StreamRollup::new(stream_id.clone());
        let updates = rollup.apply_all(&stream.events)?;

        {
            let mut state = self.state.lock().await;
            if state.streams.contains_key(&stream_id) {
                // Lost an init race against the sync loop; keep the first.
                tracing::debug!(stream = %stream_id, "already initialized");
                return Ok(());
            }
            state.streams.insert(
                stream_id.clone(),
                SyncedStream {
                    cookie: Some(stream.cookie),
                    rollup,
                },
            );
        }

        let _ = self.notify_tx.send(StreamNotification::StreamInitialized {
            stream_id: stream_id.clone(),
        });
        for update in updates {
            let _ = self.notify_tx.send(StreamNotification::StreamUpdated {
                stream_id: stream_id.clone(),
                update,
            });
        }
        self.stream_added.notify_waiters();
        tracing::debug!(stream = %stream_id, "stream initialized");
        Ok(())
    }

    /// Wait until a stream becomes locally known (typically after a sync
    /// round delivers the membership notice that triggers its init).
    pub async fn wait_for_stream(&self, stream_id: &StreamId) {
        loop {
            let notified = self.stream_added.notified();
            tokio::pin!(notified);
            // Register before re-checking, so an init landing in between
            // still wakes us.
            notified.as_mut().enable();
            if self.state.lock().await.streams.contains_key(stream_id) {
                return;
            }
            notified.await;
        }
    }

    // --- Stream creation and appends ---

    pub async fn create_space(&self) -> Result<StreamId> {
        self.require_user().await?;
        let space_id = StreamId::unique_space();
        tracing::info!(user = %self.address(), stream = %space_id, "create space");
        let events = make_events(
            &self.signer,
            vec![
                Payload::Inception {
                    stream_id: space_id.clone(),
                    kind: StreamKind::Space,
                    space_id: None,
                },
                Payload::Join {
                    user_id: self.address(),
                },
            ],
            vec![],
        )?;
        self.service.create_space(events).await?;
        Ok(space_id)
    }

    pub async fn create_channel(&self, space_id: &StreamId) -> Result<StreamId> {
        self.require_user().await?;
        let channel_id = StreamId::unique_channel();
        tracing::info!(user = %self.address(), stream = %channel_id, space = %space_id, "create channel");
        let events = make_events(
            &self.signer,
            vec![
                Payload::Inception {
                    stream_id: channel_id.clone(),
                    kind: StreamKind::Channel,
                    space_id: Some(space_id.clone()),
                },
                Payload::Join {
                    user_id: self.address(),
                },
            ],
            vec![],
        )?;
        self.service.create_channel(events).await?;
        Ok(channel_id)
    }

    pub async fn send_message(&self, stream_id: &StreamId, text: impl Into<String>) -> Result<()> {
        self.make_event_and_add(stream_id, Payload::Message { text: text.into() })
            .await
    }

    pub async fn invite_user(&self, stream_id: &StreamId, user_id: Address) -> Result<()> {
        self.make_event_and_add(
            stream_id,
            Payload::Invite {
                user_id,
                inviter_id: self.address(),
            },
        )
        .await
    }

    pub async fn join_channel(&self, stream_id: &StreamId) -> Result<()> {
        self.init_stream(stream_id.clone()).await?;
        self.make_event_and_add(
            stream_id,
            Payload::Join {
                user_id: self.address(),
            },
        )
        .await
    }

    pub async fn leave_channel(&self, stream_id: &StreamId) -> Result<()> {
        self.make_event_and_add(
            stream_id,
            Payload::Leave {
                user_id: self.address(),
            },
        )
        .await
    }

    /// Chain a new event from the local rollup's frontier and submit it.
    async fn make_event_and_add(&self, stream_id: &StreamId, payload: Payload) -> Result<()> {
        self.require_user().await?;
        let prev_events = self
            .with_rollup(stream_id, |rollup| rollup.leaf_event_hashes())
            .await
            .ok_or_else(|| ServiceError::NotFound(stream_id.clone()))?;
        let event = make_event(&self.signer, payload, prev_events)?;
        self.service.add_event(stream_id.clone(), event).await
    }

    async fn require_user(&self) -> Result<()> {
        if self.state.lock().await.user_stream_id.is_none() {
            return Err(ServiceError::NoUserStream);
        }
        Ok(())
    }

    // --- Sync loop ---

    /// Run the sync loop until stopped. Returns an error only on a protocol
    /// violation; a plain stop resolves `Ok(())`.
    pub async fn start_sync(&self, timeout: Option<Duration>) -> Result<()> {
        self.require_user().await?;
        let mut stop_rx = {
            let mut stop = self.stop_tx.lock().await;
            if stop.is_some() {
                return Err(ServiceError::AlreadyRunning);
            }
            let (tx, rx) = oneshot::channel();
            *stop = Some(tx);
            rx
        };
        let timeout = timeout.unwrap_or(DEFAULT_SYNC_TIMEOUT);
        tracing::info!(user = %self.address(), "sync started");

        let result = loop {
            let positions: Vec<SyncPosition> = {
                let state = self.state.lock().await;
                state
                    .streams
                    .iter()
                    .filter_map(|(stream_id, stream)| {
                        stream.cookie.map(|cookie| SyncPosition {
                            stream_id: stream_id.clone(),
                            cookie,
                        })
                    })
                    .collect()
            };
            tracing::debug!(user = %self.address(), streams = positions.len(), "sync call");

            tokio::select! {
                _ = &mut stop_rx => {
                    tracing::info!(user = %self.address(), "sync cancelled");
                    break Ok(());
                }
                result = self
                    .service
                    .sync_streams(positions, timeout.as_millis() as u64) =>
                {
                    match result {
                        Ok(sync) => {
                            if let Err(e) = self.apply_sync_result(sync).await {
                                break Err(e);
                            }
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        // Running -> Stopped, whether by stop signal or by error.
        self.stop_tx.lock().await.take();
        tracing::info!(user = %self.address(), "sync ended");
        result
    }

    async fn apply_sync_result(&self, sync: SyncResult) -> Result<()> {
        let mut notifications = Vec::new();
        let mut newly_joined = Vec::new();
        {
            let mut state = self.state.lock().await;
            for (stream_id, stream_and_cookie) in sync.streams {
                let Some(stream) = state.streams.get_mut(&stream_id) else {
                    tracing::debug!(stream = %stream_id, "sync returned unknown stream, skipping");
                    continue;
                };
                if stream.cookie != stream_and_cookie.original_cookie {
                    return Err(ServiceError::SyncCookieMismatch {
                        stream_id,
                        expected: stream.cookie,
                        got: stream_and_cookie.original_cookie,
                    });
                }
                tracing::debug!(
                    stream = %stream_id,
                    events = stream_and_cookie.events.len(),
                    "sync got events"
                );
                let updates = stream.rollup.apply_all(&stream_and_cookie.events)?;
                stream.cookie = Some(stream_and_cookie.cookie);
                for update in updates {
                    if let StreamUpdate::JoinedStream { stream_id: joined } = &update {
                        newly_joined.push(joined.clone());
                    }
                    notifications.push(StreamNotification::StreamUpdated {
                        stream_id: stream_id.clone(),
                        update,
                    });
                }
            }
        }
        for notification in notifications {
            let _ = self.notify_tx.send(notification);
        }
        // Streams we just learned we belong to enter the position list on the
        // next loop iteration.
        for stream_id in newly_joined {
            self.init_stream(stream_id).await?;
        }
        Ok(())
    }

    /// Resolve the stop signal. The loop ends the next time its race
    /// resolves, not instantaneously.
    pub async fn stop_sync(&self) -> Result<()> {
        let tx = self
            .stop_tx
            .lock()
            .await
            .take()
            .ok_or(ServiceError::NotRunning)?;
        let _ = tx.send(());
        Ok(())
    }

    /// Idempotent variant for shutdown paths.
    pub async fn stop_sync_if_started(&self) {
        if let Some(tx) = self.stop_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }
}
