// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! End-to-end scenarios: one in-process node, Bob and Alice talking through
//! the full client sync machinery.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tributary_kernel::event::Payload;
use tributary_kernel::rollup::StreamUpdate;
use tributary_kernel::sign::{make_event, make_events, SignerContext};
use tributary_kernel::types::{StreamId, StreamKind, SyncPosition};
use tributary_node::client::{Client, StreamNotification};
use tributary_node::config::NodeConfig;
use tributary_node::engine::Engine;
use tributary_node::errors::ServiceError;
use tributary_node::service::StreamService;
use tributary_node::telemetry;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_bob_talks_to_himself() {
    telemetry::init_telemetry();
    let engine = Arc::new(Engine::open(&NodeConfig::default()).unwrap());
    let bob = SignerContext::generate();

    // 1. Bob creates his account.
    engine
        .create_user(vec![make_event(
            &bob,
            Payload::Inception {
                stream_id: StreamId::user(&bob.creator_address()),
                kind: StreamKind::User,
                space_id: None,
            },
            vec![],
        )
        .unwrap()])
        .await
        .unwrap();

    // 2. Bob creates a space and a channel in it.
    let space_id = StreamId::unique_space();
    engine
        .create_space(
            make_events(
                &bob,
                vec![
                    Payload::Inception {
                        stream_id: space_id.clone(),
                        kind: StreamKind::Space,
                        space_id: None,
                    },
                    Payload::Join {
                        user_id: bob.creator_address(),
                    },
                ],
                vec![],
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let channel_id = StreamId::unique_channel();
    let channel_events = make_events(
        &bob,
        vec![
            Payload::Inception {
                stream_id: channel_id.clone(),
                kind: StreamKind::Channel,
                space_id: Some(space_id),
            },
            Payload::Join {
                user_id: bob.creator_address(),
            },
        ],
        vec![],
    )
    .unwrap();
    engine.create_channel(channel_events.clone()).await.unwrap();

    // 3. Bob reads the channel back and parks a sync on it.
    let channel = engine.get_event_stream(channel_id.clone()).await.unwrap();
    assert_eq!(channel.events, channel_events);

    let sync = tokio::spawn({
        let engine = engine.clone();
        let positions = vec![SyncPosition {
            stream_id: channel_id.clone(),
            cookie: channel.cookie,
        }];
        async move { engine.sync_streams(positions, 10_000).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sync.is_finished());

    // 4. Bob posts; the parked sync returns exactly the message.
    let message = make_event(
        &bob,
        Payload::Message {
            text: "Hello, world!".into(),
        },
        vec![channel_events[1].hash],
    )
    .unwrap();
    engine
        .add_event(channel_id.clone(), message.clone())
        .await
        .unwrap();

    let result = timeout(WAIT, sync).await.unwrap().unwrap().unwrap();
    let entry = result.streams.get(&channel_id).unwrap();
    assert_eq!(entry.events, vec![message.clone()]);
    assert_eq!(entry.original_cookie, Some(channel.cookie));

    // 5. Full replay is exactly [inception, join, message].
    let replay = engine.get_event_stream(channel_id.clone()).await.unwrap();
    let kinds: Vec<_> = replay
        .events
        .iter()
        .map(|e| e.base.payload.kind_name())
        .collect();
    assert_eq!(kinds, vec!["inception", "join", "message"]);

    // 6. An unchained message is rejected.
    let unchained = make_event(&bob, Payload::Message { text: "?".into() }, vec![]).unwrap();
    assert!(engine.add_event(channel_id, unchained).await.is_err());
}

#[tokio::test]
async fn test_bob_and_alice_converse() {
    telemetry::init_telemetry();
    let engine = Arc::new(Engine::open(&NodeConfig::default()).unwrap());
    let bob = Arc::new(Client::new(SignerContext::generate(), engine.clone()));
    let alice = Arc::new(Client::new(SignerContext::generate(), engine.clone()));

    bob.create_user().await.unwrap();
    alice.create_user().await.unwrap();

    let mut alice_notifications = alice.subscribe().await.unwrap();

    // Both sync loops run for the whole conversation.
    let bob_sync = tokio::spawn({
        let bob = bob.clone();
        async move { bob.start_sync(Some(Duration::from_secs(2))).await }
    });
    let alice_sync = tokio::spawn({
        let alice = alice.clone();
        async move { alice.start_sync(Some(Duration::from_secs(2))).await }
    });

    // Bob builds his space; the derived notices pull the new streams into his
    // client via sync.
    let space_id = bob.create_space().await.unwrap();
    let channel_id = bob.create_channel(&space_id).await.unwrap();
    timeout(WAIT, bob.wait_for_stream(&channel_id)).await.unwrap();

    bob.send_message(&channel_id, "Hello, world!").await.unwrap();

    // Alice is not a member; her post bounces.
    let err = {
        // She can see the channel (public read), just not post to it.
        alice.join_channel(&channel_id).await.unwrap();
        alice.leave_channel(&channel_id).await.unwrap();
        alice
            .send_message(&channel_id, "can I?")
            .await
            .expect_err("left users cannot post")
    };
    assert!(matches!(err, ServiceError::UserCantPost { .. }));

    // Bob invites Alice; her sync delivers the notice with Bob as inviter.
    bob.invite_user(&channel_id, alice.address()).await.unwrap();
    let (invited_stream, inviter) = timeout(WAIT, async {
        loop {
            match alice_notifications.next().await {
                Some(StreamNotification::StreamUpdated {
                    update:
                        StreamUpdate::InvitedToStream {
                            stream_id,
                            inviter_id,
                        },
                    ..
                }) => break (stream_id, inviter_id),
                Some(_) => continue,
                None => panic!("notification channel closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(invited_stream, channel_id);
    assert_eq!(inviter, bob.address());

    // Alice joins and reads the history.
    alice.join_channel(&channel_id).await.unwrap();
    let texts = alice
        .with_rollup(&channel_id, |rollup| {
            rollup
                .messages()
                .iter()
                .map(|m| m.text.clone())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
    assert_eq!(texts, vec!["Hello, world!".to_string()]);

    // Bob's channel rollup observes Alice's membership.
    timeout(WAIT, async {
        loop {
            if bob
                .with_rollup(&channel_id, |rollup| rollup.is_joined(&alice.address()))
                .await
                == Some(true)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // Alice's own user stream records the joined channel.
    let alice_user = StreamId::user(&alice.address());
    timeout(WAIT, async {
        loop {
            if alice
                .with_rollup(&alice_user, |rollup| {
                    rollup.joined_streams().contains(&channel_id)
                })
                .await
                == Some(true)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // Bob answers; Alice's sync folds it into her channel rollup.
    bob.send_message(&channel_id, "Hello, Alice!").await.unwrap();
    timeout(WAIT, async {
        loop {
            let count = alice
                .with_rollup(&channel_id, |rollup| rollup.messages().len())
                .await
                .unwrap_or(0);
            if count == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // Cooperative shutdown: stop resolves once, the loops exit cleanly.
    bob.stop_sync().await.unwrap();
    alice.stop_sync().await.unwrap();
    timeout(WAIT, bob_sync).await.unwrap().unwrap().unwrap();
    timeout(WAIT, alice_sync).await.unwrap().unwrap().unwrap();
    assert!(matches!(
        bob.stop_sync().await,
        Err(ServiceError::NotRunning)
    ));
}

#[tokio::test]
async fn test_reconnect_restores_joined_streams() {
    telemetry::init_telemetry();
    let engine = Arc::new(Engine::open(&NodeConfig::default()).unwrap());
    let signer = SignerContext::generate();

    let space_id;
    let channel_id;
    {
        let bob = Arc::new(Client::new(signer.clone(), engine.clone()));
        bob.create_user().await.unwrap();
        let sync = tokio::spawn({
            let bob = bob.clone();
            async move { bob.start_sync(Some(Duration::from_secs(2))).await }
        });
        space_id = bob.create_space().await.unwrap();
        channel_id = bob.create_channel(&space_id).await.unwrap();
        timeout(WAIT, bob.wait_for_stream(&channel_id)).await.unwrap();
        bob.send_message(&channel_id, "before reconnect").await.unwrap();
        bob.stop_sync().await.unwrap();
        timeout(WAIT, sync).await.unwrap().unwrap().unwrap();
    }

    // A fresh client for the same identity cold-starts from the user stream
    // and recursively initializes every joined stream.
    let bob = Client::new(signer, engine);
    bob.load_existing_user().await.unwrap();

    let mut known = bob.known_streams().await;
    known.sort();
    let mut expected = vec![
        StreamId::user(&bob.address()),
        space_id,
        channel_id.clone(),
    ];
    expected.sort();
    assert_eq!(known, expected);

    let texts = bob
        .with_rollup(&channel_id, |rollup| {
            rollup
                .messages()
                .iter()
                .map(|m| m.text.clone())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
    assert_eq!(texts, vec!["before reconnect".to_string()]);
}

#[tokio::test]
async fn test_stop_before_start_is_an_error() {
    let engine = Arc::new(Engine::open(&NodeConfig::default()).unwrap());
    let bob = Client::new(SignerContext::generate(), engine);
    assert!(matches!(
        bob.stop_sync().await,
        Err(ServiceError::NotRunning)
    ));
    // The idempotent variant shrugs.
    bob.stop_sync_if_started().await;
}
