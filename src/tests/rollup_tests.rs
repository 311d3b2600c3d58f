// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::error::KernelError;
use crate::event::{Event, EventHash, Payload};
use crate::rollup::{StreamRollup, StreamUpdate};
use crate::sign::{make_event, make_events, SignerContext};
use crate::types::{StreamId, StreamKind};

fn channel_genesis(signer: &SignerContext) -> (StreamId, Vec<Event>) {
    let channel_id = StreamId::unique_channel();
    let events = make_events(
        signer,
        vec![
            Payload::Inception {
                stream_id: channel_id.clone(),
                kind: StreamKind::Channel,
                space_id: Some(StreamId::unique_space()),
            },
            Payload::Join {
                user_id: signer.creator_address(),
            },
        ],
        vec![],
    )
    .unwrap();
    (channel_id, events)
}

#[test]
fn test_fold_channel_membership_and_messages() {
    let signer = SignerContext::generate();
    let (channel_id, mut events) = channel_genesis(&signer);

    let message = make_event(
        &signer,
        Payload::Message {
            text: "Hello, world!".into(),
        },
        vec![events[1].hash],
    )
    .unwrap();
    events.push(message.clone());

    let rollup = StreamRollup::fold(channel_id, &events).unwrap();
    assert_eq!(rollup.kind(), Some(StreamKind::Channel));
    assert_eq!(rollup.len(), 3);
    assert!(rollup.is_joined(&signer.creator_address()));
    assert_eq!(rollup.messages().len(), 1);
    assert_eq!(rollup.messages()[0].text, "Hello, world!");
    // Only the message is unreferenced.
    assert_eq!(rollup.leaf_event_hashes(), vec![message.hash]);
}

#[test]
fn test_frontier_tracks_concurrent_tips() {
    let signer = SignerContext::generate();
    let (channel_id, events) = channel_genesis(&signer);
    let mut rollup = StreamRollup::fold(channel_id, &events).unwrap();

    // Two events both chain from the join: a fork.
    let a = make_event(&signer, Payload::Message { text: "a".into() }, vec![events[1].hash]).unwrap();
    let b = make_event(&signer, Payload::Message { text: "b".into() }, vec![events[1].hash]).unwrap();
    rollup.apply(&a).unwrap();
    rollup.apply(&b).unwrap();

    let mut tips = rollup.leaf_event_hashes();
    tips.sort();
    let mut expected = vec![a.hash, b.hash];
    expected.sort();
    assert_eq!(tips, expected);

    // An event referencing both tips collapses the frontier again.
    let merge = make_event(
        &signer,
        Payload::Message { text: "c".into() },
        vec![a.hash, b.hash],
    )
    .unwrap();
    rollup.apply(&merge).unwrap();
    assert_eq!(rollup.leaf_event_hashes(), vec![merge.hash]);
}

#[test]
fn test_fold_is_associative_at_every_split() {
    let signer = SignerContext::generate();
    let (channel_id, mut events) = channel_genesis(&signer);
    let mut prev = events[1].hash;
    for i in 0..4 {
        let event = make_event(
            &signer,
            Payload::Message {
                text: format!("m{i}"),
            },
            vec![prev],
        )
        .unwrap();
        prev = event.hash;
        events.push(event);
    }

    let whole = StreamRollup::fold(channel_id.clone(), &events).unwrap();
    for split in 1..events.len() {
        let mut rollup = StreamRollup::fold(channel_id.clone(), &events[..split]).unwrap();
        rollup.apply_all(&events[split..]).unwrap();
        assert_eq!(rollup.len(), whole.len());
        assert_eq!(rollup.leaf_event_hashes(), whole.leaf_event_hashes());
        assert_eq!(rollup.messages(), whole.messages());
        assert_eq!(rollup.joined_users(), whole.joined_users());
    }
}

#[test]
fn test_rejects_unknown_prev_and_empty_prev() {
    let signer = SignerContext::generate();
    let (channel_id, events) = channel_genesis(&signer);
    let mut rollup = StreamRollup::fold(channel_id, &events).unwrap();

    let orphan = make_event(
        &signer,
        Payload::Message { text: "x".into() },
        vec![EventHash([7u8; 32])],
    )
    .unwrap();
    assert!(matches!(
        rollup.apply(&orphan),
        Err(KernelError::BadPrevEvents(_))
    ));

    let unchained = make_event(&signer, Payload::Message { text: "x".into() }, vec![]).unwrap();
    assert!(matches!(
        rollup.apply(&unchained),
        Err(KernelError::BadPrevEvents(_))
    ));
}

#[test]
fn test_rejects_duplicate_and_second_inception() {
    let signer = SignerContext::generate();
    let (channel_id, events) = channel_genesis(&signer);
    let mut rollup = StreamRollup::fold(channel_id.clone(), &events).unwrap();

    assert!(matches!(
        rollup.apply(&events[1]),
        Err(KernelError::BadEvent(_))
    ));

    let second_inception = make_event(
        &signer,
        Payload::Inception {
            stream_id: channel_id,
            kind: StreamKind::Channel,
            space_id: Some(StreamId::unique_space()),
        },
        vec![events[1].hash],
    )
    .unwrap();
    assert!(matches!(
        rollup.apply(&second_inception),
        Err(KernelError::BadEvent(_))
    ));
}

#[test]
fn test_first_event_must_be_matching_inception() {
    let signer = SignerContext::generate();
    let join = make_event(
        &signer,
        Payload::Join {
            user_id: signer.creator_address(),
        },
        vec![],
    )
    .unwrap();
    let mut rollup = StreamRollup::new(StreamId::unique_channel());
    assert!(matches!(rollup.apply(&join), Err(KernelError::BadEvent(_))));

    // Inception for some other stream id is rejected too.
    let other = StreamId::unique_channel();
    let inception = make_event(
        &signer,
        Payload::Inception {
            stream_id: other,
            kind: StreamKind::Channel,
            space_id: Some(StreamId::unique_space()),
        },
        vec![],
    )
    .unwrap();
    let mut rollup = StreamRollup::new(StreamId::unique_channel());
    assert!(matches!(
        rollup.apply(&inception),
        Err(KernelError::BadEvent(_))
    ));
}

#[test]
fn test_leave_and_invite_effects() {
    let signer = SignerContext::generate();
    let alice = SignerContext::generate();
    let (channel_id, events) = channel_genesis(&signer);
    let mut rollup = StreamRollup::fold(channel_id, &events).unwrap();

    let invite = make_event(
        &signer,
        Payload::Invite {
            user_id: alice.creator_address(),
            inviter_id: signer.creator_address(),
        },
        rollup.leaf_event_hashes(),
    )
    .unwrap();
    let updates = rollup.apply(&invite).unwrap();
    assert_eq!(
        updates,
        vec![StreamUpdate::UserInvited {
            user_id: alice.creator_address(),
            inviter_id: signer.creator_address(),
        }]
    );
    // Invite grants visibility, not membership.
    assert!(!rollup.is_joined(&alice.creator_address()));
    assert!(rollup.invited_users().contains(&alice.creator_address()));

    let join = make_event(
        &alice,
        Payload::Join {
            user_id: alice.creator_address(),
        },
        rollup.leaf_event_hashes(),
    )
    .unwrap();
    rollup.apply(&join).unwrap();
    assert!(rollup.is_joined(&alice.creator_address()));
    assert!(!rollup.invited_users().contains(&alice.creator_address()));

    let leave = make_event(
        &alice,
        Payload::Leave {
            user_id: alice.creator_address(),
        },
        rollup.leaf_event_hashes(),
    )
    .unwrap();
    rollup.apply(&leave).unwrap();
    assert!(!rollup.is_joined(&alice.creator_address()));
}

#[test]
fn test_user_stream_derived_folding() {
    let node = SignerContext::generate();
    let user = SignerContext::generate();
    let user_stream = StreamId::user(&user.creator_address());
    let channel_id = StreamId::unique_channel();

    let inception = make_event(
        &user,
        Payload::Inception {
            stream_id: user_stream.clone(),
            kind: StreamKind::User,
            space_id: None,
        },
        vec![],
    )
    .unwrap();
    let mut rollup = StreamRollup::fold(user_stream, &[inception.clone()]).unwrap();

    let origin = EventHash([9u8; 32]);
    let joined = make_event(
        &node,
        Payload::UserJoined {
            stream_id: channel_id.clone(),
            origin,
        },
        vec![inception.hash],
    )
    .unwrap();
    let updates = rollup.apply(&joined).unwrap();
    assert_eq!(
        updates,
        vec![StreamUpdate::JoinedStream {
            stream_id: channel_id.clone()
        }]
    );
    assert!(rollup.joined_streams().contains(&channel_id));
    assert!(rollup.has_derived_origin(&origin));

    let left = make_event(
        &node,
        Payload::UserLeft {
            stream_id: channel_id.clone(),
            origin: EventHash([10u8; 32]),
        },
        vec![joined.hash],
    )
    .unwrap();
    rollup.apply(&left).unwrap();
    assert!(!rollup.joined_streams().contains(&channel_id));
}
