//! End-to-end relay behaviour with real client timelines on each side.

mod common;

use chat_relay_service::{
    models::message::{MessageDraft, NewMessage},
    services::MemoryStore,
    timeline::Timeline,
    websocket::{ClientEvent, PresenceRegistry, ReadAck, Relay, ServerEvent},
};
use common::{drain, join, DownStore};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn memory_relay() -> Relay {
    Relay::new(Arc::new(MemoryStore::new()), PresenceRegistry::new(), 50)
}

fn draft(sender: &str, text: &str, ts: i64) -> MessageDraft {
    MessageDraft {
        sender: Some(sender.into()),
        text: Some(text.into()),
        timestamp: Some(json!(ts)),
        ..MessageDraft::default()
    }
}

#[tokio::test]
async fn read_receipt_reaches_sender_view() {
    let relay = memory_relay();
    let (mut a, mut rx_a) = join(&relay, "alice").await;
    let (mut b, mut rx_b) = join(&relay, "bob").await;

    let mut view_a = Timeline::new("alice");
    let mut view_b = Timeline::new("bob");
    drain(&mut rx_a).into_iter().for_each(|e| view_a.apply(e));
    drain(&mut rx_b).into_iter().for_each(|e| view_b.apply(e));

    view_a.push_local(NewMessage {
        sender: "alice".into(),
        text: "hello".into(),
        timestamp: 1_000,
        attachment: None,
    });
    relay
        .handle(&mut a, ClientEvent::SendMessage(draft("alice", "hello", 1_000)))
        .await
        .unwrap();

    drain(&mut rx_a).into_iter().for_each(|e| view_a.apply(e));
    drain(&mut rx_b).into_iter().for_each(|e| view_b.apply(e));

    assert_eq!(view_a.len(), 1);
    assert!(!view_a.entries()[0].pending);
    assert!(!view_a.is_fully_read(0));

    let unread = view_b.unread_from_others();
    assert_eq!(unread.len(), 1);
    relay
        .handle(
            &mut b,
            ClientEvent::MarkAsRead(ReadAck {
                message_id: unread[0].clone(),
                identity: "bob".into(),
            }),
        )
        .await
        .unwrap();

    drain(&mut rx_a).into_iter().for_each(|e| view_a.apply(e));
    drain(&mut rx_b).into_iter().for_each(|e| view_b.apply(e));

    assert!(view_a.is_fully_read(0));
    assert!(view_b.unread_from_others().is_empty());
    assert!(view_b.entries()[0].message.read_by.contains("bob"));
}

#[tokio::test]
async fn store_outage_still_relays_live_traffic() {
    let relay = Relay::new(Arc::new(DownStore), PresenceRegistry::new(), 50);
    let (mut a, mut rx_a) = join(&relay, "alice").await;
    let (_b, mut rx_b) = join(&relay, "bob").await;
    assert!(drain(&mut rx_a).is_empty(), "no replay while the store is down");
    drain(&mut rx_b);

    relay
        .handle(&mut a, ClientEvent::SendMessage(MessageDraft::text("still here")))
        .await
        .unwrap();

    match drain(&mut rx_b).as_slice() {
        [ServerEvent::ReceiveMessage(m)] => {
            assert_eq!(m.text, "still here");
            assert!(m.id.is_none());
            assert!(m.read_by.is_empty());
        }
        other => panic!("unexpected frames {other:?}"),
    }
    assert!(drain(&mut rx_a).is_empty(), "no confirmation without an id");

    let (_c, mut rx_c) = join(&relay, "carol").await;
    assert!(drain(&mut rx_c).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_fan_out_exactly_once() {
    let relay = memory_relay();
    let names = ["alice", "bob", "carol", "dave"];

    let mut clients = Vec::new();
    for name in names {
        let (conn, mut rx) = join(&relay, name).await;
        drain(&mut rx);
        clients.push((conn, rx));
    }

    let mut receivers = Vec::new();
    let mut tasks = Vec::new();
    for (mut conn, rx) in clients {
        receivers.push(rx);
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            let text = format!("from {}", conn.identity().unwrap_or_default());
            relay
                .handle(&mut conn, ClientEvent::SendMessage(MessageDraft::text(text)))
                .await
                .unwrap();
            conn
        }));
    }
    let mut _conns = Vec::new();
    for task in tasks {
        _conns.push(task.await.unwrap());
    }

    for (i, rx) in receivers.iter_mut().enumerate() {
        let mut received = HashSet::new();
        let mut confirmations = 0;
        for event in drain(rx) {
            match event {
                ServerEvent::ReceiveMessage(m) => {
                    assert_ne!(m.sender, names[i], "sender got its own message echoed");
                    assert!(received.insert(m.id.unwrap()), "duplicate delivery");
                }
                ServerEvent::MessageConfirmed(m) => {
                    assert_eq!(m.sender, names[i]);
                    confirmations += 1;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(received.len(), names.len() - 1);
        assert_eq!(confirmations, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_joiner_sees_every_message_once_across_replay_and_live() {
    let relay = memory_relay();
    let (mut a, _rx_a) = join(&relay, "alice").await;

    let sender = {
        let relay = relay.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                relay
                    .handle(&mut a, ClientEvent::SendMessage(MessageDraft::text(format!("m{i}"))))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    tokio::task::yield_now().await;
    let (_b, mut rx_b) = join(&relay, "bob").await;
    sender.await.unwrap();

    let mut view = Timeline::new("bob");
    let mut live_ids = HashSet::new();
    for event in drain(&mut rx_b) {
        if let ServerEvent::ReceiveMessage(m) = &event {
            assert!(live_ids.insert(m.id.clone().unwrap()), "duplicate live delivery");
        }
        view.apply(event);
    }

    let texts: HashSet<String> = view.entries().iter().map(|v| v.message.text.clone()).collect();
    assert_eq!(view.len(), 20);
    assert_eq!(texts.len(), 20);
}

#[tokio::test]
async fn malformed_read_acks_do_not_disturb_the_room() {
    let relay = memory_relay();
    let (mut a, mut rx_a) = join(&relay, "alice").await;
    let (mut b, mut rx_b) = join(&relay, "bob").await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    for message_id in ["", "not-a-real-id"] {
        let result = relay
            .handle(
                &mut b,
                ClientEvent::MarkAsRead(ReadAck {
                    message_id: message_id.into(),
                    identity: "bob".into(),
                }),
            )
            .await;
        assert!(result.is_err());
    }

    relay
        .handle(&mut a, ClientEvent::SendMessage(MessageDraft::text("ok")))
        .await
        .unwrap();
    assert_eq!(drain(&mut rx_b).len(), 1);
}
