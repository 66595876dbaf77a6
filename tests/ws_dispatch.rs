mod common;

use common::*;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use v_talk_im::domain::ImMessage;
use v_talk_im::ws::handler::{dispatch, handle_frame, SessionContext};

fn ctx(user_id: i64, session_id: &str) -> SessionContext {
    SessionContext { session_id: session_id.to_string(), user_id }
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let h = Harness::new();
    let mut rx = h.connect(DAVE, "s-dave").await;
    dispatch(&h.server, &ctx(DAVE, "s-dave"), ImMessage::new("ping", json!({}))).await.unwrap();
    assert_eq!(names(&drain(&mut rx)), vec!["pong"]);
}

#[tokio::test]
async fn group_talk_message_reaches_the_room() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE, "s-alice").await;
    let mut bob = h.connect(BOB, "s-bob").await;
    let mut carol = h.connect(CAROL, "s-carol").await;
    drain(&mut alice);
    drain(&mut bob);
    drain(&mut carol);

    let event = ImMessage::new(
        "talk_message",
        json!({ "source": 2, "receive_id": GROUP, "text": "standup in 5" }),
    );
    dispatch(&h.server, &ctx(ALICE, "s-alice"), event).await.unwrap();

    for rx in [&mut alice, &mut bob] {
        let events = drain(rx);
        assert_eq!(names(&events), vec!["chat_message"]);
        assert_eq!(events[0].data["content"], "standup in 5");
        assert_eq!(events[0].data["nickname"], "alice");
    }
    assert!(drain(&mut carol).is_empty());
}

#[tokio::test]
async fn direct_code_message_reaches_both_participants() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE, "s-alice").await;
    let mut bob = h.connect(BOB, "s-bob").await;
    drain(&mut alice);
    drain(&mut bob);

    let event = ImMessage::new(
        "code_message",
        json!({ "source": 1, "receive_id": BOB, "lang": "go", "code": "a <- b" }),
    );
    dispatch(&h.server, &ctx(ALICE, "s-alice"), event).await.unwrap();

    let delivered = drain(&mut bob);
    assert_eq!(delivered[0].data["code_block"]["code"], "a <- b");
    assert_eq!(names(&drain(&mut alice)), vec!["chat_message"]);
}

#[tokio::test]
async fn revoke_is_announced_to_the_conversation() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE, "s-alice").await;
    let mut bob = h.connect(BOB, "s-bob").await;
    let id = h
        .server
        .pipeline
        .send_text(ALICE, v_talk_im::domain::Conversation::direct(BOB), "typo")
        .await
        .unwrap();
    drain(&mut alice);
    drain(&mut bob);

    let revoke = ImMessage::new("revoke_message", json!({ "record_id": id }));
    dispatch(&h.server, &ctx(ALICE, "s-alice"), revoke).await.unwrap();
    let events = drain(&mut bob);
    assert_eq!(names(&events), vec!["revoke_message"]);
    assert_eq!(events[0].data["record_id"], id);
}

#[tokio::test]
async fn failures_reply_error_to_the_sender_only() {
    let h = Harness::new();
    let mut carol = h.connect(CAROL, "s-carol").await;
    let mut alice = h.connect(ALICE, "s-alice").await;
    drain(&mut carol);
    drain(&mut alice);

    let frame = json!({
        "type": "talk_message",
        "data": { "source": 2, "receive_id": GROUP, "text": "hi" }
    });
    handle_frame(&h.server, &ctx(CAROL, "s-carol"), Message::Text(frame.to_string())).await;
    let events = drain(&mut carol);
    assert_eq!(names(&events), vec!["error"]);
    assert_eq!(events[0].data["code"], 403);
    assert!(drain(&mut alice).is_empty());

    handle_frame(&h.server, &ctx(CAROL, "s-carol"), Message::Text("not json".to_string())).await;
    let events = drain(&mut carol);
    assert_eq!(events[0].data["code"], 400);

    let unknown = json!({ "type": "teleport", "data": {} });
    handle_frame(&h.server, &ctx(CAROL, "s-carol"), Message::Text(unknown.to_string())).await;
    assert_eq!(names(&drain(&mut carol)), vec!["error"]);
}

#[tokio::test]
async fn error_reply_to_a_closed_session_is_dropped() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE, "s-alice").await;
    drain(&mut alice);

    h.server.hub.unregister("s-gone");
    let frame = json!({ "type": "revoke_message", "data": { "record_id": 404 } });
    handle_frame(&h.server, &ctx(DAVE, "s-gone"), Message::Text(frame.to_string())).await;
    assert!(!h.server.hub.is_connected("s-gone"));
    assert!(drain(&mut alice).is_empty());
}

#[tokio::test]
async fn talk_list_is_replied_to_the_caller_and_unread_can_be_cleared() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE, "s-alice").await;
    h.server
        .pipeline
        .send_text(BOB, v_talk_im::domain::Conversation::direct(ALICE), "ping me")
        .await
        .unwrap();
    drain(&mut alice);

    let me = ctx(ALICE, "s-alice");
    dispatch(&h.server, &me, ImMessage::new("talk_list", json!({}))).await.unwrap();
    let events = drain(&mut alice);
    assert_eq!(names(&events), vec!["talk_list"]);
    assert_eq!(events[0].data[0]["friend_id"], BOB);
    assert_eq!(events[0].data[0]["remark_name"], "Bobby");
    assert_eq!(events[0].data[0]["unread_num"], 1);

    let clear = ImMessage::new("clear_unread", json!({ "receive_id": BOB }));
    dispatch(&h.server, &me, clear).await.unwrap();
    dispatch(&h.server, &me, ImMessage::new("talk_list", json!({}))).await.unwrap();
    assert_eq!(drain(&mut alice)[0].data[0]["unread_num"], 0);
}

#[tokio::test]
async fn emoticon_message_is_delivered_as_a_file() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE, "s-alice").await;
    let mut bob = h.connect(BOB, "s-bob").await;
    drain(&mut alice);
    drain(&mut bob);

    let event = ImMessage::new(
        "emoticon_message",
        json!({ "source": 1, "receive_id": BOB, "emoticon_id": SHARED_EMOTICON }),
    );
    dispatch(&h.server, &ctx(ALICE, "s-alice"), event).await.unwrap();
    let delivered = drain(&mut bob);
    assert_eq!(names(&delivered), vec!["chat_message"]);
    assert_eq!(delivered[0].data["file"]["file_source"], 2);
    assert_eq!(delivered[0].data["file"]["file_url"], "https://cdn.test/emoticon/100.gif");

    let not_owned = json!({
        "type": "emoticon_message",
        "data": { "source": 1, "receive_id": BOB, "emoticon_id": BOBS_EMOTICON }
    });
    handle_frame(&h.server, &ctx(ALICE, "s-alice"), Message::Text(not_owned.to_string())).await;
    assert_eq!(names(&drain(&mut alice)), vec!["error"]);
    assert!(drain(&mut bob).is_empty());
}
