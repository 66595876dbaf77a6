mod common;

use common::*;
use chrono::Duration;
use v_talk_im::domain::{Conversation, InvitePayload, InviteType, MessageBody, MsgType};
use v_talk_im::storage::ChatRecordStore;
use v_talk_im::ChatError;

#[tokio::test]
async fn code_round_trips_through_hydrate() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let id = p.send_code(ALICE, Conversation::direct(BOB), "go", "package main").await.unwrap();
    let view = p.view(id).await.unwrap();
    assert_eq!(view.msg_type, MsgType::Code);
    let code = view.code_block.unwrap();
    assert_eq!(code.lang, "go");
    assert_eq!(code.code, "package main");

    let tricky = "if a < b && b > \"c\" {}";
    let id = p.send_code(ALICE, Conversation::direct(BOB), "go", tricky).await.unwrap();
    assert_eq!(p.view(id).await.unwrap().code_block.unwrap().code, tricky);
}

#[tokio::test]
async fn create_writes_record_and_payload_or_neither() {
    let h = Harness::new();
    let p = &h.server.pipeline;

    h.store.fail_writes_after(1);
    let err =
        p.send_code(ALICE, Conversation::direct(BOB), "rust", "fn main() {}").await.unwrap_err();
    assert!(matches!(err, ChatError::StorageFailure(_)));
    assert_eq!(h.store.record_count(), 0);
    assert_eq!(h.store.payload_count(), 0);

    h.store.clear_failures();
    let id = p.send_code(ALICE, Conversation::direct(BOB), "rust", "fn main() {}").await.unwrap();
    assert!(p.view(id).await.unwrap().code_block.is_some());
}

#[tokio::test]
async fn group_messages_require_membership() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    assert!(p.send_text(BOB, Conversation::group(GROUP), "hi all").await.is_ok());
    assert_eq!(
        p.send_text(CAROL, Conversation::group(GROUP), "let me in").await,
        Err(ChatError::Unauthorized)
    );
    assert!(matches!(
        p.send_text(ALICE, Conversation::direct(BOB), "   ").await,
        Err(ChatError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn revoke_window_boundary_is_120_seconds() {
    let h = Harness::new();
    let p = &h.server.pipeline;

    let early = p.send_text(ALICE, Conversation::direct(BOB), "oops").await.unwrap();
    h.clock.advance(Duration::seconds(119));
    let revoked = p.revoke_message(ALICE, early).await.unwrap();
    assert!(revoked.is_revoke);
    assert!(p.view(early).await.unwrap().is_revoke);

    let late = p.send_text(ALICE, Conversation::direct(BOB), "too late").await.unwrap();
    h.clock.advance(Duration::seconds(121));
    assert_eq!(p.revoke_message(ALICE, late).await, Err(ChatError::RevokeWindowExpired));
    assert!(!p.view(late).await.unwrap().is_revoke);
}

#[tokio::test]
async fn revoke_checks_existence_then_window_then_access() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    assert_eq!(p.revoke_message(ALICE, 999).await, Err(ChatError::NotFound));

    let id = p.send_text(ALICE, Conversation::direct(BOB), "private").await.unwrap();
    assert_eq!(p.revoke_message(CAROL, id).await, Err(ChatError::Unauthorized));
    // 接收方同样可以撤回 / the receiving side may revoke too
    assert!(p.revoke_message(BOB, id).await.is_ok());

    h.clock.advance(Duration::seconds(300));
    assert_eq!(p.revoke_message(CAROL, id).await, Err(ChatError::RevokeWindowExpired));
}

#[tokio::test]
async fn forward_copies_payload_to_every_target() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let source =
        p.send_file(BOB, Conversation::direct(ALICE), "cat.png", b"png-bytes").await.unwrap();

    let ids = p
        .forward_message(ALICE, source, &[Conversation::direct(CAROL), Conversation::group(GROUP)])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let original = p.view(source).await.unwrap().file.unwrap();
    for id in ids {
        let view = p.view(id).await.unwrap();
        assert_eq!(view.user_id, ALICE);
        let file = view.file.unwrap();
        assert_eq!(file.save_dir, original.save_dir);
        assert_eq!(file.original_name, "cat.png");
    }
}

#[tokio::test]
async fn forwarded_file_keeps_uploader_and_code_changes_owner() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let to_alice = Conversation::direct(ALICE);
    let file = p.send_file(BOB, to_alice, "cat.png", b"png-bytes").await.unwrap();
    let code = p.send_code(BOB, to_alice, "go", "package main").await.unwrap();

    let to_carol = [Conversation::direct(CAROL)];
    let forwarded_file = p.forward_message(ALICE, file, &to_carol).await.unwrap()[0];
    let forwarded_code = p.forward_message(ALICE, code, &to_carol).await.unwrap()[0];

    let mut files = h.store.load_payloads(MsgType::File, &[file, forwarded_file]).await.unwrap();
    let source_payload = files.remove(&file).unwrap();
    let copied_payload = files.remove(&forwarded_file).unwrap();
    assert_eq!(copied_payload, source_payload);
    let MessageBody::File(copied) = copied_payload else {
        panic!("expected a file payload");
    };
    assert_eq!(copied.user_id, BOB);

    let mut codes = h.store.load_payloads(MsgType::Code, &[forwarded_code]).await.unwrap();
    let Some(MessageBody::Code(copied)) = codes.remove(&forwarded_code) else {
        panic!("expected a code payload");
    };
    assert_eq!(copied.user_id, ALICE);
    assert_eq!(copied.code, "package main");
}

#[tokio::test]
async fn forward_rejects_ineligible_sources_and_targets() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let text = p.send_text(ALICE, Conversation::direct(BOB), "hello").await.unwrap();
    let merged = p
        .merge_forward(ALICE, Conversation::direct(BOB), &[text], &[Conversation::direct(CAROL)])
        .await
        .unwrap()[0];
    let before = h.store.record_count();

    assert!(matches!(
        p.forward_message(ALICE, merged, &[Conversation::direct(BOB)]).await,
        Err(ChatError::InvalidArgument(_))
    ));
    assert_eq!(
        p.forward_message(CAROL, text, &[Conversation::direct(DAVE)]).await,
        Err(ChatError::Unauthorized)
    );
    let targets = [Conversation::direct(CAROL), Conversation::group(99)];
    assert_eq!(p.forward_message(ALICE, text, &targets).await, Err(ChatError::Unauthorized));
    assert_eq!(h.store.record_count(), before);
}

#[tokio::test]
async fn forward_batch_rolls_back_on_storage_failure() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let text = p.send_text(ALICE, Conversation::direct(BOB), "hello").await.unwrap();

    h.store.fail_writes_after(1);
    let result = p
        .forward_message(ALICE, text, &[Conversation::direct(CAROL), Conversation::direct(DAVE)])
        .await;
    assert!(matches!(result, Err(ChatError::StorageFailure(_))));
    assert_eq!(h.store.record_count(), 1);
}

/// ids 1..=7：5 与 7 属于 alice/bob 私聊，6 属于 alice/carol
async fn seed_for_merge(h: &Harness) {
    let p = &h.server.pipeline;
    for i in 1..=5 {
        p.send_text(ALICE, Conversation::direct(BOB), &format!("message {}", i)).await.unwrap();
    }
    assert_eq!(p.send_text(ALICE, Conversation::direct(CAROL), "elsewhere").await.unwrap(), 6);
    let code = p.send_code(BOB, Conversation::direct(ALICE), "go", "package main").await.unwrap();
    assert_eq!(code, 7);
}

#[tokio::test]
async fn merge_forward_is_all_or_nothing() {
    let h = Harness::new();
    seed_for_merge(&h).await;
    let p = &h.server.pipeline;

    let result = p
        .merge_forward(ALICE, Conversation::direct(BOB), &[5, 6, 7], &[Conversation::direct(CAROL)])
        .await;
    assert!(matches!(result, Err(ChatError::InvalidArgument(_))));
    assert_eq!(h.store.record_count(), 7);

    let ids = p
        .merge_forward(ALICE, Conversation::direct(BOB), &[7, 5], &[Conversation::direct(CAROL)])
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let forward = p.view(ids[0]).await.unwrap().forward.unwrap();
    assert_eq!(forward.num, 2);
    assert_eq!(forward.list.len(), 2);
    // 摘要与展开都按请求顺序 / preview and expansion follow the requested order
    let lines: Vec<(&str, &str)> =
        forward.list.iter().map(|i| (i.nickname.as_str(), i.text.as_str())).collect();
    assert_eq!(lines, vec![("bob", "[code]"), ("alice", "message 5")]);

    // 接收者 carol 可以展开 / the receiver can expand it
    let expanded = h.server.pipeline.get_forward_records(CAROL, ids[0]).await.unwrap();
    let expanded_ids: Vec<i64> = expanded.iter().map(|v| v.id).collect();
    assert_eq!(expanded_ids, vec![7, 5]);
    assert_eq!(expanded[0].code_block.as_ref().unwrap().code, "package main");
    assert_eq!(p.get_forward_records(DAVE, ids[0]).await, Err(ChatError::Unauthorized));
}

#[tokio::test]
async fn merge_forward_preview_keeps_first_three() {
    let h = Harness::new();
    seed_for_merge(&h).await;
    let p = &h.server.pipeline;
    let selection = [4, 2, 5, 1, 3];
    let ids = p
        .merge_forward(ALICE, Conversation::direct(BOB), &selection, &[Conversation::group(GROUP)])
        .await
        .unwrap();
    let forward = p.view(ids[0]).await.unwrap().forward.unwrap();
    assert_eq!(forward.num, 5);
    let texts: Vec<&str> = forward.list.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, vec!["message 4", "message 2", "message 5"]);

    let expanded: Vec<i64> =
        p.get_forward_records(BOB, ids[0]).await.unwrap().iter().map(|v| v.id).collect();
    assert_eq!(expanded, vec![4, 2, 5, 1, 3]);
}

#[tokio::test]
async fn merge_forward_needs_friendship_and_unrevoked_records() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let with_dave = p.send_text(ALICE, Conversation::direct(DAVE), "hi dave").await.unwrap();
    let to_bob = [Conversation::direct(BOB)];
    assert_eq!(
        p.merge_forward(ALICE, Conversation::direct(DAVE), &[with_dave], &to_bob).await,
        Err(ChatError::Unauthorized)
    );

    let revoked = p.send_text(ALICE, Conversation::direct(BOB), "nope").await.unwrap();
    p.revoke_message(ALICE, revoked).await.unwrap();
    let to_carol = [Conversation::direct(CAROL)];
    assert!(matches!(
        p.merge_forward(ALICE, Conversation::direct(BOB), &[revoked], &to_carol).await,
        Err(ChatError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn hydrate_fills_file_invite_and_empty_sub_objects() {
    let h = Harness::new();
    let p = &h.server.pipeline;

    let file =
        p.send_file(ALICE, Conversation::group(GROUP), "Report.PDF", b"%PDF").await.unwrap();
    let join = InvitePayload {
        operator_id: ALICE,
        invite_type: InviteType::Join,
        user_ids: vec![BOB, CAROL],
    };
    let invite = p
        .create_message(ALICE, Conversation::group(GROUP), MessageBody::Invite(join))
        .await
        .unwrap();
    let quit = InvitePayload { operator_id: BOB, invite_type: InviteType::Leave, user_ids: vec![] };
    let leave = p
        .create_message(BOB, Conversation::group(GROUP), MessageBody::Invite(quit))
        .await
        .unwrap();
    let text = p.send_text(BOB, Conversation::group(GROUP), "plain").await.unwrap();

    let records = h.store.find_many(&[file, invite, leave, text]).await.unwrap();
    let views = p.hydrate(records).await.unwrap();
    assert_eq!(views.len(), 4);

    let file_view = views[0].file.as_ref().unwrap();
    assert_eq!(file_view.suffix, "pdf");
    assert_eq!(file_view.file_type, 3);
    assert!(file_view.save_dir.starts_with("talk/files/20240301/"));
    assert_eq!(file_view.file_url, format!("{}/{}", FILE_BASE_URL, file_view.save_dir));
    assert_eq!(h.blobs.get(&file_view.save_dir).unwrap(), b"%PDF".to_vec());
    assert_eq!(views[0].nickname, "alice");

    let join = views[1].invite.as_ref().unwrap();
    assert_eq!(join.operate_user.nickname, "alice");
    let joined: Vec<&str> = join.users.iter().map(|u| u.nickname.as_str()).collect();
    assert_eq!(joined, vec!["bob", "carol"]);
    let leave_view = views[2].invite.as_ref().unwrap();
    let left: Vec<(i64, &str)> =
        leave_view.users.iter().map(|u| (u.id, u.nickname.as_str())).collect();
    assert_eq!(left, vec![(BOB, "bob")]);

    let json = serde_json::to_value(&views[3]).unwrap();
    assert_eq!(json["content"], "plain");
    assert_eq!(json["file"], serde_json::json!({}));
    assert_eq!(json["code_block"], serde_json::json!({}));
    assert_eq!(json["forward"], serde_json::json!({}));
    assert_eq!(json["invite"], serde_json::json!({}));
}

#[tokio::test]
async fn emoticons_are_sent_as_file_records() {
    let h = Harness::new();
    let p = &h.server.pipeline;

    let shared = p.send_emoticon(ALICE, Conversation::direct(BOB), SHARED_EMOTICON).await.unwrap();
    let view = p.view(shared).await.unwrap();
    assert_eq!(view.msg_type, MsgType::File);
    let file = view.file.unwrap();
    assert_eq!(file.file_source, 2);
    assert_eq!(file.file_type, 1);
    assert_eq!(file.original_name, "smile");
    assert_eq!((file.suffix.as_str(), file.size), ("gif", 2048));
    assert_eq!(file.file_url, "https://cdn.test/emoticon/100.gif");
    assert!(h.blobs.get(&file.save_dir).is_none());

    let own = p.send_emoticon(BOB, Conversation::group(GROUP), BOBS_EMOTICON).await.unwrap();
    let MessageBody::File(payload) =
        h.store.load_payloads(MsgType::File, &[own]).await.unwrap().remove(&own).unwrap()
    else {
        panic!("expected a file payload");
    };
    assert_eq!((payload.user_id, payload.original_name.as_str()), (BOB, "表情"));
}

#[tokio::test]
async fn emoticons_outside_the_callers_set_are_not_found() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let to_bob = Conversation::direct(BOB);
    assert_eq!(p.send_emoticon(ALICE, to_bob, BOBS_EMOTICON).await, Err(ChatError::NotFound));
    assert_eq!(p.send_emoticon(ALICE, to_bob, 999).await, Err(ChatError::NotFound));
    assert_eq!(
        p.send_emoticon(CAROL, Conversation::group(GROUP), SHARED_EMOTICON).await,
        Err(ChatError::Unauthorized)
    );
    assert_eq!(h.store.record_count(), 0);
}

#[tokio::test]
async fn images_are_uploaded_and_other_files_refused() {
    let h = Harness::new();
    let p = &h.server.pipeline;
    let id = p.send_image(ALICE, Conversation::direct(BOB), "shot.WEBP", b"riff").await.unwrap();
    let file = p.view(id).await.unwrap().file.unwrap();
    assert_eq!((file.file_source, file.file_type), (1, 1));
    assert_eq!(h.blobs.get(&file.save_dir).unwrap(), b"riff".to_vec());

    assert!(matches!(
        p.send_image(ALICE, Conversation::direct(BOB), "notes.txt", b"text").await,
        Err(ChatError::InvalidArgument(_))
    ));
    assert_eq!(h.store.record_count(), 1);
}
