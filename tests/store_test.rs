use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use chat_archive::models::{Document, EntityAnnotation, PhotoSize, Sticker};
use chat_archive::{
    ArchiveError, Chat, ChatKind, DocumentStore, EntityStore, FileRecord, Message, SqliteStore,
    User,
};

fn sqlite_store(dir: &TempDir) -> Arc<dyn EntityStore> {
    let path = dir.path().join("archive.db");
    let path = path.to_str().expect("utf-8 temp path");
    Arc::new(SqliteStore::new(path, 4).expect("open sqlite store"))
}

fn document_store(dir: &TempDir) -> Arc<dyn EntityStore> {
    let path = dir.path().join("docs");
    let path = path.to_str().expect("utf-8 temp path");
    Arc::new(DocumentStore::open(path).expect("open document store"))
}

/// Both backends must satisfy the same store contract; every test below
/// runs against each.
fn all_stores(dir: &TempDir) -> Vec<(&'static str, Arc<dyn EntityStore>)> {
    vec![
        ("sqlite", sqlite_store(dir)),
        ("document", document_store(dir)),
    ]
}

fn group_chat(id: i64) -> Chat {
    Chat {
        id,
        kind: ChatKind::Group,
        title: format!("chat-{id}"),
        ..Chat::default()
    }
}

fn user(id: i64, first: &str, last: &str, handle: &str) -> User {
    User {
        id,
        first_name: first.to_string(),
        last_name: last.to_string(),
        username: handle.to_string(),
    }
}

fn ts(year: i32, month: u32, day: u32) -> i64 {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
        .unwrap()
        .timestamp()
}

fn text_message(chat_id: i64, message_id: i64, date: i64, text: &str) -> Message {
    Message {
        message_id,
        chat: group_chat(chat_id),
        from: Some(user(1, "Alice", "Archer", "alice")),
        date,
        text: Some(text.to_string()),
        ..Message::default()
    }
}

#[tokio::test]
async fn double_save_is_idempotent() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        let msg = text_message(42, 1, ts(2020, 1, 5), "hello");
        store.upsert_message(&msg).await.expect("first save");
        store.upsert_message(&msg).await.expect("second save");

        let rows = store
            .get_messages_by_date(42, None, None)
            .await
            .expect("read back");
        assert_eq!(rows.len(), 1, "{backend}: duplicate record created");
        assert_eq!(rows[0].message_id, 1);
        assert_eq!(rows[0].text.as_deref(), Some("hello"));
    }
}

#[tokio::test]
async fn edit_updates_the_same_record() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        let msg = text_message(42, 7, ts(2020, 1, 5), "first version");
        store.upsert_message(&msg).await.expect("save");

        let mut edited = msg.clone();
        edited.text = Some("edited version".to_string());
        edited.edit_date = Some(msg.date + 60);
        store.upsert_message(&edited).await.expect("save edit");

        let rows = store
            .get_messages_by_date(42, None, None)
            .await
            .expect("read back");
        assert_eq!(rows.len(), 1, "{backend}: edit created a second record");
        assert_eq!(rows[0].text.as_deref(), Some("edited version"));
        assert_eq!(rows[0].edit_date, Some(msg.date + 60));
    }
}

#[tokio::test]
async fn reply_target_is_saved_recursively() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        let parent = Message {
            message_id: 5,
            chat: group_chat(42),
            from: Some(user(2, "Boris", "", "boris")),
            date: ts(2020, 1, 4),
            text: Some("original".to_string()),
            ..Message::default()
        };
        let reply = Message {
            message_id: 6,
            chat: group_chat(42),
            from: Some(user(1, "Alice", "Archer", "alice")),
            date: ts(2020, 1, 5),
            text: Some("answering".to_string()),
            reply_to: Some(Box::new(parent)),
            ..Message::default()
        };

        store.upsert_message(&reply).await.expect("save reply");

        let rows = store
            .get_messages_by_date(42, None, None)
            .await
            .expect("read back");
        let ids: Vec<i64> = rows.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![5, 6], "{backend}: parent not persisted");
        assert_eq!(rows[1].reply_to_message_id, Some(5));

        // The parent's sender became a stored user too.
        let users = store.get_users().await.expect("users");
        assert!(users.iter().any(|u| u.id == 2), "{backend}: reply sender missing");

        // The chat itself is tracked.
        let chats = store.get_chats().await.expect("chats");
        assert!(chats.iter().any(|c| c.id == 42));
    }
}

#[tokio::test]
async fn sender_is_hydrated_on_reads() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        let msg = text_message(42, 1, ts(2020, 1, 5), "hello");
        store.upsert_message(&msg).await.expect("save");

        let rows = store
            .get_messages_by_date(42, None, None)
            .await
            .expect("read back");
        let from = rows[0].from.as_ref().expect("hydrated sender");
        assert_eq!(from.first_name, "Alice", "{backend}");
        assert_eq!(from.username, "alice", "{backend}");
    }
}

#[tokio::test]
async fn attachments_do_not_block_the_body() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        let msg = Message {
            message_id: 9,
            chat: group_chat(42),
            from: Some(user(1, "Alice", "Archer", "alice")),
            date: ts(2020, 2, 2),
            caption: Some("scan of the minutes".to_string()),
            document: Some(Document {
                file_id: "DOC-1".to_string(),
                thumbnail: Some(PhotoSize {
                    file_id: "THUMB-1".to_string(),
                    width: 90,
                    height: 90,
                    file_size: 1024,
                }),
                file_name: "minutes.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                file_size: 64_000,
            }),
            sticker: Some(Sticker {
                file_id: "STK-1".to_string(),
                emoji: "🦀".to_string(),
                ..Sticker::default()
            }),
            entities: vec![EntityAnnotation {
                kind: "mention".to_string(),
                offset: 0,
                length: 6,
                user: Some(user(3, "Clara", "", "clara")),
                ..EntityAnnotation::default()
            }],
            ..Message::default()
        };

        store.upsert_message(&msg).await.expect("save with attachments");

        let rows = store
            .get_messages_by_date(42, None, None)
            .await
            .expect("read back");
        assert_eq!(rows.len(), 1, "{backend}");
        assert_eq!(rows[0].caption.as_deref(), Some("scan of the minutes"));

        // The mentioned user went through the user path.
        let users = store.get_users().await.expect("users");
        assert!(users.iter().any(|u| u.id == 3), "{backend}: mention not saved");
    }
}

#[tokio::test]
async fn user_lookup_rules() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        store
            .upsert_user(&user(10, "Ivan", "Petrov", "ivan_p"))
            .await
            .expect("save user");
        store
            .upsert_user(&user(11, "Ivan", "Sidorov", ""))
            .await
            .expect("save user");
        store
            .upsert_user(&user(12, "Olga", "", "olga"))
            .await
            .expect("save user");

        // Exact handle match is unique.
        let by_handle = store.get_user("@ivan_p").await.expect("handle lookup");
        assert_eq!(by_handle.id, 10, "{backend}");

        // Two-token query matches first and last name.
        let by_name = store.get_user("Ivan Sidorov").await.expect("name lookup");
        assert_eq!(by_name.id, 11, "{backend}");

        // First-name-only query matching both Ivans must not guess.
        match store.get_user("Ivan").await {
            Err(ArchiveError::Ambiguous(candidates)) => {
                assert_eq!(candidates.len(), 2, "{backend}: {candidates:?}");
            }
            other => panic!("{backend}: expected Ambiguous, got {other:?}"),
        }

        match store.get_user("Nobody").await {
            Err(ArchiveError::NotFound) => {}
            other => panic!("{backend}: expected NotFound, got {other:?}"),
        }

        match store.get_user("One Two Three").await {
            Err(ArchiveError::MalformedQuery(_)) => {}
            other => panic!("{backend}: expected MalformedQuery, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn upsert_user_applies_changes() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        store
            .upsert_user(&user(20, "Maria", "", "maria"))
            .await
            .expect("save");
        store
            .upsert_user(&user(20, "Maria", "Kuznetsova", "maria"))
            .await
            .expect("re-save");

        let users = store.get_users().await.expect("users");
        let stored: Vec<&User> = users.iter().filter(|u| u.id == 20).collect();
        assert_eq!(stored.len(), 1, "{backend}");
        assert_eq!(stored[0].last_name, "Kuznetsova", "{backend}");
    }
}

#[tokio::test]
async fn forward_origin_chats_are_excluded_from_listing() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        let forwarded = Message {
            message_id: 1,
            chat: group_chat(42),
            from: Some(user(1, "Alice", "Archer", "alice")),
            date: ts(2020, 3, 3),
            text: Some("look at this".to_string()),
            forward_from_chat: Some(Chat {
                id: 99,
                kind: ChatKind::Channel,
                title: "Some Channel".to_string(),
                ..Chat::default()
            }),
            forward_date: Some(ts(2020, 3, 1)),
            ..Message::default()
        };
        store.upsert_message(&forwarded).await.expect("save");

        let chats = store.get_chats().await.expect("chats");
        let ids: Vec<i64> = chats.iter().map(|c| c.id).collect();
        assert!(ids.contains(&42), "{backend}: tracked chat missing");
        assert!(!ids.contains(&99), "{backend}: forward origin listed");

        // The discriminant keeps its first observed value across upserts.
        let renamed = Chat {
            id: 99,
            kind: ChatKind::Channel,
            title: "Some Channel Renamed".to_string(),
            ..Chat::default()
        };
        store.upsert_chat(&renamed, false).await.expect("re-save");
        let chats = store.get_chats().await.expect("chats");
        assert!(
            !chats.iter().any(|c| c.id == 99),
            "{backend}: forward origin flag lost on upsert"
        );
    }
}

#[tokio::test]
async fn file_records_are_chat_scoped() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        let file = FileRecord {
            file_id: "F-1".to_string(),
            chat_id: 1,
            local_path: "photos/F-1.jpg".to_string(),
            size: 2048,
        };
        store.save_file(&file).await.expect("save file");

        // Same file id, different chat: unknown.
        match store.get_file("F-1", 2).await {
            Err(ArchiveError::NotFound) => {}
            other => panic!("{backend}: expected NotFound, got {other:?}"),
        }

        let other_chat = FileRecord {
            chat_id: 2,
            local_path: "photos/copy-of-F-1.jpg".to_string(),
            ..file.clone()
        };
        store.save_file(&other_chat).await.expect("save second scope");

        let first = store.get_file("F-1", 1).await.expect("first scope");
        let second = store.get_file("F-1", 2).await.expect("second scope");
        assert_eq!(first.local_path, "photos/F-1.jpg", "{backend}");
        assert_eq!(second.local_path, "photos/copy-of-F-1.jpg", "{backend}");
    }
}

#[tokio::test]
async fn moderation_counter_lifecycle() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        // Clean record reads as zero.
        assert_eq!(store.cens_level(10).await.expect("get"), 0, "{backend}");

        assert_eq!(store.add_cens_level(10).await.expect("add"), 1, "{backend}");
        assert_eq!(store.add_cens_level(10).await.expect("add"), 2, "{backend}");
        assert_eq!(store.cens_level(10).await.expect("get"), 2, "{backend}");

        store.set_cens_level(10, 5).await.expect("set");
        assert_eq!(store.cens_level(10).await.expect("get"), 5, "{backend}");

        store.clear_cens_level(10).await.expect("clear");
        assert_eq!(store.cens_level(10).await.expect("get"), 0, "{backend}");

        // Warn level is independent of the censor level.
        assert_eq!(store.warn_level(10).await.expect("get"), 0, "{backend}");
        assert_eq!(store.add_warn_level(10).await.expect("add"), 1, "{backend}");
        store.clear_cens_level(10).await.expect("clear again");
        assert_eq!(store.warn_level(10).await.expect("get"), 1, "{backend}");
        store.clear_warn_level(10).await.expect("clear warn");
        assert_eq!(store.warn_level(10).await.expect("get"), 0, "{backend}");
    }
}

#[tokio::test]
async fn date_range_reads_are_ordered_and_bounded() {
    let dir = TempDir::new().expect("temp dir");
    for (backend, store) in all_stores(&dir) {
        // Saved out of order on purpose.
        for (id, date) in [
            (3, ts(2021, 7, 1)),
            (1, ts(2020, 1, 5)),
            (2, ts(2020, 3, 20)),
        ] {
            store
                .upsert_message(&text_message(42, id, date, "m"))
                .await
                .expect("save");
        }

        let all = store
            .get_messages_by_date(42, None, None)
            .await
            .expect("all");
        let ids: Vec<i64> = all.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![1, 2, 3], "{backend}: not ascending by date");

        let only_2020 = store
            .get_messages_by_date(42, Some(ts(2020, 1, 1)), Some(ts(2020, 12, 31)))
            .await
            .expect("bounded");
        let ids: Vec<i64> = only_2020.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![1, 2], "{backend}: bounds not applied");

        let dates = store.get_dates(42, None, None).await.expect("dates");
        assert_eq!(
            dates,
            vec![ts(2020, 1, 5), ts(2020, 3, 20), ts(2021, 7, 1)],
            "{backend}: date projection mismatch"
        );

        // A chat with no history is an empty sequence, not an error.
        let empty = store
            .get_messages_by_date(777, None, None)
            .await
            .expect("empty chat");
        assert!(empty.is_empty(), "{backend}");
    }
}
