//! Integration tests for the persistence module

use std::sync::Arc;

use pretty_assertions::assert_eq;
use retcon_core::Content;
use retcon_core::Conversation;
use retcon_core::ConversationStore;
use retcon_core::Direction;
use retcon_core::Message;
use retcon_core::Navigator;
use retcon_core::Persistence;
use retcon_core::StorageConfig;
use retcon_core::StorageFormat;
use tempfile::TempDir;

use crate::FORMAT_VERSION;
use crate::RTCN_MAGIC;
use crate::compression::CompressionLevel;
use crate::error::PersistenceError;
use crate::storage::FileStore;

/// A conversation with an edited first message, one stashed continuation and
/// an image attachment, so every optional field is exercised.
fn branched_conversation() -> Conversation {
    let mut conversation = Conversation::new(None);
    Navigator::new(&mut conversation, false)
        .append(Content::with_images(
            "what is in this picture?",
            vec![retcon_core::ImageAttachment {
                mime_type: "image/png".to_string(),
                data: "iVBORw0KGgo=".to_string(),
            }],
        ))
        .unwrap();
    let reply = conversation.messages.last_mut().unwrap();
    reply.streaming = false;
    reply.content = Content::text("A cat.");
    reply.completed_at = Some(chrono::Utc::now());

    let first = conversation.messages[0].id;
    Navigator::new(&mut conversation, false)
        .fork(first, Content::text("describe it"))
        .unwrap();
    let reply = conversation.messages.last_mut().unwrap();
    reply.streaming = false;
    reply.content = Content::text("A grey cat on a sofa.");
    conversation
}

fn store_in(dir: &TempDir, name: &str, format: StorageFormat) -> FileStore {
    FileStore::new(dir.path().join(name), format, CompressionLevel::Balanced)
}

#[tokio::test]
async fn test_missing_file_loads_empty() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir, "absent.rtcn", StorageFormat::Compact);
    assert!(store.read().await.unwrap().is_empty());
    assert!(!store.path().exists());
}

#[tokio::test]
async fn test_compact_roundtrip_preserves_branches() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir, "conversations.rtcn", StorageFormat::Compact);
    let conversations = vec![branched_conversation(), Conversation::new(Some("Empty".to_string()))];

    store.write(&conversations).await.unwrap();
    let bytes = std::fs::read(store.path()).unwrap();
    assert_eq!(&bytes[0..4], RTCN_MAGIC);
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), FORMAT_VERSION);

    let loaded = store.read().await.unwrap();
    assert_eq!(loaded, conversations);

    let versions = loaded[0].messages[0].versions.as_ref().unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions.get(0).unwrap().stashed_continuation.len(), 1);
}

#[tokio::test]
async fn test_json_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir, "conversations.json", StorageFormat::Json);
    let conversations = vec![branched_conversation()];

    store.write(&conversations).await.unwrap();
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
    assert_eq!(raw["format_version"], FORMAT_VERSION);
    assert_eq!(raw["conversations"][0]["messages"][0]["role"], "user");

    assert_eq!(store.read().await.unwrap(), conversations);
}

#[tokio::test]
async fn test_corrupt_file_is_moved_aside() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir, "conversations.rtcn", StorageFormat::Compact);
    std::fs::write(store.path(), b"RTCN garbage that is not a store").unwrap();

    assert!(store.read().await.unwrap().is_empty());
    assert!(!store.path().exists());
    assert!(store.corrupt_path().exists());

    // The next save starts a fresh file.
    store.write(&[Conversation::new(None)]).await.unwrap();
    assert_eq!(store.read().await.unwrap().len(), 1);
}

#[test]
fn test_decode_rejects_bad_headers() {
    let store = FileStore::new(
        "unused.rtcn".into(),
        StorageFormat::Compact,
        CompressionLevel::Fast,
    );
    assert!(matches!(
        store.decode(b"RT"),
        Err(PersistenceError::CorruptData(_))
    ));
    assert!(matches!(
        store.decode(b"AGCX\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00"),
        Err(PersistenceError::InvalidMagic)
    ));

    let mut future = store.encode(&[]).unwrap();
    future[4] = 9;
    assert!(matches!(
        store.decode(&future),
        Err(PersistenceError::UnsupportedVersion(9, FORMAT_VERSION))
    ));

    let mut truncated = store.encode(&[Conversation::new(None)]).unwrap();
    truncated.pop();
    assert!(matches!(
        store.decode(&truncated),
        Err(PersistenceError::CorruptData(_))
    ));
}

#[tokio::test]
async fn test_write_creates_parent_and_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("store.rtcn");
    let store = FileStore::from_config(path.clone(), &StorageConfig::default());

    store.write(&[]).await.unwrap();
    assert!(path.exists());
    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("store.rtcn")]);
}

#[tokio::test]
async fn test_conversation_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conversations.rtcn");
    let persistence: Arc<dyn Persistence> = Arc::new(FileStore::new(
        path.clone(),
        StorageFormat::Compact,
        CompressionLevel::Balanced,
    ));

    let store = ConversationStore::open(persistence.clone()).await.unwrap();
    let conversation = store.create(None).await;
    let first = store
        .update(conversation.id, |c| {
            c.messages.push(Message::user(Content::text("hi")));
            c.messages.push(Message::assistant(Content::text("hello")));
            Ok(c.messages[0].id)
        })
        .await
        .unwrap();
    store
        .update(conversation.id, |c| {
            Navigator::new(c, false).fork(first, Content::text("hey"))?;
            Ok(())
        })
        .await
        .unwrap();
    store
        .update(conversation.id, |c| {
            Navigator::new(c, false).switch_version(first, Direction::Previous)
        })
        .await
        .unwrap();
    let expected = store.get(conversation.id).await.unwrap();

    let reopened = ConversationStore::open(Arc::new(FileStore::new(
        path,
        StorageFormat::Compact,
        CompressionLevel::Balanced,
    )))
    .await
    .unwrap();
    assert_eq!(reopened.get(conversation.id).await.unwrap(), expected);
    assert_eq!(expected.messages[0].content.text, "hi");
    assert_eq!(expected.messages[1].content.text, "hello");
}
