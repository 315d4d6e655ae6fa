//! Document-oriented storage backend over sled.
//!
//! Each entity kind lives in its own tree and is stored as a JSON document.
//! Message documents embed the full attachment and annotation graph, so the
//! cascade here only fans out to the entities that have their own identity
//! (users, chats, the reply/pinned targets, downloaded files). Upserts are
//! unconditional last-write-wins: overwriting a document is as cheap as
//! comparing it would be.
//!
//! Keys are big-endian encodings with the sign bit flipped, so signed ids
//! iterate in ascending order and a chat's messages occupy one contiguous
//! key range.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::Tree;

use async_trait::async_trait;
use chrono::{Datelike, Utc};

use crate::error::{ArchiveError, Result};
use crate::models::{Chat, FileRecord, Message, StoredMessage, User};
use crate::repository::{step, EntityStore};

/// sled-backed [`EntityStore`] implementation.
pub struct DocumentStore {
    db: sled::Db,
    users: Tree,
    chats: Tree,
    messages: Tree,
    files: Tree,
    cens_levels: Tree,
    warn_levels: Tree,
}

/// Chat document with the forward-origin discriminant alongside the
/// descriptive fields.
#[derive(Serialize, Deserialize)]
struct ChatDocument {
    #[serde(flatten)]
    chat: Chat,
    forward_origin: bool,
}

fn id_key(id: i64) -> [u8; 8] {
    // Flipping the sign bit makes the big-endian byte order match the
    // numeric order for negative ids (group chats have them).
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

fn message_key(chat_id: i64, message_id: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&id_key(chat_id));
    key[8..].copy_from_slice(&id_key(message_id));
    key
}

fn file_key(chat_id: i64, file_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + file_id.len());
    key.extend_from_slice(&id_key(chat_id));
    key.extend_from_slice(file_id.as_bytes());
    key
}

fn cens_key(user_id: i64, year: i32) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&id_key(i64::from(year)));
    key.extend_from_slice(&id_key(user_id));
    key
}

fn get_doc<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>> {
    match tree.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

fn put_doc<T: Serialize>(tree: &Tree, key: &[u8], value: &T) -> Result<()> {
    tree.insert(key, serde_json::to_vec(value)?)?;
    Ok(())
}

impl DocumentStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            users: db.open_tree("users")?,
            chats: db.open_tree("chats")?,
            messages: db.open_tree("messages")?,
            files: db.open_tree("files")?,
            cens_levels: db.open_tree("cens_levels")?,
            warn_levels: db.open_tree("warn_levels")?,
            db,
        })
    }

    fn upsert_user_doc(&self, user: &User) -> Result<()> {
        put_doc(&self.users, &id_key(user.id), user)
    }

    fn upsert_chat_doc(&self, chat: &Chat, forward_origin: bool) -> Result<()> {
        let key = id_key(chat.id);
        // First observation decides the discriminant; see the trait contract.
        let forward_origin = match get_doc::<ChatDocument>(&self.chats, &key)? {
            Some(existing) => existing.forward_origin,
            None => forward_origin,
        };
        put_doc(
            &self.chats,
            &key,
            &ChatDocument {
                chat: chat.clone(),
                forward_origin,
            },
        )
    }

    fn save_message_tree(&self, msg: &Message) -> Result<()> {
        let mut last_err: Option<ArchiveError> = None;

        step(&mut last_err, "chat", self.upsert_chat_doc(&msg.chat, false));
        if let Some(user) = &msg.forward_from {
            step(&mut last_err, "forward_from", self.upsert_user_doc(user));
        }
        if let Some(chat) = &msg.forward_from_chat {
            step(
                &mut last_err,
                "forward_from_chat",
                self.upsert_chat_doc(chat, true),
            );
        }
        if let Some(reply) = &msg.reply_to {
            step(&mut last_err, "reply_to", self.save_message_tree(reply));
        }
        if let Some(pinned) = &msg.pinned_message {
            step(&mut last_err, "pinned", self.save_message_tree(pinned));
        }
        if let Some(user) = &msg.from {
            step(&mut last_err, "from", self.upsert_user_doc(user));
        }
        for entity in &msg.entities {
            if let Some(user) = &entity.user {
                step(&mut last_err, "entity_user", self.upsert_user_doc(user));
            }
        }
        if let Some(user) = &msg.new_chat_member {
            step(&mut last_err, "new_chat_member", self.upsert_user_doc(user));
        }
        if let Some(user) = &msg.left_chat_member {
            step(&mut last_err, "left_chat_member", self.upsert_user_doc(user));
        }

        put_doc(&self.messages, &message_key(msg.chat.id, msg.message_id), msg)?;

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn chat_messages(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Message>> {
        let mut result = Vec::new();
        for item in self.messages.scan_prefix(id_key(chat_id)) {
            let (_, raw) = item?;
            let msg: Message = serde_json::from_slice(&raw)?;
            if begin.is_some_and(|b| msg.date < b) || end.is_some_and(|e| msg.date > e) {
                continue;
            }
            result.push(msg);
        }
        Ok(result)
    }
}

#[async_trait]
impl EntityStore for DocumentStore {
    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.upsert_user_doc(user)
    }

    async fn upsert_chat(&self, chat: &Chat, forward_origin: bool) -> Result<()> {
        self.upsert_chat_doc(chat, forward_origin)
    }

    async fn upsert_message(&self, message: &Message) -> Result<()> {
        let saved = self.save_message_tree(message);
        self.db.flush()?;
        saved
    }

    async fn get_chats(&self) -> Result<Vec<Chat>> {
        let mut chats = Vec::new();
        for item in self.chats.iter() {
            let (_, raw) = item?;
            let doc: ChatDocument = serde_json::from_slice(&raw)?;
            if !doc.forward_origin {
                chats.push(doc.chat);
            }
        }
        Ok(chats)
    }

    async fn get_users(&self) -> Result<Vec<User>> {
        let mut result = Vec::new();
        for item in self.users.iter() {
            let (_, raw) = item?;
            result.push(serde_json::from_slice(&raw)?);
        }
        Ok(result)
    }

    async fn get_user(&self, query: &str) -> Result<User> {
        let matcher: Box<dyn Fn(&User) -> bool> = if let Some(handle) = query.strip_prefix('@') {
            let handle = handle.to_string();
            Box::new(move |u: &User| u.username == handle)
        } else {
            let tokens: Vec<String> = query.split_whitespace().map(str::to_string).collect();
            match tokens.as_slice() {
                [first] => {
                    let first = first.clone();
                    Box::new(move |u: &User| u.first_name == first)
                }
                [first, last] => {
                    let (first, last) = (first.clone(), last.clone());
                    Box::new(move |u: &User| u.first_name == first && u.last_name == last)
                }
                _ => {
                    return Err(ArchiveError::MalformedQuery(format!(
                        "expected @handle or at most two name tokens: {query}"
                    )))
                }
            }
        };

        let mut matches = Vec::new();
        for item in self.users.iter() {
            let (_, raw) = item?;
            let user: User = serde_json::from_slice(&raw)?;
            if matcher(&user) {
                matches.push(user);
            }
        }

        match matches.len() {
            0 => Err(ArchiveError::NotFound),
            1 => matches.into_iter().next().ok_or(ArchiveError::NotFound),
            _ => Err(ArchiveError::Ambiguous(
                matches.iter().map(User::display_name).collect(),
            )),
        }
    }

    async fn get_messages_by_date(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        let mut rows: Vec<StoredMessage> = self
            .chat_messages(chat_id, begin, end)?
            .iter()
            .map(StoredMessage::from)
            .collect();
        rows.sort_by_key(|m| (m.date, m.message_id));
        Ok(rows)
    }

    async fn get_dates(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<i64>> {
        let mut dates: Vec<i64> = self
            .chat_messages(chat_id, begin, end)?
            .iter()
            .map(|m| m.date)
            .collect();
        dates.sort_unstable();
        Ok(dates)
    }

    async fn save_file(&self, file: &FileRecord) -> Result<()> {
        put_doc(&self.files, &file_key(file.chat_id, &file.file_id), file)?;
        self.db.flush()?;
        Ok(())
    }

    async fn get_file(&self, file_id: &str, chat_id: i64) -> Result<FileRecord> {
        get_doc(&self.files, &file_key(chat_id, file_id))?.ok_or(ArchiveError::NotFound)
    }

    async fn cens_level(&self, user_id: i64) -> Result<u32> {
        let key = cens_key(user_id, Utc::now().year());
        Ok(get_doc::<u32>(&self.cens_levels, &key)?.unwrap_or(0))
    }

    async fn set_cens_level(&self, user_id: i64, level: u32) -> Result<()> {
        let key = cens_key(user_id, Utc::now().year());
        put_doc(&self.cens_levels, &key, &level)?;
        self.db.flush()?;
        Ok(())
    }

    async fn add_cens_level(&self, user_id: i64) -> Result<u32> {
        let next = self.cens_level(user_id).await? + 1;
        self.set_cens_level(user_id, next).await?;
        Ok(next)
    }

    async fn clear_cens_level(&self, user_id: i64) -> Result<()> {
        let key = cens_key(user_id, Utc::now().year());
        self.cens_levels.remove(key)?;
        self.db.flush()?;
        Ok(())
    }

    async fn warn_level(&self, user_id: i64) -> Result<u32> {
        Ok(get_doc::<u32>(&self.warn_levels, &id_key(user_id))?.unwrap_or(0))
    }

    async fn set_warn_level(&self, user_id: i64, level: u32) -> Result<()> {
        put_doc(&self.warn_levels, &id_key(user_id), &level)?;
        self.db.flush()?;
        Ok(())
    }

    async fn add_warn_level(&self, user_id: i64) -> Result<u32> {
        let next = self.warn_level(user_id).await? + 1;
        self.set_warn_level(user_id, next).await?;
        Ok(next)
    }

    async fn clear_warn_level(&self, user_id: i64) -> Result<()> {
        self.warn_levels.remove(id_key(user_id))?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_key_orders_signed_ids() {
        let ids = [-1_001_234_567_890_i64, -42, 0, 7, i64::MAX];
        let mut keys: Vec<[u8; 8]> = ids.iter().map(|&id| id_key(id)).collect();
        keys.sort_unstable();
        let reordered: Vec<[u8; 8]> = ids.iter().map(|&id| id_key(id)).collect();
        assert_eq!(keys, reordered);
    }

    #[test]
    fn message_keys_share_chat_prefix() {
        let a = message_key(-100, 1);
        let b = message_key(-100, 2);
        let other = message_key(-101, 1);
        assert_eq!(a[..8], b[..8]);
        assert_ne!(a[..8], other[..8]);
    }
}
