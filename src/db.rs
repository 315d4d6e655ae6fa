//! Relational storage backend over SQLite.
//!
//! Connections come from a bounded `r2d2` pool; every operation checks one
//! out, runs, and returns it. Writes that hit SQLITE_BUSY / SQLITE_LOCKED
//! are retried a fixed number of times with a one-second backoff, then
//! surfaced. Users, chats and files follow a skip-if-unchanged discipline:
//! the stored row is read first and the write is elided when every field
//! already matches.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::models::{
    Audio, Chat, ChatKind, Document, FileRecord, Message, PhotoSize, Sticker, StoredMessage, User,
    Video, Voice,
};
use crate::repository::{step, EntityStore};
use crate::schema::{cens_levels, chats, files, messages, users, warn_levels};

/// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_RETRY_LIMIT: u32 = 3;
const BUSY_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// SQLite-backed [`EntityStore`] implementation.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn new(database_path: &str, max_connections: u32) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(database_path);
        let pool = Pool::builder().max_size(max_connections).build(manager)?;

        let store = Self { pool };
        store.with_conn(|conn| {
            conn.execute_batch(include_str!(
                "../migrations/2026-02-10-000000_create_archive_tables/up.sql"
            ))?;
            Ok(())
        })?;

        Ok(store)
    }

    /// Run `op` on a pooled connection, retrying the bounded number of
    /// times when the backend reports temporary contention.
    fn with_conn<T>(&self, op: impl Fn(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.pool.get()?;
        let mut attempt = 0;
        loop {
            match op(&conn) {
                Err(e) if e.is_busy() && attempt < BUSY_RETRY_LIMIT => {
                    attempt += 1;
                    debug!(attempt, "database busy, retrying");
                    thread::sleep(BUSY_RETRY_BACKOFF);
                }
                other => return other,
            }
        }
    }

    fn upsert_user_sync(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            let existing = conn
                .query_row(
                    &format!(
                        "SELECT {}, {}, {}, {} FROM {} WHERE {} = ?",
                        users::ID,
                        users::FIRST_NAME,
                        users::LAST_NAME,
                        users::USERNAME,
                        users::TABLE,
                        users::ID
                    ),
                    params![user.id],
                    map_user,
                )
                .optional()?;

            match existing {
                Some(ref stored) if stored == user => {
                    debug!(user_id = user.id, "user unchanged, write skipped");
                    Ok(())
                }
                Some(_) => {
                    conn.execute(
                        &format!(
                            "UPDATE {} SET {} = ?, {} = ?, {} = ? WHERE {} = ?",
                            users::TABLE,
                            users::FIRST_NAME,
                            users::LAST_NAME,
                            users::USERNAME,
                            users::ID
                        ),
                        params![user.first_name, user.last_name, user.username, user.id],
                    )?;
                    Ok(())
                }
                None => {
                    conn.execute(
                        &format!(
                            "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
                            users::TABLE,
                            users::ID,
                            users::FIRST_NAME,
                            users::LAST_NAME,
                            users::USERNAME
                        ),
                        params![user.id, user.first_name, user.last_name, user.username],
                    )?;
                    Ok(())
                }
            }
        })
    }

    fn upsert_chat_sync(&self, chat: &Chat, forward_origin: bool) -> Result<()> {
        self.with_conn(|conn| {
            let existing = conn
                .query_row(
                    &format!(
                        "SELECT {}, {}, {}, {}, {}, {} FROM {} WHERE {} = ?",
                        chats::ID,
                        chats::KIND,
                        chats::TITLE,
                        chats::FIRST_NAME,
                        chats::LAST_NAME,
                        chats::USERNAME,
                        chats::TABLE,
                        chats::ID
                    ),
                    params![chat.id],
                    map_chat,
                )
                .optional()?;

            match existing {
                Some(ref stored) if stored == chat => {
                    debug!(chat_id = chat.id, "chat unchanged, write skipped");
                    Ok(())
                }
                // The forward-origin discriminant keeps its first observed
                // value; updates touch only the descriptive fields.
                Some(_) => {
                    conn.execute(
                        &format!(
                            "UPDATE {} SET {} = ?, {} = ?, {} = ?, {} = ?, {} = ? WHERE {} = ?",
                            chats::TABLE,
                            chats::KIND,
                            chats::TITLE,
                            chats::FIRST_NAME,
                            chats::LAST_NAME,
                            chats::USERNAME,
                            chats::ID
                        ),
                        params![
                            chat.kind.as_str(),
                            chat.title,
                            chat.first_name,
                            chat.last_name,
                            chat.username,
                            chat.id
                        ],
                    )?;
                    Ok(())
                }
                None => {
                    conn.execute(
                        &format!(
                            "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}) \
                             VALUES (?, ?, ?, ?, ?, ?, ?)",
                            chats::TABLE,
                            chats::ID,
                            chats::KIND,
                            chats::TITLE,
                            chats::FIRST_NAME,
                            chats::LAST_NAME,
                            chats::USERNAME,
                            chats::FORWARD_ORIGIN
                        ),
                        params![
                            chat.id,
                            chat.kind.as_str(),
                            chat.title,
                            chat.first_name,
                            chat.last_name,
                            chat.username,
                            forward_origin
                        ],
                    )?;
                    Ok(())
                }
            }
        })
    }

    /// Best-effort cascade over the message graph; see the trait contract.
    fn save_message_tree(&self, msg: &Message) -> Result<()> {
        let mut last_err: Option<ArchiveError> = None;

        step(&mut last_err, "chat", self.upsert_chat_sync(&msg.chat, false));
        if let Some(user) = &msg.forward_from {
            step(&mut last_err, "forward_from", self.upsert_user_sync(user));
        }
        if let Some(chat) = &msg.forward_from_chat {
            step(
                &mut last_err,
                "forward_from_chat",
                self.upsert_chat_sync(chat, true),
            );
        }
        if let Some(reply) = &msg.reply_to {
            step(&mut last_err, "reply_to", self.save_message_tree(reply));
        }
        if let Some(pinned) = &msg.pinned_message {
            step(&mut last_err, "pinned", self.save_message_tree(pinned));
        }
        if let Some(user) = &msg.from {
            step(&mut last_err, "from", self.upsert_user_sync(user));
        }

        step(&mut last_err, "entities", self.save_entities(msg));
        if let Some(audio) = &msg.audio {
            step(&mut last_err, "audio", self.save_audio(audio));
        }
        if let Some(document) = &msg.document {
            step(&mut last_err, "document", self.save_document(document));
        }
        if let Some(photo) = &msg.photo {
            step(
                &mut last_err,
                "photo",
                self.save_photo_set(photo, msg.chat.id, msg.message_id, false),
            );
        }
        if let Some(sticker) = &msg.sticker {
            step(&mut last_err, "sticker", self.save_sticker(sticker));
        }
        if let Some(video) = &msg.video {
            step(&mut last_err, "video", self.save_video(video));
        }
        if let Some(voice) = &msg.voice {
            step(&mut last_err, "voice", self.save_voice(voice));
        }
        if let Some(photo) = &msg.new_chat_photo {
            step(
                &mut last_err,
                "new_chat_photo",
                self.save_photo_set(photo, msg.chat.id, msg.message_id, true),
            );
        }
        if let Some(user) = &msg.new_chat_member {
            step(&mut last_err, "new_chat_member", self.upsert_user_sync(user));
        }
        if let Some(user) = &msg.left_chat_member {
            step(
                &mut last_err,
                "left_chat_member",
                self.upsert_user_sync(user),
            );
        }

        self.save_message_row(msg)?;

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn save_message_row(&self, msg: &Message) -> Result<()> {
        self.with_conn(|conn| {
            let present = conn
                .query_row(
                    &format!(
                        "SELECT 1 FROM {} WHERE {} = ? AND {} = ?",
                        messages::TABLE,
                        messages::CHAT_ID,
                        messages::MESSAGE_ID
                    ),
                    params![msg.chat.id, msg.message_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .is_some();

            let from_id = msg.from.as_ref().map(|u| u.id);
            let fwd_user_id = msg.forward_from.as_ref().map(|u| u.id);
            let fwd_chat_id = msg.forward_from_chat.as_ref().map(|c| c.id);
            let reply_id = msg.reply_to_message_id();

            if present {
                conn.execute(
                    &format!(
                        "UPDATE {} SET {} = ?, {} = ?, {} = ?, {} = ?, {} = ?, {} = ?, \
                         {} = ?, {} = ?, {} = ? WHERE {} = ? AND {} = ?",
                        messages::TABLE,
                        messages::FROM_USER_ID,
                        messages::DATE,
                        messages::TEXT,
                        messages::CAPTION,
                        messages::FORWARD_FROM_USER_ID,
                        messages::FORWARD_FROM_CHAT_ID,
                        messages::FORWARD_DATE,
                        messages::REPLY_TO_MESSAGE_ID,
                        messages::EDIT_DATE,
                        messages::CHAT_ID,
                        messages::MESSAGE_ID
                    ),
                    params![
                        from_id,
                        msg.date,
                        msg.text,
                        msg.caption,
                        fwd_user_id,
                        fwd_chat_id,
                        msg.forward_date,
                        reply_id,
                        msg.edit_date,
                        msg.chat.id,
                        msg.message_id
                    ],
                )?;
            } else {
                conn.execute(
                    &format!(
                        "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        messages::TABLE,
                        messages::CHAT_ID,
                        messages::MESSAGE_ID,
                        messages::FROM_USER_ID,
                        messages::DATE,
                        messages::TEXT,
                        messages::CAPTION,
                        messages::FORWARD_FROM_USER_ID,
                        messages::FORWARD_FROM_CHAT_ID,
                        messages::FORWARD_DATE,
                        messages::REPLY_TO_MESSAGE_ID,
                        messages::EDIT_DATE
                    ),
                    params![
                        msg.chat.id,
                        msg.message_id,
                        from_id,
                        msg.date,
                        msg.text,
                        msg.caption,
                        fwd_user_id,
                        fwd_chat_id,
                        msg.forward_date,
                        reply_id,
                        msg.edit_date
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Replace the message's annotation rows wholesale, saving any
    /// mentioned users through the user path first.
    fn save_entities(&self, msg: &Message) -> Result<()> {
        if msg.entities.is_empty() {
            return Ok(());
        }

        for entity in &msg.entities {
            if let Some(user) = &entity.user {
                self.upsert_user_sync(user)?;
            }
        }

        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM message_entities WHERE chat_id = ? AND message_id = ?",
                params![msg.chat.id, msg.message_id],
            )?;
            for (ord, entity) in msg.entities.iter().enumerate() {
                conn.execute(
                    "INSERT INTO message_entities \
                     (chat_id, message_id, ord, kind, start, length, url, user_id) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        msg.chat.id,
                        msg.message_id,
                        ord as i64,
                        entity.kind,
                        entity.offset,
                        entity.length,
                        entity.url,
                        entity.user.as_ref().map(|u| u.id)
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn save_audio(&self, audio: &Audio) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM audio WHERE file_id = ?", params![audio.file_id])?;
            conn.execute(
                "INSERT INTO audio (file_id, duration, performer, title, mime_type, file_size) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    audio.file_id,
                    audio.duration,
                    audio.performer,
                    audio.title,
                    audio.mime_type,
                    audio.file_size
                ],
            )?;
            Ok(())
        })
    }

    fn save_photo_size(&self, photo: &PhotoSize, link: Option<(i64, i64, bool)>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM photo_sizes WHERE file_id = ?",
                params![photo.file_id],
            )?;
            match link {
                Some((chat_id, message_id, new_chat_photo)) => conn.execute(
                    "INSERT INTO photo_sizes \
                     (file_id, width, height, file_size, chat_id, message_id, new_chat_photo) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        photo.file_id,
                        photo.width,
                        photo.height,
                        photo.file_size,
                        chat_id,
                        message_id,
                        new_chat_photo
                    ],
                )?,
                None => conn.execute(
                    "INSERT INTO photo_sizes (file_id, width, height, file_size) \
                     VALUES (?, ?, ?, ?)",
                    params![photo.file_id, photo.width, photo.height, photo.file_size],
                )?,
            };
            Ok(())
        })
    }

    fn save_photo_set(
        &self,
        photos: &[PhotoSize],
        chat_id: i64,
        message_id: i64,
        new_chat_photo: bool,
    ) -> Result<()> {
        for photo in photos {
            self.save_photo_size(photo, Some((chat_id, message_id, new_chat_photo)))?;
        }
        Ok(())
    }

    fn save_document(&self, document: &Document) -> Result<()> {
        let thumbnail_id = match &document.thumbnail {
            Some(thumb) => {
                self.save_photo_size(thumb, None)?;
                thumb.file_id.clone()
            }
            None => String::new(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM documents WHERE file_id = ?",
                params![document.file_id],
            )?;
            conn.execute(
                "INSERT INTO documents (file_id, thumbnail_id, file_name, mime_type, file_size) \
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    document.file_id,
                    thumbnail_id,
                    document.file_name,
                    document.mime_type,
                    document.file_size
                ],
            )?;
            Ok(())
        })
    }

    fn save_sticker(&self, sticker: &Sticker) -> Result<()> {
        let thumbnail_id = match &sticker.thumbnail {
            Some(thumb) => {
                self.save_photo_size(thumb, None)?;
                thumb.file_id.clone()
            }
            None => String::new(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM stickers WHERE file_id = ?",
                params![sticker.file_id],
            )?;
            conn.execute(
                "INSERT INTO stickers (file_id, thumbnail_id, width, height, emoji, file_size) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    sticker.file_id,
                    thumbnail_id,
                    sticker.width,
                    sticker.height,
                    sticker.emoji,
                    sticker.file_size
                ],
            )?;
            Ok(())
        })
    }

    fn save_video(&self, video: &Video) -> Result<()> {
        let thumbnail_id = match &video.thumbnail {
            Some(thumb) => {
                self.save_photo_size(thumb, None)?;
                thumb.file_id.clone()
            }
            None => String::new(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM videos WHERE file_id = ?",
                params![video.file_id],
            )?;
            conn.execute(
                "INSERT INTO videos \
                 (file_id, thumbnail_id, width, height, duration, mime_type, file_size) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    video.file_id,
                    thumbnail_id,
                    video.width,
                    video.height,
                    video.duration,
                    video.mime_type,
                    video.file_size
                ],
            )?;
            Ok(())
        })
    }

    fn save_voice(&self, voice: &Voice) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM voices WHERE file_id = ?",
                params![voice.file_id],
            )?;
            conn.execute(
                "INSERT INTO voices (file_id, duration, mime_type, file_size) \
                 VALUES (?, ?, ?, ?)",
                params![
                    voice.file_id,
                    voice.duration,
                    voice.mime_type,
                    voice.file_size
                ],
            )?;
            Ok(())
        })
    }

    fn get_user_sync(&self, query: &str) -> Result<User> {
        let select = format!(
            "SELECT {}, {}, {}, {} FROM {}",
            users::ID,
            users::FIRST_NAME,
            users::LAST_NAME,
            users::USERNAME,
            users::TABLE
        );

        let (sql, binds): (String, Vec<String>) = if let Some(handle) = query.strip_prefix('@') {
            (
                format!("{select} WHERE {} = ?", users::USERNAME),
                vec![handle.to_string()],
            )
        } else {
            let tokens: Vec<&str> = query.split_whitespace().collect();
            match tokens.as_slice() {
                [first] => (
                    format!("{select} WHERE {} = ?", users::FIRST_NAME),
                    vec![(*first).to_string()],
                ),
                [first, last] => (
                    format!(
                        "{select} WHERE {} = ? AND {} = ?",
                        users::FIRST_NAME,
                        users::LAST_NAME
                    ),
                    vec![(*first).to_string(), (*last).to_string()],
                ),
                _ => {
                    return Err(ArchiveError::MalformedQuery(format!(
                        "expected @handle or at most two name tokens: {query}"
                    )))
                }
            }
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let matches = stmt
                .query_map(rusqlite::params_from_iter(binds.iter()), map_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            match matches.len() {
                0 => Err(ArchiveError::NotFound),
                1 => Ok(matches.into_iter().next().ok_or(ArchiveError::NotFound)?),
                _ => Err(ArchiveError::Ambiguous(
                    matches.iter().map(User::display_name).collect(),
                )),
            }
        })
    }

    fn get_messages_sync(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        let mut sql = format!(
            "SELECT m.{}, m.{}, m.{}, m.{}, m.{}, m.{}, m.{}, m.{}, m.{}, m.{}, \
             u.{}, u.{}, u.{}, u.{} \
             FROM {} m LEFT JOIN {} u ON u.{} = m.{} WHERE m.{} = ?",
            messages::MESSAGE_ID,
            messages::CHAT_ID,
            messages::DATE,
            messages::TEXT,
            messages::CAPTION,
            messages::FORWARD_FROM_USER_ID,
            messages::FORWARD_FROM_CHAT_ID,
            messages::FORWARD_DATE,
            messages::REPLY_TO_MESSAGE_ID,
            messages::EDIT_DATE,
            users::ID,
            users::FIRST_NAME,
            users::LAST_NAME,
            users::USERNAME,
            messages::TABLE,
            users::TABLE,
            users::ID,
            messages::FROM_USER_ID,
            messages::CHAT_ID
        );
        let mut binds: Vec<Box<dyn ToSql>> = vec![Box::new(chat_id)];

        if let Some(begin) = begin {
            sql.push_str(&format!(" AND m.{} >= ?", messages::DATE));
            binds.push(Box::new(begin));
        }
        if let Some(end) = end {
            sql.push_str(&format!(" AND m.{} <= ?", messages::DATE));
            binds.push(Box::new(end));
        }
        sql.push_str(&format!(
            " ORDER BY m.{} ASC, m.{} ASC",
            messages::DATE,
            messages::MESSAGE_ID
        ));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(binds.iter()), map_stored_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn get_dates_sync(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<i64>> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            messages::DATE,
            messages::TABLE,
            messages::CHAT_ID
        );
        let mut binds: Vec<Box<dyn ToSql>> = vec![Box::new(chat_id)];

        if let Some(begin) = begin {
            sql.push_str(&format!(" AND {} >= ?", messages::DATE));
            binds.push(Box::new(begin));
        }
        if let Some(end) = end {
            sql.push_str(&format!(" AND {} <= ?", messages::DATE));
            binds.push(Box::new(end));
        }
        sql.push_str(&format!(" ORDER BY {} ASC", messages::DATE));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let dates = stmt
                .query_map(rusqlite::params_from_iter(binds.iter()), |row| {
                    row.get::<_, i64>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(dates)
        })
    }
}

fn map_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        username: row.get(3)?,
    })
}

fn map_chat(row: &Row) -> rusqlite::Result<Chat> {
    let kind: String = row.get(1)?;
    Ok(Chat {
        id: row.get(0)?,
        kind: ChatKind::parse(&kind),
        title: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        username: row.get(5)?,
    })
}

fn map_stored_message(row: &Row) -> rusqlite::Result<StoredMessage> {
    let from = match row.get::<_, Option<i64>>(10)? {
        Some(id) => Some(User {
            id,
            first_name: row.get(11)?,
            last_name: row.get(12)?,
            username: row.get(13)?,
        }),
        None => None,
    };

    Ok(StoredMessage {
        message_id: row.get(0)?,
        chat_id: row.get(1)?,
        from,
        date: row.get(2)?,
        text: row.get(3)?,
        caption: row.get(4)?,
        forward_from_user_id: row.get(5)?,
        forward_from_chat_id: row.get(6)?,
        forward_date: row.get(7)?,
        reply_to_message_id: row.get(8)?,
        edit_date: row.get(9)?,
    })
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.upsert_user_sync(user)
    }

    async fn upsert_chat(&self, chat: &Chat, forward_origin: bool) -> Result<()> {
        self.upsert_chat_sync(chat, forward_origin)
    }

    async fn upsert_message(&self, message: &Message) -> Result<()> {
        self.save_message_tree(message)
    }

    async fn get_chats(&self) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {}, {}, {}, {}, {} FROM {} WHERE {} = 0 ORDER BY {} ASC",
                chats::ID,
                chats::KIND,
                chats::TITLE,
                chats::FIRST_NAME,
                chats::LAST_NAME,
                chats::USERNAME,
                chats::TABLE,
                chats::FORWARD_ORIGIN,
                chats::ID
            ))?;
            let rows = stmt
                .query_map([], map_chat)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn get_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, {}, {}, {} FROM {} ORDER BY {} ASC",
                users::ID,
                users::FIRST_NAME,
                users::LAST_NAME,
                users::USERNAME,
                users::TABLE,
                users::ID
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    async fn get_user(&self, query: &str) -> Result<User> {
        self.get_user_sync(query)
    }

    async fn get_messages_by_date(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        self.get_messages_sync(chat_id, begin, end)
    }

    async fn get_dates(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<i64>> {
        self.get_dates_sync(chat_id, begin, end)
    }

    async fn save_file(&self, file: &FileRecord) -> Result<()> {
        self.with_conn(|conn| {
            let existing = conn
                .query_row(
                    &format!(
                        "SELECT {}, {}, {}, {} FROM {} WHERE {} = ? AND {} = ?",
                        files::FILE_ID,
                        files::CHAT_ID,
                        files::LOCAL_PATH,
                        files::SIZE,
                        files::TABLE,
                        files::FILE_ID,
                        files::CHAT_ID
                    ),
                    params![file.file_id, file.chat_id],
                    map_file,
                )
                .optional()?;

            match existing {
                Some(ref stored) if stored == file => {
                    debug!(file_id = %file.file_id, "file unchanged, write skipped");
                    Ok(())
                }
                Some(_) => {
                    conn.execute(
                        &format!(
                            "UPDATE {} SET {} = ?, {} = ? WHERE {} = ? AND {} = ?",
                            files::TABLE,
                            files::LOCAL_PATH,
                            files::SIZE,
                            files::FILE_ID,
                            files::CHAT_ID
                        ),
                        params![file.local_path, file.size, file.file_id, file.chat_id],
                    )?;
                    Ok(())
                }
                None => {
                    conn.execute(
                        &format!(
                            "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
                            files::TABLE,
                            files::FILE_ID,
                            files::CHAT_ID,
                            files::LOCAL_PATH,
                            files::SIZE
                        ),
                        params![file.file_id, file.chat_id, file.local_path, file.size],
                    )?;
                    Ok(())
                }
            }
        })
    }

    async fn get_file(&self, file_id: &str, chat_id: i64) -> Result<FileRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {}, {}, {}, {} FROM {} WHERE {} = ? AND {} = ?",
                    files::FILE_ID,
                    files::CHAT_ID,
                    files::LOCAL_PATH,
                    files::SIZE,
                    files::TABLE,
                    files::FILE_ID,
                    files::CHAT_ID
                ),
                params![file_id, chat_id],
                map_file,
            )
            .optional()?
            .ok_or(ArchiveError::NotFound)
        })
    }

    async fn cens_level(&self, user_id: i64) -> Result<u32> {
        let year = Utc::now().year();
        self.with_conn(|conn| {
            let level = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM {} WHERE {} = ? AND {} = ?",
                        cens_levels::LEVEL,
                        cens_levels::TABLE,
                        cens_levels::USER_ID,
                        cens_levels::YEAR
                    ),
                    params![user_id, year],
                    |row| row.get::<_, u32>(0),
                )
                .optional()?;
            Ok(level.unwrap_or(0))
        })
    }

    async fn set_cens_level(&self, user_id: i64, level: u32) -> Result<()> {
        let year = Utc::now().year();
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?) \
                     ON CONFLICT({}, {}) DO UPDATE SET {} = excluded.{}",
                    cens_levels::TABLE,
                    cens_levels::USER_ID,
                    cens_levels::YEAR,
                    cens_levels::LEVEL,
                    cens_levels::USER_ID,
                    cens_levels::YEAR,
                    cens_levels::LEVEL,
                    cens_levels::LEVEL
                ),
                params![user_id, year, level],
            )?;
            Ok(())
        })
    }

    async fn add_cens_level(&self, user_id: i64) -> Result<u32> {
        let next = self.cens_level(user_id).await? + 1;
        self.set_cens_level(user_id, next).await?;
        Ok(next)
    }

    async fn clear_cens_level(&self, user_id: i64) -> Result<()> {
        let year = Utc::now().year();
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ? AND {} = ?",
                    cens_levels::TABLE,
                    cens_levels::USER_ID,
                    cens_levels::YEAR
                ),
                params![user_id, year],
            )?;
            Ok(())
        })
    }

    async fn warn_level(&self, user_id: i64) -> Result<u32> {
        self.with_conn(|conn| {
            let level = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM {} WHERE {} = ?",
                        warn_levels::LEVEL,
                        warn_levels::TABLE,
                        warn_levels::USER_ID
                    ),
                    params![user_id],
                    |row| row.get::<_, u32>(0),
                )
                .optional()?;
            Ok(level.unwrap_or(0))
        })
    }

    async fn set_warn_level(&self, user_id: i64, level: u32) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, {}) VALUES (?, ?) \
                     ON CONFLICT({}) DO UPDATE SET {} = excluded.{}",
                    warn_levels::TABLE,
                    warn_levels::USER_ID,
                    warn_levels::LEVEL,
                    warn_levels::USER_ID,
                    warn_levels::LEVEL,
                    warn_levels::LEVEL
                ),
                params![user_id, level],
            )?;
            Ok(())
        })
    }

    async fn add_warn_level(&self, user_id: i64) -> Result<u32> {
        let next = self.warn_level(user_id).await? + 1;
        self.set_warn_level(user_id, next).await?;
        Ok(next)
    }

    async fn clear_warn_level(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?",
                    warn_levels::TABLE,
                    warn_levels::USER_ID
                ),
                params![user_id],
            )?;
            Ok(())
        })
    }
}

fn map_file(row: &Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get(0)?,
        chat_id: row.get(1)?,
        local_path: row.get(2)?,
        size: row.get(3)?,
    })
}
