//! Data models for the archived entity graph.
//!
//! This module contains the wire-shaped entity graph received from the
//! platform collaborator (`Message` with its nested sender, chats,
//! attachments and annotations) and the flat read model (`StoredMessage`)
//! returned by store queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A platform user.
///
/// Keyed by the platform-assigned immutable `id`; name fields are re-observed
/// on every message and upserted on change. The wire format reports absent
/// name parts as empty strings, and the store preserves that convention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Platform-assigned immutable identifier
    pub id: i64,
    /// First name as last observed
    pub first_name: String,
    /// Last name as last observed
    pub last_name: String,
    /// Handle without the leading `@`
    pub username: String,
}

impl User {
    /// Human-readable label used in listings and in ambiguous-lookup
    /// candidate lists: "First Last (@handle)" with absent parts omitted.
    #[must_use]
    pub fn display_name(&self) -> String {
        let names = format!("{} {}", self.first_name, self.last_name);
        let names = names.trim();

        if self.username.is_empty() {
            names.to_string()
        } else if names.is_empty() {
            format!("@{}", self.username)
        } else {
            format!("{} (@{})", names, self.username)
        }
    }
}

/// Classification of a chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// Private conversation with a single user
    #[default]
    Private,
    /// Small group chat
    Group,
    /// Large group chat
    Supergroup,
    /// Broadcast channel
    Channel,
}

impl ChatKind {
    /// Stable string form persisted by the relational backend
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
        }
    }

    /// Parse the persisted string form; unknown values fall back to
    /// [`ChatKind::Private`] so old rows never poison a read.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "group" => Self::Group,
            "supergroup" => Self::Supergroup,
            "channel" => Self::Channel,
            _ => Self::Private,
        }
    }
}

/// A conversation the archive knows about.
///
/// A chat row carries a persisted forward-origin discriminant (stored next to
/// these fields, not on them): chats recorded only because a message was
/// forwarded *from* them are excluded from the tracked-conversation listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Platform-assigned identifier
    pub id: i64,
    /// Kind of conversation
    pub kind: ChatKind,
    /// Title, for group-like chats
    pub title: String,
    /// First name, for private chats
    pub first_name: String,
    /// Last name, for private chats
    pub last_name: String,
    /// Handle without the leading `@`
    pub username: String,
}

impl Chat {
    /// Human-readable label: title, else handle, else person names.
    #[must_use]
    pub fn display_name(&self) -> String {
        if !self.title.is_empty() {
            return self.title.clone();
        }
        if !self.username.is_empty() {
            return format!("@{}", self.username);
        }
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// An annotation over a span of message text (mention, URL, command, ...).
///
/// Annotations are ordered; the store replaces a message's full annotation
/// sequence on every save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAnnotation {
    /// Annotation type as reported by the platform
    pub kind: String,
    /// Start offset into the message text
    pub offset: i64,
    /// Span length
    pub length: i64,
    /// Target URL for link annotations
    pub url: Option<String>,
    /// Mentioned user for text-mention annotations; saved through the
    /// user upsert path before the annotation row is written
    pub user: Option<User>,
}

/// Audio attachment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Audio {
    pub file_id: String,
    pub duration: i64,
    pub performer: String,
    pub title: String,
    pub mime_type: String,
    pub file_size: i64,
}

/// One rendition of a photo. Also used for document/sticker/video thumbnails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
    pub file_size: i64,
}

/// Generic file attachment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    /// Preview image, saved through the photo-size path
    pub thumbnail: Option<PhotoSize>,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
}

/// Sticker attachment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    pub thumbnail: Option<PhotoSize>,
    pub width: i64,
    pub height: i64,
    pub emoji: String,
    pub file_size: i64,
}

/// Video attachment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub thumbnail: Option<PhotoSize>,
    pub width: i64,
    pub height: i64,
    pub duration: i64,
    pub mime_type: String,
    pub file_size: i64,
}

/// Voice note attachment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub file_id: String,
    pub duration: i64,
    pub mime_type: String,
    pub file_size: i64,
}

/// A shared contact card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactCard {
    pub phone_number: String,
    pub first_name: String,
    pub last_name: String,
    /// Platform user id when the contact is a platform user
    pub user_id: Option<i64>,
}

/// A shared geographic location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

/// A shared venue (location with a name and address).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub location: Location,
    pub title: String,
    pub address: String,
    pub foursquare_id: String,
}

/// A message as received from the platform collaborator.
///
/// This is the nested wire graph: saving it cascades into the sender, the
/// chat, the forward origin, the reply target, attachment metadata and
/// chat-membership users. Messages are identified by `(chat.id, message_id)`;
/// re-observations (edits) update the same record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within the chat
    pub message_id: i64,
    /// The conversation this message belongs to
    pub chat: Chat,
    /// Sender; absent for some service messages
    pub from: Option<User>,
    /// Send time, unix seconds
    pub date: i64,
    /// Text body
    pub text: Option<String>,
    /// Caption for media messages
    pub caption: Option<String>,
    /// Original sender when forwarded from a user
    pub forward_from: Option<User>,
    /// Origin chat when forwarded from a channel or group
    pub forward_from_chat: Option<Chat>,
    /// Original send time when forwarded, unix seconds
    pub forward_date: Option<i64>,
    /// Quoted message; saved recursively
    pub reply_to: Option<Box<Message>>,
    /// Last edit time, unix seconds
    pub edit_date: Option<i64>,
    /// Ordered text annotations
    pub entities: Vec<EntityAnnotation>,
    pub audio: Option<Audio>,
    pub document: Option<Document>,
    /// Photo renditions, largest last
    pub photo: Option<Vec<PhotoSize>>,
    pub sticker: Option<Sticker>,
    pub video: Option<Video>,
    pub voice: Option<Voice>,
    pub contact: Option<ContactCard>,
    pub location: Option<Location>,
    pub venue: Option<Venue>,
    /// User who just joined the chat
    pub new_chat_member: Option<User>,
    /// User who just left the chat
    pub left_chat_member: Option<User>,
    /// New chat photo renditions
    pub new_chat_photo: Option<Vec<PhotoSize>>,
    /// Newly pinned message; saved recursively
    pub pinned_message: Option<Box<Message>>,
}

impl Message {
    /// Identifier of the owning chat
    #[must_use]
    pub fn chat_id(&self) -> i64 {
        self.chat.id
    }

    /// Identifier of the reply target, if any
    #[must_use]
    pub fn reply_to_message_id(&self) -> Option<i64> {
        self.reply_to.as_ref().map(|m| m.message_id)
    }

    /// Send time as a UTC datetime; `None` for out-of-range timestamps
    #[must_use]
    pub fn date_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }
}

/// Flat message record as returned by store read queries.
///
/// Nested graph branches are reduced to their keys; the sender is hydrated
/// with the stored user record when it exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: i64,
    pub chat_id: i64,
    /// Sender record, when the user is known to the store
    pub from: Option<User>,
    /// Send time, unix seconds
    pub date: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub forward_from_user_id: Option<i64>,
    pub forward_from_chat_id: Option<i64>,
    pub forward_date: Option<i64>,
    pub reply_to_message_id: Option<i64>,
    pub edit_date: Option<i64>,
}

impl From<&Message> for StoredMessage {
    fn from(msg: &Message) -> Self {
        Self {
            message_id: msg.message_id,
            chat_id: msg.chat.id,
            from: msg.from.clone(),
            date: msg.date,
            text: msg.text.clone(),
            caption: msg.caption.clone(),
            forward_from_user_id: msg.forward_from.as_ref().map(|u| u.id),
            forward_from_chat_id: msg.forward_from_chat.as_ref().map(|c| c.id),
            forward_date: msg.forward_date,
            reply_to_message_id: msg.reply_to_message_id(),
            edit_date: msg.edit_date,
        }
    }
}

/// A downloaded attachment tracked per chat.
///
/// The same platform `file_id` observed in two chats is tracked as two
/// records because download-path provisioning is chat-scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Platform file identifier
    pub file_id: String,
    /// Chat the file was downloaded for
    pub chat_id: i64,
    /// Path below the local static file root
    pub local_path: String,
    /// Size in bytes
    pub size: i64,
}
