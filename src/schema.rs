//! Relational schema definitions.
//!
//! This module provides constants for the table and column names the
//! relational backend builds queries against. Attachment tables are written
//! with fixed statements and do not need constants here.

/// Users table schema
pub mod users {
    /// Table name
    pub const TABLE: &str = "users";
    /// Primary key column
    pub const ID: &str = "id";
    /// First name column
    pub const FIRST_NAME: &str = "first_name";
    /// Last name column
    pub const LAST_NAME: &str = "last_name";
    /// Handle column, stored without the leading `@`
    pub const USERNAME: &str = "username";
}

/// Chats table schema
pub mod chats {
    /// Table name
    pub const TABLE: &str = "chats";
    /// Primary key column
    pub const ID: &str = "id";
    /// Chat kind column (private/group/supergroup/channel)
    pub const KIND: &str = "kind";
    /// Title column
    pub const TITLE: &str = "title";
    /// First name column
    pub const FIRST_NAME: &str = "first_name";
    /// Last name column
    pub const LAST_NAME: &str = "last_name";
    /// Handle column
    pub const USERNAME: &str = "username";
    /// Forward-origin discriminant; set on insert, never updated
    pub const FORWARD_ORIGIN: &str = "forward_origin";
}

/// Messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Chat half of the composite key
    pub const CHAT_ID: &str = "chat_id";
    /// Message half of the composite key
    pub const MESSAGE_ID: &str = "message_id";
    /// Sender user id column
    pub const FROM_USER_ID: &str = "from_user_id";
    /// Send time column, unix seconds
    pub const DATE: &str = "date";
    /// Text body column
    pub const TEXT: &str = "text";
    /// Media caption column
    pub const CAPTION: &str = "caption";
    /// Forward-origin user id column
    pub const FORWARD_FROM_USER_ID: &str = "forward_from_user_id";
    /// Forward-origin chat id column
    pub const FORWARD_FROM_CHAT_ID: &str = "forward_from_chat_id";
    /// Original send time column for forwards
    pub const FORWARD_DATE: &str = "forward_date";
    /// Reply target message id column
    pub const REPLY_TO_MESSAGE_ID: &str = "reply_to_message_id";
    /// Last edit time column
    pub const EDIT_DATE: &str = "edit_date";
}

/// Files table schema
pub mod files {
    /// Table name
    pub const TABLE: &str = "files";
    /// Platform file id, half of the composite key
    pub const FILE_ID: &str = "file_id";
    /// Chat scope, half of the composite key
    pub const CHAT_ID: &str = "chat_id";
    /// Local path column
    pub const LOCAL_PATH: &str = "local_path";
    /// Size column, bytes
    pub const SIZE: &str = "size";
}

/// Censor-level counter table schema, keyed by (user, calendar year)
pub mod cens_levels {
    /// Table name
    pub const TABLE: &str = "cens_levels";
    /// User id column
    pub const USER_ID: &str = "user_id";
    /// Calendar year column
    pub const YEAR: &str = "year";
    /// Counter column
    pub const LEVEL: &str = "level";
}

/// Warn-level counter table schema, keyed by user only
pub mod warn_levels {
    /// Table name
    pub const TABLE: &str = "warn_levels";
    /// User id column
    pub const USER_ID: &str = "user_id";
    /// Counter column
    pub const LEVEL: &str = "level";
}
