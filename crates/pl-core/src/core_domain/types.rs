use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Well-known names
// ---------------------------------------------------------------------------

/// Speaker label of the conversation moderator, played by the bot or by a
/// qualified human.
pub const MODERATOR: &str = "Moderator";

/// Seed speaker label used for topic framing lines; never a participant role.
pub const TOPIC_SPEAKER: &str = "Topic";

/// Label given to the single human speaker when the seed conversation is empty.
pub const DEFAULT_HUMAN_SPEAKER: &str = "Human";

/// Maximum message length, in characters, accepted from a participant.
pub const MAX_TEXT_LENGTH: usize = 2048;

pub const ADMIN_USER: &str = "admin";
pub const BOT_USER: &str = "bot01";
pub const DEV_USER: &str = "dev";
pub const CONTEXT_USER: &str = "context";

// ---------------------------------------------------------------------------
// String-based identity newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(UserId);
string_newtype!(TopicId);
string_newtype!(SuperTopicId);
string_newtype!(ThreadId);
string_newtype!(MessageId);
string_newtype!(SpeakerId);

impl SpeakerId {
    pub fn moderator() -> Self {
        Self::new(MODERATOR)
    }

    pub fn is_moderator(&self) -> bool {
        self.0 == MODERATOR
    }

    pub fn is_topic(&self) -> bool {
        self.0 == TOPIC_SPEAKER
    }
}

// ---------------------------------------------------------------------------
// UserRole — what a user does inside a thread
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserRole {
    Human,
    Bot,
    Admin,
    Hidden,
    HumanModerator,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Human => "human",
            UserRole::Bot => "bot",
            UserRole::Admin => "admin",
            UserRole::Hidden => "hidden",
            UserRole::HumanModerator => "human-moderator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" => Some(UserRole::Human),
            "bot" => Some(UserRole::Bot),
            "admin" => Some(UserRole::Admin),
            "hidden" => Some(UserRole::Hidden),
            "human-moderator" => Some(UserRole::HumanModerator),
            _ => None,
        }
    }

    /// Whether a participant with this role occupies one of the human seats
    /// counted against `max_human_users_per_thread`.
    pub fn is_human_seat(&self) -> bool {
        matches!(self, UserRole::Human | UserRole::HumanModerator)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Secret — credential value object with redacted Debug and constant-time PartialEq
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        let a = self.0.as_bytes();
        let b = other.0.as_bytes();
        let max_len = a.len().max(b.len());
        let mut result = (a.len() != b.len()) as u8;
        for i in 0..max_len {
            let x = if i < a.len() { a[i] } else { 0 };
            let y = if i < b.len() { b[i] } else { 0 };
            result |= x ^ y;
        }
        result == 0
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
