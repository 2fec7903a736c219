use crate::core::{SpeakerId, ThreadId, TopicId, UserId};

// ---------------------------------------------------------------------------
// Turn-taking and participation errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("thread {thread} is not ready yet")]
    NotReady { thread: ThreadId },
    #[error("thread {thread} is already done")]
    EpisodeDone { thread: ThreadId },
    #[error("user {user} is not part of thread {thread}")]
    NotInThread { user: UserId, thread: ThreadId },
    #[error("speaker {declared} is not the role of user {user} (expected {assigned})")]
    WrongSpeaker {
        user: UserId,
        declared: SpeakerId,
        assigned: SpeakerId,
    },
    #[error("it is {expected}'s turn, not {got}'s")]
    NotCurrentSpeaker { expected: SpeakerId, got: SpeakerId },
    #[error("user {user} has no speaker role in thread {thread}")]
    NoSpeakerRole { user: UserId, thread: ThreadId },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("user {0} is not an administrator")]
    NotAdmin(UserId),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("message text must be 1 to {max} characters")]
    InvalidText { max: usize },
    #[error("user id must be 2 to 16 alphanumeric characters")]
    InvalidUserId,
    #[error("secret must be at least {min} characters")]
    WeakSecret { min: usize },
    #[error("user {0} already exists")]
    DuplicateUser(UserId),
    #[error("topic {0} already exists")]
    DuplicateTopic(TopicId),
    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Capability errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("bot endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("bot endpoint connection failed: {0}")]
    Connection(String),
    #[error("failed to parse bot reply: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CrowdError {
    #[error("crowd service {service} rejected the request: {reason}")]
    Rejected { service: String, reason: String },
    #[error("crowd service connection failed: {0}")]
    Connection(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("export serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bot engine {0} is not configured")]
    UnknownEngine(String),
    #[error("persona {0} is not configured")]
    UnknownPersona(String),
    #[error("system user {0} is missing; run init-db first")]
    MissingSystemUser(UserId),
    #[error("thread {thread} has no seat for user {user}")]
    NoSeat { thread: ThreadId, user: UserId },
}

// ---------------------------------------------------------------------------
// Limit policy outcome
// ---------------------------------------------------------------------------

/// Reason a user may not start or join another thread.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct LimitExceeded {
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
