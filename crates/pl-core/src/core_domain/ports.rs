use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::{
    BotError, BotReply, ChatThread, ContextMessage, CrowdError, ExportError, MessageDraft,
    Ratings, SpeakerId, ThreadId, UserId,
};

// ---------------------------------------------------------------------------
// BotAgent — a conversational engine playing the Moderator (object-safe async)
// ---------------------------------------------------------------------------

/// A bot created fresh for every reply; all state comes from the replayed
/// thread history.
pub trait BotAgent: Send {
    fn name(&self) -> &str;

    /// Load the conversation so far.
    fn init_chat_context(&mut self, context: &[ContextMessage]);

    /// Append one more message.
    fn hear(&mut self, message: &ContextMessage);

    /// Produce the next Moderator utterance addressed to `target`.
    fn talk<'a>(
        &'a mut self,
        target: Option<&'a SpeakerId>,
    ) -> Pin<Box<dyn Future<Output = Result<BotReply, BotError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// Transform — text rewrite applied before a message is stored
// ---------------------------------------------------------------------------

pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, draft: MessageDraft) -> MessageDraft;
}

/// Ordered list of transforms applied one after another.
#[derive(Default)]
pub struct TransformChain {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformChain {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    pub fn apply(&self, draft: MessageDraft) -> MessageDraft {
        self.transforms
            .iter()
            .fold(draft, |draft, t| t.transform(draft))
    }

    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

// ---------------------------------------------------------------------------
// CrowdService — external task marketplace (object-safe async)
// ---------------------------------------------------------------------------

/// What a participant is paid for once their thread is rated.
#[derive(Clone, Debug)]
pub struct Completion {
    pub thread_id: ThreadId,
    pub user_id: UserId,
    pub assignment_id: String,
    pub submit_url: Option<String>,
    pub ratings: Ratings,
}

pub trait CrowdService: Send + Sync {
    fn name(&self) -> &str;

    fn is_worker_qualified<'a>(
        &'a self,
        worker_id: &'a str,
        qualification: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CrowdError>> + Send + 'a>>;

    fn submit_completion<'a>(
        &'a self,
        completion: &'a Completion,
    ) -> Pin<Box<dyn Future<Output = Result<(), CrowdError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// ExportSink — durable snapshot of a finished thread
// ---------------------------------------------------------------------------

pub trait ExportSink: Send + Sync {
    /// Write `thread` with extra `meta`, returning where it went.
    fn export_thread(&self, thread: &ChatThread, meta: &Value) -> Result<String, ExportError>;
}

// ---------------------------------------------------------------------------
// Clock — injectable time source for deterministic testing
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
