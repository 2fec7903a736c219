use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{
    MessageId, SpeakerId, SuperTopicId, ThreadId, TopicId, UserId, UserRole, MAX_TEXT_LENGTH,
};

/// Free-form rating answers keyed by question name.
pub type Ratings = Map<String, Value>;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub role: UserRole,
    pub active: bool,
    pub ext_id: Option<String>,
    pub ext_src: Option<String>,
    pub last_active: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// One line of a seed conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedUtterance {
    pub speaker_id: SpeakerId,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicLimits {
    /// Upper bound on threads for the topic.
    pub max_threads: u32,
    pub max_turns_per_thread: u32,
    pub max_human_users_per_thread: u32,
    /// The Moderator seat is filled by a qualified human instead of the bot.
    pub human_moderator: bool,
    pub reward: String,
}

impl Default for TopicLimits {
    fn default() -> Self {
        Self {
            max_threads: 3,
            max_turns_per_thread: 100,
            max_human_users_per_thread: 1,
            human_moderator: false,
            reward: "0.0".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub super_topic_id: Option<SuperTopicId>,
    pub conversation: Vec<SeedUtterance>,
    /// Bot engine id.
    pub endpoint: String,
    pub persona_id: Option<String>,
    pub limits: TopicLimits,
    pub ext_id: Option<String>,
    pub ext_src: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Template shared by a group of topics that start from the same seed
/// conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuperTopic {
    pub id: SuperTopicId,
    pub name: String,
    pub conversation: Vec<SeedUtterance>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// Topic parameters copied onto the thread when it is created, so a running
/// thread never depends on the topic row still existing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadConfig {
    pub topic_name: String,
    pub endpoint: String,
    pub persona_id: Option<String>,
    pub limits: TopicLimits,
}

impl ThreadConfig {
    pub fn from_topic(topic: &Topic) -> Self {
        Self {
            topic_name: topic.name.clone(),
            endpoint: topic.endpoint.clone(),
            persona_id: topic.persona_id.clone(),
            limits: topic.limits.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationState {
    Uncreated,
    BeingCreated,
    Ready,
}

impl CreationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationState::Uncreated => "uncreated",
            CreationState::BeingCreated => "being_created",
            CreationState::Ready => "ready",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uncreated" => Some(CreationState::Uncreated),
            "being_created" => Some(CreationState::BeingCreated),
            "ready" => Some(CreationState::Ready),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub role: UserRole,
}

/// Per-user map that remembers whether it changed since it was loaded.
///
/// Every write goes through [`UserMap::insert`], which marks the map dirty so
/// the store knows to persist it on the next commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserMap<V> {
    entries: BTreeMap<UserId, V>,
    #[serde(skip)]
    dirty: bool,
}

impl<V> Default for UserMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            dirty: false,
        }
    }
}

impl<V> UserMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap entries loaded from storage; the result is clean.
    pub fn from_entries(entries: BTreeMap<UserId, V>) -> Self {
        Self {
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, user: &UserId) -> Option<&V> {
        self.entries.get(user)
    }

    pub fn contains_key(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    pub fn insert(&mut self, user: UserId, value: V) -> Option<V> {
        self.dirty = true;
        self.entries.insert(user, value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn entries(&self) -> &BTreeMap<UserId, V> {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: ThreadId,
    pub topic_id: TopicId,
    pub config: ThreadConfig,
    pub episode_done: bool,
    pub rating_done: bool,
    pub messages: Vec<ChatMessage>,
    pub participants: Vec<Participant>,
    /// Speaker label each user plays.
    pub speakers: UserMap<SpeakerId>,
    /// Crowd assignment id per user.
    pub assignments: UserMap<String>,
    pub submit_urls: UserMap<String>,
    pub ratings: UserMap<Ratings>,
    pub speak_order: Vec<SpeakerId>,
    pub current_speaker_idx: usize,
    pub current_turns: u32,
    pub remaining_turns: u32,
    pub max_turns: u32,
    pub creation: CreationState,
    pub ext_id: Option<String>,
    pub ext_src: Option<String>,
    /// Bumped by every successful commit; stale writers are rejected.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatThread {
    /// An uncreated thread with no participants, speak order or messages.
    pub fn new(id: ThreadId, topic_id: TopicId, config: ThreadConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            topic_id,
            config,
            episode_done: false,
            rating_done: false,
            messages: Vec::new(),
            participants: Vec::new(),
            speakers: UserMap::new(),
            assignments: UserMap::new(),
            submit_urls: UserMap::new(),
            ratings: UserMap::new(),
            speak_order: Vec::new(),
            current_speaker_idx: 0,
            current_turns: 0,
            remaining_turns: 0,
            max_turns: 0,
            creation: CreationState::Uncreated,
            ext_id: None,
            ext_src: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_speaker(&self) -> Option<&SpeakerId> {
        self.speak_order.get(self.current_speaker_idx)
    }

    pub fn has_user(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user)
    }

    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user_id == user)
    }

    pub fn add_participant(&mut self, user_id: UserId, role: UserRole) {
        if !self.has_user(&user_id) {
            self.participants.push(Participant { user_id, role });
        }
    }

    /// Number of human and human-moderator participants.
    pub fn human_occupancy(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.role.is_human_seat())
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.human_occupancy() >= self.config.limits.max_human_users_per_thread as usize
    }

    pub fn speaker_of(&self, user: &UserId) -> Option<&SpeakerId> {
        self.speakers.get(user)
    }

    pub fn user_for_speaker(&self, speaker: &SpeakerId) -> Option<&UserId> {
        self.speakers
            .iter()
            .find(|(_, label)| *label == speaker)
            .map(|(user, _)| user)
    }

    pub fn bot_user(&self) -> Option<&UserId> {
        self.participants
            .iter()
            .find(|p| p.role == UserRole::Bot)
            .map(|p| &p.user_id)
    }

    pub fn is_bot_moderated(&self) -> bool {
        !self.config.limits.human_moderator
    }

    pub fn is_ready(&self) -> bool {
        self.creation == CreationState::Ready
    }

    /// Messages exchanged after the seed conversation.
    pub fn live_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| !m.is_seed)
    }

    pub fn mark_maps_clean(&mut self) {
        self.speakers.mark_clean();
        self.assignments.mark_clean();
        self.submit_urls.mark_clean();
        self.ratings.mark_clean();
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub user_id: UserId,
    pub text: String,
    pub is_seed: bool,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn speaker_id(&self) -> Option<SpeakerId> {
        self.data
            .get("speaker_id")
            .and_then(Value::as_str)
            .map(SpeakerId::new)
    }

    pub fn is_fake_start(&self) -> bool {
        self.data
            .get("fake_start")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A message that has not been stored yet; the store assigns its id and
/// timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageDraft {
    pub user_id: UserId,
    pub text: String,
    pub is_seed: bool,
    pub data: Map<String, Value>,
}

impl MessageDraft {
    pub fn new(user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            text: text.into(),
            is_seed: false,
            data: Map::new(),
        }
    }

    pub fn seed(user_id: UserId, utterance: &SeedUtterance) -> Self {
        let mut draft = Self::new(user_id, utterance.text.clone());
        draft.is_seed = true;
        draft
            .data
            .insert("fake_start".to_owned(), Value::Bool(true));
        draft.with_speaker(&utterance.speaker_id)
    }

    pub fn with_speaker(mut self, speaker: &SpeakerId) -> Self {
        self.data.insert(
            "speaker_id".to_owned(),
            Value::String(speaker.as_str().to_owned()),
        );
        self
    }

    /// Replace the text, keeping the first pre-transform version under
    /// `text_orig`.
    pub fn rewrite(&mut self, text: String) {
        if text == self.text {
            return;
        }
        if !self.data.contains_key("text_orig") {
            self.data
                .insert("text_orig".to_owned(), Value::String(self.text.clone()));
        }
        self.text = text;
    }
}

/// Trim and bound-check participant text.
pub fn clean_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_TEXT_LENGTH {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
