use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::{clean_text, ChatThread, MessageDraft, SpeakerId, UserId};

// ---------------------------------------------------------------------------
// Context replay
// ---------------------------------------------------------------------------

/// A message as a bot sees it: attributed to a speaker label rather than to
/// the account that stored it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContextMessage {
    pub speaker_id: SpeakerId,
    pub user_id: UserId,
    pub text: String,
    pub is_seed: bool,
}

/// Rebuild the bot's view of the conversation from stored messages.
///
/// Seed lines are stored under the hidden context user; their tagged speaker
/// label is what the bot hears.
pub fn replay_context(thread: &ChatThread) -> Vec<ContextMessage> {
    thread
        .messages
        .iter()
        .filter_map(|m| {
            let speaker = m
                .speaker_id()
                .or_else(|| thread.speaker_of(&m.user_id).cloned())?;
            Some(ContextMessage {
                speaker_id: speaker,
                user_id: m.user_id.clone(),
                text: m.text.clone(),
                is_seed: m.is_seed || m.is_fake_start(),
            })
        })
        .collect()
}

/// Whether the bot holds the current turn.
pub fn is_bot_turn(thread: &ChatThread) -> bool {
    thread.is_ready()
        && !thread.episode_done
        && thread.is_bot_moderated()
        && thread.current_speaker().is_some_and(SpeakerId::is_moderator)
}

/// The speaker the Moderator hands the turn to.
pub fn reply_target(thread: &ChatThread) -> Option<SpeakerId> {
    let len = thread.speak_order.len();
    if len == 0 {
        return None;
    }
    (1..len)
        .map(|step| &thread.speak_order[(thread.current_speaker_idx + step) % len])
        .find(|s| !s.is_moderator())
        .cloned()
}

// ---------------------------------------------------------------------------
// Bot replies
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BotReply {
    pub text: String,
    pub data: Map<String, Value>,
}

impl BotReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: Map::new(),
        }
    }
}

/// Turn a bot reply into a Moderator message draft.
///
/// Returns `None` for an empty reply; the caller treats that as the bot
/// passing its turn.
pub fn bot_draft(bot: &UserId, reply: BotReply) -> Option<MessageDraft> {
    let text = clean_text(&reply.text)?;
    let mut draft = MessageDraft::new(bot.clone(), text).with_speaker(&SpeakerId::moderator());
    for (key, value) in reply.data {
        draft.data.entry(key).or_insert(value);
    }
    Some(draft)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
