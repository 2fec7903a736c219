use crate::core::{ChatThread, SpeakerId, TopicLimits, TurnError, UserId};

// ---------------------------------------------------------------------------
// Turn budget
// ---------------------------------------------------------------------------

/// Number of completed speak-order cycles after which a thread is done.
///
/// `max_turns_per_thread` is per participant, so the budget scales with the
/// number of human seats.
pub fn turn_budget(limits: &TopicLimits) -> u32 {
    limits
        .max_turns_per_thread
        .saturating_mul(limits.max_human_users_per_thread.max(1))
}

// ---------------------------------------------------------------------------
// Turn validation and advancement
// ---------------------------------------------------------------------------

/// Check that `author` may post now, returning the speaker label the message
/// is attributed to.
///
/// `declared` is the label the author claims to speak as; when absent the
/// author's assigned label is used. Nothing is mutated.
pub fn check_turn(
    thread: &ChatThread,
    author: &UserId,
    declared: Option<&SpeakerId>,
) -> Result<SpeakerId, TurnError> {
    if !thread.is_ready() {
        return Err(TurnError::NotReady {
            thread: thread.id.clone(),
        });
    }
    if thread.episode_done {
        return Err(TurnError::EpisodeDone {
            thread: thread.id.clone(),
        });
    }
    if !thread.has_user(author) {
        return Err(TurnError::NotInThread {
            user: author.clone(),
            thread: thread.id.clone(),
        });
    }

    let assigned = thread
        .speaker_of(author)
        .ok_or_else(|| TurnError::NoSpeakerRole {
            user: author.clone(),
            thread: thread.id.clone(),
        })?;
    let speaker = declared.unwrap_or(assigned);
    if speaker != assigned {
        return Err(TurnError::WrongSpeaker {
            user: author.clone(),
            declared: speaker.clone(),
            assigned: assigned.clone(),
        });
    }

    let current = thread.current_speaker().ok_or_else(|| TurnError::NotReady {
        thread: thread.id.clone(),
    })?;
    if speaker != current {
        return Err(TurnError::NotCurrentSpeaker {
            expected: current.clone(),
            got: speaker.clone(),
        });
    }

    Ok(speaker.clone())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnAdvance {
    /// The speak order wrapped around, completing one turn.
    pub wrapped: bool,
    pub episode_done: bool,
    pub next_speaker: Option<SpeakerId>,
}

/// Move the thread to the next speaker.
///
/// Completing a full cycle counts one turn; reaching the budget ends the
/// episode.
pub fn advance_turn(thread: &mut ChatThread) -> TurnAdvance {
    let len = thread.speak_order.len();
    if len == 0 {
        return TurnAdvance {
            wrapped: false,
            episode_done: thread.episode_done,
            next_speaker: None,
        };
    }

    thread.current_speaker_idx = (thread.current_speaker_idx + 1) % len;
    let wrapped = thread.current_speaker_idx == 0;
    if wrapped {
        thread.current_turns += 1;
        thread.remaining_turns = thread.remaining_turns.saturating_sub(1);
        if thread.current_turns >= thread.max_turns {
            thread.episode_done = true;
        }
    }

    TurnAdvance {
        wrapped,
        episode_done: thread.episode_done,
        next_speaker: thread.current_speaker().cloned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::{
        CreationState, ThreadConfig, ThreadId, TopicId, UserRole, DEFAULT_HUMAN_SPEAKER,
    };

    fn ready_thread(max_turns: u32) -> ChatThread {
        let config = ThreadConfig {
            topic_name: "Cats".into(),
            endpoint: "dummy".into(),
            persona_id: None,
            limits: TopicLimits {
                max_turns_per_thread: max_turns,
                ..TopicLimits::default()
            },
        };
        let mut thread = ChatThread::new(ThreadId::new("t1"), TopicId::new("cats"), config, Utc::now());
        thread.speak_order = vec![SpeakerId::new(DEFAULT_HUMAN_SPEAKER), SpeakerId::moderator()];
        thread.max_turns = max_turns;
        thread.remaining_turns = max_turns;
        thread.creation = CreationState::Ready;
        thread.add_participant(UserId::new("alice"), UserRole::Human);
        thread.add_participant(UserId::new("bot01"), UserRole::Bot);
        thread
            .speakers
            .insert(UserId::new("alice"), SpeakerId::new(DEFAULT_HUMAN_SPEAKER));
        thread
            .speakers
            .insert(UserId::new("bot01"), SpeakerId::moderator());
        thread
    }

    #[test]
    fn test_budget_scales_with_seats() {
        let limits = TopicLimits {
            max_turns_per_thread: 5,
            max_human_users_per_thread: 3,
            ..TopicLimits::default()
        };
        assert_eq!(turn_budget(&limits), 15);
    }

    #[test]
    fn test_current_speaker_may_post() {
        let thread = ready_thread(3);
        let speaker = check_turn(&thread, &UserId::new("alice"), None).unwrap();
        assert_eq!(speaker.as_str(), DEFAULT_HUMAN_SPEAKER);
    }

    #[test]
    fn test_out_of_turn_is_rejected_without_mutation() {
        let thread = ready_thread(3);
        let before = thread.clone();

        let err = check_turn(&thread, &UserId::new("bot01"), None).unwrap_err();
        assert!(matches!(err, TurnError::NotCurrentSpeaker { .. }));
        assert_eq!(thread, before);
    }

    #[test]
    fn test_declared_label_must_match_assignment() {
        let thread = ready_thread(3);
        let err = check_turn(&thread, &UserId::new("alice"), Some(&SpeakerId::moderator()))
            .unwrap_err();
        assert!(matches!(err, TurnError::WrongSpeaker { .. }));
    }

    #[test]
    fn test_outsider_is_rejected() {
        let thread = ready_thread(3);
        let err = check_turn(&thread, &UserId::new("mallory"), None).unwrap_err();
        assert!(matches!(err, TurnError::NotInThread { .. }));
    }

    #[test]
    fn test_done_thread_rejects_messages() {
        let mut thread = ready_thread(3);
        thread.episode_done = true;
        let err = check_turn(&thread, &UserId::new("alice"), None).unwrap_err();
        assert!(matches!(err, TurnError::EpisodeDone { .. }));
    }

    #[test]
    fn test_advance_counts_wraps_until_done() {
        let mut thread = ready_thread(3);
        for round in 1..=3 {
            let first = advance_turn(&mut thread);
            assert!(!first.wrapped);
            assert_eq!(first.next_speaker, Some(SpeakerId::moderator()));

            let second = advance_turn(&mut thread);
            assert!(second.wrapped);
            assert_eq!(thread.current_turns, round);
            assert_eq!(thread.remaining_turns, 3 - round);
        }
        assert!(thread.episode_done);
        assert_eq!(thread.current_turns, 3);
    }

    #[test]
    fn test_advance_without_speak_order_is_noop() {
        let mut thread = ready_thread(3);
        thread.speak_order.clear();
        let advance = advance_turn(&mut thread);
        assert_eq!(advance.next_speaker, None);
        assert_eq!(thread.current_turns, 0);
    }
}
