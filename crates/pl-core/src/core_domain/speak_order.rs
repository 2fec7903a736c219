use crate::core::{SeedUtterance, SpeakerId, Topic, TopicLimits, DEFAULT_HUMAN_SPEAKER};

// ---------------------------------------------------------------------------
// Speaker-order planning (pure)
// ---------------------------------------------------------------------------

/// Number of speaker labels played by human participants.
///
/// When a human moderates, one of the human seats belongs to the Moderator.
pub fn human_label_count(limits: &TopicLimits) -> usize {
    let seats = limits.max_human_users_per_thread as usize;
    let labels = if limits.human_moderator {
        seats.saturating_sub(1)
    } else {
        seats
    };
    labels.max(1)
}

/// Distinct human speaker labels from the seed conversation, most recent
/// first, capped at `limit`.
///
/// `Topic` framing lines and the Moderator itself are never human labels.
pub fn seed_speakers(conversation: &[SeedUtterance], limit: usize) -> Vec<SpeakerId> {
    let mut labels: Vec<SpeakerId> = Vec::new();
    for utterance in conversation.iter().rev() {
        if labels.len() >= limit {
            break;
        }
        let speaker = &utterance.speaker_id;
        if speaker.is_topic() || speaker.is_moderator() || labels.contains(speaker) {
            continue;
        }
        labels.push(speaker.clone());
    }
    labels
}

/// Plan the cyclic speak order for a new thread of `topic`.
///
/// An empty seed conversation yields `[Human, Moderator]`. Otherwise each
/// human label (most recent speaker first) is preceded by a Moderator slot,
/// so the Moderator speaks between every pair of human turns.
pub fn plan_speak_order(topic: &Topic) -> Vec<SpeakerId> {
    let labels = seed_speakers(&topic.conversation, human_label_count(&topic.limits));
    if labels.is_empty() {
        return vec![
            SpeakerId::new(DEFAULT_HUMAN_SPEAKER),
            SpeakerId::moderator(),
        ];
    }

    let mut order = Vec::with_capacity(labels.len() * 2);
    for label in labels {
        order.push(SpeakerId::moderator());
        order.push(label);
    }
    order
}

/// Human labels in the order joiners should claim them.
///
/// Labels come from the speak order (most recent seed speaker first). With
/// more than one label the most recent seed speaker is claimed last, so the
/// first joiner answers the line that ends the seed conversation.
pub fn joiner_labels(speak_order: &[SpeakerId]) -> Vec<SpeakerId> {
    let mut labels: Vec<SpeakerId> = Vec::new();
    for speaker in speak_order {
        if !speaker.is_moderator() && !labels.contains(speaker) {
            labels.push(speaker.clone());
        }
    }
    if labels.len() > 1 {
        labels.rotate_left(1);
    }
    labels
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::TopicId;

    fn utterance(speaker: &str, text: &str) -> SeedUtterance {
        SeedUtterance {
            speaker_id: SpeakerId::new(speaker),
            text: text.into(),
        }
    }

    fn topic(conversation: Vec<SeedUtterance>, max_human: u32, human_moderator: bool) -> Topic {
        Topic {
            id: TopicId::new("t"),
            name: "Test".into(),
            super_topic_id: None,
            conversation,
            endpoint: "dummy".into(),
            persona_id: None,
            limits: TopicLimits {
                max_human_users_per_thread: max_human,
                human_moderator,
                ..TopicLimits::default()
            },
            ext_id: None,
            ext_src: None,
            created_at: Utc::now(),
        }
    }

    fn labels(order: &[SpeakerId]) -> Vec<&str> {
        order.iter().map(SpeakerId::as_str).collect()
    }

    #[test]
    fn test_empty_seed_defaults_to_human_then_moderator() {
        let order = plan_speak_order(&topic(vec![], 1, false));
        assert_eq!(labels(&order), vec!["Human", "Moderator"]);
    }

    #[test]
    fn test_two_speakers_most_recent_first() {
        let t = topic(
            vec![
                utterance("Topic", "Cats or dogs?"),
                utterance("a", "Cats."),
                utterance("b", "Dogs."),
            ],
            2,
            false,
        );
        let order = plan_speak_order(&t);
        assert_eq!(labels(&order), vec!["Moderator", "b", "Moderator", "a"]);
    }

    #[test]
    fn test_labels_capped_by_human_seats() {
        let t = topic(
            vec![
                utterance("a", "1"),
                utterance("b", "2"),
                utterance("c", "3"),
            ],
            2,
            false,
        );
        assert_eq!(
            labels(&plan_speak_order(&t)),
            vec!["Moderator", "c", "Moderator", "b"]
        );
    }

    #[test]
    fn test_human_moderator_takes_a_seat() {
        let t = topic(
            vec![
                utterance("a", "1"),
                utterance("b", "2"),
                utterance("c", "3"),
            ],
            3,
            true,
        );
        assert_eq!(
            labels(&plan_speak_order(&t)),
            vec!["Moderator", "c", "Moderator", "b"]
        );
    }

    #[test]
    fn test_repeated_speakers_collapse() {
        let t = topic(
            vec![
                utterance("a", "1"),
                utterance("b", "2"),
                utterance("a", "3"),
                utterance("Moderator", "4"),
            ],
            5,
            false,
        );
        assert_eq!(
            labels(&plan_speak_order(&t)),
            vec!["Moderator", "a", "Moderator", "b"]
        );
    }

    #[test]
    fn test_topic_only_seed_falls_back_to_default() {
        let t = topic(vec![utterance("Topic", "Discuss.")], 1, false);
        assert_eq!(labels(&plan_speak_order(&t)), vec!["Human", "Moderator"]);
    }

    #[test]
    fn test_joiner_labels_put_latest_speaker_last() {
        let order = vec![
            SpeakerId::moderator(),
            SpeakerId::new("b"),
            SpeakerId::moderator(),
            SpeakerId::new("a"),
        ];
        assert_eq!(labels(&joiner_labels(&order)), vec!["a", "b"]);

        let single = vec![SpeakerId::new("Human"), SpeakerId::moderator()];
        assert_eq!(labels(&joiner_labels(&single)), vec!["Human"]);
    }
}
