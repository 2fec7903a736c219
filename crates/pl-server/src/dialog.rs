use std::time::Duration;

use pl_core::core::{
    bot_draft, replay_context, reply_target, BotError, ChatThread, MessageDraft, TransformChain,
    MAX_TEXT_LENGTH,
};

use crate::bots::BotFactory;

/// Drives the bot seat of a thread: rebuilds the bot from history, asks for
/// one utterance and runs it through the bot transform pipeline.
pub struct DialogOrchestrator {
    bots: BotFactory,
    transforms: TransformChain,
    reply_timeout: Duration,
}

impl DialogOrchestrator {
    pub fn new(bots: BotFactory, transforms: TransformChain, reply_timeout: Duration) -> Self {
        Self {
            bots,
            transforms,
            reply_timeout,
        }
    }

    pub fn bots(&self) -> &BotFactory {
        &self.bots
    }

    /// Ask the thread's bot for its next message.
    ///
    /// `None` means the bot passes this turn: it declined, failed, or ran
    /// out of time. The caller still advances the turn.
    pub async fn reply(&self, thread: &ChatThread) -> Option<MessageDraft> {
        let bot_user = thread.bot_user()?.clone();
        let config = &thread.config;
        let mut agent = match self
            .bots
            .create(&config.endpoint, config.persona_id.as_deref())
        {
            Ok(agent) => agent,
            Err(e) => {
                tracing::warn!(thread_id = %thread.id, error = %e, "cannot create bot");
                return None;
            }
        };

        let context = replay_context(thread);
        match context.split_last() {
            Some((last, earlier)) => {
                agent.init_chat_context(earlier);
                agent.hear(last);
            }
            None => agent.init_chat_context(&[]),
        }

        let target = reply_target(thread);
        let outcome = tokio::time::timeout(self.reply_timeout, agent.talk(target.as_ref())).await;
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                log_bot_failure(thread, agent.name(), &e);
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    thread_id = %thread.id,
                    bot = agent.name(),
                    timeout_ms = self.reply_timeout.as_millis() as u64,
                    "bot reply timed out"
                );
                return None;
            }
        };

        let draft = bot_draft(&bot_user, reply)?;
        let mut draft = self.transforms.apply(draft);
        if draft.text.chars().count() > MAX_TEXT_LENGTH {
            let cut: String = draft.text.chars().take(MAX_TEXT_LENGTH).collect();
            draft.rewrite(cut);
        }
        if draft.text.trim().is_empty() {
            return None;
        }
        Some(draft)
    }
}

fn log_bot_failure(thread: &ChatThread, bot: &str, err: &BotError) {
    tracing::warn!(thread_id = %thread.id, bot, error = %err, "bot reply failed");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pl_core::core::{
        MessageDraft, SpeakerId, ThreadConfig, ThreadId, TopicId, TopicLimits, Transform, UserId,
        UserRole,
    };

    use super::*;
    use crate::bots::{BotEngine, BotFactory, DUMMY_ENGINE};

    fn thread(endpoint: &str) -> ChatThread {
        let mut t = ChatThread::new(
            ThreadId::new("th-1"),
            TopicId::new("cats"),
            ThreadConfig {
                topic_name: "Cats".into(),
                endpoint: endpoint.into(),
                persona_id: None,
                limits: TopicLimits::default(),
            },
            Utc::now(),
        );
        t.speak_order = vec![SpeakerId::moderator(), SpeakerId::new("Human")];
        t.add_participant(UserId::new("bot01"), UserRole::Bot);
        t.add_participant(UserId::new("alice"), UserRole::Human);
        t.speakers
            .insert(UserId::new("bot01"), SpeakerId::moderator());
        t.speakers
            .insert(UserId::new("alice"), SpeakerId::new("Human"));
        t
    }

    struct Shout;

    impl Transform for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn transform(&self, mut draft: MessageDraft) -> MessageDraft {
            let upper = draft.text.to_uppercase();
            draft.rewrite(upper);
            draft
        }
    }

    #[tokio::test]
    async fn test_reply_tags_moderator_and_applies_transforms() {
        let dialog = DialogOrchestrator::new(
            BotFactory::dummy_only(),
            TransformChain::new(vec![Box::new(Shout)]),
            Duration::from_secs(5),
        );
        let draft = dialog.reply(&thread(DUMMY_ENGINE)).await.unwrap();
        assert_eq!(draft.user_id.as_str(), "bot01");
        assert_eq!(draft.text, "HELLO THERE! I AM THE MODERATOR.");
        assert_eq!(draft.data["speaker_id"], "Moderator");
        assert_eq!(draft.data["text_orig"], "Hello there! I am the Moderator.");
    }

    #[tokio::test]
    async fn test_unknown_engine_passes() {
        let dialog = DialogOrchestrator::new(
            BotFactory::dummy_only(),
            TransformChain::default(),
            Duration::from_secs(5),
        );
        assert!(dialog.reply(&thread("missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_engine_passes() {
        let bots = BotFactory::new(
            vec![(
                "remote".to_owned(),
                BotEngine::OpenAiChat(crate::bots::OpenAiChatSettings {
                    base_url: "http://127.0.0.1:1".into(),
                    model: "m".into(),
                    api_key: None,
                    temperature: None,
                    max_tokens: None,
                }),
            )],
            Vec::new(),
        );
        let dialog =
            DialogOrchestrator::new(bots, TransformChain::default(), Duration::from_secs(5));
        assert!(dialog.reply(&thread("remote")).await.is_none());
    }

    #[tokio::test]
    async fn test_silent_engine_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let bots = BotFactory::new(
            vec![(
                "silent".to_owned(),
                BotEngine::OpenAiChat(crate::bots::OpenAiChatSettings {
                    base_url: format!("http://{addr}"),
                    model: "m".into(),
                    api_key: None,
                    temperature: None,
                    max_tokens: None,
                }),
            )],
            Vec::new(),
        );
        let dialog =
            DialogOrchestrator::new(bots, TransformChain::default(), Duration::from_millis(150));

        let started = std::time::Instant::now();
        assert!(dialog.reply(&thread("silent")).await.is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_secs(2));
    }
}
