use std::future::Future;
use std::pin::Pin;

use pl_core::core::{BotAgent, BotError, BotReply, ContextMessage, SpeakerId, MODERATOR};
use serde_json::Value;

const ECHO_TAIL_CHARS: usize = 30;

/// Echo bot for development and tests.
#[derive(Default)]
pub struct DummyBot {
    last: Option<ContextMessage>,
    heard: usize,
}

impl DummyBot {
    pub fn new() -> Self {
        Self::default()
    }

    fn reply_text(&self) -> String {
        let Some(last) = &self.last else {
            return format!("Hello there! I am the {MODERATOR}.");
        };
        if last.text.trim().eq_ignore_ascii_case("ping") {
            return "pong".to_owned();
        }
        let count = last.text.chars().count();
        let tail: String = last
            .text
            .chars()
            .skip(count.saturating_sub(ECHO_TAIL_CHARS))
            .collect();
        format!("dummybot reply --{tail}")
    }
}

impl BotAgent for DummyBot {
    fn name(&self) -> &str {
        "dummy"
    }

    fn init_chat_context(&mut self, context: &[ContextMessage]) {
        self.heard = context.len();
        self.last = context.last().cloned();
    }

    fn hear(&mut self, message: &ContextMessage) {
        self.heard += 1;
        self.last = Some(message.clone());
    }

    fn talk<'a>(
        &'a mut self,
        target: Option<&'a SpeakerId>,
    ) -> Pin<Box<dyn Future<Output = Result<BotReply, BotError>> + Send + 'a>> {
        Box::pin(async move {
            let mut reply = BotReply::text(self.reply_text());
            reply
                .data
                .insert("engine".to_owned(), Value::String("dummy".to_owned()));
            reply
                .data
                .insert("context_len".to_owned(), Value::from(self.heard));
            if let Some(target) = target {
                reply
                    .data
                    .insert("target".to_owned(), Value::String(target.to_string()));
            }
            Ok(reply)
        })
    }
}
