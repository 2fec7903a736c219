use std::future::Future;
use std::pin::Pin;

use pl_core::core::{
    BotAgent, BotError, BotReply, ContextMessage, Secret, SpeakerId, MODERATOR,
};
use serde_json::Value;

use super::Persona;

const INFERENCE_PATH: &str = "/v1/chat/completions";

#[derive(Clone, Debug)]
pub struct OpenAiChatSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<Secret>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Moderator backed by any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiChatBot {
    client: reqwest::Client,
    settings: OpenAiChatSettings,
    persona: Option<Persona>,
    context: Vec<ContextMessage>,
}

impl OpenAiChatBot {
    pub fn new(
        client: reqwest::Client,
        settings: OpenAiChatSettings,
        persona: Option<Persona>,
    ) -> Self {
        Self {
            client,
            settings,
            persona,
            context: Vec::new(),
        }
    }

    fn system_prompt(&self, target: Option<&SpeakerId>) -> String {
        let mut prompt = match &self.persona {
            Some(p) => format!("{}\n\n", p.prompt),
            None => String::new(),
        };
        prompt.push_str(&format!(
            "You are the {MODERATOR} of a group conversation. Reply with a single short message."
        ));
        if let Some(target) = target {
            prompt.push_str(&format!(" Address {target} next."));
        }
        prompt
    }

    pub fn build_request_body(&self, target: Option<&SpeakerId>) -> Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": self.system_prompt(target),
        })];
        for m in &self.context {
            let msg = if m.speaker_id.is_moderator() {
                serde_json::json!({"role": "assistant", "content": m.text})
            } else {
                serde_json::json!({
                    "role": "user",
                    "content": format!("{}: {}", m.speaker_id, m.text),
                })
            };
            messages.push(msg);
        }

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = self.settings.temperature {
                obj.insert("temperature".into(), t.into());
            }
            if let Some(m) = self.settings.max_tokens {
                obj.insert("max_tokens".into(), m.into());
            }
        }
        body
    }

    pub fn parse_reply(&self, body: &[u8]) -> Result<BotReply, BotError> {
        let resp: OaiResponseWire =
            serde_json::from_slice(body).map_err(|e| BotError::Parse(e.to_string()))?;

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let mut reply = BotReply::text(text.trim());
        reply
            .data
            .insert("engine".to_owned(), Value::String("openai-chat".to_owned()));
        reply.data.insert(
            "model".to_owned(),
            Value::String(resp.model.unwrap_or_else(|| self.settings.model.clone())),
        );
        if let Some(p) = &self.persona {
            reply
                .data
                .insert("persona".to_owned(), Value::String(p.id.clone()));
        }
        Ok(reply)
    }
}

impl BotAgent for OpenAiChatBot {
    fn name(&self) -> &str {
        "openai-chat"
    }

    fn init_chat_context(&mut self, context: &[ContextMessage]) {
        self.context = context.to_vec();
    }

    fn hear(&mut self, message: &ContextMessage) {
        self.context.push(message.clone());
    }

    fn talk<'a>(
        &'a mut self,
        target: Option<&'a SpeakerId>,
    ) -> Pin<Box<dyn Future<Output = Result<BotReply, BotError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}{}",
                self.settings.base_url.trim_end_matches('/'),
                INFERENCE_PATH
            );
            let mut req = self.client.post(&url).json(&self.build_request_body(target));
            if let Some(key) = &self.settings.api_key {
                req = req.bearer_auth(key.as_str());
            }

            let resp = req
                .send()
                .await
                .map_err(|e| BotError::Connection(e.to_string()))?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(BotError::HttpStatus { status, body });
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| BotError::Connection(e.to_string()))?;
            self.parse_reply(&bytes)
        })
    }
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(serde::Deserialize)]
struct OaiResponseWire {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OaiChoiceWire>,
}

#[derive(serde::Deserialize)]
struct OaiChoiceWire {
    message: OaiMessageWire,
}

#[derive(serde::Deserialize)]
struct OaiMessageWire {
    content: Option<String>,
}
