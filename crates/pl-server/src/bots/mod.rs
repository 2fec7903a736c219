pub mod dummy;
pub mod openai_chat;

use pl_core::core::{BotAgent, ConfigError};

pub use dummy::DummyBot;
pub use openai_chat::{OpenAiChatBot, OpenAiChatSettings};

/// Engine id of the built-in echo bot.
pub const DUMMY_ENGINE: &str = "dummy";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

#[derive(Clone, Debug)]
pub enum BotEngine {
    Dummy,
    OpenAiChat(OpenAiChatSettings),
}

/// Lookup table from engine id to engine, built once at startup.
///
/// Every reply gets a fresh agent from [`BotFactory::create`]; agents hold no
/// state between calls.
pub struct BotFactory {
    engines: Vec<(String, BotEngine)>,
    personas: Vec<Persona>,
    client: reqwest::Client,
}

impl BotFactory {
    pub fn new(engines: Vec<(String, BotEngine)>, personas: Vec<Persona>) -> Self {
        Self {
            engines,
            personas,
            client: reqwest::Client::new(),
        }
    }

    /// Only the built-in dummy engine, no personas.
    pub fn dummy_only() -> Self {
        Self::new(vec![(DUMMY_ENGINE.to_owned(), BotEngine::Dummy)], Vec::new())
    }

    pub fn engine_ids(&self) -> Vec<&str> {
        self.engines.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn has_engine(&self, engine: &str) -> bool {
        self.engines.iter().any(|(id, _)| id == engine)
    }

    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Check that `engine` and `persona` can be instantiated.
    pub fn ensure(&self, engine: &str, persona: Option<&str>) -> Result<(), ConfigError> {
        if !self.has_engine(engine) {
            return Err(ConfigError::UnknownEngine(engine.to_owned()));
        }
        if let Some(p) = persona {
            if self.persona(p).is_none() {
                return Err(ConfigError::UnknownPersona(p.to_owned()));
            }
        }
        Ok(())
    }

    pub fn create(
        &self,
        engine: &str,
        persona: Option<&str>,
    ) -> Result<Box<dyn BotAgent>, ConfigError> {
        self.ensure(engine, persona)?;
        let persona = persona.and_then(|p| self.persona(p)).cloned();
        let kind = self
            .engines
            .iter()
            .find(|(id, _)| id == engine)
            .map(|(_, kind)| kind)
            .ok_or_else(|| ConfigError::UnknownEngine(engine.to_owned()))?;

        let agent: Box<dyn BotAgent> = match kind {
            BotEngine::Dummy => Box::new(DummyBot::new()),
            BotEngine::OpenAiChat(settings) => Box::new(OpenAiChatBot::new(
                self.client.clone(),
                settings.clone(),
                persona,
            )),
        };
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> BotFactory {
        BotFactory::new(
            vec![
                (DUMMY_ENGINE.to_owned(), BotEngine::Dummy),
                (
                    "gpt".to_owned(),
                    BotEngine::OpenAiChat(OpenAiChatSettings {
                        base_url: "http://127.0.0.1:1".into(),
                        model: "gpt-4".into(),
                        api_key: None,
                        temperature: None,
                        max_tokens: None,
                    }),
                ),
            ],
            vec![Persona {
                id: "socratic".into(),
                name: "Socratic".into(),
                prompt: "Ask questions.".into(),
            }],
        )
    }

    #[test]
    fn test_factory_creates_known_engines() {
        let f = factory();
        assert_eq!(f.create("dummy", None).unwrap().name(), "dummy");
        assert_eq!(
            f.create("gpt", Some("socratic")).unwrap().name(),
            "openai-chat"
        );
        assert_eq!(f.engine_ids(), vec!["dummy", "gpt"]);
    }

    #[test]
    fn test_unknown_engine_is_config_error() {
        let err = factory().create("nope", None).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownEngine(_)));
    }

    #[test]
    fn test_unknown_persona_is_config_error() {
        let err = factory().ensure("dummy", Some("pirate")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPersona(_)));
    }
}
