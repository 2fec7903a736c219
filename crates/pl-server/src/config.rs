use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub chatbot: ChatbotConfig,
    #[serde(default)]
    pub bots: Vec<BotConfig>,
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
    #[serde(default)]
    pub transforms: TransformsConfig,
    pub crowd: Option<CrowdConfig>,
    #[serde(default)]
    pub ratings: Vec<RatingQuestion>,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Public base URL, probed once at startup when set.
    pub external_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7070".to_owned(),
            external_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "json".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: String,
    /// Directory finished threads are exported to.
    pub chat_dir: String,
    pub topics_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "parley.db".to_owned(),
            chat_dir: "data".to_owned(),
            topics_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_threads_per_user: Option<u32>,
    pub max_threads_per_topic: u32,
    pub max_turns_per_thread: u32,
    pub max_human_users_per_thread: u32,
    pub human_moderator: bool,
    pub reward: String,
    pub creation_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_threads_per_user: None,
            max_threads_per_topic: 3,
            max_turns_per_thread: 100,
            max_human_users_per_thread: 1,
            human_moderator: false,
            reward: "0.0".to_owned(),
            creation_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatbotConfig {
    pub default_engine: String,
    pub default_persona: Option<String>,
    pub reply_timeout_ms: u64,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            default_engine: "dummy".to_owned(),
            default_persona: None,
            reply_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub id: String,
    pub kind: BotKindConfig,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BotKindConfig {
    Dummy,
    OpenaiChat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    pub id: String,
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransformsConfig {
    pub human: Vec<TransformConfig>,
    pub bot: Vec<TransformConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrowdConfig {
    #[serde(default = "default_crowd_name")]
    pub name: String,
    pub moderator_qualification: Option<String>,
    /// Worker ids holding each qualification.
    #[serde(default)]
    pub qualified_workers: HashMap<String, Vec<String>>,
}

fn default_crowd_name() -> String {
    "local".to_owned()
}

/// A post-conversation question shown to raters and recorded with exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingQuestion {
    pub name: String,
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

#[cfg(test)]
mod tests;
