use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use pl_core::core::{LimitPolicy, Secret, SeedUtterance, Topic, TopicId, TopicLimits, TransformChain};
use pl_store::{ChatStore, FileExportSink};
use serde::Deserialize;

use crate::bots::{BotEngine, BotFactory, OpenAiChatSettings, Persona, DUMMY_ENGINE};
use crate::config::{AppConfig, BotKindConfig, LimitsConfig};
use crate::crowd::LocalCrowd;
use crate::dialog::DialogOrchestrator;
use crate::service::{validate_limits, ChatService, ServiceSettings};
use crate::transforms::build_chain;

// ---------------------------------------------------------------------------
// RuntimeConfig — fully validated runtime configuration
// ---------------------------------------------------------------------------

pub struct RuntimeConfig {
    pub listen_addr: String,
    pub external_url: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub database: String,
    pub chat_dir: String,
    pub topics_file: Option<String>,
    pub bots: BotFactory,
    pub human_transforms: TransformChain,
    pub bot_transforms: TransformChain,
    pub reply_timeout: Duration,
    pub crowd: Option<LocalCrowd>,
    pub settings: ServiceSettings,
}

impl RuntimeConfig {
    /// Wire the chat service over `store`.
    pub fn into_service(self, store: Arc<dyn ChatStore>) -> ChatService {
        let dialog = DialogOrchestrator::new(self.bots, self.bot_transforms, self.reply_timeout);
        let exporter = Arc::new(FileExportSink::new(self.chat_dir));
        let service = ChatService::new(
            store,
            dialog,
            self.human_transforms,
            exporter,
            self.settings,
        );
        match self.crowd {
            Some(crowd) => service.with_crowd(Arc::new(crowd)),
            None => service,
        }
    }
}

pub fn default_limits(limits: &LimitsConfig) -> TopicLimits {
    TopicLimits {
        max_threads: limits.max_threads_per_topic,
        max_turns_per_thread: limits.max_turns_per_thread,
        max_human_users_per_thread: limits.max_human_users_per_thread,
        human_moderator: limits.human_moderator,
        reward: limits.reward.clone(),
    }
}

// ---------------------------------------------------------------------------
// into_runtime — converts raw AppConfig into validated RuntimeConfig
// ---------------------------------------------------------------------------

pub fn into_runtime(config: AppConfig) -> Result<RuntimeConfig, anyhow::Error> {
    // Detect duplicate bot IDs
    let mut seen_bots = HashSet::with_capacity(config.bots.len());
    for bot in &config.bots {
        ensure!(seen_bots.insert(&bot.id), "duplicate bot id: {}", bot.id);
    }

    // Detect duplicate persona IDs
    let mut seen_personas = HashSet::with_capacity(config.personas.len());
    for persona in &config.personas {
        ensure!(
            seen_personas.insert(&persona.id),
            "duplicate persona id: {}",
            persona.id
        );
    }

    // Convert bots → engine table; the dummy engine is always available
    let mut engines = Vec::with_capacity(config.bots.len() + 1);
    if !config.bots.iter().any(|b| b.id == DUMMY_ENGINE) {
        engines.push((DUMMY_ENGINE.to_owned(), BotEngine::Dummy));
    }
    for bot in config.bots {
        let engine = match bot.kind {
            BotKindConfig::Dummy => BotEngine::Dummy,
            BotKindConfig::OpenaiChat => {
                let base_url = bot
                    .base_url
                    .with_context(|| format!("bot {} needs base_url", bot.id))?;
                let model = bot
                    .model
                    .with_context(|| format!("bot {} needs model", bot.id))?;
                BotEngine::OpenAiChat(OpenAiChatSettings {
                    base_url,
                    model,
                    api_key: bot.api_key.map(Secret::new),
                    temperature: bot.temperature,
                    max_tokens: bot.max_tokens,
                })
            }
        };
        engines.push((bot.id, engine));
    }
    let personas = config
        .personas
        .into_iter()
        .map(|p| Persona {
            id: p.id,
            name: p.name,
            prompt: p.prompt,
        })
        .collect();
    let bots = BotFactory::new(engines, personas);

    let chatbot = config.chatbot;
    bots.ensure(&chatbot.default_engine, chatbot.default_persona.as_deref())
        .context("invalid [chatbot] defaults")?;
    ensure!(chatbot.reply_timeout_ms > 0, "reply_timeout_ms must be positive");

    let limits = default_limits(&config.limits);
    validate_limits(&limits).context("invalid [limits]")?;
    ensure!(
        config.limits.max_threads_per_user != Some(0),
        "max_threads_per_user must be positive when set"
    );
    ensure!(
        config.limits.creation_timeout_secs > 0,
        "creation_timeout_secs must be positive"
    );

    let human_transforms =
        build_chain(&config.transforms.human).context("invalid [[transforms.human]]")?;
    let bot_transforms =
        build_chain(&config.transforms.bot).context("invalid [[transforms.bot]]")?;

    let moderator_qualification = config
        .crowd
        .as_ref()
        .and_then(|c| c.moderator_qualification.clone());
    let crowd = config.crowd.as_ref().map(LocalCrowd::from_config);

    let mut rating_names = HashSet::with_capacity(config.ratings.len());
    for question in &config.ratings {
        ensure!(
            rating_names.insert(&question.name),
            "duplicate rating question: {}",
            question.name
        );
    }

    Ok(RuntimeConfig {
        listen_addr: config.server.listen,
        external_url: config.server.external_url,
        log_level: config.logging.level,
        log_format: config.logging.format,
        database: config.storage.database,
        chat_dir: config.storage.chat_dir,
        topics_file: config.storage.topics_file,
        bots,
        human_transforms,
        bot_transforms,
        reply_timeout: Duration::from_millis(chatbot.reply_timeout_ms),
        crowd,
        settings: ServiceSettings {
            limits: LimitPolicy::new(config.limits.max_threads_per_user),
            default_limits: limits,
            default_engine: chatbot.default_engine,
            default_persona: chatbot.default_persona,
            creation_timeout: chrono::Duration::seconds(config.limits.creation_timeout_secs as i64),
            moderator_qualification,
            rating_questions: config.ratings,
        },
    })
}

// ---------------------------------------------------------------------------
// Topics file
// ---------------------------------------------------------------------------

/// One entry of the topics file. Limits left out fall back to `[limits]`.
#[derive(Debug, Deserialize)]
struct TopicEntry {
    id: String,
    name: String,
    conversation: Option<Vec<SeedUtterance>>,
    endpoint: Option<String>,
    persona_id: Option<String>,
    max_threads: Option<u32>,
    max_turns_per_thread: Option<u32>,
    max_human_users_per_thread: Option<u32>,
    human_moderator: Option<bool>,
    reward: Option<String>,
    ext_id: Option<String>,
    ext_src: Option<String>,
}

/// Parse a JSON array of topic entries against the runtime defaults.
pub fn parse_topics(json: &str, runtime: &RuntimeConfig) -> Result<Vec<Topic>, anyhow::Error> {
    let entries: Vec<TopicEntry> = serde_json::from_str(json).context("invalid topics JSON")?;
    let defaults = &runtime.settings.default_limits;
    let now = chrono::Utc::now();

    let mut seen = HashSet::with_capacity(entries.len());
    let mut topics = Vec::with_capacity(entries.len());
    for entry in entries {
        ensure!(!entry.id.trim().is_empty(), "topic id must not be empty");
        ensure!(seen.insert(entry.id.clone()), "duplicate topic id: {}", entry.id);
        let conversation = entry
            .conversation
            .with_context(|| format!("topic {} has no conversation", entry.id))?;

        let limits = TopicLimits {
            max_threads: entry.max_threads.unwrap_or(defaults.max_threads),
            max_turns_per_thread: entry
                .max_turns_per_thread
                .unwrap_or(defaults.max_turns_per_thread),
            max_human_users_per_thread: entry
                .max_human_users_per_thread
                .unwrap_or(defaults.max_human_users_per_thread),
            human_moderator: entry.human_moderator.unwrap_or(defaults.human_moderator),
            reward: entry.reward.unwrap_or_else(|| defaults.reward.clone()),
        };
        validate_limits(&limits).with_context(|| format!("topic {}", entry.id))?;

        let endpoint = entry
            .endpoint
            .unwrap_or_else(|| runtime.settings.default_engine.clone());
        let persona_id = entry
            .persona_id
            .or_else(|| runtime.settings.default_persona.clone());
        if !limits.human_moderator {
            runtime
                .bots
                .ensure(&endpoint, persona_id.as_deref())
                .with_context(|| format!("topic {}", entry.id))?;
        }

        topics.push(Topic {
            id: TopicId::new(entry.id),
            name: entry.name,
            super_topic_id: None,
            conversation,
            endpoint,
            persona_id,
            limits,
            ext_id: entry.ext_id,
            ext_src: entry.ext_src,
            created_at: now,
        });
    }
    Ok(topics)
}

pub fn load_topics_file(path: &Path, runtime: &RuntimeConfig) -> Result<Vec<Topic>, anyhow::Error> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read topics file {}", path.display()))?;
    parse_topics(&content, runtime)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
