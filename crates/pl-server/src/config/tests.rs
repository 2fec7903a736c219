use super::*;

#[test]
fn test_parse_full_config() {
    let toml_str = r#"
[server]
listen = "127.0.0.1:9090"
external_url = "https://chat.example.org"

[logging]
level = "debug"
format = "pretty"

[storage]
database = "/var/lib/parley/chat.db"
chat_dir = "/var/lib/parley/exports"
topics_file = "topics.json"

[limits]
max_threads_per_user = 4
max_threads_per_topic = 10
max_turns_per_thread = 6
max_human_users_per_thread = 2
human_moderator = true
reward = "0.50"
creation_timeout_secs = 15

[chatbot]
default_engine = "gpt"
default_persona = "socratic"
reply_timeout_ms = 5000

[[bots]]
id = "gpt"
kind = "openai-chat"
base_url = "http://127.0.0.1:8000"
model = "llama3-70b"
api_key = "sk-local"
temperature = 0.7
max_tokens = 256

[[personas]]
id = "socratic"
name = "Socratic moderator"
prompt = "Ask one probing question at a time."

[[transforms.human]]
name = "truncate"
args = { max_chars = 500 }

[[transforms.bot]]
name = "sentence-split"
args = { max_toks = 40 }

[crowd]
moderator_qualification = "moderator"
qualified_workers = { moderator = ["A1", "A2"] }

[[ratings]]
name = "engaging"
question = "How engaging was the conversation?"
choices = ["1", "2", "3", "4", "5"]
"#;

    let config: AppConfig = toml::from_str(toml_str).unwrap();

    assert_eq!(config.server.listen, "127.0.0.1:9090");
    assert_eq!(
        config.server.external_url.as_deref(),
        Some("https://chat.example.org")
    );

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "pretty");

    assert_eq!(config.storage.database, "/var/lib/parley/chat.db");
    assert_eq!(config.storage.chat_dir, "/var/lib/parley/exports");
    assert_eq!(config.storage.topics_file.as_deref(), Some("topics.json"));

    assert_eq!(config.limits.max_threads_per_user, Some(4));
    assert_eq!(config.limits.max_threads_per_topic, 10);
    assert_eq!(config.limits.max_turns_per_thread, 6);
    assert_eq!(config.limits.max_human_users_per_thread, 2);
    assert!(config.limits.human_moderator);
    assert_eq!(config.limits.reward, "0.50");
    assert_eq!(config.limits.creation_timeout_secs, 15);

    assert_eq!(config.chatbot.default_engine, "gpt");
    assert_eq!(config.chatbot.default_persona.as_deref(), Some("socratic"));
    assert_eq!(config.chatbot.reply_timeout_ms, 5000);

    assert_eq!(config.bots.len(), 1);
    let bot = &config.bots[0];
    assert_eq!(bot.id, "gpt");
    assert_eq!(bot.kind, BotKindConfig::OpenaiChat);
    assert_eq!(bot.base_url.as_deref(), Some("http://127.0.0.1:8000"));
    assert_eq!(bot.model.as_deref(), Some("llama3-70b"));
    assert_eq!(bot.max_tokens, Some(256));

    assert_eq!(config.personas.len(), 1);
    assert_eq!(config.personas[0].id, "socratic");

    assert_eq!(config.transforms.human.len(), 1);
    assert_eq!(config.transforms.human[0].name, "truncate");
    assert_eq!(config.transforms.human[0].args["max_chars"], 500);
    assert_eq!(config.transforms.bot[0].args["max_toks"], 40);

    let crowd = config.crowd.expect("crowd section");
    assert_eq!(crowd.name, "local");
    assert_eq!(crowd.moderator_qualification.as_deref(), Some("moderator"));
    assert_eq!(crowd.qualified_workers["moderator"], vec!["A1", "A2"]);

    assert_eq!(config.ratings.len(), 1);
    assert_eq!(config.ratings[0].choices.len(), 5);
}

#[test]
fn test_parse_minimal_config() {
    let config: AppConfig = toml::from_str("").unwrap();

    assert_eq!(config.server.listen, "0.0.0.0:7070");
    assert!(config.server.external_url.is_none());
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.storage.database, "parley.db");
    assert_eq!(config.limits.max_threads_per_topic, 3);
    assert_eq!(config.limits.max_turns_per_thread, 100);
    assert_eq!(config.limits.max_human_users_per_thread, 1);
    assert_eq!(config.limits.creation_timeout_secs, 30);
    assert_eq!(config.chatbot.default_engine, "dummy");
    assert_eq!(config.chatbot.reply_timeout_ms, 30_000);
    assert!(config.bots.is_empty());
    assert!(config.crowd.is_none());
    assert!(config.ratings.is_empty());
}

#[test]
fn test_invalid_bot_kind_rejected() {
    let toml_str = r#"
[[bots]]
id = "weird"
kind = "carrier-pigeon"
"#;

    let result: Result<AppConfig, _> = toml::from_str(toml_str);
    assert!(result.is_err());
}

#[test]
fn test_transform_without_args() {
    let toml_str = r#"
[[transforms.human]]
name = "noop"
"#;

    let config: AppConfig = toml::from_str(toml_str).unwrap();
    assert!(config.transforms.human[0].args.is_empty());
    assert!(config.transforms.bot.is_empty());
}

#[test]
fn test_from_file_reads_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[server]\nlisten = \"127.0.0.1:1234\"\n").unwrap();

    let config = AppConfig::from_file(&path).unwrap();
    assert_eq!(config.server.listen, "127.0.0.1:1234");
}
