use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pl_core::core::{
    bot_draft, ContextMessage, Secret, SpeakerId, UserId, BOT_USER, DEFAULT_HUMAN_SPEAKER,
    DEV_USER, MODERATOR,
};
use pl_server::bootstrap::{self, RuntimeConfig};
use pl_server::config::AppConfig;
use pl_server::handler::{build_router, AppState};
use pl_server::ping::{spawn_external_probe, ExternalUrlStatus, PingProbe};
use pl_server::service::SystemSecrets;
use pl_server::telemetry;
use pl_store::SqliteChatStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;

const ADMIN_SECRET_ENV: &str = "PARLEY_ADMIN_SECRET";
const DEV_SECRET_ENV: &str = "PARLEY_DEV_SECRET";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "parley", about = "parley multi-party chat evaluation server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (default).
    Serve,
    /// Validate configuration file and exit.
    Validate,
    /// Create the schema, system users and topics, then exit.
    InitDb {
        /// Topics file; overrides `storage.topics_file`.
        #[arg(long)]
        topics: Option<PathBuf>,
    },
    /// Talk to a bot engine from the terminal.
    Chat {
        #[arg(long)]
        engine: Option<String>,
        #[arg(long)]
        persona: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(&cli.config).await,
        Command::Validate => run_validate(&cli.config),
        Command::InitDb { topics } => run_init_db(&cli.config, topics).await,
        Command::Chat { engine, persona } => run_chat(&cli.config, engine, persona).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_runtime(path: &Path) -> Result<RuntimeConfig, anyhow::Error> {
    let config = AppConfig::from_file(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    bootstrap::into_runtime(config).context("config invalid")
}

fn run_validate(path: &Path) -> Result<(), anyhow::Error> {
    let runtime = load_runtime(path)?;
    if let Some(topics_file) = &runtime.topics_file {
        let topics = bootstrap::load_topics_file(Path::new(topics_file), &runtime)?;
        println!("Topics valid: {} ({} topics)", topics_file, topics.len());
    }
    println!("Config valid: {}", path.display());
    Ok(())
}

fn system_secrets() -> SystemSecrets {
    let read = |var: &str, fallback: &str| match std::env::var(var) {
        Ok(value) if !value.is_empty() => Secret::new(value),
        _ => {
            tracing::warn!(var, "secret not set, using built-in default");
            Secret::new(fallback)
        }
    };
    SystemSecrets {
        admin: read(ADMIN_SECRET_ENV, "parley-admin"),
        dev: read(DEV_SECRET_ENV, "parley-dev"),
    }
}

fn open_store(path: &str) -> Result<SqliteChatStore, anyhow::Error> {
    SqliteChatStore::new(Path::new(path)).with_context(|| format!("cannot open database {path}"))
}

async fn run_init_db(path: &Path, topics: Option<PathBuf>) -> Result<(), anyhow::Error> {
    let runtime = load_runtime(path)?;
    telemetry::init(&runtime.log_level, "pretty");

    let topics_path = topics.or_else(|| runtime.topics_file.as_ref().map(PathBuf::from));
    let topics = match &topics_path {
        Some(p) => bootstrap::load_topics_file(p, &runtime)?,
        None => Vec::new(),
    };

    let store = open_store(&runtime.database)?;
    let service = runtime.into_service(Arc::new(store));
    let report = service.init_db(topics, system_secrets()).await?;
    println!(
        "users created: {}, topics created: {}, topics skipped: {}",
        report.users_created, report.topics_created, report.topics_skipped
    );
    Ok(())
}

async fn run_serve(path: &Path) -> Result<(), anyhow::Error> {
    let runtime = load_runtime(path)?;
    telemetry::init(&runtime.log_level, &runtime.log_format);

    let topics = match &runtime.topics_file {
        Some(p) => bootstrap::load_topics_file(Path::new(p), &runtime)?,
        None => Vec::new(),
    };
    let listen_addr = runtime.listen_addr.clone();
    let external_url = runtime.external_url.clone();

    let store = open_store(&runtime.database)?;
    let service = runtime.into_service(Arc::new(store));
    let report = service.init_db(topics, system_secrets()).await?;
    tracing::info!(
        users_created = report.users_created,
        topics_created = report.topics_created,
        "database ready"
    );

    let url_status = Arc::new(RwLock::new(ExternalUrlStatus::NotConfigured));
    if let Some(url) = external_url {
        let probe = PingProbe::new(PROBE_TIMEOUT).context("cannot build probe client")?;
        spawn_external_probe(url, probe, Arc::clone(&url_status));
    }

    let state = Arc::new(AppState {
        service,
        external_url: url_status,
    });

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("cannot bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "parley listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn run_chat(
    path: &Path,
    engine: Option<String>,
    persona: Option<String>,
) -> Result<(), anyhow::Error> {
    let runtime = load_runtime(path)?;
    let engine = engine.unwrap_or_else(|| runtime.settings.default_engine.clone());
    let persona = persona.or_else(|| runtime.settings.default_persona.clone());
    let mut agent = runtime.bots.create(&engine, persona.as_deref())?;
    agent.init_chat_context(&[]);

    let human = SpeakerId::new(DEFAULT_HUMAN_SPEAKER);
    let you = UserId::new(DEV_USER);
    let bot = UserId::new(BOT_USER);
    println!("Talking to {engine}. An empty line quits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let reply = tokio::time::timeout(runtime.reply_timeout, agent.talk(Some(&human)))
            .await
            .context("bot timed out")??;
        let text = match bot_draft(&bot, reply) {
            Some(draft) => runtime.bot_transforms.apply(draft).text,
            None => String::new(),
        };
        println!("{MODERATOR}: {text}");
        agent.hear(&ContextMessage {
            speaker_id: SpeakerId::moderator(),
            user_id: bot.clone(),
            text,
            is_seed: false,
        });

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        agent.hear(&ContextMessage {
            speaker_id: human.clone(),
            user_id: you.clone(),
            text: line.to_owned(),
            is_seed: false,
        });
    }
    Ok(())
}
