use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use pl_core::core::Secret;
use pl_server::bootstrap;
use pl_server::config::{AppConfig, BotConfig, BotKindConfig};
use pl_server::handler::{build_router, AppState};
use pl_server::ping::ExternalUrlStatus;
use pl_server::service::SystemSecrets;
use pl_store::SqliteChatStore;

// ---------------------------------------------------------------------------
// MockBotServer — mimics an OpenAI-compatible chat completions backend
// ---------------------------------------------------------------------------

struct MockConfig {
    response_body: String,
    status_code: u16,
    hits: AtomicUsize,
}

pub struct MockBotServer {
    addr: SocketAddr,
    config: Arc<MockConfig>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockBotServer {
    pub async fn start(reply: &str) -> Self {
        Self::start_with_status(&sample_completion(reply), 200).await
    }

    pub async fn start_with_status(response_body: &str, status: u16) -> Self {
        let config = Arc::new(MockConfig {
            response_body: response_body.to_owned(),
            status_code: status,
            hits: AtomicUsize::new(0),
        });

        let app = axum::Router::new()
            .route("/v1/chat/completions", post(mock_completion_handler))
            .with_state(Arc::clone(&config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            config,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.config.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockBotServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

async fn mock_completion_handler(State(config): State<Arc<MockConfig>>, _body: Bytes) -> Response {
    config.hits.fetch_add(1, Ordering::SeqCst);
    let status =
        StatusCode::from_u16(config.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        config.response_body.clone(),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// TestServer — a real parley server over an in-memory store
// ---------------------------------------------------------------------------

pub struct TestServer {
    pub addr: SocketAddr,
    client: reqwest::Client,
    export_dir: tempfile::TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start with the built-in dummy bot and the given topics file content.
    pub async fn start(topics_json: &str) -> Self {
        Self::start_with_config(AppConfig::default(), topics_json).await
    }

    /// Start with an `openai-chat` bot named `gpt` as the default engine.
    pub async fn start_with_bot(bot_url: &str, topics_json: &str) -> Self {
        let mut config = AppConfig::default();
        config.bots.push(BotConfig {
            id: "gpt".to_owned(),
            kind: BotKindConfig::OpenaiChat,
            base_url: Some(bot_url.to_owned()),
            model: Some(TEST_MODEL.to_owned()),
            api_key: Some("sk-test".to_owned()),
            temperature: None,
            max_tokens: None,
        });
        config.chatbot.default_engine = "gpt".to_owned();
        config.chatbot.reply_timeout_ms = 2_000;
        Self::start_with_config(config, topics_json).await
    }

    pub async fn start_with_config(mut config: AppConfig, topics_json: &str) -> Self {
        let export_dir = tempfile::tempdir().expect("temp dir");
        config.storage.chat_dir = export_dir.path().display().to_string();

        let runtime = bootstrap::into_runtime(config).expect("test config should be valid");
        let topics = bootstrap::parse_topics(topics_json, &runtime).expect("valid topics");

        let store = SqliteChatStore::new_in_memory().expect("in-memory store");
        let service = runtime.into_service(Arc::new(store));
        service
            .init_db(
                topics,
                SystemSecrets {
                    admin: Secret::new(ADMIN_SECRET),
                    dev: Secret::new("dev-secret"),
                },
            )
            .await
            .expect("init db");

        let state = Arc::new(AppState {
            service,
            external_url: Arc::new(RwLock::new(ExternalUrlStatus::NotConfigured)),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind server");
        let addr = listener.local_addr().unwrap();

        let app = build_router(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            export_dir,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn create_user(&self, id: &str) {
        let resp = self
            .client
            .post(format!("{}/users", self.url()))
            .json(&json!({ "id": id, "secret": "secret1" }))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(resp.status(), 201, "creating user {id}");
    }

    pub async fn launch(&self, topic: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/topics/{topic}/launch", self.url()))
            .json(&body)
            .send()
            .await
            .expect("request should succeed")
    }

    /// Launch as `user` and return the thread JSON.
    pub async fn join(&self, topic: &str, user: &str) -> Value {
        let resp = self.launch(topic, json!({ "user_id": user })).await;
        assert_eq!(resp.status(), 200, "launching {topic} as {user}");
        resp.json().await.expect("valid JSON")
    }

    pub async fn say(&self, thread_id: &str, user: &str, text: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/threads/{thread_id}/{user}/message", self.url()))
            .json(&json!({ "text": text }))
            .send()
            .await
            .expect("request should succeed")
    }

    pub async fn rate(&self, thread_id: &str, user: &str) -> Value {
        let resp = self
            .client
            .post(format!("{}/threads/{thread_id}/{user}/rating", self.url()))
            .json(&json!({ "ratings": { "engaging": 5 } }))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(resp.status(), 200);
        resp.json().await.expect("valid JSON")
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.url()))
            .bearer_auth(ADMIN_SECRET)
            .send()
            .await
            .expect("request should succeed")
    }

    /// Number of thread exports written under the dated export folders.
    pub fn exported_files(&self) -> usize {
        std::fs::read_dir(self.export_dir.path())
            .unwrap()
            .map(|day| std::fs::read_dir(day.unwrap().path()).unwrap().count())
            .sum()
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const ADMIN_SECRET: &str = "admin-secret";
pub const TEST_MODEL: &str = "llama3-70b";

pub fn sample_completion(content: &str) -> String {
    json!({
        "id": "chatcmpl-test123",
        "object": "chat.completion",
        "created": 1700000000,
        "model": TEST_MODEL,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content
            },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

/// A solo topic, a two-seat seeded debate and a capped topic.
pub fn sample_topics() -> String {
    json!([
        {
            "id": "cats",
            "name": "Cats",
            "conversation": [],
            "max_turns_per_thread": 3
        },
        {
            "id": "debate",
            "name": "Debate",
            "conversation": [
                { "speaker_id": "a", "text": "I think cats rule." },
                { "speaker_id": "b", "text": "Dogs are better." }
            ],
            "max_human_users_per_thread": 2,
            "max_turns_per_thread": 2
        },
        {
            "id": "solo",
            "name": "Solo",
            "conversation": [],
            "max_threads": 1
        }
    ])
    .to_string()
}

/// Texts of the non-seed messages in a thread JSON, in order.
pub fn live_texts(thread: &Value) -> Vec<String> {
    thread["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| !m["is_seed"].as_bool().unwrap())
        .map(|m| m["text"].as_str().unwrap().to_owned())
        .collect()
}

pub fn current_speaker(thread: &Value) -> String {
    let idx = thread["current_speaker_idx"].as_u64().unwrap() as usize;
    thread["speak_order"][idx].as_str().unwrap().to_owned()
}
