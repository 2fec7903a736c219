use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use pl_core::core::{
    advance_turn, authenticate_admin, check_turn, clean_text, completions, find_thread_for_user,
    hash_secret, initialize_thread, is_bot_turn, record_rating, seat_user, validate_secret,
    validate_user_id, Arrival, AuthError, ChatThread, Clock, ConfigError, CrowdService,
    ExportError, ExportSink, LimitExceeded, LimitPolicy, MessageDraft, RatingOutcome, Ratings,
    Secret, SeedUtterance, SpeakerId, SuperTopic, SuperTopicId, SystemClock, SystemUsers,
    ThreadConfig, ThreadId, ThreadLookup, Topic, TopicId, TopicLimits, TransformChain, TurnError,
    User, UserId, UserParticipation, UserRole, ValidationError, ADMIN_USER, BOT_USER,
    CONTEXT_USER, DEV_USER, MAX_TEXT_LENGTH,
};
use pl_store::{export_to_json, ChatStore, NewThread, StoreError};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::RatingQuestion;
use crate::dialog::DialogOrchestrator;

/// Most threads returned by the admin thread listing.
pub const THREAD_PAGE_SIZE: usize = 40;

/// `last_active` is only rewritten when older than this.
const LAST_ACTIVE_REFRESH_SECS: i64 = 120;

// ---------------------------------------------------------------------------
// ServiceError — everything a ChatService call can fail with
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Limit(#[from] LimitExceeded),
    /// Another request is creating or updating the same thread.
    #[error("thread is busy, retry shortly")]
    Contention(Option<ThreadId>),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { thread, .. } => Self::Contention(Some(thread)),
            other => Self::Store(other),
        }
    }
}

impl ServiceError {
    fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and views
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ext_id: Option<String>,
    #[serde(default)]
    pub ext_src: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LaunchRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub ext_id: Option<String>,
    #[serde(default)]
    pub ext_src: Option<String>,
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub submit_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewSuperTopic {
    pub id: SuperTopicId,
    pub name: String,
    pub conversation: Vec<SeedUtterance>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SpawnTopics {
    pub count: u32,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub limits: Option<TopicLimits>,
}

/// Passwords for the auto-provisioned login users.
#[derive(Clone, Debug)]
pub struct SystemSecrets {
    pub admin: Secret,
    pub dev: Secret,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub users_created: usize,
    pub topics_created: usize,
    pub topics_skipped: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct TopicSummary {
    #[serde(flatten)]
    pub topic: Topic,
    pub completed_threads: u64,
    pub open_threads: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct DashboardEntry {
    pub topic: Topic,
    pub completed_threads: u64,
    pub thread_id: Option<ThreadId>,
    pub thread_done: bool,
}

impl DashboardEntry {
    fn group(&self) -> u8 {
        match (&self.thread_id, self.thread_done) {
            (Some(_), false) => 0,
            (None, _) => 1,
            (Some(_), true) => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatService
// ---------------------------------------------------------------------------

pub struct ServiceSettings {
    pub limits: LimitPolicy,
    pub default_limits: TopicLimits,
    pub default_engine: String,
    pub default_persona: Option<String>,
    /// Age after which an unfinished creation marker is reclaimed.
    pub creation_timeout: ChronoDuration,
    pub moderator_qualification: Option<String>,
    pub rating_questions: Vec<RatingQuestion>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            limits: LimitPolicy::default(),
            default_limits: TopicLimits::default(),
            default_engine: crate::bots::DUMMY_ENGINE.to_owned(),
            default_persona: None,
            creation_timeout: ChronoDuration::seconds(30),
            moderator_qualification: None,
            rating_questions: Vec::new(),
        }
    }
}

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    dialog: DialogOrchestrator,
    human_transforms: TransformChain,
    crowd: Option<Arc<dyn CrowdService>>,
    exporter: Arc<dyn ExportSink>,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        dialog: DialogOrchestrator,
        human_transforms: TransformChain,
        exporter: Arc<dyn ExportSink>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            dialog,
            human_transforms,
            crowd: None,
            exporter,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_crowd(mut self, crowd: Arc<dyn CrowdService>) -> Self {
        self.crowd = Some(crowd);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ChatStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let out = tokio::task::spawn_blocking(move || f(store.as_ref())).await??;
        Ok(out)
    }

    async fn commit(
        &self,
        mut thread: ChatThread,
        drafts: Vec<MessageDraft>,
    ) -> Result<ChatThread, ServiceError> {
        self.blocking(move |s| {
            s.commit_thread(&mut thread, drafts)?;
            Ok(thread)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Setup and users
    // -----------------------------------------------------------------------

    /// Create the schema, the system users and any topics not yet stored.
    pub async fn init_db(
        &self,
        topics: Vec<Topic>,
        secrets: SystemSecrets,
    ) -> Result<InitReport, ServiceError> {
        let now = self.clock.now();
        self.blocking(move |s| {
            s.init()?;
            let mut report = InitReport::default();

            let system = [
                (ADMIN_USER, UserRole::Admin, secrets.admin),
                (BOT_USER, UserRole::Bot, Secret::new(uuid::Uuid::new_v4().to_string())),
                (DEV_USER, UserRole::Human, secrets.dev),
                (CONTEXT_USER, UserRole::Hidden, Secret::new(uuid::Uuid::new_v4().to_string())),
            ];
            for (id, role, secret) in system {
                let id = UserId::new(id);
                if s.get_user(&id)?.is_some() {
                    continue;
                }
                s.insert_user(&User {
                    secret_hash: hash_secret(&id, &secret),
                    name: id.to_string(),
                    id,
                    role,
                    active: true,
                    ext_id: None,
                    ext_src: None,
                    last_active: None,
                    created_at: now,
                })?;
                report.users_created += 1;
            }

            for topic in topics {
                if s.get_topic(&topic.id)?.is_some() {
                    tracing::warn!(topic_id = %topic.id, "topic already exists, skipping");
                    report.topics_skipped += 1;
                    continue;
                }
                s.insert_topic(&topic)?;
                report.topics_created += 1;
            }
            Ok(report)
        })
        .await
    }

    pub async fn create_user(&self, new: NewUser) -> Result<User, ServiceError> {
        validate_user_id(&new.id)?;
        let secret = Secret::new(new.secret);
        validate_secret(&secret)?;

        let id = UserId::new(new.id);
        let user = User {
            secret_hash: hash_secret(&id, &secret),
            name: new.name.unwrap_or_else(|| id.to_string()),
            id: id.clone(),
            role: UserRole::Human,
            active: true,
            ext_id: new.ext_id,
            ext_src: new.ext_src,
            last_active: None,
            created_at: self.clock.now(),
        };
        let stored = user.clone();
        match self.blocking(move |s| s.insert_user(&stored)).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, "user created");
                Ok(user)
            }
            Err(ServiceError::Store(StoreError::Duplicate(_))) => {
                Err(ValidationError::DuplicateUser(id).into())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_user(&self, id: &UserId) -> Result<User, ServiceError> {
        let key = id.clone();
        self.blocking(move |s| s.get_user(&key))
            .await?
            .ok_or_else(|| ServiceError::not_found("user", id))
    }

    pub async fn authenticate_admin(&self, secret: &Secret) -> Result<(), ServiceError> {
        let admin = self
            .blocking(|s| s.get_user(&UserId::new(ADMIN_USER)))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        authenticate_admin(&admin, secret)?;
        Ok(())
    }

    async fn touch_last_active(&self, user_id: &UserId) {
        let now = self.clock.now();
        let id = user_id.clone();
        let result = self
            .blocking(move |s| {
                let Some(mut user) = s.get_user(&id)? else {
                    return Ok(());
                };
                let stale = user
                    .last_active
                    .is_none_or(|t| now - t >= ChronoDuration::seconds(LAST_ACTIVE_REFRESH_SECS));
                if stale {
                    user.last_active = Some(now);
                    s.update_user(&user)?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(user_id = %user_id, error = %e, "failed to refresh last_active");
        }
    }

    async fn moderator_qualified(&self, user: &User) -> bool {
        let (Some(crowd), Some(qualification)) =
            (&self.crowd, &self.settings.moderator_qualification)
        else {
            return false;
        };
        let worker = user.ext_id.as_deref().unwrap_or(user.id.as_str());
        match crowd.is_worker_qualified(worker, qualification).await {
            Ok(qualified) => qualified,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "qualification lookup failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Threads
    // -----------------------------------------------------------------------

    pub async fn get_thread(&self, id: &ThreadId) -> Result<ChatThread, ServiceError> {
        let key = id.clone();
        self.blocking(move |s| s.get_thread(&key))
            .await?
            .ok_or_else(|| ServiceError::not_found("thread", id))
    }

    /// Put a user into a thread of `topic_id` and let the bot open if it
    /// speaks first.
    pub async fn launch_topic(
        &self,
        topic_id: &TopicId,
        req: LaunchRequest,
    ) -> Result<ChatThread, ServiceError> {
        let key = topic_id.clone();
        let topic = self
            .blocking(move |s| s.get_topic(&key))
            .await?
            .ok_or_else(|| ServiceError::not_found("topic", topic_id))?;
        let mut user = self.get_user(&req.user_id).await?;

        if matches!(user.role, UserRole::Admin | UserRole::Bot | UserRole::Hidden) {
            return Err(ValidationError::Invalid(format!(
                "user {} cannot take part in conversations",
                user.id
            ))
            .into());
        }
        if user.ext_id.is_none() {
            if let (Some(ext_id), Some(ext_src)) = (&req.ext_id, &req.ext_src) {
                let (src, ext) = (ext_src.clone(), ext_id.clone());
                let owner = self
                    .blocking(move |s| s.find_user_by_external(&src, &ext))
                    .await?;
                if let Some(owner) = owner.filter(|o| o.id != user.id) {
                    return Err(ValidationError::Invalid(format!(
                        "external identity {ext_src}/{ext_id} belongs to user {}",
                        owner.id
                    ))
                    .into());
                }
                user.ext_id = Some(ext_id.clone());
                user.ext_src = Some(ext_src.clone());
                let linked = user.clone();
                self.blocking(move |s| s.update_user(&linked)).await?;
            }
        }
        if user.ext_id.is_some() && req.assignment_id.is_none() {
            return Err(ValidationError::Invalid(
                "crowd workers must launch with an assignment id".to_owned(),
            )
            .into());
        }

        let (threads, thread_count) = {
            let topic_key = topic.id.clone();
            let user_key = user.id.clone();
            self.blocking(move |s| {
                Ok((
                    s.list_topic_threads(&topic_key)?,
                    s.count_user_threads(&user_key)?,
                ))
            })
            .await?
        };
        let qualified = self.moderator_qualified(&user).await;
        let participation = UserParticipation {
            user_id: user.id.clone(),
            thread_count,
            moderator_qualified: qualified,
        };
        self.settings
            .limits
            .check(&topic, &threads, Some(&participation))?;

        let arrival = Arrival {
            assignment_id: req.assignment_id,
            submit_url: req.submit_url,
        };
        let thread = self
            .get_or_create_thread(&topic, &user, qualified, &arrival)
            .await?;
        Ok(self.run_bot_turns(thread).await)
    }

    /// Find the user's thread in `topic`, join one with a free seat, or
    /// create a new one.
    pub async fn get_or_create_thread(
        &self,
        topic: &Topic,
        user: &User,
        moderator_qualified: bool,
        arrival: &Arrival,
    ) -> Result<ChatThread, ServiceError> {
        let key = topic.id.clone();
        let threads = self.blocking(move |s| s.list_topic_threads(&key)).await?;

        match find_thread_for_user(&threads, &user.id, moderator_qualified) {
            ThreadLookup::Member(id) => threads
                .into_iter()
                .find(|t| t.id == id)
                .ok_or_else(|| ServiceError::not_found("thread", &id)),
            ThreadLookup::Contended(id) => {
                tracing::warn!(topic_id = %topic.id, thread_id = %id, user_id = %user.id, "thread creation in progress");
                Err(ServiceError::Contention(Some(id)))
            }
            ThreadLookup::Vacancy { thread: id, seat } => {
                let mut thread = threads
                    .into_iter()
                    .find(|t| t.id == id)
                    .ok_or_else(|| ServiceError::not_found("thread", &id))?;
                let speaker = seat.speaker.clone();
                seat_user(&mut thread, &user.id, seat, arrival);
                let thread = self.commit(thread, Vec::new()).await?;
                tracing::info!(thread_id = %thread.id, user_id = %user.id, speaker = %speaker, "user joined thread");
                Ok(thread)
            }
            ThreadLookup::NoVacancy => {
                let cap = topic.limits.max_threads as usize;
                if threads.len() >= cap {
                    return Err(LimitExceeded {
                        reason: format!(
                            "topic {} reached its limit of {cap} threads and none has a seat for {}",
                            topic.id, user.id
                        ),
                    }
                    .into());
                }
                self.create_thread(topic, user, moderator_qualified, arrival)
                    .await
            }
        }
    }

    async fn create_thread(
        &self,
        topic: &Topic,
        user: &User,
        moderator_qualified: bool,
        arrival: &Arrival,
    ) -> Result<ChatThread, ServiceError> {
        if !topic.limits.human_moderator {
            self.dialog
                .bots()
                .ensure(&topic.endpoint, topic.persona_id.as_deref())?;
        }

        let new = NewThread {
            topic_id: topic.id.clone(),
            config: ThreadConfig::from_topic(topic),
            creator: user.id.clone(),
            creator_role: UserRole::Human,
            ext_id: topic.ext_id.clone(),
            ext_src: topic.ext_src.clone(),
        };
        let stale_after = self.settings.creation_timeout;
        let reserved = self
            .blocking(move |s| {
                for id in [BOT_USER, CONTEXT_USER] {
                    if s.get_user(&UserId::new(id))?.is_none() {
                        return Ok(Err(ConfigError::MissingSystemUser(UserId::new(id))));
                    }
                }
                Ok(Ok(s.try_begin_thread_creation(&new, stale_after)?))
            })
            .await??;
        let Some(mut thread) = reserved else {
            tracing::warn!(topic_id = %topic.id, user_id = %user.id, "concurrent thread creation");
            return Err(ServiceError::Contention(None));
        };
        let thread_id = thread.id.clone();

        let system = SystemUsers {
            bot: UserId::new(BOT_USER),
            context: UserId::new(CONTEXT_USER),
        };
        let result = match initialize_thread(
            &mut thread,
            topic,
            &user.id,
            moderator_qualified,
            &system,
            arrival,
        ) {
            Ok(seeds) => self.commit(thread, seeds).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(thread) => {
                tracing::info!(
                    thread_id = %thread.id,
                    topic_id = %topic.id,
                    user_id = %user.id,
                    max_turns = thread.max_turns,
                    "thread created"
                );
                Ok(thread)
            }
            Err(e) => {
                let id = thread_id.clone();
                if let Err(abort) = self.blocking(move |s| s.abort_thread_creation(&id)).await {
                    tracing::warn!(thread_id = %thread_id, error = %abort, "failed to abort thread creation");
                }
                Err(e)
            }
        }
    }

    /// Store a participant's message, advance the turn and let the bot take
    /// any turns that follow.
    pub async fn observe_and_reply(
        &self,
        thread_id: &ThreadId,
        user_id: &UserId,
        text: &str,
        declared: Option<SpeakerId>,
    ) -> Result<ChatThread, ServiceError> {
        let text = clean_text(text).ok_or(ValidationError::InvalidText {
            max: MAX_TEXT_LENGTH,
        })?;
        let mut thread = self.get_thread(thread_id).await?;
        let speaker = check_turn(&thread, user_id, declared.as_ref())?;

        let draft = self
            .human_transforms
            .apply(MessageDraft::new(user_id.clone(), text).with_speaker(&speaker));
        let advance = advance_turn(&mut thread);
        tracing::debug!(
            thread_id = %thread.id,
            user_id = %user_id,
            speaker = %speaker,
            next = ?advance.next_speaker.as_ref().map(|s| s.as_str()),
            "turn advanced"
        );
        let thread = self.commit(thread, vec![draft]).await?;
        if advance.episode_done {
            tracing::info!(thread_id = %thread.id, turns = thread.current_turns, "episode done");
        }

        self.touch_last_active(user_id).await;
        Ok(self.run_bot_turns(thread).await)
    }

    /// Let the bot speak while it holds the turn. Failures end the loop and
    /// leave the thread as last stored.
    async fn run_bot_turns(&self, mut thread: ChatThread) -> ChatThread {
        for _ in 0..thread.speak_order.len().max(1) {
            if !is_bot_turn(&thread) {
                break;
            }
            let draft = self.dialog.reply(&thread).await;
            let snapshot = thread.clone();
            let advance = advance_turn(&mut thread);
            if draft.is_none() {
                // The slot still moves on, or a bot-moderated thread would
                // wait on the Moderator forever.
                tracing::info!(thread_id = %thread.id, "bot passed its turn");
            }

            match self.commit(thread, draft.into_iter().collect()).await {
                Ok(saved) => {
                    if advance.episode_done {
                        tracing::info!(thread_id = %saved.id, turns = saved.current_turns, "episode done");
                    }
                    thread = saved;
                }
                Err(e) => {
                    tracing::warn!(thread_id = %snapshot.id, error = %e, "bot turn not stored");
                    return match self.get_thread(&snapshot.id).await {
                        Ok(current) => current,
                        Err(_) => snapshot,
                    };
                }
            }
        }
        thread
    }

    pub async fn submit_ratings(
        &self,
        thread_id: &ThreadId,
        user_id: &UserId,
        ratings: Ratings,
    ) -> Result<RatingOutcome, ServiceError> {
        let mut thread = self.get_thread(thread_id).await?;
        let outcome = record_rating(&mut thread, user_id, ratings)?;
        if outcome == RatingOutcome::AlreadyComplete {
            return Ok(outcome);
        }

        let thread = self.commit(thread, Vec::new()).await?;
        if outcome == RatingOutcome::Completed {
            tracing::info!(thread_id = %thread.id, raters = thread.ratings.len(), "thread rated");
            self.finish_thread(&thread).await;
        }
        Ok(outcome)
    }

    fn export_meta(&self) -> serde_json::Value {
        serde_json::json!({ "rating_questions": self.settings.rating_questions })
    }

    /// Pay out assignments and export the thread. Failures are logged only.
    async fn finish_thread(&self, thread: &ChatThread) {
        if let Some(crowd) = &self.crowd {
            for completion in completions(thread) {
                if let Err(e) = crowd.submit_completion(&completion).await {
                    tracing::warn!(
                        thread_id = %thread.id,
                        user_id = %completion.user_id,
                        crowd = crowd.name(),
                        error = %e,
                        "completion not submitted"
                    );
                }
            }
        }

        let exporter = Arc::clone(&self.exporter);
        let snapshot = thread.clone();
        let meta = self.export_meta();
        let exported =
            tokio::task::spawn_blocking(move || exporter.export_thread(&snapshot, &meta)).await;
        match exported {
            Ok(Ok(location)) => {
                tracing::info!(thread_id = %thread.id, location = %location, "thread exported")
            }
            Ok(Err(e)) => tracing::warn!(thread_id = %thread.id, error = %e, "thread export failed"),
            Err(e) => tracing::warn!(thread_id = %thread.id, error = %e, "thread export task failed"),
        }
    }

    pub async fn export_thread_json(&self, id: &ThreadId) -> Result<String, ServiceError> {
        let thread = self.get_thread(id).await?;
        Ok(export_to_json(&thread, &self.export_meta(), self.clock.now())?)
    }

    pub async fn list_threads(&self) -> Result<Vec<ChatThread>, ServiceError> {
        self.blocking(|s| s.list_recent_threads(THREAD_PAGE_SIZE))
            .await
    }

    /// Topics as a user should see them: their unfinished threads first,
    /// then the least-served topics, their finished threads last.
    pub async fn user_dashboard(&self, user_id: &UserId) -> Result<Vec<DashboardEntry>, ServiceError> {
        self.get_user(user_id).await?;
        let key = user_id.clone();
        let (topics, own, completed) = self
            .blocking(move |s| {
                Ok((
                    s.list_topics()?,
                    s.list_user_threads(&key)?,
                    s.thread_counts(true)?,
                ))
            })
            .await?;

        let own: HashMap<TopicId, ChatThread> =
            own.into_iter().map(|t| (t.topic_id.clone(), t)).collect();
        let mut entries: Vec<DashboardEntry> = topics
            .into_iter()
            .map(|topic| {
                let mine = own.get(&topic.id);
                DashboardEntry {
                    completed_threads: completed.get(&topic.id).copied().unwrap_or(0),
                    thread_id: mine.map(|t| t.id.clone()),
                    thread_done: mine.is_some_and(|t| t.episode_done),
                    topic,
                }
            })
            .collect();

        entries.shuffle(&mut rand::rng());
        entries.sort_by_key(|e| {
            let count = if e.group() == 1 { e.completed_threads } else { 0 };
            (e.group(), count)
        });
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Topics
    // -----------------------------------------------------------------------

    pub async fn create_super_topic(&self, new: NewSuperTopic) -> Result<SuperTopic, ServiceError> {
        if new.id.as_str().trim().is_empty() || new.name.trim().is_empty() {
            return Err(ValidationError::Invalid("super topic needs an id and a name".into()).into());
        }
        let super_topic = SuperTopic {
            id: new.id,
            name: new.name,
            conversation: new.conversation,
            created_at: self.clock.now(),
        };
        let stored = super_topic.clone();
        match self.blocking(move |s| s.insert_super_topic(&stored)).await {
            Ok(()) => Ok(super_topic),
            Err(ServiceError::Store(StoreError::Duplicate(_))) => Err(ValidationError::Invalid(
                format!("super topic {} already exists", super_topic.id),
            )
            .into()),
            Err(e) => Err(e),
        }
    }

    /// Create `count` topics from a super topic, numbered after its existing
    /// children.
    pub async fn spawn_topics(
        &self,
        super_id: &SuperTopicId,
        request: SpawnTopics,
    ) -> Result<Vec<Topic>, ServiceError> {
        if request.count == 0 {
            return Err(ValidationError::Invalid("count must be positive".into()).into());
        }
        let key = super_id.clone();
        let (super_topic, existing) = self
            .blocking(move |s| Ok((s.get_super_topic(&key)?, s.list_topics_for_super_topic(&key)?)))
            .await?;
        let super_topic = super_topic.ok_or_else(|| ServiceError::not_found("super topic", super_id))?;

        let endpoint = request
            .endpoint
            .unwrap_or_else(|| self.settings.default_engine.clone());
        let persona_id = request.persona_id.or_else(|| self.settings.default_persona.clone());
        let limits = request
            .limits
            .unwrap_or_else(|| self.settings.default_limits.clone());
        validate_limits(&limits)?;
        if !limits.human_moderator {
            self.dialog.bots().ensure(&endpoint, persona_id.as_deref())?;
        }

        let prefix = format!("{}_", super_topic.id);
        let last = existing
            .iter()
            .filter_map(|t| t.id.as_str().strip_prefix(&prefix)?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        let now = self.clock.now();
        let topics: Vec<Topic> = (1..=request.count)
            .map(|n| Topic {
                id: TopicId::new(format!("{prefix}{:03}", last + n)),
                name: format!("{} #{}", super_topic.name, last + n),
                super_topic_id: Some(super_topic.id.clone()),
                conversation: super_topic.conversation.clone(),
                endpoint: endpoint.clone(),
                persona_id: persona_id.clone(),
                limits: limits.clone(),
                ext_id: None,
                ext_src: None,
                created_at: now,
            })
            .collect();

        let stored = topics.clone();
        self.blocking(move |s| {
            for topic in &stored {
                s.insert_topic(topic)?;
            }
            Ok(())
        })
        .await?;
        tracing::info!(super_topic_id = %super_id, count = topics.len(), "topics spawned");
        Ok(topics)
    }

    pub async fn delete_topic(&self, id: &TopicId) -> Result<(), ServiceError> {
        let key = id.clone();
        if self.blocking(move |s| s.delete_topic(&key)).await? {
            tracing::info!(topic_id = %id, "topic deleted");
            Ok(())
        } else {
            Err(ServiceError::not_found("topic", id))
        }
    }

    pub async fn list_topics_with_counts(&self) -> Result<Vec<TopicSummary>, ServiceError> {
        let (topics, completed, open) = self
            .blocking(|s| Ok((s.list_topics()?, s.thread_counts(true)?, s.thread_counts(false)?)))
            .await?;
        Ok(topics
            .into_iter()
            .map(|topic| TopicSummary {
                completed_threads: completed.get(&topic.id).copied().unwrap_or(0),
                open_threads: open.get(&topic.id).copied().unwrap_or(0),
                topic,
            })
            .collect())
    }
}

/// Reject limits no thread could run under.
pub fn validate_limits(limits: &TopicLimits) -> Result<(), ValidationError> {
    if limits.max_threads == 0
        || limits.max_turns_per_thread == 0
        || limits.max_human_users_per_thread == 0
    {
        return Err(ValidationError::Invalid(
            "topic limits must be positive".to_owned(),
        ));
    }
    if limits.human_moderator && limits.max_human_users_per_thread < 2 {
        return Err(ValidationError::Invalid(
            "a human moderator needs at least two human seats".to_owned(),
        ));
    }
    Ok(())
}
