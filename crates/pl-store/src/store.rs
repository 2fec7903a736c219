use std::collections::BTreeMap;
use std::io::{Error as IoError, ErrorKind};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use pl_core::core::{
    ChatMessage, ChatThread, CreationState, MessageDraft, MessageId, Participant, SuperTopic,
    SuperTopicId, ThreadId, Topic, TopicId, User, UserId, UserMap, UserRole,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::models::{NewThread, ThreadCounts};

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    secret_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    ext_id TEXT,
    ext_src TEXT,
    last_active TEXT,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_external ON users(ext_src, ext_id)
    WHERE ext_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS super_topics (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    conversation TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS topics (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    super_topic_id TEXT REFERENCES super_topics(id),
    conversation TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    persona_id TEXT,
    limits TEXT NOT NULL,
    ext_id TEXT,
    ext_src TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_topics_super ON topics(super_topic_id);

CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    topic_id TEXT NOT NULL,
    config TEXT NOT NULL,
    episode_done INTEGER NOT NULL DEFAULT 0,
    rating_done INTEGER NOT NULL DEFAULT 0,
    speak_order TEXT NOT NULL,
    current_speaker_idx INTEGER NOT NULL DEFAULT 0,
    current_turns INTEGER NOT NULL DEFAULT 0,
    remaining_turns INTEGER NOT NULL DEFAULT 0,
    max_turns INTEGER NOT NULL DEFAULT 0,
    creation_state TEXT NOT NULL,
    speakers TEXT NOT NULL,
    assignments TEXT NOT NULL,
    submit_urls TEXT NOT NULL,
    ratings TEXT NOT NULL,
    ext_id TEXT,
    ext_src TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threads_topic ON threads(topic_id);

CREATE TABLE IF NOT EXISTS thread_users (
    thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id),
    role TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_thread_users_user ON thread_users(user_id);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id),
    text TEXT NOT NULL,
    is_seed INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
"#;

const USER_COLUMNS: &str =
    "id, name, secret_hash, role, active, ext_id, ext_src, last_active, created_at";
const TOPIC_COLUMNS: &str = "id, name, super_topic_id, conversation, endpoint, persona_id, \
     limits, ext_id, ext_src, created_at";
const THREAD_COLUMNS: &str = "id, topic_id, config, episode_done, rating_done, speak_order, \
     current_speaker_idx, current_turns, remaining_turns, max_turns, creation_state, speakers, \
     assignments, submit_urls, ratings, ext_id, ext_src, version, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Duplicate(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("thread {thread} changed since version {expected}")]
    VersionConflict { thread: ThreadId, expected: u64 },
}

pub trait ChatStore: Send + Sync {
    fn init(&self) -> Result<(), StoreError>;

    fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;
    fn find_user_by_external(
        &self,
        ext_src: &str,
        ext_id: &str,
    ) -> Result<Option<User>, StoreError>;
    fn update_user(&self, user: &User) -> Result<(), StoreError>;

    fn insert_super_topic(&self, super_topic: &SuperTopic) -> Result<(), StoreError>;
    fn get_super_topic(&self, id: &SuperTopicId) -> Result<Option<SuperTopic>, StoreError>;
    fn insert_topic(&self, topic: &Topic) -> Result<(), StoreError>;
    fn get_topic(&self, id: &TopicId) -> Result<Option<Topic>, StoreError>;
    fn list_topics(&self) -> Result<Vec<Topic>, StoreError>;
    fn list_topics_for_super_topic(&self, id: &SuperTopicId) -> Result<Vec<Topic>, StoreError>;
    /// Remove a topic; its threads stay. Returns whether a row was deleted.
    fn delete_topic(&self, id: &TopicId) -> Result<bool, StoreError>;

    /// Reserve a thread for `new.creator` in state `BeingCreated`.
    ///
    /// Returns `None` when another creation for the same topic is in flight
    /// and could host the creator, or when the creator already has a thread
    /// in the topic. Markers older than `stale_after` are reclaimed first.
    fn try_begin_thread_creation(
        &self,
        new: &NewThread,
        stale_after: Duration,
    ) -> Result<Option<ChatThread>, StoreError>;
    /// Drop a reservation that could not be completed.
    fn abort_thread_creation(&self, id: &ThreadId) -> Result<(), StoreError>;
    /// Persist `thread` and append `drafts` as new messages.
    ///
    /// Fails with `VersionConflict` when the stored version moved on since
    /// `thread` was loaded. Only per-user maps marked dirty are rewritten.
    fn commit_thread(
        &self,
        thread: &mut ChatThread,
        drafts: Vec<MessageDraft>,
    ) -> Result<Vec<ChatMessage>, StoreError>;
    fn get_thread(&self, id: &ThreadId) -> Result<Option<ChatThread>, StoreError>;
    fn list_topic_threads(&self, topic_id: &TopicId) -> Result<Vec<ChatThread>, StoreError>;
    fn list_user_threads(&self, user_id: &UserId) -> Result<Vec<ChatThread>, StoreError>;
    /// Threads the user has joined whose episode is not done yet.
    fn count_user_threads(&self, user_id: &UserId) -> Result<usize, StoreError>;
    fn list_recent_threads(&self, limit: usize) -> Result<Vec<ChatThread>, StoreError>;
    fn thread_counts(&self, episode_done: bool) -> Result<ThreadCounts, StoreError>;
}

pub struct SqliteChatStore {
    conn: Mutex<Connection>,
}

impl SqliteChatStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite mutex poisoned")
    }
}

impl ChatStore for SqliteChatStore {
    fn init(&self) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        conn.execute_batch(SCHEMA_SQL)?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    // -- users --

    fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO users (id, name, secret_hash, role, active, ext_id, ext_src, last_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id.as_str(),
                user.name.as_str(),
                user.secret_hash.as_str(),
                user.role.as_str(),
                user.active,
                user.ext_id.as_deref(),
                user.ext_src.as_deref(),
                user.last_active.as_ref().map(ts),
                ts(&user.created_at),
            ],
        )
        .map_err(|e| duplicate_or(e, || format!("user {}", user.id)))?;
        Ok(())
    }

    fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let conn = self.lock_conn();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn find_user_by_external(
        &self,
        ext_src: &str,
        ext_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let conn = self.lock_conn();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE ext_src = ?1 AND ext_id = ?2"),
                params![ext_src, ext_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE users SET name = ?1, role = ?2, active = ?3, ext_id = ?4, ext_src = ?5,
                 last_active = ?6
             WHERE id = ?7",
            params![
                user.name.as_str(),
                user.role.as_str(),
                user.active,
                user.ext_id.as_deref(),
                user.ext_src.as_deref(),
                user.last_active.as_ref().map(ts),
                user.id.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    // -- topics --

    fn insert_super_topic(&self, super_topic: &SuperTopic) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO super_topics (id, name, conversation, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                super_topic.id.as_str(),
                super_topic.name.as_str(),
                serde_json::to_string(&super_topic.conversation)?,
                ts(&super_topic.created_at),
            ],
        )
        .map_err(|e| duplicate_or(e, || format!("super topic {}", super_topic.id)))?;
        Ok(())
    }

    fn get_super_topic(&self, id: &SuperTopicId) -> Result<Option<SuperTopic>, StoreError> {
        let conn = self.lock_conn();
        let super_topic = conn
            .query_row(
                "SELECT id, name, conversation, created_at FROM super_topics WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    let conversation: String = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    Ok(SuperTopic {
                        id: SuperTopicId::new(id),
                        name: row.get(1)?,
                        conversation: parse_json(2, "conversation", &conversation)?,
                        created_at: parse_datetime_utc(3, &created_at)?,
                    })
                },
            )
            .optional()?;
        Ok(super_topic)
    }

    fn insert_topic(&self, topic: &Topic) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO topics
             (id, name, super_topic_id, conversation, endpoint, persona_id, limits, ext_id, ext_src, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                topic.id.as_str(),
                topic.name.as_str(),
                topic.super_topic_id.as_ref().map(SuperTopicId::as_str),
                serde_json::to_string(&topic.conversation)?,
                topic.endpoint.as_str(),
                topic.persona_id.as_deref(),
                serde_json::to_string(&topic.limits)?,
                topic.ext_id.as_deref(),
                topic.ext_src.as_deref(),
                ts(&topic.created_at),
            ],
        )
        .map_err(|e| duplicate_or(e, || format!("topic {}", topic.id)))?;
        Ok(())
    }

    fn get_topic(&self, id: &TopicId) -> Result<Option<Topic>, StoreError> {
        let conn = self.lock_conn();
        let topic = conn
            .query_row(
                &format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?1"),
                params![id.as_str()],
                topic_from_row,
            )
            .optional()?;
        Ok(topic)
    }

    fn list_topics(&self) -> Result<Vec<Topic>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], topic_from_row)?;
        let topics = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    fn list_topics_for_super_topic(&self, id: &SuperTopicId) -> Result<Vec<Topic>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOPIC_COLUMNS} FROM topics WHERE super_topic_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![id.as_str()], topic_from_row)?;
        let topics = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    fn delete_topic(&self, id: &TopicId) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        let deleted = conn.execute("DELETE FROM topics WHERE id = ?1", params![id.as_str()])?;
        Ok(deleted > 0)
    }

    // -- threads --

    fn try_begin_thread_creation(
        &self,
        new: &NewThread,
        stale_after: Duration,
    ) -> Result<Option<ChatThread>, StoreError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let topic_id = new.topic_id.as_str();

        tx.execute(
            "DELETE FROM threads
             WHERE topic_id = ?1 AND creation_state = ?2 AND updated_at < ?3",
            params![
                topic_id,
                CreationState::BeingCreated.as_str(),
                ts(&(now - stale_after)),
            ],
        )?;

        let already_member: bool = tx.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM threads t JOIN thread_users u ON u.thread_id = t.id
                 WHERE t.topic_id = ?1 AND u.user_id = ?2)",
            params![topic_id, new.creator.as_str()],
            |row| row.get(0),
        )?;
        let shares_seats = new.config.limits.max_human_users_per_thread > 1;
        let pending: bool = shares_seats
            && tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM threads WHERE topic_id = ?1 AND creation_state = ?2)",
                params![topic_id, CreationState::BeingCreated.as_str()],
                |row| row.get(0),
            )?;
        if already_member || pending {
            tx.commit()?;
            return Ok(None);
        }

        let mut thread = ChatThread::new(
            ThreadId::new(Uuid::new_v4().to_string()),
            new.topic_id.clone(),
            new.config.clone(),
            now,
        );
        thread.creation = CreationState::BeingCreated;
        thread.ext_id = new.ext_id.clone();
        thread.ext_src = new.ext_src.clone();
        thread.add_participant(new.creator.clone(), new.creator_role);

        tx.execute(
            &format!(
                "INSERT INTO threads ({THREAD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
            ),
            params![
                thread.id.as_str(),
                topic_id,
                serde_json::to_string(&thread.config)?,
                thread.episode_done,
                thread.rating_done,
                serde_json::to_string(&thread.speak_order)?,
                thread.current_speaker_idx as i64,
                thread.current_turns,
                thread.remaining_turns,
                thread.max_turns,
                thread.creation.as_str(),
                serde_json::to_string(&thread.speakers)?,
                serde_json::to_string(&thread.assignments)?,
                serde_json::to_string(&thread.submit_urls)?,
                serde_json::to_string(&thread.ratings)?,
                thread.ext_id.as_deref(),
                thread.ext_src.as_deref(),
                thread.version as i64,
                ts(&thread.created_at),
                ts(&thread.updated_at),
            ],
        )?;
        write_participants(&tx, &thread, now)?;
        tx.commit()?;

        Ok(Some(thread))
    }

    fn abort_thread_creation(&self, id: &ThreadId) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM threads WHERE id = ?1 AND creation_state = ?2",
            params![id.as_str(), CreationState::BeingCreated.as_str()],
        )?;
        Ok(())
    }

    fn commit_thread(
        &self,
        thread: &mut ChatThread,
        drafts: Vec<MessageDraft>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let updated = tx.execute(
            "UPDATE threads SET
                 config = ?1, episode_done = ?2, rating_done = ?3, speak_order = ?4,
                 current_speaker_idx = ?5, current_turns = ?6, remaining_turns = ?7,
                 max_turns = ?8, creation_state = ?9, ext_id = ?10, ext_src = ?11,
                 version = version + 1, updated_at = ?12
             WHERE id = ?13 AND version = ?14",
            params![
                serde_json::to_string(&thread.config)?,
                thread.episode_done,
                thread.rating_done,
                serde_json::to_string(&thread.speak_order)?,
                thread.current_speaker_idx as i64,
                thread.current_turns,
                thread.remaining_turns,
                thread.max_turns,
                thread.creation.as_str(),
                thread.ext_id.as_deref(),
                thread.ext_src.as_deref(),
                ts(&now),
                thread.id.as_str(),
                thread.version as i64,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::VersionConflict {
                thread: thread.id.clone(),
                expected: thread.version,
            });
        }

        write_dirty_maps(&tx, thread)?;
        write_participants(&tx, thread, now)?;

        let mut saved = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let message = ChatMessage {
                id: MessageId::new(Uuid::new_v4().to_string()),
                thread_id: thread.id.clone(),
                user_id: draft.user_id,
                text: draft.text,
                is_seed: draft.is_seed,
                data: draft.data,
                created_at: now,
            };
            tx.execute(
                "INSERT INTO messages (id, thread_id, user_id, text, is_seed, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.as_str(),
                    message.thread_id.as_str(),
                    message.user_id.as_str(),
                    message.text.as_str(),
                    message.is_seed,
                    serde_json::to_string(&message.data)?,
                    ts(&message.created_at),
                ],
            )?;
            saved.push(message);
        }
        tx.commit()?;

        thread.version += 1;
        thread.updated_at = now;
        thread.mark_maps_clean();
        thread.messages.extend(saved.iter().cloned());
        Ok(saved)
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Option<ChatThread>, StoreError> {
        let conn = self.lock_conn();
        load_thread(&conn, id.as_str())
    }

    fn list_topic_threads(&self, topic_id: &TopicId) -> Result<Vec<ChatThread>, StoreError> {
        let conn = self.lock_conn();
        let ids = query_ids(
            &conn,
            "SELECT id FROM threads WHERE topic_id = ?1 ORDER BY created_at ASC, id ASC",
            topic_id.as_str(),
        )?;
        load_threads(&conn, &ids)
    }

    fn list_user_threads(&self, user_id: &UserId) -> Result<Vec<ChatThread>, StoreError> {
        let conn = self.lock_conn();
        let ids = query_ids(
            &conn,
            "SELECT t.id FROM threads t JOIN thread_users u ON u.thread_id = t.id
             WHERE u.user_id = ?1 ORDER BY t.created_at DESC, t.id ASC",
            user_id.as_str(),
        )?;
        load_threads(&conn, &ids)
    }

    fn count_user_threads(&self, user_id: &UserId) -> Result<usize, StoreError> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM thread_users u JOIN threads t ON t.id = u.thread_id
             WHERE u.user_id = ?1 AND t.episode_done = 0",
            params![user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn list_recent_threads(&self, limit: usize) -> Result<Vec<ChatThread>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare("SELECT id FROM threads ORDER BY updated_at DESC, id ASC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let ids = rows.collect::<Result<Vec<_>, _>>()?;
        load_threads(&conn, &ids)
    }

    fn thread_counts(&self, episode_done: bool) -> Result<ThreadCounts, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT topic_id, COUNT(*) FROM threads WHERE episode_done = ?1 GROUP BY topic_id",
        )?;
        let rows = stmt.query_map(params![episode_done], |row| {
            let topic: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((TopicId::new(topic), count as u64))
        })?;
        let counts = rows.collect::<Result<ThreadCounts, _>>()?;
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Thread persistence helpers
// ---------------------------------------------------------------------------

fn write_dirty_maps(tx: &Transaction<'_>, thread: &ChatThread) -> Result<(), StoreError> {
    let id = thread.id.as_str();
    if thread.speakers.is_dirty() {
        tx.execute(
            "UPDATE threads SET speakers = ?1 WHERE id = ?2",
            params![serde_json::to_string(&thread.speakers)?, id],
        )?;
    }
    if thread.assignments.is_dirty() {
        tx.execute(
            "UPDATE threads SET assignments = ?1 WHERE id = ?2",
            params![serde_json::to_string(&thread.assignments)?, id],
        )?;
    }
    if thread.submit_urls.is_dirty() {
        tx.execute(
            "UPDATE threads SET submit_urls = ?1 WHERE id = ?2",
            params![serde_json::to_string(&thread.submit_urls)?, id],
        )?;
    }
    if thread.ratings.is_dirty() {
        tx.execute(
            "UPDATE threads SET ratings = ?1 WHERE id = ?2",
            params![serde_json::to_string(&thread.ratings)?, id],
        )?;
    }
    Ok(())
}

fn write_participants(
    tx: &Transaction<'_>,
    thread: &ChatThread,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    for p in &thread.participants {
        tx.execute(
            "INSERT INTO thread_users (thread_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(thread_id, user_id) DO UPDATE SET role = excluded.role",
            params![
                thread.id.as_str(),
                p.user_id.as_str(),
                p.role.as_str(),
                ts(&now)
            ],
        )?;
    }
    Ok(())
}

fn query_ids(conn: &Connection, sql: &str, key: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    let ids = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn load_threads(conn: &Connection, ids: &[String]) -> Result<Vec<ChatThread>, StoreError> {
    let mut threads = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(thread) = load_thread(conn, id)? {
            threads.push(thread);
        }
    }
    Ok(threads)
}

fn load_thread(conn: &Connection, id: &str) -> Result<Option<ChatThread>, StoreError> {
    let Some(mut thread) = conn
        .query_row(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
            params![id],
            thread_from_row,
        )
        .optional()?
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id, role FROM thread_users WHERE thread_id = ?1 ORDER BY joined_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        let user_id: String = row.get(0)?;
        let role: String = row.get(1)?;
        Ok(Participant {
            user_id: UserId::new(user_id),
            role: parse_role(1, &role)?,
        })
    })?;
    thread.participants = rows.collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, thread_id, user_id, text, is_seed, data, created_at
         FROM messages WHERE thread_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        let id: String = row.get(0)?;
        let thread_id: String = row.get(1)?;
        let user_id: String = row.get(2)?;
        let data: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        Ok(ChatMessage {
            id: MessageId::new(id),
            thread_id: ThreadId::new(thread_id),
            user_id: UserId::new(user_id),
            text: row.get(3)?,
            is_seed: row.get(4)?,
            data: parse_json(5, "message data", &data)?,
            created_at: parse_datetime_utc(6, &created_at)?,
        })
    })?;
    thread.messages = rows.collect::<Result<Vec<_>, _>>()?;

    Ok(Some(thread))
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let role: String = row.get(3)?;
    let last_active: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(User {
        id: UserId::new(id),
        name: row.get(1)?,
        secret_hash: row.get(2)?,
        role: parse_role(3, &role)?,
        active: row.get(4)?,
        ext_id: row.get(5)?,
        ext_src: row.get(6)?,
        last_active: last_active
            .map(|v| parse_datetime_utc(7, &v))
            .transpose()?,
        created_at: parse_datetime_utc(8, &created_at)?,
    })
}

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<Topic> {
    let id: String = row.get(0)?;
    let super_topic_id: Option<String> = row.get(2)?;
    let conversation: String = row.get(3)?;
    let limits: String = row.get(6)?;
    let created_at: String = row.get(9)?;
    Ok(Topic {
        id: TopicId::new(id),
        name: row.get(1)?,
        super_topic_id: super_topic_id.map(SuperTopicId::new),
        conversation: parse_json(3, "conversation", &conversation)?,
        endpoint: row.get(4)?,
        persona_id: row.get(5)?,
        limits: parse_json(6, "limits", &limits)?,
        ext_id: row.get(7)?,
        ext_src: row.get(8)?,
        created_at: parse_datetime_utc(9, &created_at)?,
    })
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<ChatThread> {
    let id: String = row.get(0)?;
    let topic_id: String = row.get(1)?;
    let config: String = row.get(2)?;
    let speak_order: String = row.get(5)?;
    let current_speaker_idx: i64 = row.get(6)?;
    let creation: String = row.get(10)?;
    let speakers: String = row.get(11)?;
    let assignments: String = row.get(12)?;
    let submit_urls: String = row.get(13)?;
    let ratings: String = row.get(14)?;
    let version: i64 = row.get(17)?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;

    Ok(ChatThread {
        id: ThreadId::new(id),
        topic_id: TopicId::new(topic_id),
        config: parse_json(2, "thread config", &config)?,
        episode_done: row.get(3)?,
        rating_done: row.get(4)?,
        messages: Vec::new(),
        participants: Vec::new(),
        speakers: parse_user_map(11, "speakers", &speakers)?,
        assignments: parse_user_map(12, "assignments", &assignments)?,
        submit_urls: parse_user_map(13, "submit urls", &submit_urls)?,
        ratings: parse_user_map(14, "ratings", &ratings)?,
        speak_order: parse_json(5, "speak order", &speak_order)?,
        current_speaker_idx: current_speaker_idx.max(0) as usize,
        current_turns: row.get(7)?,
        remaining_turns: row.get(8)?,
        max_turns: row.get(9)?,
        creation: parse_creation_state(10, &creation)?,
        ext_id: row.get(15)?,
        ext_src: row.get(16)?,
        version: version.max(0) as u64,
        created_at: parse_datetime_utc(18, &created_at)?,
        updated_at: parse_datetime_utc(19, &updated_at)?,
    })
}

// ---------------------------------------------------------------------------
// Column parsing
// ---------------------------------------------------------------------------

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn duplicate_or(err: rusqlite::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(what())
        }
        _ => StoreError::Database(err),
    }
}

fn parse_role(column: usize, value: &str) -> rusqlite::Result<UserRole> {
    UserRole::parse(value).ok_or_else(|| sql_text_parse_error(column, "user role", value))
}

fn parse_creation_state(column: usize, value: &str) -> rusqlite::Result<CreationState> {
    CreationState::parse(value)
        .ok_or_else(|| sql_text_parse_error(column, "creation state", value))
}

fn parse_json<T: DeserializeOwned>(
    column: usize,
    field: &'static str,
    value: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(value).map_err(|_| sql_text_parse_error(column, field, value))
}

fn parse_user_map<V: DeserializeOwned>(
    column: usize,
    field: &'static str,
    value: &str,
) -> rusqlite::Result<UserMap<V>> {
    let entries: BTreeMap<UserId, V> = parse_json(column, field, value)?;
    Ok(UserMap::from_entries(entries))
}

fn parse_datetime_utc(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| sql_text_parse_error(column, "datetime", value))
}

fn sql_text_parse_error(column: usize, field: &'static str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        Box::new(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid {field}: {value}"),
        )),
    )
}

#[cfg(test)]
mod tests;
