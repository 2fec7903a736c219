use chrono::{DateTime, Duration, Utc};
use pl_core::core::{
    ChatThread, CreationState, MessageDraft, SeedUtterance, SpeakerId, SuperTopic, SuperTopicId,
    ThreadConfig, Topic, TopicId, TopicLimits, User, UserId, UserRole,
};

use super::{ChatStore, SqliteChatStore, StoreError};
use crate::models::NewThread;

fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid RFC3339 timestamp")
        .with_timezone(&Utc)
}

fn store() -> SqliteChatStore {
    let store = SqliteChatStore::new_in_memory().expect("in-memory store");
    store.init().expect("init schema");
    for (id, role) in [
        ("alice", UserRole::Human),
        ("bob", UserRole::Human),
        ("bot01", UserRole::Bot),
        ("context", UserRole::Hidden),
    ] {
        store.insert_user(&user(id, role)).expect("insert user");
    }
    store
}

fn user(id: &str, role: UserRole) -> User {
    User {
        id: UserId::new(id),
        name: id.to_owned(),
        secret_hash: "00".repeat(32),
        role,
        active: true,
        ext_id: None,
        ext_src: None,
        last_active: None,
        created_at: ts("2026-01-01T00:00:00Z"),
    }
}

fn topic(id: &str, max_human: u32) -> Topic {
    Topic {
        id: TopicId::new(id),
        name: format!("Topic {id}"),
        super_topic_id: None,
        conversation: vec![SeedUtterance {
            speaker_id: SpeakerId::new("a"),
            text: "Cats are great.".into(),
        }],
        endpoint: "dummy".into(),
        persona_id: None,
        limits: TopicLimits {
            max_human_users_per_thread: max_human,
            ..TopicLimits::default()
        },
        ext_id: None,
        ext_src: None,
        created_at: ts("2026-01-01T00:00:00Z"),
    }
}

fn new_thread(topic: &Topic, creator: &str) -> NewThread {
    NewThread {
        topic_id: topic.id.clone(),
        config: ThreadConfig::from_topic(topic),
        creator: UserId::new(creator),
        creator_role: UserRole::Human,
        ext_id: None,
        ext_src: None,
    }
}

fn window() -> Duration {
    Duration::seconds(30)
}

/// Reserve and complete a thread the way the lifecycle does.
fn ready_thread(store: &SqliteChatStore, topic: &Topic, creator: &str) -> ChatThread {
    let mut thread = store
        .try_begin_thread_creation(&new_thread(topic, creator), window())
        .expect("begin creation")
        .expect("reservation granted");
    thread.speak_order = vec![SpeakerId::moderator(), SpeakerId::new("a")];
    thread.add_participant(UserId::new("bot01"), UserRole::Bot);
    thread
        .speakers
        .insert(UserId::new(creator), SpeakerId::new("a"));
    thread.creation = CreationState::Ready;
    let seed = MessageDraft::seed(UserId::new("context"), &topic.conversation[0]);
    store
        .commit_thread(&mut thread, vec![seed])
        .expect("commit ready thread");
    thread
}

// ---------------------------------------------------------------------------
// users
// ---------------------------------------------------------------------------

#[test]
fn test_insert_and_get_user() {
    let store = store();
    let alice = store
        .get_user(&UserId::new("alice"))
        .expect("get user")
        .expect("alice exists");
    assert_eq!(alice.role, UserRole::Human);
    assert_eq!(alice.created_at, ts("2026-01-01T00:00:00Z"));
    assert!(store.get_user(&UserId::new("nobody")).unwrap().is_none());
}

#[test]
fn test_duplicate_user_is_reported() {
    let store = store();
    let err = store.insert_user(&user("alice", UserRole::Human)).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
}

#[test]
fn test_find_user_by_external_and_update() {
    let store = store();
    let mut worker = user("w1", UserRole::Human);
    worker.ext_src = Some("mturk".into());
    worker.ext_id = Some("A1B2C3".into());
    store.insert_user(&worker).expect("insert worker");

    let found = store
        .find_user_by_external("mturk", "A1B2C3")
        .expect("lookup")
        .expect("worker found");
    assert_eq!(found.id, UserId::new("w1"));

    worker.role = UserRole::HumanModerator;
    worker.last_active = Some(ts("2026-02-01T10:00:00Z"));
    store.update_user(&worker).expect("update");
    let reloaded = store.get_user(&UserId::new("w1")).unwrap().unwrap();
    assert_eq!(reloaded.role, UserRole::HumanModerator);
    assert_eq!(reloaded.last_active, Some(ts("2026-02-01T10:00:00Z")));

    assert!(matches!(
        store.update_user(&user("ghost", UserRole::Human)),
        Err(StoreError::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// topics
// ---------------------------------------------------------------------------

#[test]
fn test_topics_round_trip_and_delete_keeps_threads() {
    let store = store();
    let t = topic("cats", 1);
    store.insert_topic(&t).expect("insert topic");
    assert_eq!(store.get_topic(&t.id).unwrap(), Some(t.clone()));
    assert!(matches!(
        store.insert_topic(&t),
        Err(StoreError::Duplicate(_))
    ));

    let thread = ready_thread(&store, &t, "alice");
    assert!(store.delete_topic(&t.id).expect("delete"));
    assert!(!store.delete_topic(&t.id).expect("delete again"));
    assert!(store.get_topic(&t.id).unwrap().is_none());

    let kept = store.get_thread(&thread.id).unwrap().expect("thread kept");
    assert_eq!(kept.config.topic_name, "Topic cats");
}

#[test]
fn test_super_topic_children() {
    let store = store();
    let parent = SuperTopic {
        id: SuperTopicId::new("pets"),
        name: "Pets".into(),
        conversation: vec![],
        created_at: ts("2026-01-01T00:00:00Z"),
    };
    store.insert_super_topic(&parent).expect("insert super topic");
    assert_eq!(store.get_super_topic(&parent.id).unwrap(), Some(parent.clone()));

    for n in 0..2 {
        let mut child = topic(&format!("pets_{n:03}"), 1);
        child.super_topic_id = Some(parent.id.clone());
        store.insert_topic(&child).expect("insert child");
    }
    store.insert_topic(&topic("other", 1)).unwrap();

    let children = store.list_topics_for_super_topic(&parent.id).unwrap();
    let ids: Vec<&str> = children.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["pets_000", "pets_001"]);
    assert_eq!(store.list_topics().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// thread creation
// ---------------------------------------------------------------------------

#[test]
fn test_begin_creation_persists_marker() {
    let store = store();
    let t = topic("cats", 1);
    let thread = store
        .try_begin_thread_creation(&new_thread(&t, "alice"), window())
        .unwrap()
        .expect("reservation");

    let stored = store.get_thread(&thread.id).unwrap().expect("stored");
    assert_eq!(stored.creation, CreationState::BeingCreated);
    assert_eq!(stored.participants.len(), 1);
    assert_eq!(stored.participants[0].user_id, UserId::new("alice"));
}

#[test]
fn test_second_reservation_for_same_user_is_refused() {
    let store = store();
    let t = topic("cats", 1);
    let first = store
        .try_begin_thread_creation(&new_thread(&t, "alice"), window())
        .unwrap();
    assert!(first.is_some());

    let second = store
        .try_begin_thread_creation(&new_thread(&t, "alice"), window())
        .unwrap();
    assert!(second.is_none());
    assert_eq!(store.list_topic_threads(&t.id).unwrap().len(), 1);
}

#[test]
fn test_single_seat_topics_create_in_parallel_for_different_users() {
    let store = store();
    let t = topic("cats", 1);
    assert!(store
        .try_begin_thread_creation(&new_thread(&t, "alice"), window())
        .unwrap()
        .is_some());
    assert!(store
        .try_begin_thread_creation(&new_thread(&t, "bob"), window())
        .unwrap()
        .is_some());
}

#[test]
fn test_shared_topic_waits_for_pending_creation() {
    let store = store();
    let t = topic("debate", 2);
    assert!(store
        .try_begin_thread_creation(&new_thread(&t, "alice"), window())
        .unwrap()
        .is_some());
    assert!(store
        .try_begin_thread_creation(&new_thread(&t, "bob"), window())
        .unwrap()
        .is_none());
}

#[test]
fn test_stale_marker_is_reclaimed() {
    let store = store();
    let t = topic("cats", 1);
    let stale = store
        .try_begin_thread_creation(&new_thread(&t, "alice"), window())
        .unwrap()
        .expect("first reservation");

    let fresh = store
        .try_begin_thread_creation(&new_thread(&t, "alice"), Duration::seconds(-1))
        .unwrap()
        .expect("stale marker reclaimed");
    assert_ne!(fresh.id, stale.id);
    assert!(store.get_thread(&stale.id).unwrap().is_none());
}

#[test]
fn test_abort_removes_reservation() {
    let store = store();
    let t = topic("cats", 1);
    let thread = store
        .try_begin_thread_creation(&new_thread(&t, "alice"), window())
        .unwrap()
        .unwrap();
    store.abort_thread_creation(&thread.id).expect("abort");
    assert!(store.get_thread(&thread.id).unwrap().is_none());
    assert_eq!(store.count_user_threads(&UserId::new("alice")).unwrap(), 0);
}

// ---------------------------------------------------------------------------
// commits
// ---------------------------------------------------------------------------

#[test]
fn test_commit_appends_messages_in_order() {
    let store = store();
    let t = topic("cats", 1);
    let mut thread = ready_thread(&store, &t, "alice");
    assert_eq!(thread.version, 1);

    let saved = store
        .commit_thread(
            &mut thread,
            vec![
                MessageDraft::new(UserId::new("alice"), "first"),
                MessageDraft::new(UserId::new("bot01"), "second"),
            ],
        )
        .expect("commit");
    assert_eq!(saved.len(), 2);
    assert_eq!(thread.version, 2);

    let stored = store.get_thread(&thread.id).unwrap().unwrap();
    let texts: Vec<&str> = stored.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["Cats are great.", "first", "second"]);
    assert!(stored.messages[0].is_seed);
    assert_eq!(stored.messages[0].data["speaker_id"], "a");
    assert_eq!(stored.version, 2);
    assert_eq!(stored.creation, CreationState::Ready);
}

#[test]
fn test_stale_commit_is_rejected() {
    let store = store();
    let t = topic("cats", 1);
    ready_thread(&store, &t, "alice");
    let id = store.list_topic_threads(&t.id).unwrap()[0].id.clone();

    let mut first = store.get_thread(&id).unwrap().unwrap();
    let mut second = store.get_thread(&id).unwrap().unwrap();

    first.current_speaker_idx = 1;
    store.commit_thread(&mut first, vec![]).expect("first commit");

    second.current_turns = 7;
    let err = store
        .commit_thread(&mut second, vec![MessageDraft::new(UserId::new("alice"), "late")])
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    let stored = store.get_thread(&id).unwrap().unwrap();
    assert_eq!(stored.current_speaker_idx, 1);
    assert_eq!(stored.current_turns, 0);
    assert!(stored.messages.iter().all(|m| m.text != "late"));
}

#[test]
fn test_dirty_maps_are_persisted() {
    let store = store();
    let t = topic("cats", 1);
    let mut thread = ready_thread(&store, &t, "alice");

    let mut answers = serde_json::Map::new();
    answers.insert("engaging".into(), serde_json::json!(5));
    thread.ratings.insert(UserId::new("alice"), answers);
    thread
        .assignments
        .insert(UserId::new("alice"), "asg-9".to_owned());
    store.commit_thread(&mut thread, vec![]).expect("commit");
    assert!(!thread.ratings.is_dirty());

    let stored = store.get_thread(&thread.id).unwrap().unwrap();
    assert_eq!(
        stored.ratings.get(&UserId::new("alice")).unwrap()["engaging"],
        5
    );
    assert_eq!(
        stored.assignments.get(&UserId::new("alice")).map(String::as_str),
        Some("asg-9")
    );
    assert_eq!(
        stored.speakers.get(&UserId::new("alice")),
        Some(&SpeakerId::new("a"))
    );
}

#[test]
fn test_participant_role_updates() {
    let store = store();
    let t = topic("debate", 2);
    let mut thread = ready_thread(&store, &t, "alice");
    thread.add_participant(UserId::new("bob"), UserRole::HumanModerator);
    store.commit_thread(&mut thread, vec![]).unwrap();

    let stored = store.get_thread(&thread.id).unwrap().unwrap();
    let bob = stored.participant(&UserId::new("bob")).expect("bob joined");
    assert_eq!(bob.role, UserRole::HumanModerator);
    assert_eq!(stored.human_occupancy(), 2);
}

// ---------------------------------------------------------------------------
// queries
// ---------------------------------------------------------------------------

#[test]
fn test_user_threads_and_counts() {
    let store = store();
    let cats = topic("cats", 1);
    let dogs = topic("dogs", 1);
    ready_thread(&store, &cats, "alice");
    let mut done = ready_thread(&store, &dogs, "alice");
    ready_thread(&store, &dogs, "bob");

    done.episode_done = true;
    store.commit_thread(&mut done, vec![]).unwrap();

    // Finished threads no longer count.
    assert_eq!(store.count_user_threads(&UserId::new("alice")).unwrap(), 1);
    assert_eq!(store.list_user_threads(&UserId::new("alice")).unwrap().len(), 2);
    assert_eq!(store.list_user_threads(&UserId::new("bob")).unwrap().len(), 1);
    assert_eq!(store.list_topic_threads(&dogs.id).unwrap().len(), 2);

    let completed = store.thread_counts(true).unwrap();
    assert_eq!(completed.get(&dogs.id), Some(&1));
    assert_eq!(completed.get(&cats.id), None);

    let open = store.thread_counts(false).unwrap();
    assert_eq!(open.get(&cats.id), Some(&1));
    assert_eq!(open.get(&dogs.id), Some(&1));

    assert_eq!(store.list_recent_threads(2).unwrap().len(), 2);
}
