use std::collections::HashSet;

use crate::core::{
    joiner_labels, plan_speak_order, turn_budget, ChatThread, ConfigError, CreationState,
    MessageDraft, SpeakerId, ThreadId, Topic, UserId, UserRole,
};

// ---------------------------------------------------------------------------
// Seat assignment
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seat {
    pub speaker: SpeakerId,
    pub role: UserRole,
}

/// Pick the speaker label a new participant would play in `thread`.
///
/// The Moderator seat goes to a qualified human when the topic asks for a
/// human moderator and nobody holds it yet. Otherwise the first unclaimed
/// human label is taken. `None` means the thread has no seat for this user.
pub fn assign_seat(thread: &ChatThread, moderator_qualified: bool) -> Option<Seat> {
    let claimed: HashSet<&SpeakerId> = thread.speakers.values().collect();

    if thread.config.limits.human_moderator
        && moderator_qualified
        && !claimed.contains(&SpeakerId::moderator())
    {
        return Some(Seat {
            speaker: SpeakerId::moderator(),
            role: UserRole::HumanModerator,
        });
    }

    joiner_labels(&thread.speak_order)
        .into_iter()
        .find(|label| !claimed.contains(label))
        .map(|speaker| Seat {
            speaker,
            role: UserRole::Human,
        })
}

// ---------------------------------------------------------------------------
// Thread lookup
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreadLookup {
    /// The user already takes part in this ready thread.
    Member(ThreadId),
    /// The user may join this thread with the given seat.
    Vacancy { thread: ThreadId, seat: Seat },
    /// A matching thread is still being created; the caller should retry.
    Contended(ThreadId),
    /// No thread can take the user.
    NoVacancy,
}

/// Decide which of `threads` (all of one topic) a user should land in.
///
/// Membership wins over vacancies. A thread under creation only contends
/// when it could still take the user.
pub fn find_thread_for_user(
    threads: &[ChatThread],
    user: &UserId,
    moderator_qualified: bool,
) -> ThreadLookup {
    if let Some(thread) = threads.iter().find(|t| t.has_user(user)) {
        return match thread.creation {
            CreationState::Ready => ThreadLookup::Member(thread.id.clone()),
            _ => ThreadLookup::Contended(thread.id.clone()),
        };
    }

    for thread in threads {
        if thread.episode_done || thread.is_full() {
            continue;
        }
        if thread.creation != CreationState::Ready {
            return ThreadLookup::Contended(thread.id.clone());
        }
        if let Some(seat) = assign_seat(thread, moderator_qualified) {
            return ThreadLookup::Vacancy {
                thread: thread.id.clone(),
                seat,
            };
        }
    }

    ThreadLookup::NoVacancy
}

// ---------------------------------------------------------------------------
// Creation and joining
// ---------------------------------------------------------------------------

/// Users every new thread is wired up with besides its creator.
#[derive(Clone, Debug)]
pub struct SystemUsers {
    pub bot: UserId,
    pub context: UserId,
}

/// Crowd-side details a participant arrives with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Arrival {
    pub assignment_id: Option<String>,
    pub submit_url: Option<String>,
}

/// Fill a freshly reserved thread: speak order, turn budget, participants,
/// the creator's seat and the seed messages to store with it.
///
/// The thread ends up `Ready`; nothing is persisted here.
pub fn initialize_thread(
    thread: &mut ChatThread,
    topic: &Topic,
    creator: &UserId,
    moderator_qualified: bool,
    system: &SystemUsers,
    arrival: &Arrival,
) -> Result<Vec<MessageDraft>, ConfigError> {
    thread.speak_order = plan_speak_order(topic);
    thread.current_speaker_idx = 0;
    thread.current_turns = 0;
    thread.max_turns = turn_budget(&topic.limits);
    thread.remaining_turns = thread.max_turns;

    thread.add_participant(system.bot.clone(), UserRole::Bot);
    thread.add_participant(system.context.clone(), UserRole::Hidden);
    if thread.is_bot_moderated() {
        thread
            .speakers
            .insert(system.bot.clone(), SpeakerId::moderator());
    }

    let seat = assign_seat(thread, moderator_qualified).ok_or_else(|| ConfigError::NoSeat {
        thread: thread.id.clone(),
        user: creator.clone(),
    })?;
    seat_user(thread, creator, seat, arrival);

    let seeds = topic
        .conversation
        .iter()
        .map(|utterance| MessageDraft::seed(system.context.clone(), utterance))
        .collect();

    thread.creation = CreationState::Ready;
    Ok(seeds)
}

/// Seat `user` in `thread`, recording their crowd arrival details.
pub fn seat_user(thread: &mut ChatThread, user: &UserId, seat: Seat, arrival: &Arrival) {
    if let Some(p) = thread.participants.iter_mut().find(|p| &p.user_id == user) {
        p.role = seat.role;
    } else {
        thread.add_participant(user.clone(), seat.role);
    }
    thread.speakers.insert(user.clone(), seat.speaker);
    if let Some(id) = &arrival.assignment_id {
        thread.assignments.insert(user.clone(), id.clone());
    }
    if let Some(url) = &arrival.submit_url {
        thread.submit_urls.insert(user.clone(), url.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
