use crate::core::{assign_seat, ChatThread, CreationState, LimitExceeded, Topic, UserId};

// ---------------------------------------------------------------------------
// LimitPolicy — may a user start or join another thread of a topic (pure)
// ---------------------------------------------------------------------------

/// How many threads a user already takes part in, across all topics.
#[derive(Clone, Debug)]
pub struct UserParticipation {
    pub user_id: UserId,
    pub thread_count: usize,
    /// Whether the user may take a human Moderator seat.
    pub moderator_qualified: bool,
}

#[derive(Clone, Debug, Default)]
pub struct LimitPolicy {
    pub max_threads_per_user: Option<u32>,
}

impl LimitPolicy {
    pub fn new(max_threads_per_user: Option<u32>) -> Self {
        Self {
            max_threads_per_user,
        }
    }

    /// Decide whether `user` may enter `topic`, given all of the topic's
    /// threads.
    ///
    /// A user who is already in one of the threads is always let back in.
    /// At the topic cap a thread only counts as open when it has a seat this
    /// user could take. With `user = None` only the topic cap is checked.
    pub fn check(
        &self,
        topic: &Topic,
        threads: &[ChatThread],
        user: Option<&UserParticipation>,
    ) -> Result<(), LimitExceeded> {
        if let Some(user) = user {
            if threads.iter().any(|t| t.has_user(&user.user_id)) {
                return Ok(());
            }
            if let Some(cap) = self.max_threads_per_user {
                if user.thread_count >= cap as usize {
                    return Err(LimitExceeded {
                        reason: format!(
                            "user {} already takes part in {} threads (limit {cap})",
                            user.user_id, user.thread_count
                        ),
                    });
                }
            }
        }

        let cap = topic.limits.max_threads as usize;
        let count = threads.len();
        if topic.limits.max_human_users_per_thread <= 1 {
            if count >= cap {
                return Err(LimitExceeded {
                    reason: format!("topic {} reached its limit of {cap} threads", topic.id),
                });
            }
            return Ok(());
        }

        let qualified = user.is_some_and(|u| u.moderator_qualified);
        let has_vacancy = threads.iter().any(|t| {
            !t.episode_done
                && !t.is_full()
                && (t.creation != CreationState::Ready || assign_seat(t, qualified).is_some())
        });
        if count > cap || (count == cap && !has_vacancy) {
            return Err(LimitExceeded {
                reason: format!(
                    "topic {} reached its limit of {cap} threads and none has a free seat",
                    topic.id
                ),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
