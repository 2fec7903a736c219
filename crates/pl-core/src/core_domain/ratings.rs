use crate::core::{ChatThread, Completion, Ratings, TurnError, UserId};

// ---------------------------------------------------------------------------
// Post-conversation ratings
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RatingOutcome {
    /// Stored; more raters are needed.
    Recorded { raters: usize, required: usize },
    /// This rating completed the thread.
    Completed,
    /// The thread was already fully rated; nothing changed.
    AlreadyComplete,
}

/// Number of distinct raters needed to finish a thread.
pub fn required_raters(thread: &ChatThread) -> usize {
    (thread.config.limits.max_human_users_per_thread as usize).max(1)
}

/// Store `user`'s answers on the thread.
///
/// Once the required number of distinct raters is reached the thread is
/// marked done and rated. A rating arriving after that leaves the thread
/// untouched.
pub fn record_rating(
    thread: &mut ChatThread,
    user: &UserId,
    ratings: Ratings,
) -> Result<RatingOutcome, TurnError> {
    let is_human = thread
        .participant(user)
        .is_some_and(|p| p.role.is_human_seat());
    if !is_human {
        return Err(TurnError::NotInThread {
            user: user.clone(),
            thread: thread.id.clone(),
        });
    }
    if thread.rating_done {
        return Ok(RatingOutcome::AlreadyComplete);
    }

    thread.ratings.insert(user.clone(), ratings);
    let raters = thread.ratings.len();
    let required = required_raters(thread);
    if raters >= required {
        thread.episode_done = true;
        thread.rating_done = true;
        return Ok(RatingOutcome::Completed);
    }
    Ok(RatingOutcome::Recorded { raters, required })
}

/// Crowd completions owed for a fully rated thread: one per rater that
/// arrived with an assignment.
pub fn completions(thread: &ChatThread) -> Vec<Completion> {
    thread
        .ratings
        .iter()
        .filter_map(|(user, ratings)| {
            let assignment_id = thread.assignments.get(user)?;
            Some(Completion {
                thread_id: thread.id.clone(),
                user_id: user.clone(),
                assignment_id: assignment_id.clone(),
                submit_url: thread.submit_urls.get(user).cloned(),
                ratings: ratings.clone(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
