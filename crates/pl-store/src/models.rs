use std::collections::HashMap;

use pl_core::core::{ThreadConfig, TopicId, UserId, UserRole};

/// Request to reserve a new thread for a topic.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub topic_id: TopicId,
    pub config: ThreadConfig,
    pub creator: UserId,
    pub creator_role: UserRole,
    pub ext_id: Option<String>,
    pub ext_src: Option<String>,
}

/// Number of threads per topic.
pub type ThreadCounts = HashMap<TopicId, u64>;
