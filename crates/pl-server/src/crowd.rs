use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use pl_core::core::{Completion, CrowdError, CrowdService};

use crate::config::CrowdConfig;

/// In-process crowd service: qualifications come from config and completed
/// assignments are only logged.
pub struct LocalCrowd {
    name: String,
    qualified_workers: HashMap<String, Vec<String>>,
}

impl LocalCrowd {
    pub fn new(name: impl Into<String>, qualified_workers: HashMap<String, Vec<String>>) -> Self {
        Self {
            name: name.into(),
            qualified_workers,
        }
    }

    pub fn from_config(config: &CrowdConfig) -> Self {
        Self::new(config.name.clone(), config.qualified_workers.clone())
    }
}

impl CrowdService for LocalCrowd {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_worker_qualified<'a>(
        &'a self,
        worker_id: &'a str,
        qualification: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, CrowdError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .qualified_workers
                .get(qualification)
                .is_some_and(|workers| workers.iter().any(|w| w == worker_id)))
        })
    }

    fn submit_completion<'a>(
        &'a self,
        completion: &'a Completion,
    ) -> Pin<Box<dyn Future<Output = Result<(), CrowdError>> + Send + 'a>> {
        Box::pin(async move {
            if completion.assignment_id.trim().is_empty() {
                return Err(CrowdError::Rejected {
                    service: self.name.clone(),
                    reason: "empty assignment id".to_owned(),
                });
            }
            tracing::info!(
                crowd = %self.name,
                thread_id = %completion.thread_id,
                user_id = %completion.user_id,
                assignment_id = %completion.assignment_id,
                submit_url = completion.submit_url.as_deref().unwrap_or(""),
                "assignment completed"
            );
            Ok(())
        })
    }
}
