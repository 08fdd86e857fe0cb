//! # Worker Profile Resolution
//!
//! A profile is the named set of task types a worker process is willing to
//! execute. Most processes only publish; for them resolution yields `None`.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TaskerConfig;

/// The resolved, immutable profile this process consumes for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerProfile {
    name: String,
    task_types: Vec<String>,
}

impl WorkerProfile {
    /// Create a profile, collapsing duplicate task types (first occurrence wins)
    pub fn new<I, S>(name: impl Into<String>, task_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for task_type in task_types {
            let task_type = task_type.into();
            if !unique.contains(&task_type) {
                unique.push(task_type);
            }
        }

        Self {
            name: name.into(),
            task_types: unique,
        }
    }

    /// Select the profile named by `config.worker`
    ///
    /// Returns `None` when `worker` is unset or names a profile that is not
    /// declared: the process is a publisher, not a misconfigured worker.
    pub fn resolve(config: &TaskerConfig) -> Option<Self> {
        let Some(name) = config.worker.as_deref() else {
            debug!("No worker profile configured; process will not consume tasks");
            return None;
        };

        let Some(profile) = config.profiles.get(name) else {
            warn!(
                worker = %name,
                known_profiles = ?config.profiles.keys().collect::<Vec<_>>(),
                "Worker profile not declared; process will not consume tasks"
            );
            return None;
        };

        let resolved = Self::new(name, profile.tasks.iter().cloned());
        if resolved.task_types.len() < profile.tasks.len() {
            warn!(
                worker = %name,
                declared = profile.tasks.len(),
                unique = resolved.task_types.len(),
                "Worker profile repeats task types; duplicates ignored"
            );
        }
        info!(
            worker = %resolved.name,
            task_types = ?resolved.task_types,
            "Resolved worker profile"
        );
        Some(resolved)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task types in declaration order
    pub fn task_types(&self) -> &[String] {
        &self.task_types
    }

    pub fn is_empty(&self) -> bool {
        self.task_types.is_empty()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.task_types.iter().any(|t| t == task_type)
    }
}
