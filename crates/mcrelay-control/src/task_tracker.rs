//! Task tracking for connection manage loops
//!
//! Keeps the JoinHandle of every manage task so shutdown can wait for them to finish
//! and abort whatever is still running after the grace period.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tracks background tasks keyed by agent id
pub struct TaskTracker {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Track the manage task of a newly registered agent
    pub fn register(&self, agent_id: String, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(agent_id, handle);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `grace` for every tracked task, then abort the rest.
    ///
    /// Returns the number of tasks that had to be aborted.
    pub async fn join_all(&self, grace: Duration) -> usize {
        let handles: Vec<(String, JoinHandle<()>)> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().collect(),
            Err(_) => return 0,
        };

        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for (agent_id, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(agent_id = %agent_id, "Manage task finished"),
                Ok(Err(e)) => warn!(agent_id = %agent_id, "Manage task ended abnormally: {}", e),
                Err(_) => {
                    warn!(agent_id = %agent_id, "Manage task still running after {:?}, aborting", grace);
                    handle.abort();
                    aborted += 1;
                }
            }
        }

        aborted
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_join_all_drains_finished_tasks() {
        let tracker = TaskTracker::new();

        tracker.register("survival".to_string(), tokio::spawn(async {}));
        tracker.register("creative".to_string(), tokio::spawn(async {}));
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.join_all(Duration::from_secs(1)).await, 0);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_all_aborts_stragglers() {
        let tracker = TaskTracker::new();

        tracker.register("quick".to_string(), tokio::spawn(async {}));
        tracker.register(
            "stuck".to_string(),
            tokio::spawn(async { tokio::time::sleep(Duration::from_secs(3600)).await }),
        );

        let aborted = tracker.join_all(Duration::from_secs(5)).await;
        assert_eq!(aborted, 1);
        assert!(tracker.is_empty());
    }
}
