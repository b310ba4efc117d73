//! Base Orch trait.

use async_trait::async_trait;

/// Base trait for all orchestration agents.
///
/// A host event loop owns each Orch, feeds its consumers and calls
/// [`Orch::do_task`] whenever [`Orch::has_pending_tasks`] reports work.
/// Calls are serialized by the host; implementations keep their state
/// behind `&mut self` and need no internal locking.
#[async_trait]
pub trait Orch: Send + Sync {
    /// Returns the name of this Orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes pending entries from all consumers.
    ///
    /// Entries that fail with a retryable status are put back on their
    /// consumer; the rest are dropped after logging.
    async fn do_task(&mut self);

    /// Returns the priority of this Orch (lower = higher priority).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if this Orch has pending work.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Dumps pending tasks for debugging.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingOrch {
        runs: usize,
        budget: usize,
    }

    #[async_trait]
    impl Orch for CountingOrch {
        fn name(&self) -> &str {
            "CountingOrch"
        }

        async fn do_task(&mut self) {
            self.runs += 1;
        }

        fn has_pending_tasks(&self) -> bool {
            self.runs < self.budget
        }
    }

    #[tokio::test]
    async fn test_loop_until_idle() {
        let mut orch = CountingOrch { runs: 0, budget: 3 };

        while orch.has_pending_tasks() {
            orch.do_task().await;
        }

        assert_eq!(orch.runs, 3);
        assert_eq!(orch.priority(), 0);
        assert!(orch.dump_pending_tasks().is_empty());
    }
}
