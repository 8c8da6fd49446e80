//! A set of tasks that live and die together.
//!
//! ```text
//!   spawn(reader) ─┐
//!                  ├─► first exit ─► cancel token ─► join rest (grace) ─► abort stragglers
//!   spawn(proc)  ──┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{ReverseError, ReverseResult};

/// Tasks sharing one cancellation token.
///
/// Every task is expected to return promptly once the token is cancelled.
pub struct TaskGroup {
    tasks: JoinSet<ReverseResult<()>>,
    names: HashMap<Id, &'static str>,
    token: CancellationToken,
}

impl TaskGroup {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            names: HashMap::new(),
            token,
        }
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ReverseResult<()>> + Send + 'static,
    {
        let handle = self.tasks.spawn(task);
        self.names.insert(handle.id(), name);
    }

    /// Waits for the first task to exit, cancels the others and joins them.
    ///
    /// Tasks still running `grace` after the cancellation are aborted.
    /// Returns the first error observed, in exit order, or `Ok(())` if every
    /// task finished cleanly.
    pub async fn join(mut self, grace: Duration) -> ReverseResult<()> {
        let mut outcome = Ok(());

        if let Some(first) = self.tasks.join_next_with_id().await {
            self.record(first, &mut outcome);
        }
        self.token.cancel();

        let drained = tokio::time::timeout(grace, async {
            while let Some(exit) = self.tasks.join_next_with_id().await {
                self.record(exit, &mut outcome);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "aborting tasks that ignored cancellation");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        outcome
    }

    fn record(
        &self,
        exit: Result<(Id, ReverseResult<()>), tokio::task::JoinError>,
        outcome: &mut ReverseResult<()>,
    ) {
        let (name, result) = match exit {
            Ok((id, result)) => (self.name(id), result),
            Err(e) => {
                let name = self.name(e.id());
                tracing::error!(task = name, error = %e, "task did not complete");
                (name, Err(ReverseError::TaskFailed(name)))
            }
        };

        match result {
            Ok(()) => tracing::debug!(task = name, "task exited"),
            Err(e) => {
                tracing::debug!(task = name, error = %e, "task exited with error");
                if outcome.is_ok() {
                    *outcome = Err(e);
                }
            }
        }
    }

    fn name(&self, id: Id) -> &'static str {
        self.names.get(&id).copied().unwrap_or("unnamed")
    }
}
