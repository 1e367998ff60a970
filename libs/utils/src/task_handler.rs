// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A set of long-running tasks that share one cancellation token.
//!
//! Every task spawned on a [`CancelTaskSet`] runs until it finishes or the shared
//! token is cancelled. When any task finishes on its own, successful or not, the
//! token is cancelled so the remaining tasks wind down as well. A node is only
//! useful with all of its workers running.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Error type returned by tasks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Set of tasks bound to a shared [`CancellationToken`].
#[derive(Debug)]
pub struct CancelTaskSet {
    tasks: JoinSet<Result<(), TaskError>>,
    cancellation_token: CancellationToken,
}

impl Default for CancelTaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelTaskSet {
    /// Creates an empty task set with a fresh cancellation token.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Creates an empty task set bound to an existing token.
    pub fn with_token(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancellation_token,
        }
    }

    /// Returns a clone of the token shared by all tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Number of tasks that have not been joined yet.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no task is left.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawns a task that is dropped when the token is cancelled.
    ///
    /// A task that completes on its own cancels the token.
    pub fn spawn_cancellable_task<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let token = self.cancellation_token.clone();
        self.tasks.spawn(async move {
            match token.run_until_cancelled(task).await {
                Some(result) => {
                    token.cancel();
                    result
                }
                None => Ok(()),
            }
        });
    }

    /// Cancels all tasks.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Waits for all tasks to finish.
    ///
    /// Returns the first task error, if any. A panicking task is reported as an
    /// error as well.
    pub async fn join_all(&mut self) -> Result<(), TaskSetError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => TaskSetError::Failed(e),
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    self.cancellation_token.cancel();
                    TaskSetError::Panicked(e.to_string())
                }
            };
            tracing::debug!(error=%error, "Task terminated with error");
            first_error.get_or_insert(error);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Errors reported by [`CancelTaskSet::join_all`].
#[derive(Debug, thiserror::Error)]
pub enum TaskSetError {
    /// A task returned an error.
    #[error("task failed: {0}")]
    Failed(TaskError),
    /// A task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn first_exit_cancels_the_rest() {
        let mut tasks = CancelTaskSet::new();
        let token = tasks.cancellation_token();

        tasks.spawn_cancellable_task(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        tasks.spawn_cancellable_task(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        });

        tasks.join_all().await.unwrap();
        assert!(token.is_cancelled());
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn failing_task_is_reported() {
        let mut tasks = CancelTaskSet::new();
        tasks.spawn_cancellable_task(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        tasks.spawn_cancellable_task(async { Err("device removed".into()) });

        let result = tasks.join_all().await;
        assert_matches!(result, Err(TaskSetError::Failed(e)) if e.to_string() == "device removed");
        assert!(tasks.is_empty());
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn external_cancel_is_graceful() {
        let mut tasks = CancelTaskSet::new();
        for _ in 0..3 {
            tasks.spawn_cancellable_task(async {
                std::future::pending::<()>().await;
                Ok(())
            });
        }
        assert_eq!(tasks.len(), 3);

        tasks.cancel();
        tasks.join_all().await.unwrap();
    }
}
