//! Bounded-parallelism task runner.
//!
//! Runs named units of work with at most `max_parallelism` in flight. A
//! failing or panicking task never stops its siblings; every failure is
//! collected and returned once all started tasks have finished. When the
//! cancellation token fires, tasks that were not started yet are recorded
//! as cancelled.

use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

type Work = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A named unit of work.
pub struct Task {
    name: String,
    work: Work,
}

impl Task {
    /// Create a task running `work` with a child of the runner's token.
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Box::new(move |cancel| work(cancel).boxed()),
        }
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Failure of a single task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task returned an error.
    #[error("task {name} failed: {source:#}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The task panicked.
    #[error("task {name} panicked: {message}")]
    Panicked {
        name: String,
        message: String,
        stack: String,
    },

    /// The task was never started because the runner was cancelled.
    #[error("task {name} not started: cancelled")]
    Cancelled { name: String },
}

impl TaskError {
    /// Name of the task that failed.
    #[must_use]
    pub fn task_name(&self) -> &str {
        match self {
            Self::Failed { name, .. } | Self::Panicked { name, .. } | Self::Cancelled { name } => {
                name
            }
        }
    }
}

/// Run `tasks` with at most `max_parallelism` executing at once.
///
/// Returns the errors of every failed, panicked or unstarted task, in no
/// particular order. An empty result means every task succeeded.
pub async fn run_concurrently(
    cancel: &CancellationToken,
    tasks: Vec<Task>,
    max_parallelism: usize,
) -> Vec<TaskError> {
    let semaphore = Arc::new(Semaphore::new(max_parallelism.max(1)));
    let mut running = JoinSet::new();
    let mut names = HashMap::new();
    let mut errors = Vec::new();
    let mut pending = tasks.into_iter();

    while let Some(task) = pending.next() {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            debug!(task = %task.name, "Runner cancelled, abandoning unstarted tasks");
            errors.push(TaskError::Cancelled { name: task.name });
            errors.extend(pending.by_ref().map(|t| TaskError::Cancelled { name: t.name }));
            break;
        };

        let Task { name, work } = task;
        let child = cancel.child_token();
        let task_name = name.clone();
        let handle = running.spawn(async move {
            let _permit = permit;
            match AssertUnwindSafe(async move { work(child).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(source)) => Err(TaskError::Failed {
                    name: task_name,
                    source,
                }),
                Err(payload) => Err(TaskError::Panicked {
                    name: task_name,
                    message: panic_message(payload.as_ref()),
                    stack: Backtrace::force_capture().to_string(),
                }),
            }
        });
        names.insert(handle.id(), name);
    }

    while let Some(joined) = running.join_next_with_id().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((_, Err(e))) => {
                if let TaskError::Panicked { name, stack, .. } = &e {
                    error!(task = %name, stack = %stack, "Task panicked");
                }
                errors.push(e);
            }
            Err(join_error) => {
                let name = names
                    .remove(&join_error.id())
                    .unwrap_or_else(|| "<unknown>".to_string());
                errors.push(TaskError::Panicked {
                    name,
                    message: join_error.to_string(),
                    stack: String::new(),
                });
            }
        }
    }

    errors
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
