//! Retry group: fan out independently retried operations under one scope
//!
//! Every member runs the executor's full retry loop on its own task with the
//! group's cancellation token, a child of the caller's token. `wait()` joins
//! all members and returns the failed ones in completion order.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RetryError;
use crate::retry::RetryExecutor;

/// Terminal error of one failed group member
#[derive(Debug, Error)]
#[error("retry group member '{key}' failed: {error}")]
pub struct MemberError<E>
where
    E: StdError + Send + Sync + 'static,
{
    pub key: String,
    #[source]
    pub error: RetryError<E>,
}

/// Cancellation scope and join barrier over retried member tasks
///
/// Dropping a group without calling [`wait`](Self::wait) cancels its scope
/// and aborts the member tasks.
pub struct RetryGroup<E>
where
    E: StdError + Send + Sync + 'static,
{
    executor: RetryExecutor,
    token: CancellationToken,
    tasks: JoinSet<()>,
    errors: Arc<Mutex<Vec<MemberError<E>>>>,
    limiter: Option<Arc<Semaphore>>,
    members: usize,
}

impl<E> fmt::Debug for RetryGroup<E>
where
    E: StdError + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryGroup")
            .field("executor", &self.executor.name())
            .field("members", &self.members)
            .field("cancelled", &self.token.is_cancelled())
            .field("limit", &self.limiter.as_ref().map(|s| s.available_permits()))
            .finish_non_exhaustive()
    }
}

impl<E> RetryGroup<E>
where
    E: StdError + Send + Sync + 'static,
{
    /// Create a group whose scope is a child of `parent`
    pub fn new(executor: RetryExecutor, parent: &CancellationToken) -> Self {
        Self {
            executor,
            token: parent.child_token(),
            tasks: JoinSet::new(),
            errors: Arc::new(Mutex::new(Vec::new())),
            limiter: None,
            members: 0,
        }
    }

    /// Run at most `limit` members at a time
    #[must_use]
    pub fn with_limit(mut self, limit: NonZeroUsize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(limit.get())));
        self
    }

    /// The group's cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Members registered with [`go`](Self::go)
    pub fn len(&self) -> usize {
        self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members == 0
    }

    /// Spawn a member running `operation` under the executor's retry loop
    ///
    /// Must be called from within a tokio runtime. Successful results are
    /// discarded; failures are collected for [`wait`](Self::wait).
    pub fn go<T, F, Fut>(&mut self, key: impl Into<String>, operation: F)
    where
        T: Send + 'static,
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        let executor = self.executor.clone();
        let token = self.token.clone();
        let errors = Arc::clone(&self.errors);
        let limiter = self.limiter.clone();
        self.members += 1;
        debug!(
            scope = executor.name(),
            key = %key,
            members = self.members,
            "spawning group member"
        );

        self.tasks.spawn(async move {
            // A member cancelled while queued still reports Cancelled below
            let permit = match limiter {
                Some(semaphore) => tokio::select! {
                    biased;
                    () = token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                },
                None => None,
            };

            let run = executor.execute_with_retry(&token, &key, operation);
            let outcome = AssertUnwindSafe(run).catch_unwind().await;
            drop(permit);

            let error = match outcome {
                Ok(Ok(_)) => return,
                Ok(Err(error)) => error,
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    warn!(
                        scope = executor.name(),
                        key = %key,
                        reason = %reason,
                        "group member panicked"
                    );
                    RetryError::TaskAborted { key: key.clone(), reason }
                }
            };
            errors.lock().push(MemberError { key, error });
        });
    }

    /// Cancel the group scope
    ///
    /// Members waiting on backoff or on the concurrency limit return
    /// `Cancelled` promptly; running operations observe the token
    /// cooperatively.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for every member, cancel the scope and return the failures in
    /// completion order
    pub async fn wait(mut self) -> Vec<MemberError<E>> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(scope = self.executor.name(), error = %e, "group member task failed to join");
            }
        }
        self.token.cancel();

        let errors = std::mem::take(&mut *self.errors.lock());
        debug!(
            scope = self.executor.name(),
            members = self.members,
            failed = errors.len(),
            "retry group finished"
        );
        errors
    }
}

impl<E> Drop for RetryGroup<E>
where
    E: StdError + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
