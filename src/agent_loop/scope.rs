//! Per-turn structured concurrency.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::BatonError;

/// Owns every unit of work spawned for one checkpoint of a turn.
///
/// Units are indexed in spawn order. The scope never outlives its turn:
/// [`TurnScope::cancel_and_drain`] (and drop) cancel the shared token, abort
/// every task and, for drain, wait for each to reach a terminal state.
pub struct TurnScope<T> {
    tasks: JoinSet<(usize, T)>,
    cancel: CancellationToken,
    spawned: usize,
}

impl<T: Send + 'static> Default for TurnScope<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TurnScope<T> {
    pub fn new() -> Self {
        Self::with_parent(&CancellationToken::new())
    }

    /// A scope cancelled whenever `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            spawned: 0,
        }
    }

    /// Token handed to units so they can stop cooperatively.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a unit; returns its index.
    pub fn spawn<F>(&mut self, future: F) -> usize
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        self.tasks.spawn(async move { (index, future.await) });
        index
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Next finished unit, in completion order.
    pub async fn next(&mut self) -> Option<Result<(usize, T), BatonError>> {
        self.tasks
            .join_next()
            .await
            .map(|joined| joined.map_err(BatonError::from))
    }

    /// Wait for every unit and return outputs in spawn order.
    ///
    /// A panicked unit cancels the rest of the scope.
    pub async fn join_all(mut self) -> Result<Vec<T>, BatonError> {
        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None)
            .take(self.spawned)
            .collect();

        while let Some(joined) = self.next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(value),
                Err(e) => {
                    let suppressed = self.cancel_and_drain().await;
                    if !suppressed.is_empty() {
                        tracing::debug!(count = suppressed.len(), "Suppressed errors while draining scope");
                    }
                    return Err(e);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Cancel all remaining units and wait for each to terminate.
    ///
    /// Returns failures other than the cancellation itself; they are
    /// collected, never raised.
    pub async fn cancel_and_drain(&mut self) -> Vec<BatonError> {
        self.cancel.cancel();
        self.tasks.abort_all();

        let mut errors = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    errors.push(BatonError::from(e));
                }
            }
        }
        errors
    }
}

impl<T> Drop for TurnScope<T> {
    fn drop(&mut self) {
        // The JoinSet aborts its own tasks when dropped.
        self.cancel.cancel();
    }
}
