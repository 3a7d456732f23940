//! Worker supervision
//!
//! Long-running workers (proxy, DNS, watcher) run concurrently under one
//! cancellation token. The first worker to terminate, successfully or not,
//! cancels the rest, and its result becomes the aggregate result.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A long-running worker that cooperates with cancellation.
#[async_trait::async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Human-readable worker name used in logs.
    fn name(&self) -> &'static str;

    /// Runs until completion, failure, or cancellation.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Runs all workers to the first termination.
///
/// Each worker observes the same child token; when any worker returns, the
/// token is cancelled and the remaining workers are awaited. Returns the
/// first worker's result.
pub async fn run_all(cancel: CancellationToken, workers: Vec<Arc<dyn Runnable>>) -> Result<()> {
    let mut set = JoinSet::new();
    for worker in workers {
        let cancel = cancel.clone();
        set.spawn(async move {
            let result = worker.run(cancel).await;
            if let Err(err) = &result {
                tracing::error!(worker = worker.name(), %err, "worker terminated");
            } else {
                tracing::info!(worker = worker.name(), "worker finished");
            }
            result
        });
    }

    let first = match set.join_next().await {
        Some(Ok(result)) => result,
        Some(Err(err)) => Err(Error::Internal(format!("worker panicked: {err}"))),
        None => Ok(()),
    };

    cancel.cancel();
    while let Some(result) = set.join_next().await {
        if let Err(err) = result {
            tracing::error!(%err, "worker panicked during shutdown");
        }
    }

    first
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Immediate(Result<()>);

    #[async_trait::async_trait]
    impl Runnable for Immediate {
        fn name(&self) -> &'static str {
            "immediate"
        }

        async fn run(&self, _cancel: CancellationToken) -> Result<()> {
            match &self.0 {
                Ok(()) => Ok(()),
                Err(_) => Err(Error::Internal("boom".to_string())),
            }
        }
    }

    struct UntilCancelled;

    #[async_trait::async_trait]
    impl Runnable for UntilCancelled {
        fn name(&self) -> &'static str {
            "until-cancelled"
        }

        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_failure_cancels_the_group() {
        let result = run_all(
            CancellationToken::new(),
            vec![Arc::new(UntilCancelled), Arc::new(Immediate(Err(Error::Internal(String::new()))))],
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn external_cancellation_stops_all_workers() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_all(cancel, vec![Arc::new(UntilCancelled), Arc::new(UntilCancelled)]).await;
        assert!(result.is_ok());
    }
}
