use std::future::Future;

/// Run a side effect in the background, logging its outcome. Used for
/// fire-and-forget collaborator calls (notifications, activity logging)
/// whose failure must never block fulfillment or reconciliation.
pub fn spawn_best_effort<F>(name: &'static str, fut: F)
where
    F: Future<Output = tessera_core::CoreResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match fut.await {
            Ok(()) => tracing::debug!(task = name, "Background task completed"),
            Err(err) => tracing::warn!(task = name, error = %err, "Background task failed"),
        }
    });
}
