use std::future::Future;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::SupportResult;

/// Spawn a side effect the caller does not wait for. Failures are logged,
/// never propagated.
pub fn spawn_detached<F>(label: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = SupportResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!(task = label, "detached task failed: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupportError;

    #[tokio::test]
    async fn failures_are_swallowed() {
        let handle = spawn_detached("test", async { Err(SupportError::upstream("smtp down")) });
        assert!(handle.await.is_ok());
    }
}
