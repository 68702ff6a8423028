use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use parley_api::AppState;

/// Background task that drops idle rate-limit buckets so the key maps do not
/// grow with every peer ever seen. A bucket is only dropped once it is full
/// again, so pruning never grants extra quota.
pub async fn run_prune_loop(state: AppState, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        let dropped: usize = state
            .limiters
            .all()
            .iter()
            .map(|limiter| limiter.prune_idle(every))
            .sum();
        if dropped > 0 {
            debug!(dropped, "Pruned idle rate-limit buckets");
        }
    }
}
