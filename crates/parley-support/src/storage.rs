use std::sync::Arc;

use tracing::error;

use parley_db::Database;

use crate::error::{SupportError, SupportResult};

/// Run a database call off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> SupportResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            SupportError::Storage(anyhow::anyhow!("database task failed: {}", e))
        })?
        .map_err(SupportError::Storage)
}
