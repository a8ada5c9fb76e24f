//! Timeout guard for store calls.

use crate::error::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;

/// Runs a store call, failing with [`StoreError::Timeout`] after `limit`.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
