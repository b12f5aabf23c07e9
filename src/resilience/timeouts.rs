//! Timeout enforcement for store calls.
//!
//! Every lookup made while serving a request gets a deadline. A call that
//! exceeds it is dropped and reported as [`StoreError::Timeout`], which the
//! pipeline turns into a server error.

use std::future::Future;
use std::time::Duration;

use tokio::time;

use crate::store::StoreError;

/// Run `call`, giving up after `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline = ?deadline, "Store call timed out");
            Err(StoreError::Timeout(deadline))
        }
    }
}
