//! Adapter from platform requests to core results.

use crate::error::{CoreError, CoreResult};
use stashdb_storage::Request;

/// Awaits a platform request and classifies its failure.
///
/// The request resolves exactly once, so the returned result is the only
/// outcome the caller will see for it.
pub async fn settle<T>(request: Request<T>) -> CoreResult<T> {
    request.await.map_err(|err| {
        tracing::trace!(error = %err, "request failed");
        CoreError::from_storage(err)
    })
}
