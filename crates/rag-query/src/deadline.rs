//! Timeout bound around collaborator calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use rag_core::{RagError, Result};

/// Await `call`, failing with a `CollaboratorUnavailable` error once
/// `timeout` elapses. The pending call is dropped on timeout.
pub async fn bounded<T, F>(collaborator: &str, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} did not answer within {:?}", collaborator, timeout);
            Err(RagError::timeout(collaborator, timeout))
        }
    }
}
