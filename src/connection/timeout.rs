//! Time-bounded connection attempts

use std::future::Future;
use std::time::Duration;

use crate::error::{ConnectionError, Result};

/// Fails with [`ConnectionError::Timeout`] once `duration` has elapsed.
///
/// Has no success path; only useful as one arm of [`race`].
pub async fn timeout_after(duration: Duration) -> ConnectionError {
    tokio::time::sleep(duration).await;
    ConnectionError::Timeout(duration)
}

/// Race `attempt` against [`timeout_after`].
///
/// The losing attempt is dropped, which cancels it. An attempt that
/// completes in the same poll as the timer wins.
pub async fn race<T, F>(attempt: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        result = attempt => result,
        err = timeout_after(duration) => Err(err),
    }
}
