//! Deadline-bounded waiting.

use std::future::Future;
use std::time::Duration;

use crate::{Error, Result};

/// Race `future` against a timer.
///
/// If the timer fires first the wait fails with [`Error::Timeout`] carrying
/// `message`. The timer is owned by the returned future and is dropped on every
/// exit path, so nothing keeps running after a success, a failure or a timeout.
pub async fn with_timeout<F>(duration: Duration, message: impl Into<String>, future: F) -> Result<F::Output>
where
    F: Future,
{
    match tokio::time::timeout(duration, future).await {
        Ok(output) => Ok(output),
        Err(_elapsed) => Err(Error::Timeout {
            message: message.into(),
        }),
    }
}
