/// Deadlines for outbound calls
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// The deadline passed before the future resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Outcome of a fallible call run under a deadline.
///
/// Unlike a stringly error, the inner `E` is kept so callers can still
/// classify it (e.g. 404 vs 503).
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("{0}")]
    Elapsed(Elapsed),
    #[error("Operation failed: {0}")]
    Failed(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed(_))
    }
}

/// Execute an infallible future with a deadline
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| Elapsed(duration))
}

/// Execute a fallible future with a deadline
pub async fn with_deadline<F, T, E>(duration: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Failed(e)),
        Err(_) => Err(TimeoutError::Elapsed(Elapsed(duration))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_with_timeout_completes() {
        let result = with_timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;

        assert_eq!(result, Err(Elapsed(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_with_deadline_keeps_inner_error() {
        let result = with_deadline(Duration::from_secs(1), async {
            Err::<(), _>(404_u16)
        })
        .await;

        let err = assert_err!(result);
        assert!(!err.is_elapsed());
        assert!(matches!(err, TimeoutError::Failed(404)));
    }

    #[tokio::test]
    async fn test_with_deadline_elapsed() {
        let result = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, String>(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_elapsed());
        assert_eq!(err.to_string(), "Operation timed out after 10ms");
    }
}
