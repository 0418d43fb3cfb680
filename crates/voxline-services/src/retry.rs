use std::future::Future;
use std::time::Duration;
use voxline_foundation::ServiceError;

/// Run a service call, retrying once with the same input if the first
/// attempt fails transiently. Fatal errors surface immediately.
pub async fn with_retry<T, F, Fut>(stage: &'static str, mut op: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(stage, error = %e, "transient service failure, retrying once");
            op().await
        }
        other => other,
    }
}

/// Bound a service call by a deadline; an overrun becomes a (transient)
/// `ServiceError::Timeout`.
pub async fn with_deadline<T, Fut>(deadline: Duration, fut: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn transient_failure_retried_exactly_once() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("stt", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ServiceError::Transient("hiccup".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_transient_failure_surfaces() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("stt", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::Transient("still down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2, "exactly one retry");
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("llm", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::Fatal("bad credentials".into())) }
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_becomes_timeout() {
        let fut = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ServiceError>(())
        };
        let result = with_deadline(Duration::from_secs(5), fut).await;
        match result {
            Err(e @ ServiceError::Timeout(_)) => assert!(e.is_transient()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
