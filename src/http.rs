// 🌐 HTTP Plumbing - shared client, bounded retries, run-scoped cancellation
//
// Every remote call in a run goes through `with_retry`:
//   - transient failures (timeouts, connection errors, 429/5xx) are retried
//     with linear backoff `base * attempt`
//   - terminal failures return immediately
//   - cancellation wins over everything, including a pending backoff sleep

use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

// ============================================================================
// CLIENT
// ============================================================================

/// Client with a per-request timeout; cheap to clone
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("sts-reconcile/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::from_reqwest("client", e))
}

/// GET a URL, mapping non-success statuses to `FetchError::Status`
pub async fn get(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            endpoint: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Run-scoped cancellation signal. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        CancelToken {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so wait_for cannot fail here
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless cancelled first
    pub async fn run<T, F>(&self, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        if self.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(FetchError::Cancelled),
            result = fut => result,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_millis(200))
    }
}

/// Call `op` until it succeeds, fails terminally, runs out of attempts, or
/// the run is cancelled.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1;
    loop {
        match cancel.run(op()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label, attempt, policy.max_attempts, e, delay
                );
                cancel
                    .run(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                attempt += 1;
            }
            Err(e) => {
                debug!("{} gave up after {} attempt(s): {}", label, attempt, e);
                return Err(e);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    fn unavailable() -> FetchError {
        FetchError::Status {
            endpoint: "test".to_string(),
            status: 503,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancelToken::new();

        let result = with_retry("flaky", fast(), &cancel, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unavailable())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancelToken::new();

        let result: Result<(), _> = with_retry("down", fast(), &cancel, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let cancel = CancelToken::new();

        let result: Result<(), _> = with_retry("missing", fast(), &cancel, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status {
                endpoint: "test".to_string(),
                status: 404,
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_call() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        let handle = tokio::spawn(async move {
            with_retry("slow", fast(), &cancel, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(cancel.is_cancelled());

        let result = cancel.run(async { Ok(1) }).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
