//! Resilience layers for collaborator calls: timeout and retry
//!
//! Both layers wrap any `Service<Req, Error = BoxError>` and are applied to every
//! tool service a responder can reach (see [`crate::tools::ToolRouter`]). Order
//! matters: the timeout sits inside the retry so each attempt gets its own budget.
//!
//! Retry decisions are made by downcasting the boxed error to [`RouterError`] and
//! asking [`RouterError::is_transient`]. "Not found" and argument errors are final.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tower::{BoxError, Layer, Service, ServiceExt};
use tracing::debug;

use crate::error::RouterError;

// ===== Timeout =====

#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    dur: Duration,
}

impl TimeoutLayer {
    pub fn new(dur: Duration) -> Self {
        Self { dur }
    }
}

#[derive(Debug, Clone)]
pub struct Timeout<S> {
    inner: S,
    dur: Duration,
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            dur: self.dur,
        }
    }
}

impl<S, Req> Service<Req> for Timeout<S>
where
    S: Service<Req, Error = BoxError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let fut = self.inner.call(req);
        let dur = self.dur;
        Box::pin(async move {
            match timeout(dur, fut).await {
                Ok(r) => r,
                Err(_) => Err(Box::new(RouterError::timeout(dur)) as BoxError),
            }
        })
    }
}

// ===== Retry =====

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        factor: f32,
        max: Duration,
    },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed(delay)
    }

    pub fn exponential(initial: Duration, factor: f32, max: Duration) -> Self {
        Backoff::Exponential {
            initial,
            factor,
            max,
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential {
                initial,
                factor,
                max,
            } => initial.mul_f32(factor.powi(attempt as i32)).min(max),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::fixed(Duration::ZERO),
        }
    }
}

/// Whether a boxed service error is worth retrying.
pub fn is_retryable(err: &BoxError) -> bool {
    err.downcast_ref::<RouterError>()
        .map(RouterError::is_transient)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[derive(Debug, Clone)]
pub struct Retry<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            policy: self.policy,
        }
    }
}

impl<S, Req> Service<Req> for Retry<S>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is awaited per attempt on a fresh clone.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let inner = self.inner.clone();
        let policy = self.policy;
        Box::pin(async move {
            let mut attempt = 0usize;
            loop {
                match inner.clone().oneshot(req.clone()).await {
                    Ok(resp) => return Ok(resp),
                    Err(e) => {
                        if attempt >= policy.max_retries || !is_retryable(&e) {
                            return Err(e);
                        }
                        let delay = policy.backoff.delay_for_attempt(attempt);
                        attempt += 1;
                        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                        sleep(delay).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tower::service_fn;

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let svc = service_fn(move |()| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err::<&'static str, BoxError>(Box::new(RouterError::Timeout { millis: 1 }))
                } else {
                    Ok("ok")
                }
            }
        });
        let svc = RetryLayer::new(RetryPolicy {
            max_retries: 3,
            backoff: Backoff::fixed(Duration::from_millis(1)),
        })
        .layer(svc);
        let out = svc.oneshot(()).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_on_final_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let svc = service_fn(move |()| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), BoxError>(Box::new(RouterError::InvalidArgument {
                    message: "bad".into(),
                }))
            }
        });
        let svc = RetryLayer::new(RetryPolicy {
            max_retries: 5,
            backoff: Backoff::fixed(Duration::from_millis(1)),
        })
        .layer(svc);
        let err = svc.oneshot(()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid argument"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_yields_router_timeout() {
        let svc = service_fn(|()| async move {
            sleep(Duration::from_millis(50)).await;
            Ok::<(), BoxError>(())
        });
        let svc = TimeoutLayer::new(Duration::from_millis(5)).layer(svc);
        let err = svc.oneshot(()).await.unwrap_err();
        assert!(matches!(
            RouterError::from_boxed(err),
            RouterError::Timeout { millis: 5 }
        ));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let b = Backoff::exponential(Duration::from_millis(10), 2.0, Duration::from_millis(50));
        assert_eq!(b.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(b.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(b.delay_for_attempt(5), Duration::from_millis(50));
    }
}
