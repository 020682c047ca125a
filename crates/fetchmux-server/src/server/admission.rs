//! Request admission control.
//!
//! [`AdmissionLayer`] wraps a service with a fixed pool of interchangeable
//! permits. Each request tries to take a permit without waiting:
//!
//! - on success the inner service is called and the permit is returned when
//!   its future completes or is dropped, including while unwinding a panic;
//! - otherwise the request is answered `503 too busy` right away and the
//!   inner service is never invoked.
//!
//! Excess load is shed rather than queued, which bounds latency and memory
//! under overload.

use crate::server::telemetry::{
    decrement_requests_inflight, increment_requests_inflight, increment_requests_rejected,
};
use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use core::task::{Context, Poll};
use fetchmux_core::Error;
use futures::future::BoxFuture;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tower::{Layer, Service};

/// Fixed-capacity pool of admission permits.
#[derive(Debug)]
pub struct AdmissionLimiter {
    active: AtomicUsize,
    capacity: usize,
}

impl AdmissionLimiter {
    pub const fn new(capacity: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Takes a permit if one is free. Never waits.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut current = self.active.load(Ordering::Relaxed);
        loop {
            if current >= self.capacity {
                return None;
            }

            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(Permit {
                        limiter: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Admission permit. Returned to its pool on drop.
#[derive(Debug)]
pub struct Permit {
    limiter: Arc<AdmissionLimiter>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// Keeps the in-flight gauge balanced even if the request future is dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        increment_requests_inflight();
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        decrement_requests_inflight();
    }
}

/// [`Layer`] applying an [`AdmissionLimiter`] to a service.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    limiter: Option<Arc<AdmissionLimiter>>,
}

impl AdmissionLayer {
    /// `None` disables admission control.
    pub fn new(max_concurrent_requests: Option<usize>) -> Self {
        Self {
            limiter: max_concurrent_requests.map(|max| Arc::new(AdmissionLimiter::new(max))),
        }
    }

    /// The shared permit pool, if limiting is enabled.
    pub fn limiter(&self) -> Option<&Arc<AdmissionLimiter>> {
        self.limiter.as_ref()
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: Option<Arc<AdmissionLimiter>>,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let permit = match &self.limiter {
            Some(limiter) => match limiter.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    tracing::debug!(
                        "Rejecting request: {} of {} permits in use",
                        limiter.in_flight(),
                        limiter.capacity()
                    );
                    increment_requests_rejected();
                    return Box::pin(async { Ok(Error::Overloaded.into_response()) });
                }
            },
            None => None,
        };

        // `poll_ready` was called on `self.inner`; swap it out so the ready
        // instance is the one that gets called.
        let clone = self.inner.clone();
        let mut inner = core::mem::replace(&mut self.inner, clone);
        let fut = inner.call(req);

        Box::pin(async move {
            let _permit = permit;
            let _in_flight = InFlight::enter();
            fut.await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_are_bounded_and_returned() {
        let limiter = Arc::new(AdmissionLimiter::new(2));

        let a = limiter.try_acquire();
        let b = limiter.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert_eq!(limiter.in_flight(), 2);
        assert!(limiter.try_acquire().is_none());

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        assert!(limiter.try_acquire().is_some());
        assert_eq!(limiter.in_flight(), 1);

        drop(b);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let limiter = Arc::new(AdmissionLimiter::new(0));
        assert!(limiter.try_acquire().is_none());
    }

    #[test]
    fn disabled_layer_has_no_limiter() {
        assert!(AdmissionLayer::new(None).limiter().is_none());
        assert_eq!(
            AdmissionLayer::new(Some(3)).limiter().map(|l| l.capacity()),
            Some(3)
        );
    }

    #[test]
    fn permit_released_on_panic() {
        let limiter = Arc::new(AdmissionLimiter::new(1));
        let cloned = Arc::clone(&limiter);
        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire().unwrap();
            panic!("handler blew up");
        });
        assert!(result.is_err());
        assert_eq!(limiter.in_flight(), 0);
    }
}
