//! # ServiceActor: single-service supervision loop.
//!
//! Supervises one [`Service`](crate::Service) by repeating [`run_once`] until
//! the service finishes cleanly, fails in a way that must not be retried,
//! exhausts its grace budget, or the shared token is cancelled.
//!
//! ## Architecture
//! ```text
//! loop {
//!   ├─► cancelled?            → Canceled
//!   ├─► run_once(attempt = n)
//!   │     ├─► Ok              → Ok(())
//!   │     └─► Err(e)
//!   ├─► fatal / restart off   → Err(e)
//!   ├─► cancelled?            → Canceled
//!   ├─► panic / restart off   → Err(e)
//!   ├─► grace budget spent    → Err(GracePeriodExceeded | GraceCountExceeded)
//!   └─► sleep(delay) ◄── cancellable
//! }
//! ```
//!
//! ## Rules
//! - Attempts run **sequentially** (never concurrent for one service)
//! - Attempt numbers start at 1 and grow by one per attempt
//! - A fresh [`SupervisionState`] is created by every [`ServiceActor::run`]
//! - Cancellation aborts a pending restart delay immediately

use tokio::{select, time};

use crate::{
    context::ServiceContext,
    core::{
        runner::run_once,
        state::{Exhausted, SupervisionState},
    },
    error::RunError,
    options::Options,
    service::ServiceRef,
};

/// Supervises execution of a single service with restarts and grace budgets.
pub(crate) struct ServiceActor {
    service: ServiceRef,
    ctx: ServiceContext,
    opts: Options,
}

impl ServiceActor {
    pub(crate) fn new(service: ServiceRef, ctx: ServiceContext, opts: Options) -> Self {
        Self { service, ctx, opts }
    }

    /// Runs the loop until completion, a terminal failure, or cancellation.
    ///
    /// ### Exit conditions
    /// - `run_once` succeeds → `Ok(())`
    /// - fatal failure, or `restart_on_error` off → the failure
    /// - panic with `restart_on_panic` off → the panic
    /// - grace period or grace count exceeded → budget error wrapping the last failure
    /// - token cancelled before a restart → [`RunError::Canceled`]
    pub(crate) async fn run(self) -> Result<(), RunError> {
        let span = self.ctx.span().clone();
        let mut state = SupervisionState::start();
        let mut attempt: u32 = 0;

        loop {
            if self.ctx.is_cancelled() {
                tracing::debug!(parent: &span, attempt, "service cancelled before start");
                return Err(RunError::Canceled);
            }

            attempt = attempt.saturating_add(1);
            let ctx = self.ctx.clone().with_attempt(attempt);

            let err = match run_once(self.service.as_ref(), &ctx, &self.opts).await {
                Ok(()) => {
                    tracing::info!(parent: &span, attempt, "service stopped");
                    return Ok(());
                }
                Err(err) => err,
            };

            if err.is_fatal() || !self.opts.restart_on_error {
                tracing::error!(parent: &span, error = %err, attempt, "service failed");
                return Err(err);
            }
            if self.ctx.is_cancelled() {
                tracing::error!(parent: &span, error = %err, attempt, "service failed during shutdown");
                return Err(RunError::Canceled);
            }
            if err.is_panic() && !self.opts.restart_on_panic {
                tracing::error!(parent: &span, error = %err, attempt, "service panicked");
                return Err(err);
            }

            if let Err(exhausted) = state.record_restart(&self.opts) {
                let grace_period = self.opts.grace_period;
                let grace_count = self.opts.grace_count;
                let grace_count_remaining = state.remaining(&self.opts).unwrap_or(0);
                match exhausted {
                    Exhausted::Period(_) => tracing::error!(
                        parent: &span,
                        error = %err,
                        ?grace_period,
                        grace_count,
                        grace_count_remaining,
                        "service failed, exceeded grace period"
                    ),
                    Exhausted::Count(_) => tracing::error!(
                        parent: &span,
                        error = %err,
                        ?grace_period,
                        grace_count,
                        grace_count_remaining,
                        "service failed, exceeded grace count"
                    ),
                }
                return Err(exhausted.into_error(err));
            }

            let delay = self.opts.restart_delay(err.is_panic());
            let restarts = state.restarts();
            let remaining = state.remaining(&self.opts);

            if delay.is_zero() {
                tracing::error!(
                    parent: &span,
                    error = %err,
                    attempt,
                    restarts,
                    grace_count_remaining = ?remaining,
                    "service failed, restarting immediately"
                );
                continue;
            }

            tracing::error!(
                parent: &span,
                error = %err,
                attempt,
                restarts,
                grace_count_remaining = ?remaining,
                restart_delay = ?delay,
                "service failed, restarting after delay"
            );
            select! {
                _ = time::sleep(delay) => {}
                _ = self.ctx.cancelled() => {
                    tracing::debug!(parent: &span, attempt, "restart delay interrupted by cancellation");
                    return Err(RunError::Canceled);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::ServiceError;
    use crate::service::ServiceFn;

    fn counting(
        calls: Arc<AtomicU32>,
        result: fn(u32) -> Result<(), ServiceError>,
    ) -> ServiceRef {
        ServiceFn::arc("counted", "test", move |_ctx: ServiceContext| {
            let calls = calls.clone();
            async move { result(calls.fetch_add(1, Ordering::SeqCst) + 1) }
        })
    }

    fn actor(service: ServiceRef, token: CancellationToken, opts: Options) -> ServiceActor {
        ServiceActor::new(service, ServiceContext::new(token), opts)
    }

    fn quick() -> Options {
        Options::default()
            .with_restart_on_error_delay(Duration::ZERO)
            .with_grace_period(Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = counting(calls.clone(), |n| {
            if n < 3 { Err(ServiceError::fail("flaky")) } else { Ok(()) }
        });

        let res = actor(svc, CancellationToken::new(), quick()).run().await;
        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = counting(calls.clone(), |_| Err(ServiceError::fatal("bad config")));

        let err = actor(svc, CancellationToken::new(), quick()).run().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_delay_is_honored() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = counting(calls.clone(), |n| {
            if n < 2 { Err(ServiceError::fail("once")) } else { Ok(()) }
        });
        let opts = quick().with_restart_on_error_delay(Duration::from_secs(10));

        let started = time::Instant::now();
        actor(svc, CancellationToken::new(), opts).run().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_waits_panic_delay_and_error_waits_error_delay() {
        let opts = quick()
            .with_restart_on_panic(true)
            .with_restart_on_error_delay(Duration::from_secs(1))
            .with_restart_on_panic_delay(Duration::from_secs(7));

        let calls = Arc::new(AtomicU32::new(0));
        let panicky = counting(calls.clone(), |n| {
            if n < 2 { panic!("crash") } else { Ok(()) }
        });
        let started = time::Instant::now();
        actor(panicky, CancellationToken::new(), opts.clone()).run().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8), "{waited:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls = Arc::new(AtomicU32::new(0));
        let failing = counting(calls.clone(), |n| {
            if n < 2 { Err(ServiceError::fail("once")) } else { Ok(()) }
        });
        let started = time::Instant::now();
        actor(failing, CancellationToken::new(), opts).run().await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_stops_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let svc = counting(calls.clone(), |_| Err(ServiceError::fail("down")));
        let opts = quick().with_restart_on_error_delay(Duration::from_secs(3600));
        let token = CancellationToken::new();

        let handle = tokio::spawn(actor(svc, token.clone(), opts).run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_sees_its_number() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let svc: ServiceRef = ServiceFn::arc("numbered", "test", move |ctx: ServiceContext| {
            let seen = seen_in.clone();
            async move {
                seen.lock().unwrap().push(ctx.attempt());
                if ctx.attempt() < 3 { Err(ServiceError::fail("again")) } else { Ok(()) }
            }
        });

        actor(svc, CancellationToken::new(), quick()).run().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), [1, 2, 3]);
    }
}
