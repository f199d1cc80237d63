//! # Run a single attempt of a service.
//!
//! Executes one `init` → `run` → `close` cycle of a [`Service`] and classifies the outcome.
//!
//! ## Flow
//!
//! ```text
//! init() ── Err ─────────────────────────────► RunError::Init   (close skipped)
//!   │   └── panic ───────────────────────────► RunError::Panic  (close skipped)
//!   ▼
//! run() ─── Ok / Err(Canceled) ──► clean
//!   │   ├── Err(e) ──────────────► RunError::Run
//!   │   └── panic ───────────────► RunError::Panic
//!   ▼
//! close() ─ Err / timeout ───────► logged only
//!       └── panic ───────────────► RunError::Panic { related: <run failure> }
//! ```
//!
//! ## Rules
//! - `close` runs after every attempt whose `init` succeeded
//! - `ServiceError::Canceled` from `run` is a clean stop, not a failure
//! - Panics are recovered only when [`Options::recover_panic`] is set; otherwise they unwind
//! - `close` is bounded by [`Options::shutdown_timeout`] (zero = unbounded)

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::time;
use tracing::Instrument;

use crate::context::ServiceContext;
use crate::error::{PanicError, RunError, ServiceError};
use crate::options::Options;
use crate::service::Service;

type PanicPayload = Box<dyn Any + Send>;

/// Executes a single attempt of `service`.
///
/// Returns `Ok(())` on a clean finish (including cancellation), otherwise the
/// classified failure: [`RunError::Init`], [`RunError::Run`] or [`RunError::Panic`].
pub(crate) async fn run_once<T: Service + ?Sized>(
    service: &T,
    ctx: &ServiceContext,
    opts: &Options,
) -> Result<(), RunError> {
    let name = service.name();
    let span = ctx.span();

    tracing::debug!(parent: span, attempt = ctx.attempt(), "initializing service");
    match guarded(opts.recover_panic, service.init(ctx).instrument(span.clone())).await {
        Ok(Ok(())) => {}
        Ok(Err(source)) => {
            return Err(RunError::Init {
                service: name.to_string(),
                source,
            });
        }
        Err(payload) => return Err(PanicError::from_payload(name, payload, None).into()),
    }

    tracing::debug!(parent: span, attempt = ctx.attempt(), "starting service");
    let mut failure =
        match guarded(opts.recover_panic, service.run(ctx).instrument(span.clone())).await {
            Ok(Ok(())) | Ok(Err(ServiceError::Canceled)) => None,
            Ok(Err(source)) => Some(RunError::Run {
                service: name.to_string(),
                source,
            }),
            Err(payload) => Some(PanicError::from_payload(name, payload, None).into()),
        };

    tracing::debug!(parent: span, attempt = ctx.attempt(), "shutting down service");
    if let Err(payload) = close(service, ctx, opts).await {
        failure = Some(PanicError::from_payload(name, payload, failure.take()).into());
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Calls `close`, logging its error or timeout; only a recovered panic is returned.
async fn close<T: Service + ?Sized>(
    service: &T,
    ctx: &ServiceContext,
    opts: &Options,
) -> Result<(), PanicPayload> {
    let span = ctx.span();
    let fut = guarded(opts.recover_panic, service.close(ctx).instrument(span.clone()));

    let res = match opts.shutdown_limit() {
        Some(limit) => match time::timeout(limit, fut).await {
            Ok(res) => res?,
            Err(_elapsed) => {
                tracing::error!(parent: span, timeout = ?limit, "service shutdown timed out");
                return Ok(());
            }
        },
        None => fut.await?,
    };

    match res {
        Ok(()) | Err(ServiceError::Canceled) => {}
        Err(err) => tracing::error!(parent: span, error = %err, "service shutdown failed"),
    }
    Ok(())
}

/// Runs `fut`, catching a panic when `recover` is set.
async fn guarded<F: Future>(recover: bool, fut: F) -> Result<F::Output, PanicPayload> {
    if recover {
        AssertUnwindSafe(fut).catch_unwind().await
    } else {
        Ok(fut.await)
    }
}
