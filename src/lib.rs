//! # svcvisor
//!
//! **Svcvisor** supervises long-running async services.
//!
//! A service has three phases, `init`, `run` and `close`. The supervisor runs
//! them as one attempt, recovers panics, restarts failed attempts within a
//! grace budget (a time window and a restart count), and runs several
//! services as a group that fails fast: the first one to stop stops them all.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Service    │   │   Service    │   │   Service    │
//!     │ billing/api  │   │billing/worker│   │  jobs/cron   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - validation (names, namespaces, duplicates, env overrides)      │
//! │  - logging (tracing subscriber, one span per service)             │
//! │  - telemetry (initialized once, shut down once)                   │
//! │  - signals (SIGINT/SIGTERM/SIGQUIT cancel the group)              │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ ServiceActor │   │ ServiceActor │   │ ServiceActor │
//!     │(restart loop)│   │(restart loop)│   │(restart loop)│
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            └──────────────────┼──────────────────┘
//!                               ▼
//!                  first finisher decides the result,
//!                  siblings are cancelled and drained
//! ```
//!
//! ### Lifecycle
//! ```text
//! loop {
//!   ├─► attempt += 1
//!   ├─► run_once(service, ctx)
//!   │       ├─ init()  ── Err/panic ─► failure (close skipped)
//!   │       ├─ run()   ── Ok/Canceled ─► clean stop, exit Ok
//!   │       │          └─ Err/panic  ─► failure
//!   │       └─ close() (always after a successful init; errors logged)
//!   │
//!   └─ on failure:
//!        ├─ Fatal or RestartOnError off ─► exit Err
//!        ├─ panic and RestartOnPanic off ─► exit Err
//!        ├─ grace period / count spent   ─► exit GracePeriodExceeded / GraceCountExceeded
//!        └─ sleep(delay) (cancellable), continue
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                         |
//! |-------------------|----------------------------------------------------------|--------------------------------------------|
//! | **Services**      | Define services as trait impls or closures.              | [`Service`], [`ServiceFn`], [`ServiceRef`] |
//! | **Context**       | Identity, env, logger span, telemetry, cancellation.     | [`ServiceContext`]                         |
//! | **Supervision**   | Run one service or a group under restart budgets.        | [`Supervisor`], [`run`], [`run_group`]     |
//! | **Configuration** | Defaults, builders and `<PREFIX>_<FIELD>` env overrides. | [`Options`], [`EnvSource`]                 |
//! | **Errors**        | Typed errors for services and supervision.               | [`ServiceError`], [`RunError`]             |
//! | **Telemetry**     | OpenTelemetry handles with an injectable initializer.    | [`Telemetry`], [`TelemetryInit`]           |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use svcvisor::{Options, ServiceContext, ServiceError, ServiceFn, ServiceRef};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hello: ServiceRef = ServiceFn::arc("hello", "demo", |ctx: ServiceContext| async move {
//!         if ctx.is_cancelled() {
//!             return Err(ServiceError::Canceled);
//!         }
//!         tracing::info!(parent: ctx.span(), "hello from service");
//!         Ok(())
//!     });
//!
//!     let opts = Options::default()
//!         .with_restart_on_error_delay(Duration::from_secs(1))
//!         .with_handle_signals(false);
//!     svcvisor::run(hello, opts).await?;
//!     Ok(())
//! }
//! ```
mod context;
mod core;
mod env;
mod error;
pub mod logging;
mod options;
mod service;
mod telemetry;

// ---- Public re-exports ----

pub use context::ServiceContext;
pub use core::{Supervisor, SupervisorBuilder};
pub use env::{EnvSource, ProcessEnv, normalize_env_key};
pub use error::{PanicError, RunError, ServiceError, Violation};
pub use options::{LogLevel, Options};
pub use service::{Service, ServiceFn, ServiceIdentity, ServiceRef};
pub use telemetry::{
    BoxError, GlobalTelemetry, INSTRUMENTATION_NAME, SdkTelemetry, ShutdownFailed, ShutdownHook,
    Telemetry, TelemetryInit, noop_shutdown, service_resource,
};

/// Supervises one service with `options`, the process environment and [`SdkTelemetry`].
pub async fn run(service: ServiceRef, options: Options) -> Result<(), RunError> {
    Supervisor::new(options).run(service).await
}

/// Supervises `services` as a group with `options`; the first one to finish decides the result.
pub async fn run_group(services: Vec<ServiceRef>, options: Options) -> Result<(), RunError> {
    Supervisor::new(options).run_group(services).await
}
