//! # Supervisor: validates, supervises and stops a group of services.
//!
//! The [`Supervisor`] owns the option template, the [`EnvSource`] used to
//! resolve per-service overrides and the [`TelemetryInit`] called once per
//! invocation. A single service is supervised as a group of one.
//!
//! ## High-level architecture
//! ```text
//! Inputs to run_group():
//!   Vec<ServiceRef> ──► validate()
//!                         ├─ no services / empty name / empty namespace / duplicate
//!                         └─ Options::resolve() per service (env overrides)
//!                       ──► Err(RunError::Invalid)  (nothing started)
//!
//! Preparation:
//!   logging::init(opts)            (first install wins)
//!   TelemetryInit::init(&ids)  ──► Err(RunError::Telemetry)  (nothing started)
//!
//! Spawn actors:
//!   svc[0]      svc[1]      ...  svc[N-1]
//!     │           │                 │
//!     └──► ServiceActor::new(svc, ctx, opts)   ctx token = caller_token.child_token()
//!          set.spawn(actor.run())
//!
//! First finisher wins:
//!   select! { set.join_next(), shutdown signal ─► group.cancel() }
//!     └─► group.cancel()
//!     └─► drain siblings up to shutdown_timeout, then abort
//!     └─► ShutdownHook()  (errors logged)
//!     └─► result of the first finisher
//! ```
//!
//! ## Rules
//! - Validation collects **every** violation before reporting
//! - The first service to finish decides the group result, success or failure
//! - Sibling results are discarded; the group token is cancelled right after the first one
//! - Telemetry is initialized once and shut down once per invocation
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use svcvisor::{Options, ServiceContext, ServiceError, ServiceFn, ServiceRef, Supervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let api: ServiceRef = ServiceFn::arc("api", "billing", |ctx: ServiceContext| async move {
//!         ctx.cancelled().await;
//!         Err::<(), _>(ServiceError::Canceled)
//!     });
//!
//!     let sup = Supervisor::new(Options::default().with_grace_count(5));
//!     sup.run_group_and_exit(vec![api]).await;
//! }
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::panic;
use std::process;
use std::sync::Arc;

use tokio::{select, task::JoinSet, time};
use tokio_util::sync::CancellationToken;

use crate::{
    context::ServiceContext,
    core::{actor::ServiceActor, shutdown},
    env::{EnvSource, ProcessEnv},
    error::{RunError, Violation},
    logging,
    options::Options,
    service::{ServiceIdentity, ServiceRef},
    telemetry::{SdkTelemetry, TelemetryInit},
};

/// How the first finished service ended.
enum GroupExit {
    Finished(Result<(), RunError>),
    Panicked(Box<dyn Any + Send>),
}

/// Builder for [`Supervisor`].
pub struct SupervisorBuilder {
    options: Options,
    env: Option<Arc<dyn EnvSource>>,
    telemetry: Option<Arc<dyn TelemetryInit>>,
    install_logging: bool,
}

impl SupervisorBuilder {
    fn new(options: Options) -> Self {
        Self {
            options,
            env: None,
            telemetry: None,
            install_logging: true,
        }
    }

    /// Environment used for option overrides and [`ServiceContext::env_var`].
    ///
    /// Defaults to [`ProcessEnv`].
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = Some(env);
        self
    }

    /// Telemetry initializer; defaults to [`SdkTelemetry`].
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryInit>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Whether to install the global `tracing` subscriber (default `true`).
    pub fn with_logging(mut self, install: bool) -> Self {
        self.install_logging = install;
        self
    }

    pub fn build(self) -> Supervisor {
        Supervisor {
            options: self.options,
            env: self.env.unwrap_or_else(|| Arc::new(ProcessEnv)),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(SdkTelemetry::new())),
            install_logging: self.install_logging,
        }
    }
}

/// Runs services under supervision.
///
/// Every call is independent: restart counters and grace clocks live in the
/// call, so one `Supervisor` may run several groups, even concurrently.
pub struct Supervisor {
    options: Options,
    env: Arc<dyn EnvSource>,
    telemetry: Arc<dyn TelemetryInit>,
    install_logging: bool,
}

impl Supervisor {
    /// Creates a supervisor with the process environment and global telemetry.
    pub fn new(options: Options) -> Self {
        Self::builder(options).build()
    }

    pub fn builder(options: Options) -> SupervisorBuilder {
        SupervisorBuilder::new(options)
    }

    /// The option template every service starts from.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Supervises one service until it stops for good.
    pub async fn run(&self, service: ServiceRef) -> Result<(), RunError> {
        self.run_group(vec![service]).await
    }

    /// Like [`run`](Self::run), stopping when `token` is cancelled.
    pub async fn run_with(
        &self,
        service: ServiceRef,
        token: CancellationToken,
    ) -> Result<(), RunError> {
        self.run_group_with(vec![service], token).await
    }

    /// Supervises services concurrently; the first one to finish decides the result.
    pub async fn run_group(&self, services: Vec<ServiceRef>) -> Result<(), RunError> {
        self.run_group_with(services, CancellationToken::new()).await
    }

    /// Like [`run_group`](Self::run_group), stopping when `token` is cancelled.
    ///
    /// Services receive a child of `token`: cancelling the group never
    /// cancels the caller.
    pub async fn run_group_with(
        &self,
        services: Vec<ServiceRef>,
        token: CancellationToken,
    ) -> Result<(), RunError> {
        let resolved = self.validate(&services)?;
        if self.install_logging {
            if let Some(opts) = logging::group_options(&resolved) {
                logging::init(&opts);
            }
        }

        let identities: Vec<ServiceIdentity> = services
            .iter()
            .map(|svc| ServiceIdentity::of(svc.as_ref()))
            .collect();
        let (telemetry, shutdown_hook) = match self.telemetry.init(&identities).await {
            Ok(handles) => handles,
            Err(err) => {
                let err = RunError::Telemetry {
                    error: err.to_string(),
                };
                tracing::error!(error = %err, "telemetry initialization failed");
                return Err(err);
            }
        };

        let group = token.child_token();
        let mut set = JoinSet::new();
        for ((service, identity), opts) in services.into_iter().zip(identities).zip(resolved) {
            let span = logging::service_span(&identity);
            let ctx = ServiceContext::new(group.clone())
                .with_env_prefix(opts.resolved_env_prefix())
                .with_identity(identity)
                .with_env(self.env.clone())
                .with_span(span)
                .with_telemetry(telemetry.clone());
            set.spawn(ServiceActor::new(service, ctx, opts).run());
        }
        tracing::debug!(services = set.len(), "supervising services");

        let exit = self.wait_first(&mut set, &group).await;
        group.cancel();
        self.drain(&mut set).await;

        if let Err(err) = shutdown_hook().await {
            tracing::error!(error = %err, "telemetry shutdown failed");
        }

        match exit {
            GroupExit::Finished(res) => res,
            GroupExit::Panicked(payload) => panic::resume_unwind(payload),
        }
    }

    /// Runs one service and terminates the process with status 1 on failure.
    ///
    /// Cancellation is not a failure: the call simply returns.
    pub async fn run_and_exit(&self, service: ServiceRef) {
        exit_on_error(self.run(service).await);
    }

    /// Runs a group and terminates the process with status 1 on failure.
    pub async fn run_group_and_exit(&self, services: Vec<ServiceRef>) {
        exit_on_error(self.run_group(services).await);
    }

    /// Checks the group and resolves the options of every service.
    ///
    /// Returns one resolved [`Options`] per service, in order.
    fn validate(&self, services: &[ServiceRef]) -> Result<Vec<Options>, RunError> {
        let mut violations = Vec::new();
        if services.is_empty() {
            violations.push(Violation::NoServices);
        }

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut resolved = Vec::with_capacity(services.len());

        for (index, svc) in services.iter().enumerate() {
            let identity = ServiceIdentity::of(svc.as_ref());
            if identity.name.is_empty() {
                violations.push(Violation::EmptyName { index });
            }
            if identity.namespace.is_empty() {
                violations.push(Violation::EmptyNamespace { index });
            }
            if !identity.name.is_empty() && !identity.namespace.is_empty() {
                let key = (identity.name.clone(), identity.namespace.clone());
                if !seen.insert(key.clone()) && reported.insert(key) {
                    violations.push(Violation::Duplicate {
                        name: identity.name.clone(),
                        namespace: identity.namespace.clone(),
                    });
                }
            }

            match self.options.resolve(&identity, self.env.as_ref()) {
                Ok(opts) => resolved.push(opts),
                Err(errs) => violations.extend(errs),
            }
        }

        if violations.is_empty() {
            Ok(resolved)
        } else {
            let err = RunError::Invalid { violations };
            tracing::error!(error = %err, "refusing to start services");
            Err(err)
        }
    }

    /// Waits for the first actor to finish, cancelling the group on a shutdown signal.
    async fn wait_first(
        &self,
        set: &mut JoinSet<Result<(), RunError>>,
        group: &CancellationToken,
    ) -> GroupExit {
        let signal = shutdown::shutdown_requested(self.options.handle_signals);
        tokio::pin!(signal);
        let mut signaled = false;

        loop {
            select! {
                joined = set.join_next() => {
                    return match joined {
                        Some(Ok(res)) => GroupExit::Finished(res),
                        Some(Err(err)) if err.is_panic() => GroupExit::Panicked(err.into_panic()),
                        Some(Err(_)) | None => GroupExit::Finished(Err(RunError::Canceled)),
                    };
                }
                _ = &mut signal, if !signaled => {
                    signaled = true;
                    tracing::info!("shutdown signal received, stopping services");
                    group.cancel();
                }
            }
        }
    }

    /// Joins the remaining actors, aborting them after the shutdown timeout.
    async fn drain(&self, set: &mut JoinSet<Result<(), RunError>>) {
        if set.is_empty() {
            return;
        }

        let wait = async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Err(err)) if !err.is_canceled() => {
                        tracing::debug!(error = %err, "sibling stopped with error during shutdown");
                    }
                    Err(err) if err.is_panic() => {
                        tracing::error!("sibling panicked during shutdown");
                    }
                    _ => {}
                }
            }
        };

        match self.options.shutdown_limit() {
            Some(limit) => {
                if time::timeout(limit, wait).await.is_err() {
                    tracing::warn!(
                        timeout = ?limit,
                        remaining = set.len(),
                        "services did not stop within shutdown timeout, aborting"
                    );
                    set.shutdown().await;
                }
            }
            None => wait.await,
        }
    }
}

/// Prints a failure report and exits with status 1; returns on success or cancellation.
fn exit_on_error(result: Result<(), RunError>) {
    match result {
        Ok(()) | Err(RunError::Canceled) => {}
        Err(err) => {
            eprintln!("{}", render_report(&err));
            process::exit(1);
        }
    }
}

/// Human-readable report of a terminal error, including panic details.
fn render_report(err: &RunError) -> String {
    let mut out = format!("error: {err}");
    if let Some(p) = err.panic() {
        if let Some(related) = &p.related {
            out.push_str(&format!("\nrelated: {related}"));
        }
        let stack = strip_internal_frames(&p.stack);
        if !stack.is_empty() {
            out.push_str("\nstack:\n");
            out.push_str(&stack);
        }
    }
    out
}

/// Drops backtrace frames that belong to the supervision machinery.
///
/// A frame is a `N: symbol` line followed by its `at file:line` lines.
fn strip_internal_frames(stack: &str) -> String {
    let mut kept = Vec::new();
    let mut skipping = false;

    for line in stack.lines() {
        let trimmed = line.trim_start();
        let is_header = trimmed
            .split_once(": ")
            .is_some_and(|(idx, _)| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()));

        if is_header {
            skipping = trimmed.contains("svcvisor::core::") || trimmed.contains("svcvisor::error::");
        }
        if !skipping {
            kept.push(line);
        }
    }
    kept.join("\n")
}
