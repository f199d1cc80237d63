//! # Service abstraction and function-backed service implementation.
//!
//! This module defines the [`Service`] trait (async, cancelable, three-phase lifecycle),
//! its identity triple [`ServiceIdentity`], and a convenient closure-backed implementation [`ServiceFn`].
//! The common handle type is [`ServiceRef`], an `Arc<dyn Service>` suitable for sharing across the runtime.
//!
//! A service receives a [`ServiceContext`] on every call and should watch its
//! cancellation ([`ServiceContext::cancelled`]) to stop cooperatively.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ServiceContext;
use crate::error::ServiceError;

/// Version string of the calling crate, for [`Service::version`].
///
/// Expands to the `VERGEN_GIT_SHA` build variable when the build sets it,
/// otherwise to the caller's `CARGO_PKG_VERSION`.
///
/// ```
/// let version: &'static str = svcvisor::build_version!();
/// assert!(!version.is_empty());
/// ```
#[macro_export]
macro_rules! build_version {
    () => {
        match ::core::option_env!("VERGEN_GIT_SHA") {
            ::core::option::Option::Some(sha) => sha,
            ::core::option::Option::None => ::core::env!("CARGO_PKG_VERSION"),
        }
    };
}

/// Shared handle to a service.
pub type ServiceRef = Arc<dyn Service>;

/// # Long-running unit hosted by the supervisor.
///
/// Each attempt runs `init` → `run` → `close`:
/// - `init` is called at the start of every attempt; it must tolerate repetition across restarts.
/// - `run` blocks until the context is cancelled or the service fails. Returning
///   [`ServiceError::Canceled`] after cancellation is a clean stop.
/// - `close` runs after every attempt whose `init` succeeded. Its error is logged, never escalated.
///
/// Identity accessors must return the same values on every call.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use svcvisor::{Service, ServiceContext, ServiceError};
///
/// struct Ticker;
///
/// #[async_trait]
/// impl Service for Ticker {
///     fn name(&self) -> &str { "ticker" }
///     fn namespace(&self) -> &str { "demo" }
///
///     async fn run(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
///         ctx.cancelled().await;
///         Err(ServiceError::Canceled)
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Service name; required, non-empty.
    fn name(&self) -> &str;

    /// Logical grouping (e.g. `billing`); required, non-empty.
    fn namespace(&self) -> &str;

    /// Advisory version tag (SemVer or CalVer).
    fn version(&self) -> &str {
        ""
    }

    /// Per-attempt setup. An error aborts the attempt before `run`.
    async fn init(&self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Service body; blocks until cancellation or failure.
    async fn run(&self, ctx: &ServiceContext) -> Result<(), ServiceError>;

    /// Best-effort teardown.
    async fn close(&self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// `(name, namespace, version)` of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    /// Service name.
    pub name: String,
    /// Service namespace.
    pub namespace: String,
    /// Service version (advisory).
    pub version: String,
}

impl ServiceIdentity {
    /// Creates an identity from its parts.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: version.into(),
        }
    }

    /// Captures the identity reported by `service`.
    pub fn of(service: &dyn Service) -> Self {
        Self::new(service.name(), service.namespace(), service.version())
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

/// Function-backed service.
///
/// Wraps a closure that *creates* a new `run` future per attempt; `init` and
/// `close` are no-ops. Shared state across attempts goes into an `Arc<...>`
/// captured by the closure.
///
/// ## Example
/// ```rust
/// use svcvisor::{ServiceContext, ServiceError, ServiceFn, ServiceRef};
///
/// let svc: ServiceRef = ServiceFn::arc("worker", "demo", |ctx: ServiceContext| async move {
///     ctx.cancelled().await;
///     Err::<(), _>(ServiceError::Canceled)
/// });
/// assert_eq!(svc.name(), "worker");
/// ```
pub struct ServiceFn<F> {
    name: Cow<'static, str>,
    namespace: Cow<'static, str>,
    version: Cow<'static, str>,
    f: F,
}

impl<F> ServiceFn<F> {
    /// Creates a new function-backed service.
    ///
    /// Prefer [`ServiceFn::arc`] when you immediately need a [`ServiceRef`].
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        namespace: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: Cow::Borrowed(""),
            f,
        }
    }

    /// Creates the service and returns it as a shared handle.
    pub fn arc(
        name: impl Into<Cow<'static, str>>,
        namespace: impl Into<Cow<'static, str>>,
        f: F,
    ) -> Arc<Self> {
        Arc::new(Self::new(name, namespace, f))
    }

    /// Returns the service with `version` set.
    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = version.into();
        self
    }
}

impl<F> fmt::Debug for ServiceFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFn")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Service for ServiceFn<F>
where
    F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn run(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        (self.f)(ctx.clone()).await
    }
}
