//! # Service execution context.
//!
//! [`ServiceContext`] is the explicit carrier handed to every `init`/`run`/`close`
//! call. It bundles what a hosted service needs from its supervisor:
//!
//! - identity: name, namespace, version;
//! - the resolved environment prefix and the [`EnvSource`] behind it;
//! - the logger: a `tracing` span carrying the identity as fields;
//! - [`Telemetry`] handles;
//! - the shared [`CancellationToken`] signalling group-wide shutdown;
//! - the current attempt number.
//!
//! Contexts are cheap to clone. Each `with_*` call returns a new value: the
//! derived context sees every binding of its parent, the parent never sees the
//! child's.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Span;

use crate::env::{EnvSource, ProcessEnv, prefixed_key};
use crate::service::ServiceIdentity;
use crate::telemetry::Telemetry;

/// Execution context of one supervised service.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    identity: Arc<ServiceIdentity>,
    env_prefix: Arc<str>,
    env: Arc<dyn EnvSource>,
    span: Span,
    telemetry: Telemetry,
    token: CancellationToken,
    attempt: u32,
}

impl ServiceContext {
    /// Creates a root context bound to `token`.
    ///
    /// The identity is empty, the environment is the process environment
    /// without prefix, the span is disabled and telemetry uses the
    /// OpenTelemetry globals.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            identity: Arc::new(ServiceIdentity::default()),
            env_prefix: Arc::from(""),
            env: Arc::new(ProcessEnv),
            span: Span::none(),
            telemetry: Telemetry::from_globals(),
            token,
            attempt: 0,
        }
    }

    pub fn with_identity(mut self, identity: ServiceIdentity) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<Arc<str>>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub(crate) fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn namespace(&self) -> &str {
        &self.identity.namespace
    }

    pub fn version(&self) -> &str {
        &self.identity.version
    }

    /// Normalized prefix applied by [`env_var`](Self::env_var); empty when none applies.
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Looks up `<PREFIX>_<KEY>` (normalized) in the service's environment.
    ///
    /// # Example
    /// ```
    /// use std::collections::HashMap;
    /// use std::sync::Arc;
    /// use tokio_util::sync::CancellationToken;
    /// use svcvisor::ServiceContext;
    ///
    /// let env: HashMap<String, String> =
    ///     [("BILLING_API_DB_URL".to_string(), "postgres://db".to_string())].into();
    /// let ctx = ServiceContext::new(CancellationToken::new())
    ///     .with_env(Arc::new(env))
    ///     .with_env_prefix("BILLING_API");
    ///
    /// assert_eq!(ctx.env_var("db.url").as_deref(), Some("postgres://db"));
    /// ```
    pub fn env_var(&self, key: &str) -> Option<String> {
        self.env.var(&prefixed_key(&self.env_prefix, key))
    }

    /// Deserializes `T` from the variables under the service's prefix.
    ///
    /// `BILLING_API_DB_URL` fills the field `db_url`: the prefix and its
    /// underscore are stripped and the rest is lowercased. Without a prefix
    /// every variable is considered. Missing fields fall back to their serde
    /// defaults, or fail.
    ///
    /// # Example
    /// ```
    /// use std::collections::HashMap;
    /// use std::sync::Arc;
    /// use serde::Deserialize;
    /// use tokio_util::sync::CancellationToken;
    /// use svcvisor::ServiceContext;
    ///
    /// #[derive(Deserialize)]
    /// struct Config {
    ///     db_url: String,
    ///     #[serde(default)]
    ///     pool: u32,
    /// }
    ///
    /// let env: HashMap<String, String> =
    ///     [("BILLING_API_DB_URL".to_string(), "postgres://db".to_string())].into();
    /// let ctx = ServiceContext::new(CancellationToken::new())
    ///     .with_env(Arc::new(env))
    ///     .with_env_prefix("BILLING_API");
    ///
    /// let cfg: Config = ctx.load_env().unwrap();
    /// assert_eq!(cfg.db_url, "postgres://db");
    /// assert_eq!(cfg.pool, 0);
    /// ```
    pub fn load_env<T: DeserializeOwned>(&self) -> Result<T, envy::Error> {
        if self.env_prefix.is_empty() {
            envy::from_iter(self.env.vars())
        } else {
            envy::prefixed(format!("{}_", self.env_prefix)).from_iter(self.env.vars())
        }
    }

    /// The service logger: a span carrying `service`, `namespace` and `version`.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Attempt number, starting at 1 (0 outside supervision).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
