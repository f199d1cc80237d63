//! Error types used by the supervisor and by hosted services.
//!
//! This module defines the error vocabulary on both sides of the [`Service`](crate::Service) seam:
//!
//! - [`ServiceError`]: what a service returns from `init`/`run`/`close`.
//! - [`RunError`]: what the supervisor returns to its caller.
//! - [`PanicError`]: a recovered panic, carried through the same channel as ordinary failures.
//! - [`Violation`]: one validation finding; all of them are reported together.
//!
//! Both enums provide `as_label` for logs and classification helpers
//! ([`ServiceError::is_fatal`], [`RunError::is_fatal`], [`RunError::is_panic`]).

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// # Errors returned by a hosted service.
///
/// `Fail` is restarted under the configured budgets, `Fatal` never is,
/// and `Canceled` is a clean stop.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service failed but may succeed if restarted.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error; supervision stops regardless of restart settings.
    #[error("fatal error (no restart): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// The service observed cancellation of its context and stopped.
    #[error("context cancelled")]
    Canceled,
}

impl ServiceError {
    /// Builds a recoverable [`ServiceError::Fail`] from any displayable error.
    ///
    /// # Example
    /// ```
    /// use svcvisor::ServiceError;
    ///
    /// let err = ServiceError::fail("connection refused");
    /// assert_eq!(err.to_string(), "execution failed: connection refused");
    /// assert!(!err.is_fatal());
    /// ```
    pub fn fail(error: impl fmt::Display) -> Self {
        ServiceError::Fail {
            error: error.to_string(),
        }
    }

    /// Builds a [`ServiceError::Fatal`] from any displayable error.
    pub fn fatal(error: impl fmt::Display) -> Self {
        ServiceError::Fatal {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Fail { .. } => "service_failed",
            ServiceError::Fatal { .. } => "service_fatal",
            ServiceError::Canceled => "service_canceled",
        }
    }

    /// Returns `true` for [`ServiceError::Fatal`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Fatal { .. })
    }

    /// Returns `true` for [`ServiceError::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, ServiceError::Canceled)
    }
}

/// # A recovered panic.
///
/// The panic payload is rendered into `cause`; `stack` is the backtrace
/// captured at the recovery point and `related` holds the error the same
/// attempt had already produced, if any (e.g. a run failure followed by a
/// panicking `close`).
#[derive(Error, Debug)]
#[error("service {service:?} panicked: {cause}")]
pub struct PanicError {
    /// Name of the service that panicked.
    pub service: String,
    /// Panic payload rendered as text.
    pub cause: String,
    /// Backtrace captured when the panic was recovered.
    pub stack: String,
    /// Error produced earlier in the same attempt.
    pub related: Option<Box<RunError>>,
}

impl PanicError {
    /// Converts a panic payload caught by `catch_unwind`.
    ///
    /// Payloads that already are errors keep their message unchanged; string
    /// payloads are used verbatim; anything else becomes `"unknown panic"`.
    pub(crate) fn from_payload(
        service: &str,
        payload: Box<dyn Any + Send>,
        related: Option<RunError>,
    ) -> Self {
        let cause = describe_payload(payload.as_ref()).unwrap_or_else(|| "unknown panic".to_string());

        Self {
            service: service.to_string(),
            cause,
            stack: Backtrace::force_capture().to_string(),
            related: related.map(Box::new),
        }
    }
}

/// Message of a panic payload raised with `panic!` or `panic_any` of an error value.
fn describe_payload(payload: &(dyn Any + Send)) -> Option<String> {
    type DynError = dyn std::error::Error + Send + Sync;

    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        Some((*msg).to_string())
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        Some(msg.clone())
    } else if let Some(err) = payload.downcast_ref::<ServiceError>() {
        Some(err.to_string())
    } else if let Some(err) = payload.downcast_ref::<RunError>() {
        Some(err.to_string())
    } else if let Some(err) = payload.downcast_ref::<io::Error>() {
        Some(err.to_string())
    } else if let Some(err) = payload.downcast_ref::<Box<DynError>>() {
        Some(err.to_string())
    } else if let Some(err) = payload.downcast_ref::<Arc<DynError>>() {
        Some(err.to_string())
    } else {
        None
    }
}

/// # One validation finding.
///
/// Validation never stops at the first problem: every finding for every
/// service is collected into [`RunError::Invalid`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// No services were supplied.
    NoServices,
    /// The service at `index` has an empty name.
    EmptyName {
        /// Position of the service in the supplied collection.
        index: usize,
    },
    /// The service at `index` has an empty namespace.
    EmptyNamespace {
        /// Position of the service in the supplied collection.
        index: usize,
    },
    /// Two or more services share the same `(name, namespace)`.
    Duplicate {
        /// Shared name.
        name: String,
        /// Shared namespace.
        namespace: String,
    },
    /// An environment override could not be parsed.
    InvalidEnv {
        /// Full environment variable name.
        key: String,
        /// Raw value found in the environment.
        value: String,
        /// What was expected.
        expected: &'static str,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::NoServices => f.write_str("no services supplied"),
            Violation::EmptyName { index } => {
                write!(f, "service #{index}: name cannot be empty")
            }
            Violation::EmptyNamespace { index } => {
                write!(f, "service #{index}: namespace cannot be empty")
            }
            Violation::Duplicate { name, namespace } => {
                write!(f, "duplicate service {namespace}/{name}")
            }
            Violation::InvalidEnv {
                key,
                value,
                expected,
            } => write!(f, "{key}={value:?}: expected {expected}"),
        }
    }
}

/// # Errors produced by the supervisor.
///
/// Only validation, telemetry, fatal, budget-exhausted and disabled-restart
/// failures ever leave a supervision loop; everything else is absorbed into a
/// restart decision.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    /// Services or options failed validation; nothing was started.
    #[error("invalid services: {}", join_violations(.violations))]
    Invalid {
        /// Every finding, in discovery order.
        violations: Vec<Violation>,
    },

    /// The telemetry initializer failed; no service code ran.
    #[error("failed to initialize telemetry: {error}")]
    Telemetry {
        /// The underlying error message.
        error: String,
    },

    /// `init` failed.
    #[error("service {service:?} initialization failed: {source}")]
    Init {
        /// Service name.
        service: String,
        /// Error returned by the service.
        source: ServiceError,
    },

    /// `run` failed.
    #[error("service {service:?} run failed: {source}")]
    Run {
        /// Service name.
        service: String,
        /// Error returned by the service.
        source: ServiceError,
    },

    /// A panic was recovered.
    #[error(transparent)]
    Panic(#[from] PanicError),

    /// Restarts stopped because the grace period elapsed.
    #[error("exceeded grace period {period:?}: {source}")]
    GracePeriodExceeded {
        /// The configured grace period.
        period: Duration,
        /// The failure that triggered the last restart decision.
        source: Box<RunError>,
    },

    /// Restarts stopped because the grace count was used up.
    #[error("exceeded grace count {count}: {source}")]
    GraceCountExceeded {
        /// The configured grace count.
        count: u32,
        /// The failure that triggered the last restart decision.
        source: Box<RunError>,
    },

    /// Supervision stopped because its context was cancelled.
    #[error("context cancelled")]
    Canceled,
}

impl RunError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use svcvisor::RunError;
    ///
    /// assert_eq!(RunError::Canceled.as_label(), "run_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Invalid { .. } => "run_invalid",
            RunError::Telemetry { .. } => "run_telemetry",
            RunError::Init { .. } => "run_init_failed",
            RunError::Run { .. } => "run_failed",
            RunError::Panic(_) => "run_panic",
            RunError::GracePeriodExceeded { .. } => "run_grace_period_exceeded",
            RunError::GraceCountExceeded { .. } => "run_grace_count_exceeded",
            RunError::Canceled => "run_canceled",
        }
    }

    /// Indicates whether the error terminates supervision regardless of restart settings.
    ///
    /// Validation and telemetry errors are always fatal; `init`/`run`
    /// failures are fatal only when the service returned [`ServiceError::Fatal`].
    pub fn is_fatal(&self) -> bool {
        match self {
            RunError::Invalid { .. } | RunError::Telemetry { .. } => true,
            RunError::Init { source, .. } | RunError::Run { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Returns `true` when the error is a recovered panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, RunError::Panic(_))
    }

    /// Returns `true` for [`RunError::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, RunError::Canceled)
    }

    /// Returns the recovered panic, looking through budget-exhausted wrappers.
    pub fn panic(&self) -> Option<&PanicError> {
        match self {
            RunError::Panic(p) => Some(p),
            RunError::GracePeriodExceeded { source, .. }
            | RunError::GraceCountExceeded { source, .. } => source.panic(),
            _ => None,
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
