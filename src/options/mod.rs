//! # Supervision options.
//!
//! Provides [`Options`], the immutable per-service snapshot that drives the
//! supervision loop, restart delays, shutdown bounds and logging.
//!
//! Options are built in three layers:
//! 1. **Defaults**: [`Options::default`]
//! 2. **Caller overrides**: the `with_*` methods
//! 3. **Environment**: [`Options::resolve`] overlays `<PREFIX>_<FIELD>` variables
//!
//! ## Sentinel values
//! - `grace_period = 0s` → no time ceiling on restarts
//! - `grace_count = 0` → no ceiling on the number of restarts
//! - `restart_on_panic_delay = 0s` → falls back to `restart_on_error_delay`
//! - `shutdown_timeout = 0s` → `close` is awaited without a bound
//!
//! ## Environment keys
//! ```text
//! RESTART_ON_ERROR        bool      RESTART_ON_ERROR_DELAY  duration
//! RESTART_ON_PANIC        bool      RESTART_ON_PANIC_DELAY  duration
//! RECOVER_PANIC           bool      GRACE_PERIOD            duration
//! GRACE_COUNT             u32       SHUTDOWN_TIMEOUT        duration
//! LOG_LEVEL               level     LOG_DEBUG               bool
//! LOG_JSON                bool      LOG_COLORS              bool
//! LOG_COLORS_AUTO         bool
//! ```

mod parse;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::env::{EnvSource, normalize_env_key, prefixed_key};
use crate::error::Violation;
use crate::service::ServiceIdentity;

/// Minimum severity emitted by the logger, ordered from least to most verbose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages and above (default).
    #[default]
    Info,
    /// Everything, including per-attempt lifecycle messages.
    Debug,
}

impl LogLevel {
    /// Returns the directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

/// Configuration of one service's supervision.
///
/// Defines:
/// - **Restart policy**: whether errors and panics restart the service, and after which delay
/// - **Budgets**: grace period and grace count, whichever is exhausted first
/// - **Shutdown**: how long `close` may take
/// - **Logging**: level and output format
/// - **Environment**: prefix used for overrides and for [`ServiceContext::env_var`](crate::ServiceContext::env_var)
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Restart the service when an attempt fails.
    ///
    /// The number of restarts is bounded by `grace_count` and `grace_period`.
    /// When disabled, the first failure (panics included) ends supervision.
    pub restart_on_error: bool,

    /// Delay before restarting after a failure.
    pub restart_on_error_delay: Duration,

    /// Restart the service after a recovered panic.
    pub restart_on_panic: bool,

    /// Delay before restarting after a panic (`0s` = use `restart_on_error_delay`).
    pub restart_on_panic_delay: Duration,

    /// Convert panics inside `init`/`run`/`close` into [`PanicError`](crate::PanicError)s.
    ///
    /// When disabled, a panic unwinds out of the supervisor.
    pub recover_panic: bool,

    /// Maximum wall-clock time since the first attempt during which restarts are allowed.
    pub grace_period: Duration,

    /// Maximum number of restarts after the first attempt.
    pub grace_count: u32,

    /// Maximum time `close` may take, and how long a group waits for siblings to unwind.
    pub shutdown_timeout: Duration,

    /// Minimum log level.
    ///
    /// The `log_*` fields configure one process-wide subscriber. A group is
    /// logged with the most verbose level and any debug or color request of
    /// its members, and in JSON only when every member asks for JSON.
    pub log_level: LogLevel,

    /// Force debug logging; also selects the human-readable formatter.
    pub log_debug: bool,

    /// Emit JSON log lines.
    pub log_json: bool,

    /// Colorize human-readable log lines. Ignored for JSON.
    pub log_colors: bool,

    /// Colorize when stdout is a terminal.
    pub log_auto_colors: bool,

    /// Prefix for environment lookups.
    ///
    /// When `None`, `<namespace>_<name>` is used. The prefix is normalized
    /// with [`normalize_env_key`] during [`Options::resolve`].
    pub env_prefix: Option<String>,

    /// Read environment keys without any prefix.
    pub env_prefix_disabled: bool,

    /// Cancel supervision on SIGINT/SIGTERM/SIGQUIT (Ctrl-C on Windows).
    pub handle_signals: bool,
}

impl Default for Options {
    /// Default configuration:
    ///
    /// - restart on error after `10s`, restart on panic with the same delay
    /// - panics recovered
    /// - grace period `1m`, grace count `3`
    /// - `close` bounded to `30s`
    /// - JSON logs at `info`, automatic colors; debug logging in debug builds
    /// - prefix derived from the service identity, signal handling on
    fn default() -> Self {
        Self {
            restart_on_error: true,
            restart_on_error_delay: Duration::from_secs(10),
            restart_on_panic: true,
            restart_on_panic_delay: Duration::ZERO,
            recover_panic: true,
            grace_period: Duration::from_secs(60),
            grace_count: 3,
            shutdown_timeout: Duration::from_secs(30),
            log_level: LogLevel::Info,
            log_debug: cfg!(debug_assertions),
            log_json: true,
            log_colors: false,
            log_auto_colors: true,
            env_prefix: None,
            env_prefix_disabled: false,
            handle_signals: true,
        }
    }
}

impl Options {
    /// Returns the grace period as an `Option` (`None` = unlimited).
    #[inline]
    pub fn grace_period_limit(&self) -> Option<Duration> {
        (!self.grace_period.is_zero()).then_some(self.grace_period)
    }

    /// Returns the grace count as an `Option` (`None` = unlimited).
    #[inline]
    pub fn grace_count_limit(&self) -> Option<u32> {
        (self.grace_count > 0).then_some(self.grace_count)
    }

    /// Returns the bound applied to `close` (`None` = unbounded).
    #[inline]
    pub fn shutdown_limit(&self) -> Option<Duration> {
        (!self.shutdown_timeout.is_zero()).then_some(self.shutdown_timeout)
    }

    /// Delay to apply before the next attempt.
    ///
    /// Panics use `restart_on_panic_delay` when it is set.
    #[inline]
    pub fn restart_delay(&self, after_panic: bool) -> Duration {
        if after_panic && !self.restart_on_panic_delay.is_zero() {
            self.restart_on_panic_delay
        } else {
            self.restart_on_error_delay
        }
    }

    /// Effective log level once `log_debug` is taken into account.
    #[inline]
    pub fn effective_log_level(&self) -> LogLevel {
        if self.log_debug {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }

    /// The resolved environment prefix (empty when none applies).
    pub fn resolved_env_prefix(&self) -> &str {
        self.env_prefix.as_deref().unwrap_or_default()
    }

    pub fn with_restart_on_error(mut self, v: bool) -> Self {
        self.restart_on_error = v;
        self
    }

    pub fn with_restart_on_error_delay(mut self, v: Duration) -> Self {
        self.restart_on_error_delay = v;
        self
    }

    pub fn with_restart_on_panic(mut self, v: bool) -> Self {
        self.restart_on_panic = v;
        self
    }

    pub fn with_restart_on_panic_delay(mut self, v: Duration) -> Self {
        self.restart_on_panic_delay = v;
        self
    }

    pub fn with_recover_panic(mut self, v: bool) -> Self {
        self.recover_panic = v;
        self
    }

    pub fn with_grace_period(mut self, v: Duration) -> Self {
        self.grace_period = v;
        self
    }

    pub fn with_grace_count(mut self, v: u32) -> Self {
        self.grace_count = v;
        self
    }

    pub fn with_shutdown_timeout(mut self, v: Duration) -> Self {
        self.shutdown_timeout = v;
        self
    }

    pub fn with_log_level(mut self, v: LogLevel) -> Self {
        self.log_level = v;
        self
    }

    pub fn with_log_debug(mut self, v: bool) -> Self {
        self.log_debug = v;
        self
    }

    pub fn with_log_json(mut self, v: bool) -> Self {
        self.log_json = v;
        self
    }

    pub fn with_log_colors(mut self, v: bool) -> Self {
        self.log_colors = v;
        self
    }

    pub fn with_log_auto_colors(mut self, v: bool) -> Self {
        self.log_auto_colors = v;
        self
    }

    pub fn with_env_prefix(mut self, v: impl Into<String>) -> Self {
        self.env_prefix = Some(v.into());
        self
    }

    pub fn with_env_prefix_disabled(mut self, v: bool) -> Self {
        self.env_prefix_disabled = v;
        self
    }

    pub fn with_handle_signals(mut self, v: bool) -> Self {
        self.handle_signals = v;
        self
    }

    /// Builds the snapshot used to supervise `identity`.
    ///
    /// The prefix is `env_prefix` if set, otherwise `<namespace>_<name>`
    /// (namespace omitted when empty); either way it is normalized, and it is
    /// empty when `env_prefix_disabled` is set. Every recognized
    /// `<PREFIX>_<FIELD>` variable present in `env` then overrides the
    /// corresponding field.
    ///
    /// Unparsable values are all reported, not only the first one.
    pub fn resolve(
        &self,
        identity: &ServiceIdentity,
        env: &dyn EnvSource,
    ) -> Result<Options, Vec<Violation>> {
        let mut o = self.clone();

        let prefix = if o.env_prefix_disabled {
            String::new()
        } else {
            match &o.env_prefix {
                Some(p) if !p.is_empty() => normalize_env_key(p),
                _ => default_prefix(identity),
            }
        };

        let mut overlay = Overlay {
            env,
            prefix: &prefix,
            violations: Vec::new(),
        };
        overlay.bool("RESTART_ON_ERROR", &mut o.restart_on_error);
        overlay.duration("RESTART_ON_ERROR_DELAY", &mut o.restart_on_error_delay);
        overlay.bool("RESTART_ON_PANIC", &mut o.restart_on_panic);
        overlay.duration("RESTART_ON_PANIC_DELAY", &mut o.restart_on_panic_delay);
        overlay.bool("RECOVER_PANIC", &mut o.recover_panic);
        overlay.duration("GRACE_PERIOD", &mut o.grace_period);
        overlay.u32("GRACE_COUNT", &mut o.grace_count);
        overlay.duration("SHUTDOWN_TIMEOUT", &mut o.shutdown_timeout);
        overlay.level("LOG_LEVEL", &mut o.log_level);
        overlay.bool("LOG_DEBUG", &mut o.log_debug);
        overlay.bool("LOG_JSON", &mut o.log_json);
        overlay.bool("LOG_COLORS", &mut o.log_colors);
        overlay.bool("LOG_COLORS_AUTO", &mut o.log_auto_colors);

        if !overlay.violations.is_empty() {
            return Err(overlay.violations);
        }

        o.env_prefix = Some(prefix);
        Ok(o)
    }
}

fn default_prefix(identity: &ServiceIdentity) -> String {
    if identity.namespace.is_empty() {
        normalize_env_key(&identity.name)
    } else {
        normalize_env_key(&format!("{}_{}", identity.namespace, identity.name))
    }
}

/// Applies environment overrides field by field, collecting parse failures.
struct Overlay<'a> {
    env: &'a dyn EnvSource,
    prefix: &'a str,
    violations: Vec<Violation>,
}

impl Overlay<'_> {
    fn apply<T>(
        &mut self,
        field: &str,
        expected: &'static str,
        slot: &mut T,
        parse: impl FnOnce(&str) -> Option<T>,
    ) {
        let key = prefixed_key(self.prefix, field);
        let Some(raw) = self.env.var(&key) else {
            return;
        };
        match parse(&raw) {
            Some(v) => *slot = v,
            None => self.violations.push(Violation::InvalidEnv {
                key,
                value: raw,
                expected,
            }),
        }
    }

    fn bool(&mut self, field: &str, slot: &mut bool) {
        self.apply(field, "a boolean", slot, parse::parse_bool);
    }

    fn u32(&mut self, field: &str, slot: &mut u32) {
        self.apply(field, "a non-negative integer", slot, parse::parse_u32);
    }

    fn duration(&mut self, field: &str, slot: &mut Duration) {
        self.apply(field, "a duration like 10s or 1m30s", slot, parse::parse_duration);
    }

    fn level(&mut self, field: &str, slot: &mut LogLevel) {
        self.apply(field, "one of error|warn|info|debug", slot, |raw| {
            raw.parse().ok()
        });
    }
}
