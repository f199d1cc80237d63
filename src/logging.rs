//! Logging setup.
//!
//! Provides structured logging through `tracing`:
//! - a global subscriber installed from [`Options`] (level, JSON or human format, colors)
//! - one span per supervised service carrying `service`, `namespace` and `version`
//! - `RUST_LOG` overrides the configured level when set

use std::io::{self, IsTerminal};

use tracing::Span;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::options::Options;
use crate::service::ServiceIdentity;

/// Installs the global subscriber described by `opts`.
///
/// Only the first installation in a process takes effect; returns `false`
/// when a global subscriber was already set.
pub fn init(opts: &Options) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.effective_log_level().as_directive()));

    let result = if uses_json(opts) {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(io::stdout);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(uses_colors(opts, io::stdout().is_terminal()))
            .with_writer(io::stdout);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
    };

    result.is_ok()
}

/// Merges the logging settings of a group's members into one subscriber config.
///
/// The most verbose level wins, as do debug and color requests; JSON is kept
/// only when every member asks for it. Returns `None` for an empty group.
pub(crate) fn group_options(members: &[Options]) -> Option<Options> {
    let (first, rest) = members.split_first()?;
    let mut merged = first.clone();
    for opts in rest {
        merged.log_level = merged.log_level.max(opts.log_level);
        merged.log_debug |= opts.log_debug;
        merged.log_json &= opts.log_json;
        merged.log_colors |= opts.log_colors;
        merged.log_auto_colors |= opts.log_auto_colors;
    }
    Some(merged)
}

/// Creates the logger span of one service.
pub fn service_span(identity: &ServiceIdentity) -> Span {
    // Error level: the span must stay enabled under every filter.
    tracing::error_span!(
        "service",
        service = %identity.name,
        namespace = %identity.namespace,
        version = %identity.version
    )
}

/// JSON output unless debug logging asks for the human format.
fn uses_json(opts: &Options) -> bool {
    opts.log_json && !opts.log_debug
}

fn uses_colors(opts: &Options, stdout_is_terminal: bool) -> bool {
    if uses_json(opts) {
        return false;
    }
    opts.log_colors || ((opts.log_auto_colors || opts.log_debug) && stdout_is_terminal)
}
