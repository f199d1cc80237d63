//! # Per-invocation supervision state.
//!
//! [`SupervisionState`] holds the only mutable data of a supervision loop:
//! when the first attempt started and how many restarts were granted since.
//! A fresh value is created by every loop; nothing is shared between
//! invocations or services.
//!
//! ## Rules
//! - The restart counter increments **before** the budgets are checked
//! - Grace period and grace count are independent; the first one exceeded wins
//! - A zero budget means "no ceiling" for that dimension

use std::time::Duration;

use tokio::time::Instant;

use crate::error::RunError;
use crate::options::Options;

/// Which budget ran out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Exhausted {
    /// Wall-clock time since the first attempt exceeded the grace period.
    Period(Duration),
    /// Restarts exceeded the grace count.
    Count(u32),
}

impl Exhausted {
    /// Wraps the failure that triggered the decision into a budget error.
    pub(crate) fn into_error(self, source: RunError) -> RunError {
        match self {
            Exhausted::Period(period) => RunError::GracePeriodExceeded {
                period,
                source: Box::new(source),
            },
            Exhausted::Count(count) => RunError::GraceCountExceeded {
                count,
                source: Box::new(source),
            },
        }
    }
}

/// Grace start and restart counter of one supervision loop.
#[derive(Debug)]
pub(crate) struct SupervisionState {
    started: Instant,
    restarts: u32,
}

impl SupervisionState {
    /// Starts the grace clock now.
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            restarts: 0,
        }
    }

    pub(crate) fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Restarts left under the grace count (`None` = unlimited).
    pub(crate) fn remaining(&self, opts: &Options) -> Option<u32> {
        opts.grace_count_limit()
            .map(|count| count.saturating_sub(self.restarts))
    }

    /// Counts one more restart and checks it against the budgets.
    pub(crate) fn record_restart(&mut self, opts: &Options) -> Result<(), Exhausted> {
        self.restarts = self.restarts.saturating_add(1);

        if let Some(period) = opts.grace_period_limit() {
            if self.started.elapsed() > period {
                return Err(Exhausted::Period(period));
            }
        }
        if let Some(count) = opts.grace_count_limit() {
            if self.restarts > count {
                return Err(Exhausted::Count(count));
            }
        }
        Ok(())
    }
}
