//! Runtime core: supervision and lifecycle.
//!
//! The only public API from this module is [`Supervisor`] (and its builder),
//! which validates services, supervises them and stops them as a group.
//!
//! Internal modules:
//! - [`runner`]: executes one `init` → `run` → `close` attempt with panic recovery;
//! - [`state`]: grace clock and restart counter of one supervision loop;
//! - [`actor`]: restarts a single service until it stops for good;
//! - [`supervisor`]: validation, telemetry, first-finisher fan-in and shutdown;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod actor;
mod runner;
mod shutdown;
mod state;
mod supervisor;

pub use supervisor::{Supervisor, SupervisorBuilder};
