//! # Example: Basic service
//!
//! Runs one service until Ctrl-C (or SIGTERM), then exits.
//! Overrides are read from `SERVICE_EXAMPLE_*`, e.g.:
//!
//! ```text
//! SERVICE_EXAMPLE_LOG_DEBUG=true cargo run --example basic
//! ```

use std::time::Duration;

use async_trait::async_trait;

use svcvisor::{Options, Service, ServiceContext, ServiceError, Supervisor};

/// Minimal service logging each phase and ticking until shutdown.
struct Example;

#[async_trait]
impl Service for Example {
    fn name(&self) -> &str {
        "example"
    }

    fn namespace(&self) -> &str {
        "service"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn init(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        tracing::info!(parent: ctx.span(), prefix = ctx.env_prefix(), "env prefix");
        Ok(())
    }

    async fn run(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        tracing::info!(parent: ctx.span(), attempt = ctx.attempt(), "running");
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Err(ServiceError::Canceled),
                _ = ticker.tick() => tracing::debug!(parent: ctx.span(), "tick"),
            }
        }
    }

    async fn close(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        tracing::info!(parent: ctx.span(), "closing");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let opts = Options::default().with_log_json(false);
    Supervisor::new(opts).run_and_exit(std::sync::Arc::new(Example)).await;
}
