//! # OS signals that stop a supervised group.
//!
//! The supervisor awaits [`shutdown_requested`] next to its members; when it
//! completes the group token is cancelled. With `handle_signals` off it never
//! completes.
//!
//! Unix listens for `SIGINT`, `SIGTERM` and `SIGQUIT`; other platforms for
//! Ctrl-C through [`tokio::signal::ctrl_c`].

use std::future;

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Completes on a termination signal when `enabled`; never completes otherwise.
///
/// A failed registration is logged and treated as "no signal will come".
pub(crate) async fn shutdown_requested(enabled: bool) {
    if !enabled {
        return future::pending().await;
    }
    if let Err(err) = wait_for_shutdown_signal().await {
        tracing::warn!(error = %err, "failed to install signal handlers");
        future::pending::<()>().await;
    }
}
