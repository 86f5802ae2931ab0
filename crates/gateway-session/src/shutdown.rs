//! SIGINT/SIGTERM/SIGHUP → a broadcast shutdown signal; SIGPIPE ignored
//! (§4.5 "Shutdown"). Grounded on the teacher cli's minimal
//! `tokio::signal`-based wiring, generalized from SIGINT-only to all three.

use tokio::sync::watch;

/// Spawns a task that watches SIGINT/SIGTERM/SIGHUP and flips `tx` to
/// `true` the first time any of them arrives. Ignores SIGPIPE on unix so a
/// write to a half-closed socket surfaces as an `EPIPE` error instead of
/// killing the process.
pub fn install(tx: watch::Sender<bool>) {
    ignore_sigpipe();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = sigint.recv() => {},
                _ = sigterm.recv() => {},
                _ = sighup.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = tx.send(true);
    });
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn ignore_sigpipe() {
    use nix::sys::signal::{signal, SigHandler, Signal};
    // SAFETY: installing a no-op disposition for a single well-known signal
    // at process startup; no signal-unsafe state is touched from the handler.
    unsafe {
        let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }
}

#[cfg(not(unix))]
fn ignore_sigpipe() {}
