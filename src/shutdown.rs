use std::future::Future;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Exit status used when a second signal arrives while runners are draining.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// Runner loops only look at the token between jobs, so a claimed job still
/// settles (row update and deregistration) before its loop exits. A second
/// signal during the drain terminates the process immediately.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = CancellationToken::new();

    let drain = token.clone();
    tokio::spawn(async move {
        let name = next_signal(&mut sigterm, &mut sigint).await;
        tracing::info!(signal = name, "Draining runners; send again to force exit");
        drain.cancel();

        let name = next_signal(&mut sigterm, &mut sigint).await;
        tracing::warn!(signal = name, "Forced exit while draining");
        std::process::exit(FORCED_EXIT_CODE);
    });

    Ok(token)
}

async fn next_signal(sigterm: &mut Signal, sigint: &mut Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

/// Resolve once `token` is cancelled or `work` finishes, whichever is first.
/// Returns `None` when shutdown won.
pub async fn until_shutdown<F: Future>(token: &CancellationToken, work: F) -> Option<F::Output> {
    tokio::select! {
        _ = token.cancelled() => None,
        out = work => Some(out),
    }
}
