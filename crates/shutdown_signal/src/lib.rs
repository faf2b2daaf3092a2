use std::future::Future;
use std::io;
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() -> io::Result<()> {
            let mut ctrl_c = ctrl_c()?;
            let mut ctrl_close = ctrl_close()?;
            let mut ctrl_shutdown = ctrl_shutdown()?;
            let mut ctrl_logoff = ctrl_logoff()?;
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
                _ = ctrl_logoff.recv() => (),
            }
            Ok(())
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn raw_shutdown_signal() -> io::Result<()> {
            let mut interrupt = signal(SignalKind::interrupt())?;
            let mut terminate = signal(SignalKind::terminate())?;
            let mut hangup = signal(SignalKind::hangup())?;
            let mut quit = signal(SignalKind::quit())?;
            select! {
                _ = interrupt.recv() => (),
                _ = terminate.recv() => (),
                _ = hangup.recv() => (),
                _ = quit.recv() => (),
            }
            Ok(())
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Resolves once the process receives a termination signal.
///
/// If the handlers cannot be installed the error is logged and the future never resolves.
pub fn shutdown_signal() -> ShutdownSignal {
    async {
        match raw_shutdown_signal().await {
            Ok(()) => info!("Shutdown signal detected. Finishing the current job before stopping..."),
            Err(e) => {
                error!(error = %e, "Failed to listen to OS shutdown signals");
                futures::future::pending::<()>().await;
            }
        }
    }
    .boxed()
    .shared()
}

/// Cancels `token` when `signal` resolves. Returns early if the token is cancelled
/// by someone else first.
pub async fn cancel_on<F>(signal: F, token: CancellationToken)
where
    F: Future<Output = ()>,
{
    select! {
        _ = signal => token.cancel(),
        _ = token.cancelled() => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_cancels_token() {
        let token = CancellationToken::new();
        cancel_on(async {}, token.clone()).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_token_stops_listening() {
        let token = CancellationToken::new();
        let child = token.clone();
        let listener = tokio::spawn(cancel_on(futures::future::pending(), child));

        token.cancel();
        listener.await.unwrap();
    }
}
