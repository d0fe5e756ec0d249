use anyhow::{anyhow, Result};
use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Installs the process-wide shutdown listener. Every long-running loop
/// holds a child token and drains when it fires.
pub fn install() -> ShutdownSignal {
    ShutdownSignal {
        token: CancellationToken::new(),
    }
}

pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once SIGTERM, SIGINT or SIGHUP (tmux) arrives, cancelling
    /// all subscribed tokens.
    pub async fn listen(self) {
        let mut sigterm = signal(SignalKind::terminate()).expect("signal handler registration");
        let mut sigint = signal(SignalKind::interrupt()).expect("signal handler registration");
        let mut sighup = signal(SignalKind::hangup()).expect("signal handler registration");

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sighup.recv() => "SIGHUP",
        };
        info!("{} received; draining in-flight work...", name);
        self.token.cancel();
    }
}

/// Collapses a JoinHandle's two error layers into one.
pub async fn flatten(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(err),
        Err(err) => Err(anyhow!(err)),
    }
}
