//! Supervisor for the worker loops making up a macme process.
//!
//! Workers run concurrently on a [`tokio::task::JoinSet`]; the first
//! failure, SIGINT or SIGTERM cancels the shared token, every worker winds
//! down, and registered closers run under a timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type Worker = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;
type Closer = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

pub struct Runner {
    workers: Vec<Worker>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            token: CancellationToken::new(),
        }
    }

    /// Add a worker loop. Workers receive the shared cancellation token
    /// and are expected to return promptly once it fires.
    pub fn with_worker<F, Fut>(mut self, worker: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.workers.push(Box::new(|token| Box::pin(worker(token))));
        self
    }

    /// Add a cleanup step, run after all workers stop regardless of why.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Run until every worker finishes. Returns the first worker error,
    /// if any; signal-triggered shutdown is a clean exit.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.token;
        let mut tasks = JoinSet::new();

        for worker in self.workers {
            let worker_token = token.clone();
            tasks.spawn(worker(worker_token));
        }

        spawn_signal_listener(token.clone());

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => debug!("worker finished"),
                Ok(Err(e)) => {
                    error!(error = %e, "worker failed, shutting down");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    token.cancel();
                }
                Err(e) => {
                    error!(error = %e, "worker panicked, shutting down");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("worker panicked: {e}"));
                    }
                    token.cancel();
                }
            }
        }

        if !self.closers.is_empty() {
            info!(timeout = ?self.closer_timeout, "running closers");
            if tokio::time::timeout(self.closer_timeout, run_closers(self.closers))
                .await
                .is_err()
            {
                error!("closers timed out");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt");
        }
        token.cancel();
    });
}

async fn run_closers(closers: Vec<Closer>) {
    let mut tasks = JoinSet::new();
    for closer in closers {
        tasks.spawn(closer());
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => debug!("closer finished"),
            Ok(Err(e)) => error!(error = %e, "closer failed"),
            Err(e) => error!(error = %e, "closer panicked"),
        }
    }
}
