//! A concurrent application runner that manages long-running processes with graceful shutdown.
//!
//! The runner orchestrates named app processes and cleanup functions:
//! - Processes run concurrently until one fails or a shutdown signal arrives
//! - Graceful shutdown on SIGTERM/SIGINT via a shared cancellation token
//! - Closers execute afterward with a configurable timeout, regardless of
//!   how the processes stopped

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// An app process: takes the shared cancellation token and runs until
/// done or cancelled.
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// A cleanup function executed after all processes have stopped.
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds a named app process. Processes run concurrently; if any
    /// returns an error, all are cancelled and the closers run.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Adds a closer, executed after all app processes have stopped.
    /// All closers attempt to run even if some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Sets the timeout for executing closers. Default is 10 seconds.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets a custom cancellation token for external shutdown control.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs all app processes until completion or shutdown, then runs
    /// the closers and exits the application.
    pub async fn run(self) {
        let token = Arc::new(self.cancellation_token);
        let mut join_set = JoinSet::new();
        let closer_timeout = self.closer_timeout;
        let closers = self.closers;

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                tracing::info!(process = %name, "Starting app process");
                let result = process((*process_token).clone()).await;
                (name, result)
            });
        }

        let signal_token = token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received shutdown signal");
                    signal_token.cancel();
                }
                Err(err) => {
                    tracing::error!("Error setting up signal handler: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let sigterm_token = token.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        tracing::info!("Received SIGTERM signal");
                        sigterm_token.cancel();
                    }
                    Err(err) => {
                        tracing::error!("Error setting up SIGTERM handler: {}", err);
                    }
                }
            });
        }

        let mut first_error = None;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((name, Ok(()))) => {
                    tracing::debug!(process = %name, "App process completed");
                }
                Ok((name, Err(err))) => {
                    if !token.is_cancelled() {
                        tracing::error!(process = %name, "App process error: {:#}", err);
                        first_error = Some(err);
                        token.cancel();
                    }
                }
                Err(err) => {
                    tracing::error!("App process panicked: {}", err);
                    if !token.is_cancelled() {
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // Let the remaining processes observe the cancellation.
        join_set.shutdown().await;

        if !closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", closer_timeout);

            let closer_result =
                tokio::time::timeout(closer_timeout, Self::run_closers(closers)).await;

            match closer_result {
                Ok(_) => tracing::info!("All closers completed"),
                Err(_) => tracing::error!("Closers timed out after {:?}", closer_timeout),
            }
        }

        if let Some(err) = first_error {
            tracing::error!("Application exiting with error: {:#}", err);
            std::process::exit(1);
        } else {
            tracing::info!("Application exiting normally");
            std::process::exit(0);
        }
    }

    async fn run_closers(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();

        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("Closer completed"),
                Ok(Err(err)) => tracing::error!("Closer error: {:#}", err),
                Err(err) => tracing::error!("Closer panicked: {}", err),
            }
        }
    }
}
