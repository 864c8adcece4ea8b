use super::{PicamOrchestrator, ShutdownReason};
use crate::error::{PicamError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

type SharedSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl PicamOrchestrator {
    /// Serve the console on stdin/stdout until EOF or a termination signal
    pub async fn run(&mut self) -> Result<i32> {
        let stdin = BufReader::new(tokio::io::stdin());
        self.run_with(stdin, tokio::io::stdout()).await
    }

    /// Serve the console over the given streams with signal handling
    pub async fn run_with<R, W>(&mut self, input: R, output: W) -> Result<i32>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("Picam bot is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| PicamError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| PicamError::system("Shutdown receiver already taken"))?;

        let shutdown_sender: SharedSender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(&shutdown_sender);

        let transport = self.console_transport();
        let console_sender = Arc::clone(&shutdown_sender);
        self.console_handle = Some(tokio::spawn(async move {
            if let Some(reason) = transport.run(input, output).await {
                notify(&console_sender, reason).await;
            }
        }));

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| PicamError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown(&shutdown_reason).await?;

        info!("Picam bot shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, shutdown_sender: &SharedSender) {
        // SIGTERM (systemd stop)
        #[cfg(unix)]
        {
            let sender = Arc::clone(shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    notify(&sender, ShutdownReason::Signal("SIGTERM".to_string())).await;
                }
            });
        }

        let sender = Arc::clone(shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                notify(&sender, ShutdownReason::Signal("SIGINT".to_string())).await;
            }
        });
    }
}

async fn notify(sender: &SharedSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}
