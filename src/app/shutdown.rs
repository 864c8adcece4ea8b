use super::{PicamOrchestrator, ShutdownReason};
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl PicamOrchestrator {
    /// Stop accepting messages, let in-flight captures finish, then release the camera
    pub async fn shutdown(&mut self, reason: &ShutdownReason) -> Result<i32> {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();

        let mut exit_code = match reason {
            ShutdownReason::Error(_) => 1,
            _ => 0,
        };

        // Covers a maximum-length recording queued behind the gate
        let drain_timeout = self.config.camera.gate_timeout()
            + Duration::from_secs(u64::from(self.config.video.max_duration_secs))
            + self.config.camera.warmup()
            + Duration::from_secs(5);

        if let Some(handle) = self.console_handle.take() {
            match timeout(drain_timeout, handle).await {
                Ok(Ok(())) => info!("Console transport stopped"),
                Ok(Err(e)) => {
                    error!("Console transport task failed: {}", e);
                    exit_code = 1;
                }
                Err(_) => {
                    warn!("Console transport did not stop within {:?}", drain_timeout);
                    exit_code = 1;
                }
            }
        }

        if let Err(e) = self.service.shutdown(self.config.camera.gate_timeout()).await {
            error!("Error stopping camera service: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
