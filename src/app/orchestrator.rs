use super::console::ConsoleTransport;
use super::types::{OutputFormat, ShutdownReason};
use crate::bot::BotRouter;
use crate::camera::CameraDriver;
use crate::config::PicamConfig;
use crate::error::Result;
use crate::service::CameraService;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns the camera service, the chat router and the console transport
pub struct PicamOrchestrator {
    pub(super) config: PicamConfig,
    pub(super) service: Arc<CameraService>,
    pub(super) router: Arc<BotRouter>,

    pub(super) chat_id: String,
    pub(super) output_format: OutputFormat,

    // Lifecycle management
    pub(super) console_handle: Option<JoinHandle<()>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl PicamOrchestrator {
    pub fn new(config: PicamConfig, driver: Arc<dyn CameraDriver>) -> Self {
        let service = Arc::new(CameraService::new(&config, driver));
        let router = Arc::new(BotRouter::new(
            Arc::clone(&service),
            config.bot.log_interactions,
        ));
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            chat_id: config.bot.default_chat.clone(),
            config,
            service,
            router,
            output_format: OutputFormat::Text,
            console_handle: None,
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Chat id used for console lines that are not addressed with `@chat`
    pub fn set_chat_id<S: Into<String>>(&mut self, chat_id: S) {
        self.chat_id = chat_id.into();
    }

    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.output_format = format;
    }

    pub fn service(&self) -> &Arc<CameraService> {
        &self.service
    }

    /// Create media directories and report the configured camera
    pub async fn start(&self) -> Result<()> {
        info!("Starting picam bot");
        self.service.start().await.map_err(|e| {
            error!("Failed to start camera service: {}", e);
            e
        })?;
        info!(
            "Video durations accepted: {}..={} seconds",
            self.config.video.min_duration_secs, self.config.video.max_duration_secs
        );
        Ok(())
    }

    pub(super) fn console_transport(&self) -> ConsoleTransport {
        ConsoleTransport::new(
            Arc::clone(&self.router),
            self.chat_id.clone(),
            self.output_format,
            self.cancellation_token.clone(),
        )
    }
}
