use super::device::{CameraDevice, CameraDriver, CaptureMode};
use crate::config::{CameraConfig, CameraSource};
use crate::error::CameraError;
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use gstreamer::prelude::*;
use gstreamer::{Bus, ClockTime, MessageType, MessageView, Pipeline};
use gstreamer_app::AppSink;

const SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Opens GStreamer-backed camera devices
pub struct GstCameraDriver {
    config: CameraConfig,
}

impl GstCameraDriver {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn source_description(&self) -> String {
        match self.config.source {
            CameraSource::Libcamera => "libcamerasrc".to_string(),
            CameraSource::V4l2 => format!("v4l2src device={} io-mode=mmap", self.config.device),
            CameraSource::Test => "videotestsrc is-live=true pattern=smpte".to_string(),
        }
    }
}

#[async_trait]
impl CameraDriver for GstCameraDriver {
    async fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        gstreamer::init().map_err(|e| CameraError::Init {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        info!("Opening camera ({:?} source)", self.config.source);

        Ok(Box::new(GstCameraDevice {
            source: self.source_description(),
            framerate: self.config.framerate,
            warmup: self.config.warmup(),
            pipeline: None,
            mode: None,
        }))
    }

    fn name(&self) -> &str {
        "gstreamer"
    }
}

/// A camera handle driving one GStreamer pipeline at a time
pub struct GstCameraDevice {
    source: String,
    framerate: u32,
    warmup: Duration,
    pipeline: Option<Pipeline>,
    mode: Option<CaptureMode>,
}

impl GstCameraDevice {
    fn build_pipeline_string(&self, mode: &CaptureMode) -> String {
        let resolution = mode.resolution();
        let caps = format!(
            "video/x-raw,width={},height={},framerate={}/1",
            resolution.width, resolution.height, self.framerate
        );

        match mode {
            CaptureMode::Still { .. } => format!(
                "{} ! {} ! videoconvert ! jpegenc quality=95 ! \
                 appsink name=sink max-buffers=1 drop=true sync=false",
                self.source, caps
            ),
            CaptureMode::Video { bitrate, .. } => format!(
                "{} ! {} ! videoconvert ! video/x-raw,format=I420 ! \
                 x264enc bitrate={} speed-preset=ultrafast tune=zerolatency key-int-max={} ! \
                 video/x-h264,profile=baseline ! h264parse ! \
                 mp4mux faststart=true ! filesink name=out",
                self.source,
                caps,
                (bitrate / 1000).max(1),
                self.framerate * 2
            ),
        }
    }

    fn pipeline(&self) -> Result<&Pipeline, CameraError> {
        self.pipeline.as_ref().ok_or(CameraError::Pipeline {
            details: "Pipeline not initialized".to_string(),
        })
    }

    fn bus(&self) -> Result<Bus, CameraError> {
        self.pipeline()?.bus().ok_or(CameraError::Pipeline {
            details: "Pipeline has no bus".to_string(),
        })
    }

    fn start(&self) -> Result<(), CameraError> {
        self.pipeline()?
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::Pipeline {
                details: format!("Failed to start pipeline: {}", e),
            })?;
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop camera pipeline: {}", e);
            }
        }
    }

    /// Error message already posted on the bus, if any
    fn pending_error(bus: &Bus) -> Option<String> {
        bus.pop_filtered(&[MessageType::Error])
            .and_then(|message| match message.view() {
                MessageView::Error(err) => Some(format!(
                    "{} ({})",
                    err.error(),
                    err.debug().map(|d| d.to_string()).unwrap_or_default()
                )),
                _ => None,
            })
    }

    /// Let the pipeline run for `duration`, failing early if it reports an error
    async fn run_for(&self, duration: Duration) -> Result<(), CameraError> {
        let bus = self.bus()?;
        let deadline = Instant::now() + duration;

        while Instant::now() < deadline {
            if let Some(details) = Self::pending_error(&bus) {
                return Err(CameraError::Capture { details });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(ERROR_POLL_INTERVAL)).await;
        }

        Ok(())
    }

    fn expect_mode(&self, operation: &'static str, video: bool) -> Result<(), CameraError> {
        match self.mode {
            Some(CaptureMode::Still { .. }) if !video => Ok(()),
            Some(CaptureMode::Video { .. }) if video => Ok(()),
            _ => Err(CameraError::NotConfigured { operation }),
        }
    }
}

#[async_trait]
impl CameraDevice for GstCameraDevice {
    async fn configure(&mut self, mode: &CaptureMode) -> Result<(), CameraError> {
        self.teardown();

        let pipeline_desc = self.build_pipeline_string(mode);
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        self.pipeline = Some(pipeline);
        self.mode = Some(*mode);
        Ok(())
    }

    async fn capture_still(&mut self, output: &Path) -> Result<(), CameraError> {
        self.expect_mode("still capture", false)?;

        let appsink = self
            .pipeline()?
            .by_name("sink")
            .ok_or(CameraError::Pipeline {
                details: "Failed to get appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Pipeline {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        self.start()?;
        self.run_for(self.warmup).await?;

        let sample = tokio::task::spawn_blocking(move || {
            appsink.try_pull_sample(ClockTime::from_mseconds(SAMPLE_TIMEOUT.as_millis() as u64))
        })
        .await
        .map_err(|e| CameraError::Capture {
            details: format!("Sample task failed: {}", e),
        })?;

        let sample = match sample {
            Some(sample) => sample,
            None => {
                let details = Self::pending_error(&self.bus()?)
                    .unwrap_or_else(|| format!("No frame within {:?}", SAMPLE_TIMEOUT));
                return Err(CameraError::Capture { details });
            }
        };

        let jpeg = {
            let buffer = sample.buffer().ok_or(CameraError::Capture {
                details: "Sample carried no buffer".to_string(),
            })?;
            let map = buffer.map_readable().map_err(|e| CameraError::Capture {
                details: format!("Failed to map buffer: {}", e),
            })?;
            map.as_slice().to_vec()
        };

        tokio::fs::write(output, &jpeg).await?;
        self.teardown();

        info!("Captured still ({} bytes) to {}", jpeg.len(), output.display());
        Ok(())
    }

    async fn record(&mut self, output: &Path, duration: Duration) -> Result<(), CameraError> {
        self.expect_mode("recording", true)?;

        let filesink = self.pipeline()?.by_name("out").ok_or(CameraError::Pipeline {
            details: "Failed to get filesink".to_string(),
        })?;
        filesink.set_property("location", output.to_string_lossy().to_string());

        self.start()?;
        info!("Recording {:?} to {}", duration, output.display());
        self.run_for(duration).await?;

        self.pipeline()?.send_event(gstreamer::event::Eos::new());

        let bus = self.bus()?;
        let finished = tokio::task::spawn_blocking(move || {
            bus.timed_pop_filtered(
                ClockTime::from_mseconds(FINALIZE_TIMEOUT.as_millis() as u64),
                &[MessageType::Eos, MessageType::Error],
            )
            .map(|message| match message.view() {
                MessageView::Eos(..) => Ok(()),
                MessageView::Error(err) => Err(err.error().to_string()),
                _ => Ok(()),
            })
        })
        .await
        .map_err(|e| CameraError::Capture {
            details: format!("Finalize task failed: {}", e),
        })?;

        self.teardown();

        match finished {
            Some(Ok(())) => {
                info!("Recording finalized: {}", output.display());
                Ok(())
            }
            Some(Err(details)) => Err(CameraError::Capture { details }),
            None => Err(CameraError::Capture {
                details: format!("Recording not finalized within {:?}", FINALIZE_TIMEOUT),
            }),
        }
    }

    async fn close(&mut self) -> Result<(), CameraError> {
        self.teardown();
        self.mode = None;
        debug!("Camera closed");
        Ok(())
    }
}

impl Drop for GstCameraDevice {
    fn drop(&mut self) {
        self.teardown();
    }
}
