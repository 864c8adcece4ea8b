use crate::error::CameraError;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Sensor output size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How the device is set up before a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Still { resolution: Resolution },
    Video { resolution: Resolution, bitrate: u32 },
}

impl CaptureMode {
    pub fn still(resolution: impl Into<Resolution>) -> Self {
        Self::Still {
            resolution: resolution.into(),
        }
    }

    pub fn video(resolution: impl Into<Resolution>, bitrate: u32) -> Self {
        Self::Video {
            resolution: resolution.into(),
            bitrate,
        }
    }

    pub fn resolution(&self) -> Resolution {
        match self {
            Self::Still { resolution } | Self::Video { resolution, .. } => *resolution,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Still { .. } => "still",
            Self::Video { .. } => "video",
        }
    }
}

/// An open handle on the physical camera.
///
/// Dropping a device must release the hardware even if `close` was never
/// awaited.
#[async_trait]
pub trait CameraDevice: Send {
    async fn configure(&mut self, mode: &CaptureMode) -> Result<(), CameraError>;

    /// Write a single still frame to `output`. Requires still mode.
    async fn capture_still(&mut self, output: &Path) -> Result<(), CameraError>;

    /// Record `duration` of video to `output`. Requires video mode.
    async fn record(&mut self, output: &Path, duration: Duration) -> Result<(), CameraError>;

    async fn close(&mut self) -> Result<(), CameraError>;
}

/// Opens the physical camera on demand.
#[async_trait]
pub trait CameraDriver: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError>;

    fn name(&self) -> &str;
}
