mod device;
mod gate;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod pipeline;

#[cfg(test)]
pub(crate) mod mock;

pub use device::{CameraDevice, CameraDriver, CaptureMode, Resolution};
pub use gate::{CaptureGate, GateToken};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use pipeline::{GstCameraDevice, GstCameraDriver};

use crate::config::CameraConfig;
use crate::error::Result;
use std::sync::Arc;

/// Build the driver for the camera backend compiled into this binary
pub fn default_driver(config: &CameraConfig) -> Result<Arc<dyn CameraDriver>> {
    #[cfg(all(feature = "camera", target_os = "linux"))]
    {
        Ok(Arc::new(GstCameraDriver::new(config.clone())))
    }

    #[cfg(not(all(feature = "camera", target_os = "linux")))]
    {
        let _ = config;
        Err(crate::error::PicamError::system(
            "No camera backend available: build on Linux with the `camera` feature",
        ))
    }
}
