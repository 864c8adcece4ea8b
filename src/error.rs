use std::time::Duration;
use thiserror::Error;

/// Failures raised by a camera device or driver.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera initialization failed: {details}")]
    Init { details: String },

    #[error("Camera pipeline error: {details}")]
    Pipeline { details: String },

    #[error("Camera configuration failed: {details}")]
    Configuration { details: String },

    #[error("Capture failed: {details}")]
    Capture { details: String },

    #[error("Camera has not been configured for {operation}")]
    NotConfigured { operation: &'static str },

    #[error("Camera IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PicamError {
    #[error("Camera is busy (waited {waited:?})")]
    Busy { waited: Duration },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Device error: {message}")]
    Device { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System error: {message}")]
    System { message: String },
}

impl PicamError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Message suitable for relaying to a chat user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Busy { .. } => "The camera is busy right now, please try again shortly".to_string(),
            Self::InvalidInput { message } => message.clone(),
            Self::Device { .. } => "An error occurred while using the camera".to_string(),
            Self::NotFound { what } => format!("Nothing found: {}", what),
            Self::Config(_) | Self::Io(_) | Self::System { .. } => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<CameraError> for PicamError {
    fn from(err: CameraError) -> Self {
        Self::Device {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PicamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_maps_to_device() {
        let err: PicamError = CameraError::Capture {
            details: "sensor timeout".to_string(),
        }
        .into();

        match err {
            PicamError::Device { message } => assert!(message.contains("sensor timeout")),
            other => panic!("Expected device error, got {:?}", other),
        }
    }

    #[test]
    fn test_user_message_hides_device_details() {
        let err = PicamError::Device {
            message: "gst pipeline exploded".to_string(),
        };
        assert!(!err.user_message().contains("gst"));

        let busy = PicamError::Busy {
            waited: Duration::from_secs(10),
        };
        assert!(busy.user_message().contains("busy"));
    }
}
