use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PicamConfig {
    pub camera: CameraConfig,
    pub video: VideoConfig,
    pub storage: StorageConfig,
    pub bot: BotConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Frame source feeding the capture pipelines
    #[serde(default = "default_camera_source")]
    pub source: CameraSource,

    /// V4L2 device path, used when `source = "v4l2"`
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Still capture resolution (width, height)
    #[serde(default = "default_photo_resolution")]
    pub photo_resolution: (u32, u32),

    /// Video recording resolution (width, height)
    #[serde(default = "default_video_resolution")]
    pub video_resolution: (u32, u32),

    /// H.264 target bitrate in bits per second
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,

    /// Frames per second requested from the source
    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// Time given to auto-exposure before a still is taken
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,

    /// How long a request waits for the camera before giving up
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    Libcamera,
    V4l2,
    Test,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VideoConfig {
    /// Shortest recording a user may request, in seconds
    #[serde(default = "default_min_duration")]
    pub min_duration_secs: u32,

    /// Longest recording a user may request, in seconds
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory holding captured photos
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    /// Directory holding recorded videos
    #[serde(default = "default_video_dir")]
    pub video_dir: PathBuf,

    /// Number of photos kept on disk
    #[serde(default = "default_photo_limit")]
    pub photo_limit: usize,

    /// Number of videos kept on disk
    #[serde(default = "default_video_limit")]
    pub video_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BotConfig {
    /// Chat id used by the console transport
    #[serde(default = "default_chat")]
    pub default_chat: String,

    /// Log every user command on the interactions target
    #[serde(default = "default_log_interactions")]
    pub log_interactions: bool,
}

impl CameraConfig {
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

impl PicamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("picam-bot.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment overrides use the `PICAM_` prefix and a double underscore
    /// between section and key, e.g. `PICAM_STORAGE__PHOTO_LIMIT=10`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.source", "libcamera")?
            .set_default("camera.device", default_camera_device())?
            .set_default(
                "camera.photo_resolution",
                vec![default_photo_resolution().0, default_photo_resolution().1],
            )?
            .set_default(
                "camera.video_resolution",
                vec![default_video_resolution().0, default_video_resolution().1],
            )?
            .set_default("camera.video_bitrate", default_video_bitrate())?
            .set_default("camera.framerate", default_framerate())?
            .set_default("camera.warmup_ms", default_warmup_ms())?
            .set_default("camera.gate_timeout_secs", default_gate_timeout_secs())?
            .set_default("video.min_duration_secs", default_min_duration())?
            .set_default("video.max_duration_secs", default_max_duration())?
            .set_default(
                "storage.image_dir",
                default_image_dir().to_string_lossy().to_string(),
            )?
            .set_default(
                "storage.video_dir",
                default_video_dir().to_string_lossy().to_string(),
            )?
            .set_default("storage.photo_limit", default_photo_limit() as i64)?
            .set_default("storage.video_limit", default_video_limit() as i64)?
            .set_default("bot.default_chat", default_chat())?
            .set_default("bot.log_interactions", default_log_interactions())?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("PICAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: PicamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, (width, height)) in [
            ("Photo", self.camera.photo_resolution),
            ("Video", self.camera.video_resolution),
        ] {
            if width == 0 || height == 0 {
                return Err(ConfigError::Message(format!(
                    "{} resolution must be greater than 0",
                    name
                )));
            }
        }

        if self.camera.framerate == 0 {
            return Err(ConfigError::Message(
                "Camera framerate must be greater than 0".to_string(),
            ));
        }

        if self.camera.video_bitrate == 0 {
            return Err(ConfigError::Message(
                "Video bitrate must be greater than 0".to_string(),
            ));
        }

        if self.camera.gate_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Camera gate timeout must be greater than 0".to_string(),
            ));
        }

        if self.video.min_duration_secs == 0 {
            return Err(ConfigError::Message(
                "Minimum video duration must be greater than 0".to_string(),
            ));
        }

        if self.video.min_duration_secs > self.video.max_duration_secs {
            return Err(ConfigError::Message(format!(
                "Minimum video duration ({}) exceeds maximum ({})",
                self.video.min_duration_secs, self.video.max_duration_secs
            )));
        }

        if self.storage.photo_limit == 0 || self.storage.video_limit == 0 {
            return Err(ConfigError::Message(
                "Retention limits must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for PicamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                source: default_camera_source(),
                device: default_camera_device(),
                photo_resolution: default_photo_resolution(),
                video_resolution: default_video_resolution(),
                video_bitrate: default_video_bitrate(),
                framerate: default_framerate(),
                warmup_ms: default_warmup_ms(),
                gate_timeout_secs: default_gate_timeout_secs(),
            },
            video: VideoConfig {
                min_duration_secs: default_min_duration(),
                max_duration_secs: default_max_duration(),
            },
            storage: StorageConfig {
                image_dir: default_image_dir(),
                video_dir: default_video_dir(),
                photo_limit: default_photo_limit(),
                video_limit: default_video_limit(),
            },
            bot: BotConfig {
                default_chat: default_chat(),
                log_interactions: default_log_interactions(),
            },
        }
    }
}

// Default value functions
fn default_camera_source() -> CameraSource {
    CameraSource::Libcamera
}
fn default_camera_device() -> String {
    "/dev/video0".to_string()
}
fn default_photo_resolution() -> (u32, u32) {
    (2592, 1944)
}
fn default_video_resolution() -> (u32, u32) {
    (800, 600)
}
fn default_video_bitrate() -> u32 {
    10_000_000
}
fn default_framerate() -> u32 {
    30
}
fn default_warmup_ms() -> u64 {
    2000
}
fn default_gate_timeout_secs() -> u64 {
    10
}

fn default_min_duration() -> u32 {
    2
}
fn default_max_duration() -> u32 {
    30
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}
fn default_video_dir() -> PathBuf {
    PathBuf::from("videos")
}
fn default_photo_limit() -> usize {
    4
}
fn default_video_limit() -> usize {
    4
}

fn default_chat() -> String {
    "console".to_string()
}
fn default_log_interactions() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PicamConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.camera.gate_timeout(), Duration::from_secs(10));
        assert_eq!(config.video.min_duration_secs, 2);
        assert_eq!(config.video.max_duration_secs, 30);
        assert_eq!(config.storage.photo_limit, 4);
        assert_eq!(config.storage.video_limit, 4);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PicamConfig::default();
        config.camera.photo_resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.photo_resolution = (1920, 1080);
        assert!(config.validate().is_ok());

        config.video.min_duration_secs = 40;
        assert!(config.validate().is_err());

        config.video.min_duration_secs = 2;
        config.storage.video_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = PicamConfig::load_from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.camera.source, CameraSource::Libcamera);
        assert_eq!(config.camera.photo_resolution, (2592, 1944));
        assert_eq!(config.storage.image_dir, PathBuf::from("images"));
    }

    #[test]
    fn test_load_from_file_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("picam.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[camera]\nsource = \"test\"\ngate_timeout_secs = 3\n\n[storage]\nphoto_limit = 9"
        )
        .unwrap();

        let config = PicamConfig::load_from_file(&path).unwrap();
        assert_eq!(config.camera.source, CameraSource::Test);
        assert_eq!(config.camera.gate_timeout_secs, 3);
        assert_eq!(config.storage.photo_limit, 9);
        assert_eq!(config.storage.video_limit, 4);
    }

    #[test]
    fn test_default_config_renders_as_toml() {
        let rendered = PicamConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[camera]"));
        assert!(rendered.contains("photo_limit = 4"));
    }
}
