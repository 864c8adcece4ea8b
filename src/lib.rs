pub mod app;
pub mod bot;
pub mod camera;
pub mod config;
pub mod error;
pub mod service;
pub mod session;
pub mod storage;

pub use app::{ConsoleTransport, OutputFormat, PicamOrchestrator, ShutdownReason};
pub use bot::{BotRouter, Command, Outgoing, Reply};
pub use camera::{CameraDevice, CameraDriver, CaptureGate, CaptureMode, GateToken, Resolution};
pub use config::PicamConfig;
pub use error::{CameraError, PicamError, Result};
pub use service::{CameraService, VideoRequest};
pub use session::{Conversation, SessionStore, Step};
pub use storage::{CleanupResult, MediaFile, MediaKind, RetentionStore};
