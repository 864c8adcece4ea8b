use crate::camera::{CameraDriver, CaptureGate, CaptureMode};
use crate::config::{CameraConfig, PicamConfig, VideoConfig};
use crate::error::{CameraError, PicamError, Result};
use crate::storage::{self, CleanupResult, MediaFile, MediaKind, RetentionStore};
use chrono::Local;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A validated recording length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoRequest {
    duration: Duration,
}

impl VideoRequest {
    /// Accept `seconds` only when it lies within `bounds`
    pub fn new(seconds: i64, bounds: &RangeInclusive<u32>) -> Result<Self> {
        let in_range = u32::try_from(seconds)
            .map(|s| bounds.contains(&s))
            .unwrap_or(false);

        if !in_range {
            return Err(PicamError::invalid_input(format!(
                "Duration must be between {} and {} seconds",
                bounds.start(),
                bounds.end()
            )));
        }

        Ok(Self {
            duration: Duration::from_secs(seconds as u64),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Photo and video workflows over the shared camera and media store
pub struct CameraService {
    gate: CaptureGate,
    store: RetentionStore,
    camera: CameraConfig,
    video: VideoConfig,
}

impl CameraService {
    pub fn new(config: &PicamConfig, driver: Arc<dyn CameraDriver>) -> Self {
        Self {
            gate: CaptureGate::new(driver),
            store: RetentionStore::new(config.storage.clone()),
            camera: config.camera.clone(),
            video: config.video.clone(),
        }
    }

    /// Prepare media directories
    pub async fn start(&self) -> Result<()> {
        self.store.ensure_directories().await?;
        info!(
            "Camera service ready (driver: {}, photos: {}, videos: {})",
            self.gate.driver_name(),
            self.store.directory(MediaKind::Photo).display(),
            self.store.directory(MediaKind::Video).display()
        );
        Ok(())
    }

    /// Wait for any capture in progress to finish before the process exits
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!("Stopping camera service");
        match self.gate.acquire(timeout).await {
            Ok(_token) => {
                info!("Camera service stopped");
                Ok(())
            }
            Err(e) => {
                warn!("Capture still in progress at shutdown");
                Err(e)
            }
        }
    }

    pub fn gate(&self) -> &CaptureGate {
        &self.gate
    }

    pub fn store(&self) -> &RetentionStore {
        &self.store
    }

    pub fn duration_bounds(&self) -> RangeInclusive<u32> {
        self.video.min_duration_secs..=self.video.max_duration_secs
    }

    /// Take a still photo and return its path
    pub async fn capture_photo(&self) -> Result<PathBuf> {
        let mode = CaptureMode::still(self.camera.photo_resolution);
        let store = self.store.clone();

        let result = self
            .gate
            .with_camera(mode, self.camera.gate_timeout(), move |camera| {
                Box::pin(async move {
                    let path = store.new_media_path(MediaKind::Photo, Local::now()).await;
                    if let Err(e) = camera.capture_still(&path).await {
                        storage::discard(&path).await;
                        return Err(e);
                    }
                    Ok::<_, CameraError>(path)
                })
            })
            .await;

        self.finish("photo capture", result).await
    }

    /// Record a video of `duration_secs` seconds and return its path.
    ///
    /// Out-of-range durations are rejected before the camera is touched.
    pub async fn record_video(&self, duration_secs: i64) -> Result<PathBuf> {
        let request = VideoRequest::new(duration_secs, &self.duration_bounds()).map_err(|e| {
            debug!("Rejected video duration {}", duration_secs);
            e
        })?;

        let mode = CaptureMode::video(self.camera.video_resolution, self.camera.video_bitrate);
        let store = self.store.clone();
        let duration = request.duration();

        let result = self
            .gate
            .with_camera(mode, self.camera.gate_timeout(), move |camera| {
                Box::pin(async move {
                    let path = store.new_media_path(MediaKind::Video, Local::now()).await;
                    if let Err(e) = camera.record(&path, duration).await {
                        storage::discard(&path).await;
                        return Err(e);
                    }
                    Ok::<_, CameraError>(path)
                })
            })
            .await;

        self.finish("video recording", result).await
    }

    /// Apply retention after a successful capture, log failures
    async fn finish(&self, operation: &str, result: Result<PathBuf>) -> Result<PathBuf> {
        match result {
            Ok(path) => {
                info!("{} saved to {}", operation, path.display());
                self.cleanup_old_files().await;
                Ok(path)
            }
            Err(e) => {
                error!("Error during {}: {}", operation, e);
                Err(e)
            }
        }
    }

    /// Most recent files of `kind`, newest first
    pub async fn latest_files(&self, kind: MediaKind, limit: Option<usize>) -> Result<Vec<MediaFile>> {
        self.store
            .latest(kind, limit)
            .await
            .map_err(|e| Self::listing_error(kind, e))
    }

    /// The newest file of `kind`
    pub async fn latest_file(&self, kind: MediaKind) -> Result<MediaFile> {
        self.latest_files(kind, Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PicamError::not_found(format!("no {} files yet", kind)))
    }

    /// A stored file by its bare file name
    pub async fn file_by_name(&self, kind: MediaKind, name: &str) -> Result<MediaFile> {
        let name = name.trim();
        let is_bare_name = !name.is_empty()
            && Path::new(name).file_name().map(|n| n == name).unwrap_or(false);

        if !is_bare_name {
            return Err(PicamError::invalid_input(format!(
                "'{}' is not a valid file name",
                name
            )));
        }

        if !kind.matches(Path::new(name)) {
            return Err(PicamError::invalid_input(format!(
                "{} files end in .{}",
                kind,
                kind.extension()
            )));
        }

        match self.store.stat(kind, name).await {
            Ok(Some(file)) => Ok(file),
            Ok(None) => Err(PicamError::not_found(format!("{} {}", kind, name))),
            Err(e) => Err(Self::listing_error(kind, e)),
        }
    }

    /// Enforce retention limits on both directories. Never fails.
    pub async fn cleanup_old_files(&self) -> CleanupResult {
        self.store.cleanup_all().await
    }

    fn listing_error(kind: MediaKind, e: std::io::Error) -> PicamError {
        error!("Failed to list {} files: {}", kind, e);
        PicamError::Device {
            message: format!("Failed to list {} files", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::{FailPoint, MockCameraDriver};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> PicamConfig {
        let mut config = PicamConfig::default();
        config.storage.image_dir = dir.path().join("images");
        config.storage.video_dir = dir.path().join("videos");
        config.camera.gate_timeout_secs = 1;
        config
    }

    async fn service_with(config: &PicamConfig, driver: MockCameraDriver) -> CameraService {
        let service = CameraService::new(config, Arc::new(driver));
        service.start().await.unwrap();
        service
    }

    #[test]
    fn test_video_request_bounds() {
        let bounds = 2..=30;
        assert!(VideoRequest::new(2, &bounds).is_ok());
        assert_eq!(
            VideoRequest::new(30, &bounds).unwrap().duration(),
            Duration::from_secs(30)
        );
        for bad in [-5, 0, 1, 31, i64::MAX] {
            assert!(matches!(
                VideoRequest::new(bad, &bounds),
                Err(PicamError::InvalidInput { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_capture_photo_produces_file_and_releases_gate() {
        let dir = TempDir::new().unwrap();
        let driver = MockCameraDriver::new();
        let service = service_with(&test_config(&dir), driver.clone()).await;

        let path = service.capture_photo().await.unwrap();

        assert!(path.exists());
        assert!(path.starts_with(dir.path().join("images")));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert!(!service.gate().is_held());
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
        assert!(matches!(driver.modes()[0], CaptureMode::Still { .. }));
    }

    #[tokio::test]
    async fn test_record_video_valid_durations() {
        let dir = TempDir::new().unwrap();
        let driver = MockCameraDriver::new();
        let service = service_with(&test_config(&dir), driver.clone()).await;

        for seconds in [2, 15, 30] {
            let path = service.record_video(seconds).await.unwrap();
            assert!(path.exists());
            assert!(path.to_string_lossy().ends_with(".mp4"));
            assert!(path.file_name().unwrap().to_string_lossy().contains("_now"));
            assert!(!service.gate().is_held());
            // A fresh acquire succeeds straight away
            drop(service.gate().acquire(Duration::from_millis(10)).await.unwrap());
        }

        let recorded: Vec<_> = driver.recorded().into_iter().map(|(_, d)| d.as_secs()).collect();
        assert_eq!(recorded, vec![2, 15, 30]);
        assert!(driver
            .modes()
            .iter()
            .all(|m| matches!(m, CaptureMode::Video { bitrate: 10_000_000, .. })));
    }

    #[tokio::test]
    async fn test_out_of_range_duration_never_touches_camera() {
        let dir = TempDir::new().unwrap();
        let driver = MockCameraDriver::new();
        let service = service_with(&test_config(&dir), driver.clone()).await;

        // Hold the gate: a rejected request must not even wait for it
        let _token = service.gate().acquire(Duration::from_millis(10)).await.unwrap();

        for seconds in [-1, 0, 1, 31, 3600] {
            let err = service.record_video(seconds).await.unwrap_err();
            assert!(matches!(err, PicamError::InvalidInput { .. }));
        }
        assert_eq!(driver.opens(), 0);
    }

    #[tokio::test]
    async fn test_retention_keeps_most_recent_captures() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.storage.photo_limit = 3;
        let service = service_with(&config, MockCameraDriver::new()).await;

        let mut produced = Vec::new();
        for _ in 0..5 {
            produced.push(service.capture_photo().await.unwrap());
            tokio::time::sleep(Duration::from_millis(15)).await;
        }

        let remaining = service.latest_files(MediaKind::Photo, Some(10)).await.unwrap();
        let remaining: Vec<_> = remaining.into_iter().map(|f| f.path).collect();
        let expected: Vec<_> = produced.iter().rev().take(3).cloned().collect();
        assert_eq!(remaining, expected);
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_overlap() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.camera.gate_timeout_secs = 1;
        let driver = MockCameraDriver::new().with_hold(Duration::from_millis(1500));
        let service = Arc::new(service_with(&config, driver.clone()).await);

        let first = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.capture_photo().await }
        });
        let second = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.capture_photo().await }
        });

        let results = [first.await.unwrap(), second.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(PicamError::Busy { .. })))
            .count();

        assert_eq!(ok, 1);
        assert_eq!(busy, 1);
        assert_eq!(driver.max_active(), 1);
        assert!(!service.gate().is_held());
    }

    #[tokio::test]
    async fn test_concurrent_requests_within_timeout_run_sequentially() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.camera.gate_timeout_secs = 5;
        let driver = MockCameraDriver::new().with_hold(Duration::from_millis(100));
        let service = Arc::new(service_with(&config, driver.clone()).await);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.capture_photo().await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(driver.captures(), 3);
        assert_eq!(driver.max_active(), 1);
        assert_eq!(driver.active(), 0);
    }

    #[tokio::test]
    async fn test_device_failures_release_gate() {
        let dir = TempDir::new().unwrap();
        let driver = MockCameraDriver::new();
        let service = service_with(&test_config(&dir), driver.clone()).await;

        for point in [FailPoint::Open, FailPoint::Configure, FailPoint::Capture] {
            driver.fail_at(Some(point));
            let err = service.capture_photo().await.unwrap_err();
            assert!(matches!(err, PicamError::Device { .. }), "{:?}", point);
            assert!(!service.gate().is_held());
            assert_eq!(driver.active(), 0);
        }

        driver.fail_at(None);
        assert!(service.record_video(5).await.is_ok());
    }

    #[tokio::test]
    async fn test_interrupted_capture_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let driver = MockCameraDriver::new();
        let service = service_with(&test_config(&dir), driver.clone()).await;
        driver.fail_at(Some(FailPoint::Interrupted));

        let err = service.record_video(5).await.unwrap_err();
        assert!(matches!(err, PicamError::Device { .. }));
        let err = service.capture_photo().await.unwrap_err();
        assert!(matches!(err, PicamError::Device { .. }));

        assert!(service.latest_files(MediaKind::Video, None).await.unwrap().is_empty());
        assert!(service.latest_files(MediaKind::Photo, None).await.unwrap().is_empty());
        assert!(matches!(
            service.latest_file(MediaKind::Video).await,
            Err(PicamError::NotFound { .. })
        ));
        assert!(!service.gate().is_held());
        assert_eq!(driver.active(), 0);
    }

    #[tokio::test]
    async fn test_latest_file_and_lookup() {
        let dir = TempDir::new().unwrap();
        let service = service_with(&test_config(&dir), MockCameraDriver::new()).await;

        assert!(service.latest_files(MediaKind::Video, None).await.unwrap().is_empty());
        assert!(matches!(
            service.latest_file(MediaKind::Video).await,
            Err(PicamError::NotFound { .. })
        ));

        let path = service.capture_photo().await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();

        assert_eq!(service.latest_file(MediaKind::Photo).await.unwrap().path, path);
        assert_eq!(service.file_by_name(MediaKind::Photo, &name).await.unwrap().path, path);
        assert!(matches!(
            service.file_by_name(MediaKind::Photo, "19990101_00_00_00.jpg").await,
            Err(PicamError::NotFound { .. })
        ));
        assert!(matches!(
            service.file_by_name(MediaKind::Photo, "../secrets.jpg").await,
            Err(PicamError::InvalidInput { .. })
        ));
        assert!(matches!(
            service.file_by_name(MediaKind::Video, &name).await,
            Err(PicamError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_idle_camera() {
        let dir = TempDir::new().unwrap();
        let service = service_with(&test_config(&dir), MockCameraDriver::new()).await;

        assert!(service.shutdown(Duration::from_millis(50)).await.is_ok());

        let _token = service.gate().acquire(Duration::from_millis(10)).await.unwrap();
        assert!(matches!(
            service.shutdown(Duration::from_millis(50)).await,
            Err(PicamError::Busy { .. })
        ));
    }
}
