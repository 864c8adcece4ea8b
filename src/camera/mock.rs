use super::device::{CameraDevice, CameraDriver, CaptureMode};
use crate::error::CameraError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where a mock device should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Open,
    Configure,
    Capture,
    /// Writes part of the output, then fails
    Interrupted,
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    captures: AtomicUsize,
}

/// Camera driver for tests that writes placeholder media files
#[derive(Clone, Default)]
pub struct MockCameraDriver {
    counters: Arc<Counters>,
    hold: Duration,
    fail_at: Arc<Mutex<Option<FailPoint>>>,
    modes: Arc<Mutex<Vec<CaptureMode>>>,
    recorded: Arc<Mutex<Vec<(PathBuf, Duration)>>>,
}

impl MockCameraDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the device busy for `hold` during each capture
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn fail_at(&self, point: Option<FailPoint>) {
        *self.fail_at.lock() = point;
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.counters.captures.load(Ordering::SeqCst)
    }

    pub fn modes(&self) -> Vec<CaptureMode> {
        self.modes.lock().clone()
    }

    pub fn recorded(&self) -> Vec<(PathBuf, Duration)> {
        self.recorded.lock().clone()
    }
}

#[async_trait]
impl CameraDriver for MockCameraDriver {
    async fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        if *self.fail_at.lock() == Some(FailPoint::Open) {
            return Err(CameraError::Init {
                details: "mock camera unavailable".to_string(),
            });
        }

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MockCameraDevice {
            driver: self.clone(),
            mode: None,
            open: true,
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub struct MockCameraDevice {
    driver: MockCameraDriver,
    mode: Option<CaptureMode>,
    open: bool,
}

impl MockCameraDevice {
    fn should_fail(&self, point: FailPoint) -> bool {
        *self.driver.fail_at.lock() == Some(point)
    }

    async fn produce(&self, output: &Path, contents: &[u8]) -> Result<(), CameraError> {
        if !self.driver.hold.is_zero() {
            tokio::time::sleep(self.driver.hold).await;
        }
        if self.should_fail(FailPoint::Capture) {
            return Err(CameraError::Capture {
                details: "mock sensor failure".to_string(),
            });
        }
        tokio::fs::write(output, contents).await?;
        if self.should_fail(FailPoint::Interrupted) {
            return Err(CameraError::Capture {
                details: "mock stream interrupted".to_string(),
            });
        }
        self.driver.counters.captures.fetch_add(1, Ordering::SeqCst);
        debug!("Mock camera wrote {}", output.display());
        Ok(())
    }

    fn shut(&mut self) {
        if self.open {
            self.open = false;
            self.driver.counters.closes.fetch_add(1, Ordering::SeqCst);
            self.driver.counters.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl CameraDevice for MockCameraDevice {
    async fn configure(&mut self, mode: &CaptureMode) -> Result<(), CameraError> {
        if self.should_fail(FailPoint::Configure) {
            return Err(CameraError::Configuration {
                details: "mock configuration rejected".to_string(),
            });
        }
        self.driver.modes.lock().push(*mode);
        self.mode = Some(*mode);
        Ok(())
    }

    async fn capture_still(&mut self, output: &Path) -> Result<(), CameraError> {
        if !matches!(self.mode, Some(CaptureMode::Still { .. })) {
            return Err(CameraError::NotConfigured {
                operation: "still capture",
            });
        }
        self.produce(output, b"\xFF\xD8mock-jpeg\xFF\xD9").await
    }

    async fn record(&mut self, output: &Path, duration: Duration) -> Result<(), CameraError> {
        if !matches!(self.mode, Some(CaptureMode::Video { .. })) {
            return Err(CameraError::NotConfigured {
                operation: "recording",
            });
        }
        self.produce(output, b"mock-mp4").await?;
        self.driver
            .recorded
            .lock()
            .push((output.to_path_buf(), duration));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CameraError> {
        self.shut();
        Ok(())
    }
}

impl Drop for MockCameraDevice {
    fn drop(&mut self) {
        self.shut();
    }
}
