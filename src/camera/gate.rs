use super::device::{CameraDevice, CameraDriver, CaptureMode};
use crate::error::{CameraError, PicamError, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

/// Serializes access to the single camera.
///
/// Cloning a gate yields another handle on the same lock and driver.
#[derive(Clone)]
pub struct CaptureGate {
    lock: Arc<Mutex<()>>,
    driver: Arc<dyn CameraDriver>,
}

/// Permit to use the camera. The lock is released when the token is dropped.
#[derive(Debug)]
pub struct GateToken {
    _guard: OwnedMutexGuard<()>,
    acquired_at: Instant,
}

impl GateToken {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for GateToken {
    fn drop(&mut self) {
        debug!("Camera gate released after {:?}", self.acquired_at.elapsed());
    }
}

/// An open device together with the token protecting it.
///
/// On every exit path the device goes away before the token, so the lock
/// never outlives protection of an open device and an open device is never
/// left unlocked.
pub struct CameraSession {
    device: Option<Box<dyn CameraDevice>>,
    token: Option<GateToken>,
}

impl CameraSession {
    fn new(device: Box<dyn CameraDevice>, token: GateToken) -> Self {
        Self {
            device: Some(device),
            token: Some(token),
        }
    }

    fn device(&mut self) -> std::result::Result<&mut (dyn CameraDevice + 'static), CameraError> {
        self.device
            .as_deref_mut()
            .ok_or(CameraError::NotConfigured { operation: "session" })
    }

    /// Close the device, then release the gate.
    async fn release(mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close().await {
                warn!("Failed to close camera cleanly: {}", e);
            }
        }
        if let Some(token) = self.token.take() {
            debug!("Releasing camera gate held for {:?}", token.held_for());
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        // Only reached with a live device when the session future was dropped
        if self.device.take().is_some() {
            warn!("Camera session abandoned; device dropped before releasing gate");
        }
        self.token.take();
    }
}

impl CaptureGate {
    pub fn new(driver: Arc<dyn CameraDriver>) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            driver,
        }
    }

    /// Wait up to `timeout` for the camera. Fails with `Busy` once the
    /// timeout elapses.
    pub async fn acquire(&self, timeout: Duration) -> Result<GateToken> {
        let started = Instant::now();

        match tokio::time::timeout(timeout, Arc::clone(&self.lock).lock_owned()).await {
            Ok(guard) => {
                debug!("Camera gate acquired after {:?}", started.elapsed());
                Ok(GateToken {
                    _guard: guard,
                    acquired_at: Instant::now(),
                })
            }
            Err(_) => {
                warn!("Camera gate not acquired within {:?}", timeout);
                Err(PicamError::Busy { waited: timeout })
            }
        }
    }

    /// Whether some request currently holds the camera
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Acquire the gate, open and configure the device, run `op` with it,
    /// then close the device and release the gate whatever the outcome.
    pub async fn with_camera<T, F>(&self, mode: CaptureMode, timeout: Duration, op: F) -> Result<T>
    where
        T: Send,
        F: for<'d> FnOnce(&'d mut dyn CameraDevice) -> BoxFuture<'d, std::result::Result<T, CameraError>>
            + Send,
    {
        let token = self.acquire(timeout).await?;

        let device = self.driver.open().await.map_err(|e| {
            error!("Failed to open camera via {}: {}", self.driver.name(), e);
            PicamError::from(e)
        })?;
        debug!("Camera opened for {} capture", mode.label());

        let mut session = CameraSession::new(device, token);
        let outcome = Self::run_in_session(&mut session, &mode, op).await;
        session.release().await;

        outcome.map_err(|e| {
            error!("Camera {} operation failed: {}", mode.label(), e);
            PicamError::from(e)
        })
    }

    async fn run_in_session<T, F>(
        session: &mut CameraSession,
        mode: &CaptureMode,
        op: F,
    ) -> std::result::Result<T, CameraError>
    where
        F: for<'d> FnOnce(&'d mut dyn CameraDevice) -> BoxFuture<'d, std::result::Result<T, CameraError>>,
    {
        let device = session.device()?;
        device.configure(mode).await?;
        debug!("Camera configured: {:?}", mode);
        op(device).await
    }
}
