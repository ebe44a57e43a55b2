//! Background acquisition thread for one device
//!
//! The acquisition closure runs on its own thread and pushes reports into a
//! bounded queue; the server's dispatch loop drains the queue with
//! [`DeviceToken::poll`] and never blocks on the device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use nalgebra::Vector3;

use crate::error::DeviceTokenError;
use crate::ipc::FrameMetadata;
use crate::types::LedMeasurement;

/// How long a blocked producer waits before re-checking for shutdown
const SEND_RETRY: Duration = Duration::from_millis(20);

/// A camera image with the blobs extracted from it
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub metadata: FrameMetadata,
    pub image: Vec<u8>,
    pub blobs: Vec<LedMeasurement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportKind {
    Camera(CameraFrame),
    AngularVelocity {
        value: Vector3<f64>,
        variance: Vector3<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub sensor: u32,
    /// Seconds on the device clock
    pub timestamp: f64,
    pub kind: ReportKind,
}

pub struct DeviceToken {
    name: String,
    reports: Receiver<DeviceReport>,
    injector: Sender<DeviceReport>,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl DeviceToken {
    /// Start acquiring. `acquire` is called in a loop on the background
    /// thread; returning `None` ends acquisition.
    pub fn spawn<F>(name: &str, capacity: usize, mut acquire: F) -> Self
    where
        F: FnMut() -> Option<DeviceReport> + Send + 'static,
    {
        let (tx, rx) = channel::bounded::<DeviceReport>(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let dropped = Arc::new(AtomicU64::new(0));

        let thread_tx = tx.clone();
        let thread_dropped = Arc::clone(&dropped);
        let thread_name = name.to_string();
        let handle = thread::spawn(move || {
            let stop_requested = || !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty));
            loop {
                if stop_requested() {
                    break;
                }
                let Some(mut report) = acquire() else {
                    log::info!("[DEVICE] {} acquisition finished", thread_name);
                    break;
                };
                loop {
                    match thread_tx.send_timeout(report, SEND_RETRY) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(r)) => {
                            if stop_requested() {
                                thread_dropped.fetch_add(1, Ordering::Relaxed);
                                return;
                            }
                            report = r;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => return,
                    }
                }
            }
        });

        Self {
            name: name.to_string(),
            reports: rx,
            injector: tx,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            dropped,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain every report that is ready right now, oldest first
    pub fn poll(&self) -> Vec<DeviceReport> {
        self.reports.try_iter().collect()
    }

    /// Queue a report from the dispatch side without blocking
    pub fn try_inject(&self, report: DeviceReport) -> Result<(), DeviceTokenError> {
        if self.shutdown_tx.is_none() {
            return Err(DeviceTokenError::Shutdown);
        }
        self.injector.try_send(report).map_err(|e| match e {
            TrySendError::Full(_) => DeviceTokenError::Busy,
            TrySendError::Disconnected(_) => DeviceTokenError::Shutdown,
        })
    }

    /// Acquisition thread still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Reports discarded at shutdown
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the acquisition thread and wait for it. Reports still queued
    /// are discarded and counted.
    pub fn shutdown(&mut self) -> Result<(), DeviceTokenError> {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return Ok(());
        };
        let _ = shutdown_tx.try_send(());
        drop(shutdown_tx);

        let result = match self.handle.take() {
            Some(handle) => handle.join().map_err(|panic| {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                DeviceTokenError::ThreadFailed(reason)
            }),
            None => Ok(()),
        };

        let pending = self.reports.try_iter().count() as u64;
        self.dropped.fetch_add(pending, Ordering::Relaxed);
        log::info!(
            "[DEVICE] {} shut down ({} reports dropped)",
            self.name,
            self.dropped()
        );
        result
    }
}

impl Drop for DeviceToken {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("[DEVICE] {}: {}", self.name, e);
        }
    }
}
