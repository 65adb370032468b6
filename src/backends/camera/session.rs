// SPDX-License-Identifier: GPL-3.0-only

//! Capture device lifecycle
//!
//! ```text
//!   Closed ──start() ok──▶ Open ──stop()──▶ Closed
//!   Closed ──start() err─▶ Error ──stop()──▶ Closed
//!   Error  ──start() ok──▶ Open
//!   Open   ──device lost─▶ Error
//!   any    ──retire()───▶ Closed, start() refused from then on
//! ```
//!
//! Ordinary read errors never change the state and the session never opens
//! itself. Start, stop and retire are serialized on a lifecycle lock and the
//! observer runs under it, so transition notifications arrive in order.
//!
//! The state sits behind a lock that is only held for bookkeeping. A read
//! clones the device slot out and waits on the slot alone, so `state()` and
//! `stop()` never wait for a frame. A device stopped mid-read is released as
//! soon as that read returns.

use super::{CaptureBackend, CaptureDevice, CaptureRequest};
use crate::backends::types::Frame;
use crate::errors::CaptureError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Closed,
    Open,
    Error,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Closed => "closed",
            CaptureState::Open => "open",
            CaptureState::Error => "error",
        }
    }
}

/// Called with `true` when the session opens and `false` when an open session closes
pub type StateObserver = Box<dyn Fn(bool) + Send + Sync>;

type DeviceSlot = Arc<Mutex<Option<Box<dyn CaptureDevice>>>>;

fn release(slot: &DeviceSlot) {
    drop(slot.lock().take());
}

struct SessionInner {
    state: CaptureState,
    device: Option<DeviceSlot>,
    /// Stopped while a read was in flight
    closing: Option<DeviceSlot>,
    last_error: Option<String>,
    retired: bool,
}

pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
    request: CaptureRequest,
    lifecycle: Mutex<()>,
    inner: Mutex<SessionInner>,
    observer: Option<StateObserver>,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn CaptureBackend>, request: CaptureRequest) -> Self {
        Self {
            backend,
            request,
            lifecycle: Mutex::new(()),
            inner: Mutex::new(SessionInner {
                state: CaptureState::Closed,
                device: None,
                closing: None,
                last_error: None,
                retired: false,
            }),
            observer: None,
        }
    }

    /// Session that reports open/close transitions to `observer`
    pub fn with_observer(
        backend: Arc<dyn CaptureBackend>,
        request: CaptureRequest,
        observer: impl Fn(bool) + Send + Sync + 'static,
    ) -> Self {
        let mut session = Self::new(backend, request);
        session.observer = Some(Box::new(observer));
        session
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CaptureState::Open
    }

    /// Why the session is in `Error`
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    fn notify(&self, open: bool) {
        if let Some(observer) = &self.observer {
            observer(open);
        }
    }

    fn is_current(&self, slot: &DeviceSlot) -> bool {
        self.inner
            .lock()
            .device
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Open the device
    ///
    /// Returns `Ok(true)` if the session transitioned to `Open` and `Ok(false)`
    /// if it already was open. On failure the session is left in `Error`.
    pub fn start(&self) -> Result<bool, CaptureError> {
        let _lifecycle = self.lifecycle.lock();
        let closing = {
            let mut inner = self.inner.lock();
            if inner.retired {
                return Err(CaptureError::Retired);
            }
            if inner.state == CaptureState::Open {
                debug!("Capture session already open");
                return Ok(false);
            }
            inner.closing.take()
        };
        // The previous device must be gone before the node is opened again
        if let Some(slot) = closing {
            release(&slot);
        }

        info!(
            device = %self.request.device_path(),
            resolution = %self.request.resolution,
            fps = %self.request.framerate,
            "Opening capture device"
        );

        match self.backend.open(&self.request) {
            Ok(device) => {
                {
                    let mut inner = self.inner.lock();
                    inner.device = Some(Arc::new(Mutex::new(Some(device))));
                    inner.state = CaptureState::Open;
                    inner.last_error = None;
                }
                info!("Capture session open");
                self.notify(true);
                Ok(true)
            }
            Err(e) => {
                let reason = match e {
                    CaptureError::DeviceUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                warn!(error = %reason, "Failed to open capture device");
                let mut inner = self.inner.lock();
                inner.device = None;
                inner.state = CaptureState::Error;
                inner.last_error = Some(reason.clone());
                Err(CaptureError::DeviceUnavailable(reason))
            }
        }
    }

    /// Release the device
    ///
    /// Returns whether the session was open. Stopping a closed session is a no-op.
    pub fn stop(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        self.close()
    }

    /// Stop and refuse every later `start`
    ///
    /// Returns whether the session was open.
    pub fn retire(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        self.inner.lock().retired = true;
        debug!("Capture session retired");
        self.close()
    }

    /// Caller holds the lifecycle lock
    fn close(&self) -> bool {
        let slot = {
            let mut inner = self.inner.lock();
            let was_open = inner.state == CaptureState::Open;
            inner.state = CaptureState::Closed;
            inner.last_error = None;
            let slot = inner.device.take();
            if !was_open {
                return false;
            }
            slot
        };

        if let Some(slot) = slot {
            let released = slot.try_lock().map(|mut device| device.take()).is_some();
            if !released {
                debug!("Read in flight, device closes when it returns");
                self.inner.lock().closing = Some(slot);
            }
        }
        info!("Capture session closed");
        self.notify(false);
        true
    }

    /// The device failed for good; caller no longer holds the slot
    fn device_lost(&self, slot: &DeviceSlot, reason: &str) {
        let _lifecycle = self.lifecycle.lock();
        {
            let mut inner = self.inner.lock();
            if !inner
                .device
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, slot))
            {
                return;
            }
            inner.device = None;
            inner.state = CaptureState::Error;
            inner.last_error = Some(reason.to_string());
        }
        release(slot);
        warn!(error = %reason, "Capture device lost");
        self.notify(false);
    }

    /// Read one frame; only valid while `Open`
    ///
    /// Read failures are returned to the caller. Only
    /// [`CaptureError::Disconnected`] changes the state, to `Error`.
    pub fn read(&self, timeout: Duration) -> Result<Frame, CaptureError> {
        let slot = {
            let inner = self.inner.lock();
            match (inner.state, &inner.device) {
                (CaptureState::Open, Some(slot)) => Arc::clone(slot),
                _ => return Err(CaptureError::NotOpen),
            }
        };

        let result = {
            let mut device = slot.lock();
            let result = match device.as_mut() {
                Some(device) => device.read(timeout),
                None => Err(CaptureError::NotOpen),
            };
            if !self.is_current(&slot) {
                // Stopped during the read
                drop(device.take());
                return Err(CaptureError::NotOpen);
            }
            result
        };

        if let Err(CaptureError::Disconnected(reason)) = &result {
            self.device_lost(&slot, reason);
        }
        result
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.inner.get_mut().device.is_some() {
            debug!("CaptureSession dropped with an open device, closing");
            self.stop();
        }
        if let Some(slot) = self.inner.get_mut().closing.take() {
            release(&slot);
        }
    }
}
