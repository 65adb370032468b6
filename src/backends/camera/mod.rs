// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture
//!
//! [`CaptureBackend`] opens devices, [`CaptureDevice`] reads frames and
//! releases the hardware when dropped. [`CaptureSession`] wraps a backend with
//! the Closed/Open/Error lifecycle shared by the frame loop and the control
//! surface.

pub mod devices;
pub mod session;
pub mod v4l2;

use super::types::{Frame, Framerate, Resolution};
use crate::errors::CaptureError;
use std::time::Duration;

pub use devices::{DeviceInfo, list_devices};
pub use session::{CaptureSession, CaptureState};
pub use v4l2::V4l2Backend;

/// Mode to open a capture device in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub device_index: u32,
    pub resolution: Resolution,
    pub framerate: Framerate,
}

impl CaptureRequest {
    pub fn device_path(&self) -> String {
        format!("/dev/video{}", self.device_index)
    }
}

/// Opens capture devices
pub trait CaptureBackend: Send + Sync {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// An open capture device; dropping it closes the device
pub trait CaptureDevice: Send {
    /// Wait up to `timeout` for the next frame
    fn read(&mut self, timeout: Duration) -> Result<Frame, CaptureError>;
}
