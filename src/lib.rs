// SPDX-License-Identifier: GPL-3.0-only

//! camfx - a virtual camera with a live chain of video effects
//!
//! The daemon captures from a V4L2 device, runs each frame through an ordered
//! effect chain and publishes the result as a PipeWire video source. The chain
//! can be edited while frames are flowing, and the camera opens only while
//! something consumes the virtual source.
//!
//! # Architecture
//!
//! - [`effects`]: effect kinds, parameter validation, the chain and its controller
//! - [`backends`]: capture devices, the virtual camera sink and segmentation
//! - [`pipeline`]: the frame loop, pacing and the source usage monitor
//! - [`control`]: the control service and its D-Bus interface
//! - [`config`]: daemon configuration
//! - [`daemon`]: startup and shutdown wiring

pub mod backends;
pub mod config;
pub mod constants;
pub mod control;
pub mod daemon;
pub mod effects;
pub mod errors;
pub mod pipeline;

// Re-export commonly used types
pub use config::Config;
pub use control::{CameraStatus, ControlService, ControlSignal, SignalHub};
pub use effects::{EffectChain, EffectConfig, EffectController, EffectKind, ParamValue};
pub use errors::{AppError, AppResult, ControlError, ControlResult};
