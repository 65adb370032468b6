// SPDX-License-Identifier: MPL-2.0

//! Hardware-facing collaborators of the pipeline
//!
//! ```text
//!   camera (V4L2 via GStreamer) ──▶ effects ──▶ virtual_camera (PipeWire)
//!                                    ▲
//!                         segmentation (mask)
//! ```
//!
//! # Modules
//!
//! - [`camera`]: capture backends and the capture session lifecycle
//! - [`segmentation`]: foreground mask computation
//! - [`types`]: frames, masks and formats shared by all stages
//! - [`virtual_camera`]: PipeWire output sink and consumer detection

pub mod camera;
pub mod segmentation;
pub mod types;
pub mod virtual_camera;
