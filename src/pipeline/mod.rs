// SPDX-License-Identifier: GPL-3.0-only

//! Runtime pipeline: frame pacing, the frame loop and consumer-driven activation

pub mod frame_loop;
pub mod pacing;
pub mod usage_monitor;

pub use frame_loop::{
    FrameLoop, FrameLoopHandle, FrameLoopSettings, FrameSource, LoopExit, LoopStats,
};
pub use pacing::{FramePacer, Pace};
pub use usage_monitor::{MonitorHandle, SourceUsageMonitor, UsageEdge, UsageStatus};
