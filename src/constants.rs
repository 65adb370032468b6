// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// D-Bus names for the control service
pub mod dbus {
    /// Well-known bus name claimed by the daemon
    pub const SERVICE_NAME: &str = "org.camfx.Control1";
    /// Object path of the control interface
    pub const OBJECT_PATH: &str = "/org/camfx/Control1";
    /// Interface name
    pub const INTERFACE_NAME: &str = "org.camfx.Control1";
}

/// Defaults used when neither the config file nor the CLI sets a value
pub mod defaults {
    pub const DEVICE_INDEX: u32 = 0;
    pub const WIDTH: u32 = 1280;
    pub const HEIGHT: u32 = 720;
    pub const FPS: u32 = 30;
    pub const SINK_NAME: &str = "camfx";
    /// Consecutive failed pushes before the loop gives up (~1 s at 30 fps)
    pub const SINK_FAILURE_THRESHOLD: u32 = 30;
    pub const CONSUMER_POLL_INTERVAL_MS: u64 = 1000;
}

/// Timing constants for GStreamer pipelines and worker threads
pub mod timing {
    use super::Duration;

    /// Maximum wait for a pipeline to reach Playing
    pub const PIPELINE_START_TIMEOUT: Duration = Duration::from_secs(5);
    /// How often worker threads re-check their stop signal
    pub const MONITOR_WAKEUP: Duration = Duration::from_millis(200);
    /// Log frame loop statistics every N ticks
    pub const STATS_LOG_INTERVAL: u64 = 300;
}

/// Virtual camera sink tuning
pub mod sink {
    /// Frames queued in appsrc before a push is reported as backpressure
    pub const MAX_QUEUED_BUFFERS: u64 = 2;
    /// PipeWire media class of the virtual camera node
    pub const MEDIA_CLASS: &str = "Video/Source";
    /// PipeWire media role required by xdg-desktop-portal
    pub const MEDIA_ROLE: &str = "Camera";
}
