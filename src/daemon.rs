// SPDX-License-Identifier: GPL-3.0-only

//! Daemon wiring
//!
//! Startup order: configuration, effect chain, virtual camera sink, capture
//! session, control service, D-Bus, usage monitor, frame loop. Shutdown runs
//! in reverse: the control surface stops accepting calls, the frame loop retires
//! the capture session and then closes the sink, and the monitor thread is joined last.

use crate::backends::camera::{CaptureRequest, CaptureSession, V4l2Backend};
use crate::backends::segmentation::PortraitPriorSegmenter;
use crate::backends::virtual_camera::VirtualCameraPipeline;
use crate::config::Config;
use crate::constants::timing;
use crate::control::{ControlService, SignalHub, dbus};
use crate::effects::{EffectController, EffectKind};
use crate::errors::{AppError, AppResult};
use crate::pipeline::{FrameLoop, FrameLoopSettings, LoopExit, SourceUsageMonitor, UsageStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{error, info, warn};

/// Values given on the command line; `None` keeps the config file value
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub config_path: Option<PathBuf>,
    pub device_index: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub sink_name: Option<String>,
    pub no_dbus: bool,
}

impl StartOptions {
    /// Load the config file and apply the overrides
    pub fn resolve(&self) -> AppResult<Config> {
        let mut config = match self.config_path.clone().or_else(Config::default_path) {
            Some(path) => Config::load(&path)?,
            None => Config::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(index) = self.device_index {
            config.device_index = index;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(name) = &self.sink_name {
            config.sink_name = name.clone();
        }
        if self.no_dbus {
            config.dbus = false;
        }
    }
}

/// Build the controller holding the configured initial chain
pub fn initial_controller(config: &Config) -> AppResult<EffectController> {
    let controller = EffectController::new();
    for entry in &config.effects {
        let kind: EffectKind = entry.effect.parse()?;
        controller.add_or_update(kind, entry.config.clone())?;
    }
    Ok(controller)
}

/// Run until Ctrl+C or an unrecoverable sink failure
pub fn run(options: &StartOptions) -> AppResult<()> {
    let config = options.resolve()?;
    info!(
        device = config.device_index,
        width = config.width,
        height = config.height,
        fps = config.fps,
        sink = %config.sink_name,
        dbus = config.dbus,
        "Starting camfx"
    );

    let controller = Arc::new(initial_controller(&config)?);
    info!(chain = ?controller.snapshot().summary(), "Initial effect chain");

    let mut sink = VirtualCameraPipeline::open(
        &config.sink_name,
        config.width,
        config.height,
        config.fps,
    )?;
    sink.set_consumer_poll_interval(Duration::from_millis(config.consumer_poll_interval_ms));

    let request = CaptureRequest {
        device_index: config.device_index,
        resolution: config.resolution(),
        framerate: config.framerate(),
    };
    let signals = SignalHub::default();
    let capture = Arc::new(CaptureSession::with_observer(
        Arc::new(V4l2Backend::new()),
        request,
        signals.camera_observer(),
    ));

    let usage = Arc::new(UsageStatus::new());
    let control = Arc::new(ControlService::new(
        Arc::clone(&controller),
        Arc::clone(&capture),
        Arc::clone(&usage),
        signals.clone(),
    ));

    let runtime = if config.dbus {
        Some(tokio::runtime::Runtime::new()?)
    } else {
        None
    };
    let dbus_server = match &runtime {
        Some(runtime) => Some(runtime.block_on(dbus::serve(Arc::clone(&control)))?),
        None => {
            info!("D-Bus control disabled");
            None
        }
    };

    let edge_control = Arc::clone(&control);
    let mut monitor = SourceUsageMonitor::start(&mut sink, Arc::clone(&usage), move |edge| {
        edge_control.handle_usage_edge(edge)
    });
    if monitor.is_none() {
        warn!("Camera stays off until StartCamera is called");
    }

    let settings = FrameLoopSettings {
        resolution: config.resolution(),
        framerate: config.framerate(),
        sink_failure_threshold: config.sink_failure_threshold,
    };
    let mut frame_loop = FrameLoop::new(
        Arc::clone(&controller),
        Arc::clone(&capture),
        Box::new(sink),
        Arc::new(PortraitPriorSegmenter::new()),
        signals,
        settings,
    )
    .spawn()?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| AppError::Io(format!("Failed to install signal handler: {}", e)))?;

    loop {
        match shutdown_rx.recv_timeout(timing::MONITOR_WAKEUP) {
            Ok(()) => {
                info!("Shutdown requested");
                break;
            }
            Err(RecvTimeoutError::Timeout) if frame_loop.is_running() => {}
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    control.begin_shutdown();
    drop(dbus_server);
    if let Some(runtime) = runtime {
        runtime.shutdown_timeout(timing::PIPELINE_START_TIMEOUT);
    }

    let exit = frame_loop.stop();
    if let Some(stats) = frame_loop.stats() {
        info!(
            ticks = stats.ticks,
            pushed = stats.frames_pushed,
            dropped = stats.backpressure_drops,
            skipped = stats.skipped_ticks,
            "Frame loop finished"
        );
    }
    if let Some(monitor) = monitor.as_mut() {
        monitor.stop();
    }

    match exit {
        Some(LoopExit::SinkFailed(e)) => {
            error!(error = %e, "Virtual camera output failed");
            Err(e.into())
        }
        _ => {
            info!("camfx stopped");
            Ok(())
        }
    }
}
