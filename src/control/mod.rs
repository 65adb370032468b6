// SPDX-License-Identifier: GPL-3.0-only

//! Control surface
//!
//! [`ControlService`] is the single entry point for external callers (the
//! D-Bus interface and the usage monitor). Every call returns as soon as the
//! chain swap or capture transition is done; nothing here waits for the frame
//! loop. Signals are emitted only after a successful change.

pub mod dbus;
mod signals;

pub use signals::{ControlSignal, SignalHub};

use crate::backends::camera::{CaptureSession, CaptureState};
use crate::effects::{ChainAction, EffectConfig, EffectController, EffectKind, ParamValue};
use crate::errors::{CaptureError, ControlError, ControlResult};
use crate::pipeline::{UsageEdge, UsageStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Camera state as reported by `GetCameraStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    Closed,
    Open,
    Error,
    /// Closed, and consumer monitoring is unavailable
    Degraded,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Closed => "closed",
            CameraStatus::Open => "open",
            CameraStatus::Error => "error",
            CameraStatus::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ControlService {
    controller: Arc<EffectController>,
    capture: Arc<CaptureSession>,
    usage: Arc<UsageStatus>,
    signals: SignalHub,
    shutting_down: AtomicBool,
}

impl ControlService {
    pub fn new(
        controller: Arc<EffectController>,
        capture: Arc<CaptureSession>,
        usage: Arc<UsageStatus>,
        signals: SignalHub,
    ) -> Self {
        Self {
            controller,
            capture,
            usage,
            signals,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn signals(&self) -> &SignalHub {
        &self.signals
    }

    /// Reject further mutations
    pub fn begin_shutdown(&self) {
        info!("Control service no longer accepting calls");
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> ControlResult<()> {
        if self.is_shutting_down() {
            Err(ControlError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn chain_changed(&self, action: ChainAction, effect: Option<EffectKind>, config: EffectConfig) {
        self.signals.emit(ControlSignal::EffectChainChanged {
            action,
            effect,
            config,
        });
    }

    /// Replace the chain with a single effect
    pub fn set_effect(&self, effect_type: &str, config: EffectConfig) -> ControlResult<()> {
        self.ensure_running()?;
        let kind: EffectKind = effect_type.parse()?;
        self.controller.set_effect(kind, config.clone())?;
        self.chain_changed(ChainAction::Set, Some(kind), config);
        Ok(())
    }

    pub fn add_or_update_effect(
        &self,
        effect_type: &str,
        config: EffectConfig,
    ) -> ControlResult<ChainAction> {
        self.ensure_running()?;
        let kind: EffectKind = effect_type.parse()?;
        let action = self.controller.add_or_update(kind, config.clone())?;
        self.chain_changed(action, Some(kind), config);
        Ok(action)
    }

    pub fn remove_effect(&self, index: i64) -> ControlResult<EffectKind> {
        self.ensure_running()?;
        let kind = self.controller.remove_at(index)?;
        self.chain_changed(ChainAction::Removed, Some(kind), EffectConfig::new());
        Ok(kind)
    }

    /// Returns whether an entry was removed; an absent type is not an error
    pub fn remove_effect_by_type(&self, effect_type: &str) -> ControlResult<bool> {
        self.ensure_running()?;
        let kind: EffectKind = effect_type.parse()?;
        let removed = self.controller.remove_by_type(kind);
        if removed {
            self.chain_changed(ChainAction::Removed, Some(kind), EffectConfig::new());
        }
        Ok(removed)
    }

    pub fn clear_chain(&self) -> ControlResult<()> {
        self.ensure_running()?;
        self.controller.clear();
        self.chain_changed(ChainAction::Cleared, None, EffectConfig::new());
        Ok(())
    }

    pub fn get_effects(&self) -> Vec<(EffectKind, EffectConfig)> {
        self.controller.effects()
    }

    /// Returns the effect's full configuration after the update
    pub fn update_effect_parameter(
        &self,
        effect_type: &str,
        name: &str,
        value: ParamValue,
    ) -> ControlResult<EffectConfig> {
        self.ensure_running()?;
        let kind: EffectKind = effect_type.parse()?;
        let config = self.controller.update_parameter(kind, name, value)?;
        self.chain_changed(ChainAction::Updated, Some(kind), config.clone());
        Ok(config)
    }

    /// Open the capture device; a no-op if it is already open
    ///
    /// `CameraStateChanged` comes from the session's observer, see
    /// [`SignalHub::camera_observer`].
    pub fn start_camera(&self) -> ControlResult<()> {
        self.ensure_running()?;
        match self.capture.start() {
            Ok(_) => Ok(()),
            Err(CaptureError::DeviceUnavailable(reason)) => {
                Err(ControlError::DeviceUnavailable(reason))
            }
            Err(CaptureError::Retired) => Err(ControlError::ShuttingDown),
            Err(other) => Err(ControlError::DeviceUnavailable(other.to_string())),
        }
    }

    pub fn stop_camera(&self) -> ControlResult<()> {
        self.ensure_running()?;
        self.capture.stop();
        Ok(())
    }

    pub fn camera_status(&self) -> CameraStatus {
        match self.capture.state() {
            CaptureState::Open => CameraStatus::Open,
            CaptureState::Error => CameraStatus::Error,
            CaptureState::Closed if self.usage.is_degraded() => CameraStatus::Degraded,
            CaptureState::Closed => CameraStatus::Closed,
        }
    }

    /// Why the camera is in `error`, empty otherwise
    pub fn camera_error(&self) -> String {
        self.capture.last_error().unwrap_or_default()
    }

    pub fn monitor_degraded(&self) -> bool {
        self.usage.is_degraded()
    }

    pub fn consumer_count(&self) -> usize {
        self.usage.consumer_count()
    }

    /// Activation policy: open the camera while anyone is consuming the output
    pub fn handle_usage_edge(&self, edge: UsageEdge) {
        let result = match edge {
            UsageEdge::BecameUsed => self.start_camera(),
            UsageEdge::BecameUnused => self.stop_camera(),
        };
        match result {
            Ok(()) => info!(?edge, status = %self.camera_status(), "Camera follows source usage"),
            Err(ControlError::ShuttingDown) => {}
            Err(e) => warn!(?edge, error = %e, "Camera transition failed"),
        }
    }
}
