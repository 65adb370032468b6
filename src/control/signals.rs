// SPDX-License-Identifier: GPL-3.0-only

//! Change notifications fanned out to the control surface

use crate::effects::{ChainAction, EffectConfig, EffectKind};
use tokio::sync::broadcast;
use tracing::trace;

/// Notification emitted after a successful change
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    EffectChainChanged {
        action: ChainAction,
        /// `None` for `clear`
        effect: Option<EffectKind>,
        config: EffectConfig,
    },
    CameraStateChanged(bool),
    /// The frame loop ended on an unrecoverable error
    PipelineStopped(String),
}

/// Broadcast channel for [`ControlSignal`]s
///
/// Emitting never blocks; slow subscribers lose the oldest signals.
#[derive(Debug, Clone)]
pub struct SignalHub {
    tx: broadcast::Sender<ControlSignal>,
}

impl SignalHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlSignal> {
        self.tx.subscribe()
    }

    pub fn emit(&self, signal: ControlSignal) {
        trace!(?signal, "Emitting control signal");
        // No subscribers is fine
        let _ = self.tx.send(signal);
    }

    /// Capture session observer emitting `CameraStateChanged`
    pub fn camera_observer(&self) -> impl Fn(bool) + Send + Sync + 'static {
        let hub = self.clone();
        move |open| hub.emit(ControlSignal::CameraStateChanged(open))
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new(64)
    }
}
