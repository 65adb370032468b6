// SPDX-License-Identifier: GPL-3.0-only

//! Video effects and the effect chain
//!
//! The set of effects is closed: [`EffectKind`] names every variant and
//! [`create_effect`] turns a validated configuration into a ready-to-run
//! [`Effect`]. Chains are immutable values published by the
//! [`EffectController`].

pub mod builtin;
pub mod chain;
pub mod config;
pub mod controller;

use crate::backends::types::{Frame, Mask};
use crate::errors::{ControlError, ControlResult, EffectError};
use std::str::FromStr;
use std::sync::Arc;

pub use chain::{ApplyOutcome, ChainAction, EffectChain, EffectEntry};
pub use config::{EffectConfig, ParamValue};
pub use controller::EffectController;

/// Type tag of an effect; identity of a chain entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectKind {
    Blur,
    Replace,
    Brightness,
    Beautify,
    AutoFrame,
    GazeCorrect,
}

impl EffectKind {
    pub const ALL: [EffectKind; 6] = [
        EffectKind::Blur,
        EffectKind::Replace,
        EffectKind::Brightness,
        EffectKind::Beautify,
        EffectKind::AutoFrame,
        EffectKind::GazeCorrect,
    ];

    /// Wire name used on D-Bus, the CLI and in config files
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectKind::Blur => "blur",
            EffectKind::Replace => "replace",
            EffectKind::Brightness => "brightness",
            EffectKind::Beautify => "beautify",
            EffectKind::AutoFrame => "autoframe",
            EffectKind::GazeCorrect => "gaze-correct",
        }
    }
}

impl std::fmt::Display for EffectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ControlError::UnknownEffectType(s.to_string()))
    }
}

/// A frame transform
///
/// Effects are pure: the output depends only on the input frame, the optional
/// mask and the configuration the effect was built with.
pub trait Effect: Send + Sync {
    fn kind(&self) -> EffectKind;

    /// Whether `apply` needs the tick's segmentation mask
    fn requires_mask(&self) -> bool;

    fn apply(&self, frame: &Frame, mask: Option<&Mask>) -> Result<Frame, EffectError>;
}

/// Validate `config` and build the effect
pub fn create_effect(kind: EffectKind, config: &EffectConfig) -> ControlResult<Arc<dyn Effect>> {
    config::validate(kind, config)?;

    let effect: Arc<dyn Effect> = match kind {
        EffectKind::Blur => Arc::new(builtin::BackgroundBlur::from_config(config)),
        EffectKind::Replace => Arc::new(builtin::BackgroundReplace::from_config(config)?),
        EffectKind::Brightness => Arc::new(builtin::BrightnessContrast::from_config(config)),
        EffectKind::Beautify => Arc::new(builtin::Beautify::from_config(config)),
        EffectKind::AutoFrame => Arc::new(builtin::AutoFrame::from_config(config)),
        EffectKind::GazeCorrect => Arc::new(builtin::GazeCorrect::from_config(config)),
    };
    Ok(effect)
}
