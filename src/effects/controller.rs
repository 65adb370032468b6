// SPDX-License-Identifier: GPL-3.0-only

//! Owner of the published effect chain
//!
//! Writers serialize on a mutex, build a new chain from the current one and
//! swap it in. Readers load the current `Arc<EffectChain>` without locking and
//! always see a complete chain.

use super::chain::{ChainAction, EffectChain, EffectEntry};
use super::{EffectConfig, EffectKind, ParamValue};
use crate::errors::{ControlError, ControlResult};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

pub struct EffectController {
    published: ArcSwap<EffectChain>,
    writer: Mutex<()>,
}

impl Default for EffectController {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectController {
    /// Controller with an empty chain
    pub fn new() -> Self {
        Self::with_chain(EffectChain::new())
    }

    pub fn with_chain(chain: EffectChain) -> Self {
        Self {
            published: ArcSwap::from_pointee(chain),
            writer: Mutex::new(()),
        }
    }

    /// Current chain; never blocks on writers
    pub fn snapshot(&self) -> Arc<EffectChain> {
        self.published.load_full()
    }

    /// Run `build` against the current chain under the writer lock and publish
    /// the result. Nothing is published if `build` fails.
    fn mutate<T>(
        &self,
        build: impl FnOnce(&EffectChain) -> ControlResult<(EffectChain, T)>,
    ) -> ControlResult<T> {
        let _writer = self.writer.lock();
        let current = self.published.load();
        let (next, result) = build(&current)?;
        debug!(chain = ?next, "Publishing effect chain");
        self.published.store(Arc::new(next));
        Ok(result)
    }

    /// Replace the whole chain with a single effect
    pub fn set_effect(&self, kind: EffectKind, config: EffectConfig) -> ControlResult<()> {
        let entry = EffectEntry::new(kind, config)?;
        self.mutate(|_| Ok((EffectChain::single(entry), ())))?;
        info!(effect = %kind, "Effect chain set");
        Ok(())
    }

    /// Update the entry of `kind` in place, or append a new one
    pub fn add_or_update(&self, kind: EffectKind, config: EffectConfig) -> ControlResult<ChainAction> {
        let entry = EffectEntry::new(kind, config)?;
        let action = self.mutate(|chain| Ok(chain.with_entry(entry)))?;
        info!(effect = %kind, action = action.as_str(), "Effect chain changed");
        Ok(action)
    }

    /// Remove the entry of `kind`; returns whether anything was removed
    pub fn remove_by_type(&self, kind: EffectKind) -> bool {
        let removed = self
            .mutate(|chain| match chain.without_kind(kind) {
                Some(next) => Ok((next, true)),
                None => Err(ControlError::EffectNotFound(kind.as_str().into())),
            })
            .is_ok();
        if removed {
            info!(effect = %kind, "Effect removed");
        } else {
            debug!(effect = %kind, "Effect not in chain, nothing removed");
        }
        removed
    }

    /// Remove the entry at `index`, returning its type
    pub fn remove_at(&self, index: i64) -> ControlResult<EffectKind> {
        let kind = self.mutate(|chain| {
            let (next, removed) = chain.without_index(index)?;
            Ok((next, removed.kind))
        })?;
        info!(index, effect = %kind, "Effect removed by index");
        Ok(kind)
    }

    pub fn clear(&self) {
        // An empty chain is always valid
        let _ = self.mutate(|_| Ok((EffectChain::new(), ())));
        info!("Effect chain cleared");
    }

    /// Merge one parameter into an existing entry and rebuild it
    ///
    /// Returns the entry's new configuration.
    pub fn update_parameter(
        &self,
        kind: EffectKind,
        name: &str,
        value: ParamValue,
    ) -> ControlResult<EffectConfig> {
        let config = self.mutate(|chain| {
            let existing = chain
                .get(kind)
                .ok_or_else(|| ControlError::EffectNotFound(kind.as_str().into()))?;
            let mut config = existing.config.clone();
            config.insert(name.to_string(), value);
            let entry = EffectEntry::new(kind, config.clone())?;
            let (next, _) = chain.with_entry(entry);
            Ok((next, config))
        })?;
        info!(effect = %kind, parameter = name, "Effect parameter updated");
        Ok(config)
    }

    /// Ordered `(type, config)` pairs of the published chain
    pub fn effects(&self) -> Vec<(EffectKind, EffectConfig)> {
        self.snapshot().summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, value: ParamValue) -> EffectConfig {
        EffectConfig::from([(name.to_string(), value)])
    }

    #[test]
    fn test_set_effect_replaces_chain() {
        let controller = EffectController::new();
        controller
            .add_or_update(EffectKind::Blur, EffectConfig::new())
            .unwrap();
        controller
            .add_or_update(EffectKind::Beautify, EffectConfig::new())
            .unwrap();
        controller
            .set_effect(EffectKind::Brightness, cfg("brightness", ParamValue::Int(5)))
            .unwrap();

        let effects = controller.effects();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].0, EffectKind::Brightness);
    }

    #[test]
    fn test_invalid_config_leaves_chain_unchanged() {
        let controller = EffectController::new();
        controller
            .add_or_update(EffectKind::Blur, cfg("strength", ParamValue::Int(25)))
            .unwrap();
        let before = controller.snapshot();

        let err = controller
            .set_effect(EffectKind::Blur, cfg("strength", ParamValue::Int(4)))
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfig { .. }));
        assert!(Arc::ptr_eq(&before, &controller.snapshot()));
    }

    #[test]
    fn test_remove_absent_type_is_noop() {
        let controller = EffectController::new();
        controller
            .add_or_update(EffectKind::Blur, EffectConfig::new())
            .unwrap();
        let before = controller.snapshot();
        assert!(!controller.remove_by_type(EffectKind::Replace));
        assert!(Arc::ptr_eq(&before, &controller.snapshot()));
        assert!(controller.remove_by_type(EffectKind::Blur));
        assert!(controller.effects().is_empty());
    }

    #[test]
    fn test_update_parameter() {
        let controller = EffectController::new();
        assert_eq!(
            controller
                .update_parameter(EffectKind::Blur, "strength", ParamValue::Int(9))
                .unwrap_err(),
            ControlError::EffectNotFound("blur".into())
        );

        controller
            .add_or_update(EffectKind::AutoFrame, cfg("padding", ParamValue::Float(0.1)))
            .unwrap();
        let config = controller
            .update_parameter(EffectKind::AutoFrame, "max_zoom", ParamValue::Int(3))
            .unwrap();
        assert_eq!(config["padding"], ParamValue::Float(0.1));
        assert_eq!(config["max_zoom"], ParamValue::Int(3));

        // Out of range: rejected, config kept
        assert!(
            controller
                .update_parameter(EffectKind::AutoFrame, "padding", ParamValue::Float(1.5))
                .is_err()
        );
        assert_eq!(controller.effects()[0].1, config);
    }

    #[test]
    fn test_remove_at() {
        let controller = EffectController::new();
        controller
            .add_or_update(EffectKind::Blur, EffectConfig::new())
            .unwrap();
        controller
            .add_or_update(EffectKind::Beautify, EffectConfig::new())
            .unwrap();
        assert_eq!(controller.remove_at(0).unwrap(), EffectKind::Blur);
        assert_eq!(
            controller.remove_at(5).unwrap_err(),
            ControlError::IndexOutOfRange { index: 5, len: 1 }
        );
        controller.clear();
        assert!(controller.snapshot().is_empty());
    }
}
