// SPDX-License-Identifier: GPL-3.0-only

//! Immutable, type-keyed effect chain
//!
//! A chain never changes after construction. Every mutation builds a new
//! chain from the old one; the controller then publishes it atomically.

use super::{Effect, EffectConfig, EffectKind, create_effect};
use crate::backends::segmentation::Segmenter;
use crate::backends::types::{Frame, Mask};
use crate::errors::{ControlError, ControlResult, EffectError};
use std::sync::Arc;
use tracing::warn;

/// What a control operation did to the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAction {
    Set,
    Added,
    Updated,
    Removed,
    Cleared,
}

impl ChainAction {
    /// Action name carried by the `EffectChainChanged` signal
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainAction::Set => "set",
            ChainAction::Added => "add",
            ChainAction::Updated => "update",
            ChainAction::Removed => "remove",
            ChainAction::Cleared => "clear",
        }
    }
}

/// One effect in the chain together with the configuration it was built from
#[derive(Clone)]
pub struct EffectEntry {
    pub kind: EffectKind,
    pub effect: Arc<dyn Effect>,
    pub config: EffectConfig,
    pub requires_mask: bool,
}

impl EffectEntry {
    /// Validate the configuration and instantiate the effect
    pub fn new(kind: EffectKind, config: EffectConfig) -> ControlResult<Self> {
        let effect = create_effect(kind, &config)?;
        Ok(Self::from_effect(effect, config))
    }

    /// Wrap an already-built effect
    pub fn from_effect(effect: Arc<dyn Effect>, config: EffectConfig) -> Self {
        Self {
            kind: effect.kind(),
            requires_mask: effect.requires_mask(),
            effect,
            config,
        }
    }
}

impl std::fmt::Debug for EffectEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectEntry")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("requires_mask", &self.requires_mask)
            .finish()
    }
}

/// Result of running the chain over one frame
#[derive(Debug)]
pub struct ApplyOutcome {
    pub frame: Frame,
    /// Entries that failed or were skipped this tick
    pub failures: Vec<EffectError>,
    /// Whether the segmenter was called
    pub mask_computed: bool,
}

enum MaskState {
    Pending,
    Ready(Mask),
    Failed,
}

/// Mask for one tick, computed on first demand
struct MaskMemo<'a> {
    segmenter: &'a dyn Segmenter,
    state: MaskState,
}

impl<'a> MaskMemo<'a> {
    fn new(segmenter: &'a dyn Segmenter) -> Self {
        Self {
            segmenter,
            state: MaskState::Pending,
        }
    }

    fn get(&mut self, frame: &Frame) -> Option<&Mask> {
        if matches!(self.state, MaskState::Pending) {
            self.state = match self.segmenter.compute_mask(frame) {
                Ok(mask) => MaskState::Ready(mask),
                Err(e) => {
                    warn!(error = %e, "Mask computation failed, skipping mask effects this tick");
                    MaskState::Failed
                }
            };
        }
        match &self.state {
            MaskState::Ready(mask) => Some(mask),
            _ => None,
        }
    }

    fn computed(&self) -> bool {
        !matches!(self.state, MaskState::Pending)
    }
}

/// Ordered effects; insertion order is application order
#[derive(Clone, Default)]
pub struct EffectChain {
    entries: Vec<EffectEntry>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(entry: EffectEntry) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    pub fn entries(&self) -> &[EffectEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, kind: EffectKind) -> Option<usize> {
        self.entries.iter().position(|e| e.kind == kind)
    }

    pub fn get(&self, kind: EffectKind) -> Option<&EffectEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Any entry needs a mask
    pub fn requires_mask(&self) -> bool {
        self.entries.iter().any(|e| e.requires_mask)
    }

    /// Replace the entry of the same type in place, or append
    pub fn with_entry(&self, entry: EffectEntry) -> (Self, ChainAction) {
        let mut entries = self.entries.clone();
        match self.position(entry.kind) {
            Some(index) => {
                entries[index] = entry;
                (Self { entries }, ChainAction::Updated)
            }
            None => {
                entries.push(entry);
                (Self { entries }, ChainAction::Added)
            }
        }
    }

    /// Chain without the entry of `kind`, or `None` if there is no such entry
    pub fn without_kind(&self, kind: EffectKind) -> Option<Self> {
        let index = self.position(kind)?;
        let mut entries = self.entries.clone();
        entries.remove(index);
        Some(Self { entries })
    }

    /// Chain without the entry at `index`, returning the removed entry
    pub fn without_index(&self, index: i64) -> ControlResult<(Self, EffectEntry)> {
        let len = self.entries.len();
        let position = usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .ok_or(ControlError::IndexOutOfRange { index, len })?;
        let mut entries = self.entries.clone();
        let removed = entries.remove(position);
        Ok((Self { entries }, removed))
    }

    /// Ordered `(type, config)` pairs
    pub fn summary(&self) -> Vec<(EffectKind, EffectConfig)> {
        self.entries
            .iter()
            .map(|e| (e.kind, e.config.clone()))
            .collect()
    }

    /// Run every entry over `input`
    ///
    /// The mask is computed at most once, from the input frame, the first time
    /// an entry asks for it. A failed entry leaves the running frame as it was.
    pub fn apply(&self, input: Frame, segmenter: &dyn Segmenter) -> ApplyOutcome {
        let mut memo = MaskMemo::new(segmenter);
        let mut output: Option<Frame> = None;
        let mut failures = Vec::new();

        for entry in &self.entries {
            let mask = if entry.requires_mask {
                match memo.get(&input) {
                    Some(mask) => Some(mask),
                    None => {
                        failures.push(EffectError::MaskUnavailable(entry.kind.as_str().into()));
                        continue;
                    }
                }
            } else {
                None
            };

            let current = output.as_ref().unwrap_or(&input);
            match entry.effect.apply(current, mask) {
                Ok(frame) => output = Some(frame),
                Err(e) => {
                    warn!(effect = %entry.kind, error = %e, "Effect failed, frame passed through");
                    failures.push(e);
                }
            }
        }

        ApplyOutcome {
            mask_computed: memo.computed(),
            frame: output.unwrap_or(input),
            failures,
        }
    }
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.kind))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::types::Resolution;
    use crate::effects::ParamValue;
    use crate::errors::SegmentationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSegmenter {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSegmenter {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl Segmenter for CountingSegmenter {
        fn compute_mask(&self, frame: &Frame) -> Result<Mask, SegmentationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SegmentationError("model not loaded".into()));
            }
            Ok(Mask::filled(frame.resolution, 1.0))
        }
    }

    /// Effect that always fails
    struct Broken;

    impl Effect for Broken {
        fn kind(&self) -> EffectKind {
            EffectKind::GazeCorrect
        }

        fn requires_mask(&self) -> bool {
            false
        }

        fn apply(&self, _frame: &Frame, _mask: Option<&Mask>) -> Result<Frame, EffectError> {
            Err(EffectError::Apply {
                effect: "gaze-correct".into(),
                reason: "boom".into(),
            })
        }
    }

    fn entry(kind: EffectKind, pairs: &[(&str, ParamValue)]) -> EffectEntry {
        let config = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        EffectEntry::new(kind, config).unwrap()
    }

    fn frame() -> Frame {
        Frame::blank(Resolution::new(8, 8), Duration::ZERO)
    }

    #[test]
    fn test_with_entry_updates_in_place() {
        let chain = EffectChain::single(entry(EffectKind::Blur, &[]));
        let (chain, action) = chain.with_entry(entry(EffectKind::Brightness, &[]));
        assert_eq!(action, ChainAction::Added);
        let (chain, action) =
            chain.with_entry(entry(EffectKind::Blur, &[("strength", ParamValue::Int(31))]));
        assert_eq!(action, ChainAction::Updated);

        let kinds: Vec<_> = chain.entries().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EffectKind::Blur, EffectKind::Brightness]);
        assert_eq!(
            chain.get(EffectKind::Blur).unwrap().config["strength"],
            ParamValue::Int(31)
        );
    }

    #[test]
    fn test_without_index_bounds() {
        let chain = EffectChain::single(entry(EffectKind::Beautify, &[]));
        assert_eq!(
            chain.without_index(1).unwrap_err(),
            ControlError::IndexOutOfRange { index: 1, len: 1 }
        );
        assert_eq!(
            chain.without_index(-1).unwrap_err(),
            ControlError::IndexOutOfRange { index: -1, len: 1 }
        );
        let (chain, removed) = chain.without_index(0).unwrap();
        assert!(chain.is_empty());
        assert_eq!(removed.kind, EffectKind::Beautify);
    }

    #[test]
    fn test_without_kind_absent_is_none() {
        let chain = EffectChain::single(entry(EffectKind::Beautify, &[]));
        assert!(chain.without_kind(EffectKind::Blur).is_none());
        assert!(chain.without_kind(EffectKind::Beautify).unwrap().is_empty());
    }

    #[test]
    fn test_mask_computed_once_per_apply() {
        let (chain, _) = EffectChain::single(entry(EffectKind::Blur, &[]))
            .with_entry(entry(EffectKind::Beautify, &[]));
        let (chain, _) = chain.with_entry(entry(EffectKind::Brightness, &[]));
        let segmenter = CountingSegmenter::new(false);

        let outcome = chain.apply(frame(), &segmenter);
        assert!(outcome.failures.is_empty());
        assert!(outcome.mask_computed);
        assert_eq!(segmenter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_mask_requested_without_mask_effects() {
        let chain = EffectChain::single(entry(EffectKind::Brightness, &[]));
        let segmenter = CountingSegmenter::new(false);
        let outcome = chain.apply(frame(), &segmenter);
        assert!(!outcome.mask_computed);
        assert_eq!(segmenter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_mask_is_not_retried() {
        let (chain, _) = EffectChain::single(entry(EffectKind::Blur, &[]))
            .with_entry(entry(EffectKind::Replace, &[]));
        let segmenter = CountingSegmenter::new(true);

        let outcome = chain.apply(frame(), &segmenter);
        assert_eq!(segmenter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome.failures,
            vec![
                EffectError::MaskUnavailable("blur".into()),
                EffectError::MaskUnavailable("replace".into()),
            ]
        );
        assert_eq!(outcome.frame, frame());
    }

    #[test]
    fn test_failing_effect_keeps_previous_frame() {
        let brighten = entry(EffectKind::Brightness, &[("brightness", ParamValue::Int(20))]);
        let chain = EffectChain::single(brighten.clone());
        let (chain, _) = chain.with_entry(EffectEntry::from_effect(
            Arc::new(Broken),
            EffectConfig::new(),
        ));
        let segmenter = CountingSegmenter::new(false);

        let outcome = chain.apply(frame(), &segmenter);
        assert_eq!(outcome.failures.len(), 1);
        let expected = brighten.effect.apply(&frame(), None).unwrap();
        assert_eq!(outcome.frame, expected);
    }
}
