// SPDX-License-Identifier: GPL-3.0-only

//! Person segmentation

use super::types::{Frame, Mask};
use crate::errors::SegmentationError;

/// Computes a foreground mask for a frame
///
/// Implementations must be deterministic and must not keep per-frame state;
/// the frame loop calls this at most once per tick.
pub trait Segmenter: Send + Sync {
    fn compute_mask(&self, frame: &Frame) -> Result<Mask, SegmentationError>;
}

/// Head-and-shoulders prior: a soft ellipse centred low in the frame
///
/// Used when no segmentation model is available. It assumes the usual
/// video-call framing of one person facing the camera.
#[derive(Debug, Clone)]
pub struct PortraitPriorSegmenter {
    /// Ellipse centre as a fraction of width and height
    center: (f32, f32),
    /// Ellipse radii as a fraction of width and height
    radii: (f32, f32),
    /// Width of the soft edge in normalized ellipse distance
    feather: f32,
}

impl Default for PortraitPriorSegmenter {
    fn default() -> Self {
        Self {
            center: (0.5, 0.62),
            radii: (0.3, 0.55),
            feather: 0.25,
        }
    }
}

impl PortraitPriorSegmenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Segmenter for PortraitPriorSegmenter {
    fn compute_mask(&self, frame: &Frame) -> Result<Mask, SegmentationError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(SegmentationError(format!(
                "cannot segment an empty {} frame",
                frame.resolution
            )));
        }

        let cx = self.center.0 * width as f32;
        let cy = self.center.1 * height as f32;
        let rx = self.radii.0 * width as f32;
        let ry = self.radii.1 * height as f32;
        let inner = 1.0 - self.feather;

        let mut data = Vec::with_capacity(frame.resolution.pixel_count());
        for y in 0..height {
            let dy = (y as f32 + 0.5 - cy) / ry;
            for x in 0..width {
                let dx = (x as f32 + 0.5 - cx) / rx;
                let distance = (dx * dx + dy * dy).sqrt();
                let value = if distance <= inner {
                    1.0
                } else {
                    (1.0 - (distance - inner) / self.feather).clamp(0.0, 1.0)
                };
                data.push(value);
            }
        }

        Ok(Mask {
            resolution: frame.resolution,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::types::Resolution;
    use std::time::Duration;

    #[test]
    fn test_portrait_prior_shape() {
        let frame = Frame::blank(Resolution::new(64, 48), Duration::ZERO);
        let mask = PortraitPriorSegmenter::new().compute_mask(&frame).unwrap();
        assert_eq!(mask.data.len(), 64 * 48);
        assert_eq!(mask.at(32, 30), 1.0);
        assert_eq!(mask.at(0, 0), 0.0);
        assert!(mask.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_portrait_prior_is_deterministic() {
        let frame = Frame::blank(Resolution::new(16, 16), Duration::ZERO);
        let segmenter = PortraitPriorSegmenter::new();
        assert_eq!(
            segmenter.compute_mask(&frame).unwrap(),
            segmenter.compute_mask(&frame).unwrap()
        );
    }

    #[test]
    fn test_empty_frame_fails() {
        let frame = Frame::blank(Resolution::new(0, 0), Duration::ZERO);
        assert!(PortraitPriorSegmenter::new().compute_mask(&frame).is_err());
    }
}
