// SPDX-License-Identifier: GPL-3.0-only

//! CPU reference implementations of the built-in effects
//!
//! All effects operate on packed RGBA frames. Mask-weighted effects blend
//! per pixel with the foreground probability, so a soft mask edge gives a soft
//! transition.

use super::config::{bool_param, float_param, int_param, parse_hex_color, str_param};
use super::{Effect, EffectConfig, EffectKind};
use crate::backends::types::{Frame, Mask, Resolution};
use crate::errors::{ControlError, ControlResult, EffectError};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Mask value above which a pixel counts as foreground for geometry
const FOREGROUND_THRESHOLD: f32 = 0.5;

/// Share of the smoothed image mixed into the face by beautify
const BEAUTIFY_BLEND: f32 = 0.6;

/// Fetch the mask or fail with a per-effect error
fn require_mask<'a>(
    kind: EffectKind,
    frame: &Frame,
    mask: Option<&'a Mask>,
) -> Result<&'a Mask, EffectError> {
    let mask = mask.ok_or_else(|| EffectError::Apply {
        effect: kind.as_str().to_string(),
        reason: "mask required".into(),
    })?;
    if mask.resolution != frame.resolution {
        return Err(EffectError::Apply {
            effect: kind.as_str().to_string(),
            reason: format!(
                "mask is {} but frame is {}",
                mask.resolution, frame.resolution
            ),
        });
    }
    Ok(mask)
}

/// `fg * m + bg * (1 - m)` per colour channel, alpha from `fg`
fn blend_by_mask(fg: &[u8], bg: &[u8], mask: &Mask) -> Vec<u8> {
    let mut out = Vec::with_capacity(fg.len());
    for ((f, b), &m) in fg
        .chunks_exact(4)
        .zip(bg.chunks_exact(4))
        .zip(mask.data.iter())
    {
        let m = m.clamp(0.0, 1.0);
        for c in 0..3 {
            out.push((f[c] as f32 * m + b[c] as f32 * (1.0 - m)).round() as u8);
        }
        out.push(f[3]);
    }
    out
}

/// One box-filter pass along lines of `len` pixels
///
/// Pixel `i` of line `l` lives at pixel offset `l * line_step + i * elem_step`.
/// Edges are extended by replication.
fn box_pass(
    src: &[u8],
    dst: &mut [u8],
    len: usize,
    lines: usize,
    elem_step: usize,
    line_step: usize,
    radius: usize,
) {
    let window = (2 * radius + 1) as u32;
    let r = radius as isize;
    let last = len as isize - 1;

    for line in 0..lines {
        let base = line * line_step;
        let offset = |i: isize| (base + i.clamp(0, last) as usize * elem_step) * 4;

        for c in 0..4 {
            let at = |i: isize| src[offset(i) + c] as u32;
            let mut sum: u32 = (-r..=r).map(&at).sum();
            for i in 0..len as isize {
                dst[offset(i) + c] = ((sum + window / 2) / window) as u8;
                sum = sum + at(i + r + 1) - at(i - r);
            }
        }
    }
}

/// Separable box blur of a packed RGBA buffer
pub fn box_blur(data: &[u8], width: u32, height: u32, radius: usize) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    if radius == 0 || w == 0 || h == 0 {
        return data.to_vec();
    }
    let mut horizontal = vec![0u8; data.len()];
    box_pass(data, &mut horizontal, w, h, 1, w, radius);
    let mut out = vec![0u8; data.len()];
    box_pass(&horizontal, &mut out, h, w, w, 1, radius);
    out
}

/// Blur everything except the foreground
#[derive(Debug, Clone)]
pub struct BackgroundBlur {
    radius: usize,
}

impl BackgroundBlur {
    pub fn from_config(config: &EffectConfig) -> Self {
        let strength = int_param(config, "strength", 25);
        Self {
            radius: (strength / 2).max(0) as usize,
        }
    }
}

impl Effect for BackgroundBlur {
    fn kind(&self) -> EffectKind {
        EffectKind::Blur
    }

    fn requires_mask(&self) -> bool {
        true
    }

    fn apply(&self, frame: &Frame, mask: Option<&Mask>) -> Result<Frame, EffectError> {
        let mask = require_mask(self.kind(), frame, mask)?;
        let blurred = box_blur(&frame.data, frame.width(), frame.height(), self.radius);
        Ok(frame.with_data(blend_by_mask(&frame.data, &blurred, mask)))
    }
}

enum Background {
    Color([u8; 3]),
    Image(RgbaImage),
}

/// Replace the background with a solid colour or an image
pub struct BackgroundReplace {
    background: Background,
    /// Background rendered at the last frame size
    rendered: Mutex<Option<(Resolution, Arc<Vec<u8>>)>>,
}

impl BackgroundReplace {
    /// The background image is loaded here, so a bad path fails the control call
    pub fn from_config(config: &EffectConfig) -> ControlResult<Self> {
        let background = match str_param(config, "background") {
            Some(path) => {
                let image = image::open(path).map_err(|e| {
                    ControlError::invalid(
                        EffectKind::Replace.as_str(),
                        format!("cannot load background '{}': {}", path, e),
                    )
                })?;
                debug!(path, width = image.width(), height = image.height(), "Loaded background image");
                Background::Image(image.to_rgba8())
            }
            None => Background::Color(
                str_param(config, "color")
                    .and_then(parse_hex_color)
                    .unwrap_or([0, 0, 0]),
            ),
        };
        Ok(Self {
            background,
            rendered: Mutex::new(None),
        })
    }

    fn render(&self, resolution: Resolution) -> Arc<Vec<u8>> {
        let mut rendered = self.rendered.lock();
        if let Some((cached_for, data)) = rendered.as_ref()
            && *cached_for == resolution
        {
            return Arc::clone(data);
        }

        let data = match &self.background {
            Background::Color([r, g, b]) => [*r, *g, *b, 255].repeat(resolution.pixel_count()),
            Background::Image(image) => {
                imageops::resize(image, resolution.width, resolution.height, FilterType::Triangle)
                    .into_raw()
            }
        };
        let data = Arc::new(data);
        *rendered = Some((resolution, Arc::clone(&data)));
        data
    }
}

impl Effect for BackgroundReplace {
    fn kind(&self) -> EffectKind {
        EffectKind::Replace
    }

    fn requires_mask(&self) -> bool {
        true
    }

    fn apply(&self, frame: &Frame, mask: Option<&Mask>) -> Result<Frame, EffectError> {
        let mask = require_mask(self.kind(), frame, mask)?;
        let background = self.render(frame.resolution);
        Ok(frame.with_data(blend_by_mask(&frame.data, &background, mask)))
    }
}

/// `(p - 128) * contrast + 128 + brightness`, optionally only on the person
#[derive(Debug, Clone)]
pub struct BrightnessContrast {
    lut: [u8; 256],
    identity: bool,
    face_only: bool,
}

impl BrightnessContrast {
    pub fn from_config(config: &EffectConfig) -> Self {
        let brightness = int_param(config, "brightness", 0) as f64;
        let contrast = float_param(config, "contrast", 1.0);
        let face_only = bool_param(config, "face_only", false);

        let mut lut = [0u8; 256];
        for (p, slot) in lut.iter_mut().enumerate() {
            let v = (p as f64 - 128.0) * contrast + 128.0 + brightness;
            *slot = v.round().clamp(0.0, 255.0) as u8;
        }

        Self {
            lut,
            identity: brightness == 0.0 && contrast == 1.0,
            face_only,
        }
    }
}

impl Effect for BrightnessContrast {
    fn kind(&self) -> EffectKind {
        EffectKind::Brightness
    }

    fn requires_mask(&self) -> bool {
        self.face_only
    }

    fn apply(&self, frame: &Frame, mask: Option<&Mask>) -> Result<Frame, EffectError> {
        if self.identity {
            return Ok(frame.clone());
        }

        let mut data = frame.data.clone();
        if self.face_only {
            let mask = require_mask(self.kind(), frame, mask)?;
            for (pixel, &m) in data.chunks_exact_mut(4).zip(mask.data.iter()) {
                let m = m.clamp(0.0, 1.0);
                for v in &mut pixel[..3] {
                    let adjusted = self.lut[*v as usize] as f32;
                    *v = (*v as f32 + m * (adjusted - *v as f32)).round() as u8;
                }
            }
        } else {
            for pixel in data.chunks_exact_mut(4) {
                for v in &mut pixel[..3] {
                    *v = self.lut[*v as usize];
                }
            }
        }
        Ok(frame.with_data(data))
    }
}

/// Skin smoothing on the foreground
#[derive(Debug, Clone)]
pub struct Beautify {
    radius: usize,
}

impl Beautify {
    pub fn from_config(config: &EffectConfig) -> Self {
        Self {
            radius: int_param(config, "smoothness", 5).max(1) as usize,
        }
    }
}

impl Effect for Beautify {
    fn kind(&self) -> EffectKind {
        EffectKind::Beautify
    }

    fn requires_mask(&self) -> bool {
        true
    }

    fn apply(&self, frame: &Frame, mask: Option<&Mask>) -> Result<Frame, EffectError> {
        let mask = require_mask(self.kind(), frame, mask)?;
        let smoothed = box_blur(&frame.data, frame.width(), frame.height(), self.radius);

        let mut data = frame.data.clone();
        for ((pixel, smooth), &m) in data
            .chunks_exact_mut(4)
            .zip(smoothed.chunks_exact(4))
            .zip(mask.data.iter())
        {
            let weight = m.clamp(0.0, 1.0) * BEAUTIFY_BLEND;
            for c in 0..3 {
                let v = pixel[c] as f32;
                pixel[c] = (v + weight * (smooth[c] as f32 - v)).round() as u8;
            }
        }
        Ok(frame.with_data(data))
    }
}

/// Crop around the person and scale back to the frame size
#[derive(Debug, Clone)]
pub struct AutoFrame {
    padding: f64,
    min_zoom: f64,
    max_zoom: f64,
}

impl AutoFrame {
    pub fn from_config(config: &EffectConfig) -> Self {
        Self {
            padding: float_param(config, "padding", 0.2),
            min_zoom: float_param(config, "min_zoom", 1.0),
            max_zoom: float_param(config, "max_zoom", 2.0),
        }
    }

    /// Crop window `(left, top, width, height)` for a foreground box
    fn crop_window(&self, frame: Resolution, bbox: (u32, u32, u32, u32)) -> (u32, u32, u32, u32) {
        let (x0, y0, x1, y1) = bbox;
        let (w, h) = (frame.width as f64, frame.height as f64);
        let (bw, bh) = ((x1 - x0) as f64, (y1 - y0) as f64);

        let target_w = (bw * (1.0 + 2.0 * self.padding)).max(1.0);
        let target_h = (bh * (1.0 + 2.0 * self.padding)).max(1.0);
        let zoom = (w / target_w)
            .min(h / target_h)
            .clamp(self.min_zoom, self.max_zoom);

        let crop_w = ((w / zoom).round() as u32).clamp(1, frame.width);
        let crop_h = ((h / zoom).round() as u32).clamp(1, frame.height);
        let cx = (x0 + x1) as f64 / 2.0;
        let cy = (y0 + y1) as f64 / 2.0;
        let left = (cx - crop_w as f64 / 2.0)
            .round()
            .clamp(0.0, (frame.width - crop_w) as f64) as u32;
        let top = (cy - crop_h as f64 / 2.0)
            .round()
            .clamp(0.0, (frame.height - crop_h) as f64) as u32;
        (left, top, crop_w, crop_h)
    }
}

impl Effect for AutoFrame {
    fn kind(&self) -> EffectKind {
        EffectKind::AutoFrame
    }

    fn requires_mask(&self) -> bool {
        true
    }

    fn apply(&self, frame: &Frame, mask: Option<&Mask>) -> Result<Frame, EffectError> {
        let mask = require_mask(self.kind(), frame, mask)?;
        let Some(bbox) = mask.bounding_box(FOREGROUND_THRESHOLD) else {
            return Ok(frame.clone());
        };

        let (left, top, crop_w, crop_h) = self.crop_window(frame.resolution, bbox);
        if crop_w == frame.width() && crop_h == frame.height() {
            return Ok(frame.clone());
        }

        let image = RgbaImage::from_raw(frame.width(), frame.height(), frame.data.clone())
            .ok_or_else(|| EffectError::Apply {
                effect: self.kind().as_str().to_string(),
                reason: "frame buffer does not match its resolution".into(),
            })?;
        let cropped = imageops::crop_imm(&image, left, top, crop_w, crop_h).to_image();
        let scaled = imageops::resize(&cropped, frame.width(), frame.height(), FilterType::Triangle);
        Ok(frame.with_data(scaled.into_raw()))
    }
}

/// Nudge the eye region upward toward the camera line
#[derive(Debug, Clone)]
pub struct GazeCorrect {
    strength: f64,
}

impl GazeCorrect {
    pub fn from_config(config: &EffectConfig) -> Self {
        Self {
            strength: float_param(config, "strength", 0.5),
        }
    }
}

impl Effect for GazeCorrect {
    fn kind(&self) -> EffectKind {
        EffectKind::GazeCorrect
    }

    fn requires_mask(&self) -> bool {
        true
    }

    fn apply(&self, frame: &Frame, mask: Option<&Mask>) -> Result<Frame, EffectError> {
        let mask = require_mask(self.kind(), frame, mask)?;
        let Some((x0, y0, x1, y1)) = mask.bounding_box(FOREGROUND_THRESHOLD) else {
            return Ok(frame.clone());
        };

        // Eyes sit roughly a quarter to a half of the way down the head box
        let bh = (y1 - y0) as f64;
        let band_top = y0 as usize + (bh * 0.25) as usize;
        let band_bottom = y0 as usize + (bh * 0.45) as usize;
        let shift = (self.strength * bh * 0.03).round() as usize;
        if shift == 0 || band_top < shift {
            return Ok(frame.clone());
        }

        let stride = frame.width() as usize * 4;
        let (start, end) = (x0 as usize * 4, x1 as usize * 4);
        let mut data = frame.data.clone();
        for y in band_top..band_bottom.min(frame.height() as usize) {
            let src = y * stride;
            let dst = (y - shift) * stride;
            data[dst + start..dst + end].copy_from_slice(&frame.data[src + start..src + end]);
        }
        Ok(frame.with_data(data))
    }
}
