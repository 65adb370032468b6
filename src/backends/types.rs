// SPDX-License-Identifier: GPL-3.0-only
// Shared types for capture, effects and the virtual camera sink

//! Frame, mask and format types shared by every pipeline stage

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one frame
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Framerate as a fraction (numerator/denominator)
/// Stores exact framerate to handle NTSC rates like 59.94fps (60000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    /// Get the framerate as a floating point value
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Duration of one frame; a zero rate is treated as 1 fps
    pub fn interval(&self) -> Duration {
        let num = self.num.max(1) as u64;
        Duration::from_nanos(1_000_000_000 * self.denom as u64 / num)
    }

    /// Build a GStreamer fraction for caps
    pub fn as_gst_fraction(&self) -> gstreamer::Fraction {
        gstreamer::Fraction::new(self.num as i32, self.denom as i32)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show decimal for non-integer framerates (NTSC)
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

/// Pixel layout of frame data
///
/// Capture converts everything to RGBA before frames enter the effect chain,
/// so effects and the sink only ever see this layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    #[default]
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
        }
    }

    /// GStreamer video/x-raw format string
    pub fn to_gst_format_string(&self) -> &'static str {
        match self {
            PixelFormat::Rgba => "RGBA",
        }
    }
}

/// A single video frame
///
/// Rows are tightly packed (stride == width * 4). The timestamp is relative to
/// the start of the frame loop and strictly increases from tick to tick.
#[derive(Clone, PartialEq)]
pub struct Frame {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub timestamp: Duration,
}

impl Frame {
    /// Opaque black frame
    pub fn blank(resolution: Resolution, timestamp: Duration) -> Self {
        let mut data = vec![0u8; resolution.pixel_count() * 4];
        for pixel in data.chunks_exact_mut(4) {
            pixel[3] = 255;
        }
        Self {
            resolution,
            format: PixelFormat::Rgba,
            data,
            timestamp,
        }
    }

    /// Wrap packed RGBA bytes, checking the buffer length
    pub fn from_rgba(
        resolution: Resolution,
        data: Vec<u8>,
        timestamp: Duration,
    ) -> Result<Self, String> {
        let expected = resolution.pixel_count() * 4;
        if data.len() != expected {
            return Err(format!(
                "RGBA buffer of {} bytes does not match {} ({} bytes)",
                data.len(),
                resolution,
                expected
            ));
        }
        Ok(Self {
            resolution,
            format: PixelFormat::Rgba,
            data,
            timestamp,
        })
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Same metadata, new pixel data
    pub fn with_data(&self, data: Vec<u8>) -> Self {
        Self {
            resolution: self.resolution,
            format: self.format,
            data,
            timestamp: self.timestamp,
        }
    }

    /// True if every pixel is opaque black
    pub fn is_blank(&self) -> bool {
        self.data
            .chunks_exact(4)
            .all(|p| p[0] == 0 && p[1] == 0 && p[2] == 0 && p[3] == 255)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("resolution", &self.resolution)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Per-pixel foreground probability (0.0 = background, 1.0 = person)
#[derive(Clone, PartialEq)]
pub struct Mask {
    pub resolution: Resolution,
    pub data: Vec<f32>,
}

impl Mask {
    /// Mask with every pixel set to `value`
    pub fn filled(resolution: Resolution, value: f32) -> Self {
        Self {
            resolution,
            data: vec![value.clamp(0.0, 1.0); resolution.pixel_count()],
        }
    }

    /// Value at pixel coordinates, 0.0 outside the mask
    pub fn at(&self, x: u32, y: u32) -> f32 {
        if x >= self.resolution.width || y >= self.resolution.height {
            return 0.0;
        }
        self.data
            .get(y as usize * self.resolution.width as usize + x as usize)
            .copied()
            .unwrap_or(0.0)
    }

    /// Bounding box `(x0, y0, x1, y1)` (exclusive end) of pixels above `threshold`
    pub fn bounding_box(&self, threshold: f32) -> Option<(u32, u32, u32, u32)> {
        let width = self.resolution.width as usize;
        if width == 0 {
            return None;
        }
        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for (i, &value) in self.data.iter().enumerate() {
            if value <= threshold {
                continue;
            }
            let (x, y) = (i % width, i / width);
            bounds = Some(match bounds {
                None => (x, y, x + 1, y + 1),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| (x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

impl std::fmt::Debug for Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mask")
            .field("resolution", &self.resolution)
            .field("len", &self.data.len())
            .finish()
    }
}
