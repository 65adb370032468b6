// SPDX-License-Identifier: GPL-3.0-only

//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use camfx::backends::camera::{CaptureBackend, CaptureDevice, CaptureRequest};
use camfx::backends::segmentation::Segmenter;
use camfx::backends::types::{Frame, Framerate, Mask, Resolution};
use camfx::backends::virtual_camera::{ConsumerEvent, PushOutcome, VideoSink};
use camfx::errors::{CaptureError, SegmentationError, SinkError};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const RES: Resolution = Resolution {
    width: 8,
    height: 6,
};

pub fn request() -> CaptureRequest {
    CaptureRequest {
        device_index: 0,
        resolution: RES,
        framerate: Framerate::from_int(30),
    }
}

/// Camera producing mid-grey frames whose red channel counts reads
#[derive(Default)]
pub struct FakeCamera {
    pub open_devices: Arc<AtomicUsize>,
    pub unavailable: AtomicBool,
    pub fail_reads: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
}

struct FakeDevice {
    open_devices: Arc<AtomicUsize>,
    fail_reads: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl CaptureBackend for FakeCamera {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is busy",
                request.device_path()
            )));
        }
        self.open_devices.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            open_devices: Arc::clone(&self.open_devices),
            fail_reads: Arc::clone(&self.fail_reads),
            reads: Arc::clone(&self.reads),
        }))
    }
}

impl CaptureDevice for FakeDevice {
    fn read(&mut self, _timeout: Duration) -> Result<Frame, CaptureError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CaptureError::ReadTimeout);
        }
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let mut data = vec![128u8; RES.pixel_count() * 4];
        for pixel in data.chunks_exact_mut(4) {
            pixel[0] = (n % 256) as u8;
            pixel[3] = 255;
        }
        Ok(Frame::from_rgba(RES, data, Duration::ZERO).unwrap())
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.open_devices.fetch_sub(1, Ordering::SeqCst);
    }
}

pub const SINK_ACCEPT: u8 = 0;
pub const SINK_FULL: u8 = 1;
pub const SINK_FAIL: u8 = 2;

/// Sink recording every accepted frame with its arrival time
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub frames: Arc<Mutex<Vec<(Frame, Instant)>>>,
    pub mode: Arc<AtomicU8>,
    pub consumer_events: Arc<Mutex<Option<Sender<ConsumerEvent>>>>,
    pub refuse_subscription: bool,
    pub dropped: Arc<AtomicBool>,
}

impl RecordingSink {
    /// Sink that cannot deliver consumer events
    pub fn refusing() -> Self {
        let mut sink = Self::default();
        sink.refuse_subscription = true;
        sink
    }

    pub fn set_mode(&self, mode: u8) {
        self.mode.store(mode, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(f, _)| f.clone())
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Send a consumer notification as the sink would
    pub fn consumer(&self, event: ConsumerEvent) {
        if let Some(tx) = self.consumer_events.lock().unwrap().as_ref() {
            tx.send(event).unwrap();
        }
    }
}

impl VideoSink for RecordingSink {
    fn push_frame(&mut self, frame: Frame) -> Result<PushOutcome, SinkError> {
        match self.mode.load(Ordering::SeqCst) {
            SINK_FULL => Ok(PushOutcome::Backpressure),
            SINK_FAIL => Err(SinkError::Unavailable("pipewire went away".into())),
            _ => {
                self.frames.lock().unwrap().push((frame, Instant::now()));
                Ok(PushOutcome::Accepted)
            }
        }
    }

    fn subscribe_consumer_events(
        &mut self,
        sender: Sender<ConsumerEvent>,
    ) -> Result<(), SinkError> {
        if self.refuse_subscription {
            return Err(SinkError::ConsumerEventsUnavailable(
                "pw-dump not found".into(),
            ));
        }
        *self.consumer_events.lock().unwrap() = Some(sender);
        Ok(())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Segmenter returning a full foreground mask and counting its calls
#[derive(Default)]
pub struct CountingSegmenter {
    pub calls: AtomicUsize,
}

impl CountingSegmenter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Segmenter for CountingSegmenter {
    fn compute_mask(&self, frame: &Frame) -> Result<Mask, SegmentationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Mask::filled(frame.resolution, 1.0))
    }
}
