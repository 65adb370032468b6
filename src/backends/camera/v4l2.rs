// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture through GStreamer
//!
//! Pipeline: `v4l2src → videoconvert → videoscale → videorate → RGBA caps → appsink`.
//! The appsink keeps only the newest buffer, so a slow reader sees the latest
//! frame rather than a backlog. A read that times out checks the bus first: an
//! error there (an unplugged device, typically) is reported as a disconnect.

use super::{CaptureBackend, CaptureDevice, CaptureRequest};
use crate::backends::types::{Frame, Resolution};
use crate::constants::timing;
use crate::errors::CaptureError;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Opens `/dev/video{index}` with GStreamer
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }
}

/// Build the gst-launch description for a request
pub fn pipeline_description(request: &CaptureRequest) -> String {
    format!(
        "v4l2src device={} ! videoconvert ! videoscale ! videorate ! \
         video/x-raw,format=RGBA,width={},height={},framerate={}/{} ! \
         appsink name=sink max-buffers=1 drop=true sync=false",
        request.device_path(),
        request.resolution.width,
        request.resolution.height,
        request.framerate.num,
        request.framerate.denom,
    )
}

impl CaptureBackend for V4l2Backend {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let unavailable = |msg: String| CaptureError::DeviceUnavailable(msg);

        gstreamer::init().map_err(|e| unavailable(format!("GStreamer init failed: {}", e)))?;

        let description = pipeline_description(request);
        debug!(pipeline = %description, "Creating capture pipeline");

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| unavailable(format!("Failed to create pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| unavailable("Failed to downcast to Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| unavailable("Failed to find appsink".into()))?
            .downcast::<AppSink>()
            .map_err(|_| unavailable("Failed to downcast to AppSink".into()))?;

        // From here on the device drops the pipeline to Null on every error path
        let device = V4l2Device {
            pipeline,
            appsink,
            started: Instant::now(),
        };

        device
            .pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| unavailable(format!("Failed to start pipeline: {}", e)))?;

        let timeout = gstreamer::ClockTime::from_nseconds(
            timing::PIPELINE_START_TIMEOUT.as_nanos() as u64,
        );
        let (result, state, _pending) = device.pipeline.state(timeout);
        if result.is_err() || state != gstreamer::State::Playing {
            return Err(unavailable(format!(
                "{} did not reach Playing (state {:?})",
                request.device_path(),
                state
            )));
        }

        info!(device = %request.device_path(), "Capture pipeline playing");
        Ok(Box::new(device))
    }
}

struct V4l2Device {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
    started: Instant,
}

/// Copy rows out of a buffer whose stride may include padding
fn pack_rows(data: &[u8], info: &VideoInfo) -> Result<Vec<u8>, CaptureError> {
    let row = info.width() as usize * 4;
    let stride = info.stride()[0] as usize;
    let height = info.height() as usize;
    if stride == row {
        return Ok(data.to_vec());
    }

    let mut packed = Vec::with_capacity(row * height);
    for y in 0..height {
        let line = data
            .get(y * stride..y * stride + row)
            .ok_or_else(|| CaptureError::ReadError(format!("Buffer too short for row {}", y)))?;
        packed.extend_from_slice(line);
    }
    Ok(packed)
}

/// Text of a bus error message
fn error_text(msg: &gstreamer::MessageRef) -> Option<String> {
    match msg.view() {
        gstreamer::MessageView::Error(err) => Some(format!(
            "{} ({})",
            err.error(),
            err.debug().map(|d| d.to_string()).unwrap_or_default()
        )),
        _ => None,
    }
}

impl V4l2Device {
    /// Why no sample arrived, if the pipeline is beyond recovery
    fn failure(&self) -> Option<String> {
        if let Some(reason) = self
            .pipeline
            .bus()
            .and_then(|bus| bus.pop_filtered(&[gstreamer::MessageType::Error]))
            .and_then(|msg| error_text(&msg))
        {
            return Some(reason);
        }
        self.appsink
            .is_eos()
            .then(|| "capture stream ended".to_string())
    }
}

impl CaptureDevice for V4l2Device {
    fn read(&mut self, timeout: Duration) -> Result<Frame, CaptureError> {
        let Some(sample) = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_nseconds(timeout.as_nanos() as u64))
        else {
            if let Some(reason) = self.failure() {
                error!(error = %reason, "Capture pipeline error");
                return Err(CaptureError::Disconnected(reason));
            }
            return Err(CaptureError::ReadTimeout);
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::ReadError("No buffer in sample".into()))?;
        let info = sample
            .caps()
            .and_then(|caps| VideoInfo::from_caps(caps).ok())
            .ok_or_else(|| CaptureError::ReadError("Sample has no video caps".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::ReadError("Failed to map buffer".into()))?;

        let resolution = Resolution::new(info.width(), info.height());
        let data = pack_rows(map.as_slice(), &info)?;
        Frame::from_rgba(resolution, data, self.started.elapsed()).map_err(CaptureError::ReadError)
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        debug!("Closing capture pipeline");
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            error!(?e, "Failed to set capture pipeline to Null on drop");
        }
    }
}
