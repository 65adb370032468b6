// SPDX-License-Identifier: MPL-2.0

//! GStreamer pipeline for virtual camera output via PipeWire
//!
//! Creates a pipeline that:
//! 1. Receives RGBA frames from the frame loop (via appsrc)
//! 2. Converts format as needed (via videoconvert)
//! 3. Outputs to a PipeWire virtual camera node

use super::consumers::ConsumerWatcher;
use super::{ConsumerEvent, PushOutcome, VideoSink};
use crate::backends::types::{Frame, Framerate, PixelFormat, Resolution};
use crate::constants::{defaults, sink, timing};
use crate::errors::SinkError;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::sync::mpsc::Sender;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Virtual camera GStreamer pipeline
///
/// Uses pipewiresink to create a virtual camera device that other
/// applications can use as a video source.
pub struct VirtualCameraPipeline {
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    node_name: String,
    resolution: Resolution,
    framerate: Framerate,
    /// Bytes in appsrc at which a push reports backpressure
    queue_limit: u64,
    frames_pushed: u64,
    consumer_poll_interval: Duration,
    watcher: Option<ConsumerWatcher>,
}

impl VirtualCameraPipeline {
    /// Create and start a virtual camera node called `name`
    pub fn open(name: &str, width: u32, height: u32, fps: u32) -> Result<Self, SinkError> {
        let pipeline = Self::new(name, width, height, fps)?;
        pipeline.start()?;
        Ok(pipeline)
    }

    /// Create the pipeline without starting it
    pub fn new(name: &str, width: u32, height: u32, fps: u32) -> Result<Self, SinkError> {
        info!(name, width, height, fps, "Creating virtual camera pipeline (RGBA)");
        let unavailable = |msg: String| SinkError::Unavailable(msg);

        // Initialize GStreamer if needed
        gstreamer::init().map_err(|e| unavailable(format!("GStreamer init failed: {}", e)))?;

        let pipeline = gstreamer::Pipeline::new();

        // appsrc: receives RGBA frames from the frame loop
        let appsrc = gstreamer::ElementFactory::make("appsrc")
            .name("virtual_camera_src")
            .build()
            .map_err(|e| unavailable(format!("Failed to create appsrc: {}", e)))?;

        // videoconvert: handles format negotiation between appsrc and pipewiresink
        let videoconvert = gstreamer::ElementFactory::make("videoconvert")
            .name("virtual_camera_convert")
            .build()
            .map_err(|e| unavailable(format!("Failed to create videoconvert: {}", e)))?;

        // pipewiresink: output to PipeWire as a virtual camera
        let pipewiresink = gstreamer::ElementFactory::make("pipewiresink")
            .name("virtual_camera_sink")
            .build()
            .map_err(|e| unavailable(format!("Failed to create pipewiresink: {}", e)))?;

        let appsrc = appsrc
            .downcast::<AppSrc>()
            .map_err(|_| unavailable("Failed to downcast to AppSrc".into()))?;

        let resolution = Resolution::new(width, height);
        let framerate = Framerate::from_int(fps);
        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", PixelFormat::Rgba.to_gst_format_string())
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", framerate.as_gst_fraction())
            .build();

        let frame_bytes = (resolution.pixel_count() * PixelFormat::Rgba.bytes_per_pixel()) as u64;
        let queue_limit = frame_bytes * sink::MAX_QUEUED_BUFFERS;

        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gstreamer::Format::Time);
        appsrc.set_is_live(true);
        // Frames carry their own tick timestamps
        appsrc.set_do_timestamp(false);
        appsrc.set_block(false);
        appsrc.set_max_bytes(queue_limit);

        // "provide" mode creates a video source that other applications can use
        pipewiresink.set_property_from_str("mode", "provide");

        // media.role = "Camera" is required for xdg-desktop-portal to recognize this as a camera
        let stream_props = gstreamer::Structure::builder("props")
            .field("media.class", sink::MEDIA_CLASS)
            .field("media.role", sink::MEDIA_ROLE)
            .field("media.name", name)
            .field("node.name", name)
            .field("node.description", format!("{} (virtual camera)", name))
            .build();
        pipewiresink.set_property("stream-properties", &stream_props);

        pipeline
            .add_many([appsrc.upcast_ref(), &videoconvert, &pipewiresink])
            .map_err(|e| unavailable(format!("Failed to add elements: {}", e)))?;

        // Link elements: appsrc -> videoconvert -> pipewiresink
        gstreamer::Element::link_many([appsrc.upcast_ref(), &videoconvert, &pipewiresink])
            .map_err(|e| unavailable(format!("Failed to link elements: {}", e)))?;

        info!("Virtual camera pipeline created (RGBA -> videoconvert -> pipewiresink)");

        Ok(Self {
            pipeline,
            appsrc,
            node_name: name.to_string(),
            resolution,
            framerate,
            queue_limit,
            frames_pushed: 0,
            consumer_poll_interval: Duration::from_millis(defaults::CONSUMER_POLL_INTERVAL_MS),
            watcher: None,
        })
    }

    /// Set how often consumers are polled; applies to the next subscription
    pub fn set_consumer_poll_interval(&mut self, interval: Duration) {
        self.consumer_poll_interval = interval;
    }

    /// Start the pipeline
    pub fn start(&self) -> Result<(), SinkError> {
        debug!("Starting virtual camera pipeline");

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| SinkError::Unavailable(format!("Failed to start pipeline: {}", e)))?;

        // Live sources go to Playing asynchronously; wait for completion
        let (result, _state, _pending) = self.pipeline.state(gstreamer::ClockTime::from_nseconds(
            timing::PIPELINE_START_TIMEOUT.as_nanos() as u64,
        ));
        if result.is_err() {
            return Err(SinkError::Unavailable(
                "Pipeline failed to reach Playing state".into(),
            ));
        }

        info!(node = %self.node_name, "Virtual camera pipeline started");
        Ok(())
    }

    /// First pending error on the pipeline bus, if any
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gstreamer::MessageType::Error])?;
        match msg.view() {
            gstreamer::MessageView::Error(err) => Some(format!(
                "{} ({})",
                err.error(),
                err.debug().map(|d| d.to_string()).unwrap_or_default()
            )),
            _ => None,
        }
    }
}

impl VideoSink for VirtualCameraPipeline {
    /// Push an RGBA frame to the virtual camera
    ///
    /// The frame's pixel buffer is handed to GStreamer without copying.
    fn push_frame(&mut self, frame: Frame) -> Result<PushOutcome, SinkError> {
        if let Some(err) = self.bus_error() {
            error!(error = %err, "Virtual camera pipeline error");
            return Err(SinkError::Unavailable(err));
        }

        if frame.resolution != self.resolution {
            return Err(SinkError::FormatMismatch(format!(
                "Frame size {} doesn't match pipeline {}",
                frame.resolution, self.resolution
            )));
        }

        let expected_size = self.resolution.pixel_count() * frame.format.bytes_per_pixel();
        if frame.data.len() != expected_size {
            return Err(SinkError::FormatMismatch(format!(
                "Frame data size {} doesn't match expected {} for {} RGBA",
                frame.data.len(),
                expected_size,
                self.resolution
            )));
        }

        if self.appsrc.current_level_bytes() >= self.queue_limit {
            return Ok(PushOutcome::Backpressure);
        }

        let mut buffer = gstreamer::Buffer::from_mut_slice(frame.data);
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| SinkError::Unavailable("Failed to get mutable buffer reference".into()))?;
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(
                frame.timestamp.as_nanos() as u64,
            ));
            buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(
                self.framerate.interval().as_nanos() as u64,
            ));
        }

        match self.appsrc.push_buffer(buffer) {
            Ok(_) => {
                self.frames_pushed += 1;
                if self.frames_pushed % 300 == 0 {
                    debug!(frame = self.frames_pushed, "Virtual camera frames pushed (RGBA)");
                }
                Ok(PushOutcome::Accepted)
            }
            Err(e) => {
                warn!(?e, "Failed to push frame to virtual camera");
                Err(SinkError::Unavailable(format!("Failed to push frame: {:?}", e)))
            }
        }
    }

    fn subscribe_consumer_events(&mut self, events: Sender<ConsumerEvent>) -> Result<(), SinkError> {
        let watcher = ConsumerWatcher::spawn(&self.node_name, self.consumer_poll_interval, events)?;
        self.watcher = Some(watcher);
        Ok(())
    }
}

impl Drop for VirtualCameraPipeline {
    fn drop(&mut self) {
        debug!("Dropping virtual camera pipeline");
        self.watcher = None;
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            error!(?e, "Failed to set pipeline to Null on drop");
        }
    }
}
