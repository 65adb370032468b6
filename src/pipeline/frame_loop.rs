// SPDX-License-Identifier: GPL-3.0-only
//! The frame loop: capture, effects and output at a fixed cadence
//!
//! One dedicated thread owns the sink and is the only reader of the capture
//! session. Each tick it:
//!
//! 1. reads a frame if the camera is open (reusing the previous frame on a
//!    transient failure) or synthesizes a blank frame if it is not,
//! 2. applies the current effect chain snapshot,
//! 3. pushes the result to the sink with the tick timestamp,
//! 4. sleeps until the next deadline.
//!
//! Only a persistent sink failure ends the loop on its own.

use super::pacing::{FramePacer, Pace};
use crate::backends::camera::CaptureSession;
use crate::backends::segmentation::Segmenter;
use crate::backends::types::{Frame, Framerate, Resolution};
use crate::backends::virtual_camera::{PushOutcome, VideoSink};
use crate::constants::timing;
use crate::control::{ControlSignal, SignalHub};
use crate::effects::EffectController;
use crate::errors::{CaptureError, SinkError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Output format and failure tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLoopSettings {
    pub resolution: Resolution,
    pub framerate: Framerate,
    /// Consecutive failed pushes that end the loop
    pub sink_failure_threshold: u32,
}

/// Why the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop was requested
    Stopped,
    /// The sink kept failing
    SinkFailed(SinkError),
}

/// Where a tick's input frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Captured,
    /// Previous capture reused after a read failure
    Reused,
    Blank,
}

/// Counters logged periodically and returned by [`FrameLoopHandle::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub frames_pushed: u64,
    pub backpressure_drops: u64,
    pub sink_errors: u64,
    pub capture_errors: u64,
    pub effect_failures: u64,
    pub skipped_ticks: u64,
}

pub struct FrameLoop {
    controller: Arc<EffectController>,
    capture: Arc<CaptureSession>,
    sink: Box<dyn VideoSink>,
    segmenter: Arc<dyn Segmenter>,
    signals: SignalHub,
    settings: FrameLoopSettings,
    last_input: Option<Frame>,
    consecutive_sink_failures: u32,
    stats: LoopStats,
}

impl FrameLoop {
    pub fn new(
        controller: Arc<EffectController>,
        capture: Arc<CaptureSession>,
        sink: Box<dyn VideoSink>,
        segmenter: Arc<dyn Segmenter>,
        signals: SignalHub,
        settings: FrameLoopSettings,
    ) -> Self {
        Self {
            controller,
            capture,
            sink,
            segmenter,
            signals,
            settings,
            last_input: None,
            consecutive_sink_failures: 0,
            stats: LoopStats::default(),
        }
    }

    /// Obtain this tick's input frame
    fn input_frame(&mut self, timestamp: Duration) -> (Frame, FrameSource) {
        let interval = self.settings.framerate.interval();
        let read = self.capture.read(interval).and_then(|frame| {
            if frame.resolution == self.settings.resolution {
                Ok(frame)
            } else {
                Err(CaptureError::ReadError(format!(
                    "captured {} but output is {}",
                    frame.resolution, self.settings.resolution
                )))
            }
        });

        match read {
            Ok(mut frame) => {
                frame.timestamp = timestamp;
                self.last_input = Some(frame.clone());
                (frame, FrameSource::Captured)
            }
            Err(CaptureError::NotOpen) => {
                self.last_input = None;
                (Frame::blank(self.settings.resolution, timestamp), FrameSource::Blank)
            }
            Err(e) => {
                self.stats.capture_errors += 1;
                if self.stats.capture_errors % timing::STATS_LOG_INTERVAL == 1 {
                    warn!(error = %e, total = self.stats.capture_errors, "Capture read failed, reusing previous frame");
                }
                match &self.last_input {
                    Some(previous) => {
                        let mut frame = previous.clone();
                        frame.timestamp = timestamp;
                        (frame, FrameSource::Reused)
                    }
                    None => (Frame::blank(self.settings.resolution, timestamp), FrameSource::Blank),
                }
            }
        }
    }

    /// Produce and push one frame
    ///
    /// Returns an error only once the sink failure threshold is reached.
    pub fn tick(&mut self, timestamp: Duration) -> Result<FrameSource, SinkError> {
        self.stats.ticks += 1;
        let (input, source) = self.input_frame(timestamp);

        let chain = self.controller.snapshot();
        let outcome = chain.apply(input, self.segmenter.as_ref());
        self.stats.effect_failures += outcome.failures.len() as u64;

        match self.sink.push_frame(outcome.frame) {
            Ok(PushOutcome::Accepted) => {
                self.stats.frames_pushed += 1;
                self.consecutive_sink_failures = 0;
            }
            Ok(PushOutcome::Backpressure) => {
                self.stats.backpressure_drops += 1;
                debug!(total = self.stats.backpressure_drops, "Sink full, frame dropped");
            }
            Err(e) => {
                self.stats.sink_errors += 1;
                self.consecutive_sink_failures += 1;
                warn!(
                    error = %e,
                    consecutive = self.consecutive_sink_failures,
                    threshold = self.settings.sink_failure_threshold,
                    "Sink push failed"
                );
                if self.consecutive_sink_failures >= self.settings.sink_failure_threshold {
                    return Err(e);
                }
            }
        }

        if self.stats.ticks % timing::STATS_LOG_INTERVAL == 0 {
            info!(
                ticks = self.stats.ticks,
                pushed = self.stats.frames_pushed,
                dropped = self.stats.backpressure_drops,
                skipped = self.stats.skipped_ticks,
                capture_errors = self.stats.capture_errors,
                effect_failures = self.stats.effect_failures,
                effects = chain.len(),
                "Frame loop statistics"
            );
        }

        Ok(source)
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Tick until `stop` is set or the sink fails, then release everything
    pub fn run(mut self, stop: &AtomicBool) -> (LoopExit, LoopStats) {
        let interval = self.settings.framerate.interval();
        let mut pacer = FramePacer::new(Instant::now(), interval);
        info!(
            resolution = %self.settings.resolution,
            fps = %self.settings.framerate,
            "Frame loop running"
        );

        let exit = loop {
            if stop.load(Ordering::SeqCst) {
                break LoopExit::Stopped;
            }
            if let Err(e) = self.tick(pacer.timestamp()) {
                break LoopExit::SinkFailed(e);
            }
            match pacer.advance(Instant::now()) {
                Pace::Sleep(duration) => thread::sleep(duration),
                Pace::Proceed { skipped } => {
                    if skipped > 0 {
                        self.stats.skipped_ticks += skipped;
                        debug!(skipped, tick = pacer.tick(), "Tick overran, dropping missed intervals");
                    }
                }
            }
        };

        let stats = self.stats;
        self.shutdown(&exit);
        (exit, stats)
    }

    /// Close the capture device for good, then the sink
    ///
    /// The session is retired rather than stopped, so a `StartCamera` racing
    /// the shutdown cannot reopen the device behind the loop.
    fn shutdown(self, exit: &LoopExit) {
        let FrameLoop {
            capture,
            sink,
            signals,
            ..
        } = self;

        capture.retire();
        drop(sink);

        match exit {
            LoopExit::Stopped => info!("Frame loop stopped"),
            LoopExit::SinkFailed(e) => {
                warn!(error = %e, "Frame loop terminated by sink failure");
                signals.emit(ControlSignal::PipelineStopped(e.to_string()));
            }
        }
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<FrameLoopHandle> {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);

        let thread_handle = thread::Builder::new()
            .name("camfx-frame-loop".into())
            .spawn(move || self.run(&stop))?;

        Ok(FrameLoopHandle {
            stop_signal,
            thread_handle: Some(thread_handle),
            result: None,
        })
    }
}

/// Controller for the frame loop thread
///
/// Dropping the handle stops the loop and waits for it.
pub struct FrameLoopHandle {
    stop_signal: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<(LoopExit, LoopStats)>>,
    result: Option<(LoopExit, LoopStats)>,
}

impl FrameLoopHandle {
    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking); the in-flight tick completes
    pub fn request_stop(&self) {
        debug!("Requesting frame loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) -> Option<LoopExit> {
        self.request_stop();
        self.join()
    }

    /// Wait for the thread without requesting a stop
    pub fn join(&mut self) -> Option<LoopExit> {
        if let Some(handle) = self.thread_handle.take() {
            match handle.join() {
                Ok(result) => self.result = Some(result),
                Err(e) => warn!("Frame loop thread panicked: {:?}", e),
            }
        }
        self.result.as_ref().map(|(exit, _)| exit.clone())
    }

    /// Final counters, available after the loop has been joined
    pub fn stats(&self) -> Option<LoopStats> {
        self.result.as_ref().map(|(_, stats)| *stats)
    }
}

impl Drop for FrameLoopHandle {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!("FrameLoopHandle dropped, stopping loop");
            self.stop();
        }
    }
}
