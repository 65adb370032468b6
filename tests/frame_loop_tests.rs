// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the frame loop

mod common;

use camfx::backends::camera::CaptureSession;
use camfx::backends::types::Framerate;
use camfx::control::{ControlSignal, SignalHub};
use camfx::effects::{EffectConfig, EffectController, EffectKind, ParamValue};
use camfx::errors::{CaptureError, SinkError};
use camfx::pipeline::{FrameLoop, FrameLoopSettings, FrameSource, LoopExit};
use common::{CountingSegmenter, FakeCamera, RES, RecordingSink, SINK_FAIL, SINK_FULL};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

struct Harness {
    camera: Arc<FakeCamera>,
    capture: Arc<CaptureSession>,
    controller: Arc<EffectController>,
    sink: RecordingSink,
    segmenter: Arc<CountingSegmenter>,
    signals: SignalHub,
}

impl Harness {
    fn new() -> Self {
        let camera = Arc::new(FakeCamera::default());
        let signals = SignalHub::default();
        Self {
            capture: Arc::new(CaptureSession::with_observer(
                camera.clone(),
                common::request(),
                signals.camera_observer(),
            )),
            camera,
            controller: Arc::new(EffectController::new()),
            sink: RecordingSink::default(),
            segmenter: Arc::new(CountingSegmenter::default()),
            signals,
        }
    }

    fn frame_loop(&self, fps: u32, sink_failure_threshold: u32) -> FrameLoop {
        FrameLoop::new(
            Arc::clone(&self.controller),
            Arc::clone(&self.capture),
            Box::new(self.sink.clone()),
            self.segmenter.clone(),
            self.signals.clone(),
            FrameLoopSettings {
                resolution: RES,
                framerate: Framerate::from_int(fps),
                sink_failure_threshold,
            },
        )
    }
}

fn ts(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[test]
fn test_closed_camera_pushes_blank_frames() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 30);

    for n in 0..5 {
        assert_eq!(frame_loop.tick(ts(n * 33)), Ok(FrameSource::Blank));
    }

    let frames = h.sink.frames();
    assert_eq!(frames.len(), 5);
    for (n, frame) in frames.iter().enumerate() {
        assert_eq!(frame.resolution, RES);
        assert!(frame.is_blank(), "frame {} should be blank", n);
        assert_eq!(frame.timestamp, ts(n as u64 * 33));
    }
    assert_eq!(h.camera.reads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_open_camera_frames_are_captured() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 30);
    h.capture.start().unwrap();

    assert_eq!(frame_loop.tick(ts(0)), Ok(FrameSource::Captured));
    assert_eq!(frame_loop.tick(ts(33)), Ok(FrameSource::Captured));

    let frames = h.sink.frames();
    assert!(!frames[0].is_blank());
    // Red channel carries the read counter
    assert_eq!(frames[0].data[0], 1);
    assert_eq!(frames[1].data[0], 2);
    assert!(frames[0].timestamp < frames[1].timestamp);
}

#[test]
fn test_read_failure_reuses_previous_frame() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 30);
    h.capture.start().unwrap();

    assert_eq!(frame_loop.tick(ts(0)), Ok(FrameSource::Captured));
    h.camera.fail_reads.store(true, Ordering::SeqCst);
    assert_eq!(frame_loop.tick(ts(33)), Ok(FrameSource::Reused));
    assert_eq!(frame_loop.tick(ts(66)), Ok(FrameSource::Reused));

    let frames = h.sink.frames();
    assert_eq!(frames[1].data, frames[0].data);
    assert_eq!(frames[2].data, frames[0].data);
    assert_eq!(frames[2].timestamp, ts(66));
    assert_eq!(frame_loop.stats().capture_errors, 2);
    // Read errors never close the session
    assert!(h.capture.is_open());
}

#[test]
fn test_read_failure_without_previous_frame_is_blank() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 30);
    h.camera.fail_reads.store(true, Ordering::SeqCst);
    h.capture.start().unwrap();

    assert_eq!(frame_loop.tick(ts(0)), Ok(FrameSource::Blank));
    assert!(h.sink.frames()[0].is_blank());
}

#[test]
fn test_stopping_camera_discards_previous_frame() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 30);
    h.capture.start().unwrap();
    frame_loop.tick(ts(0)).unwrap();

    h.capture.stop();
    assert_eq!(frame_loop.tick(ts(33)), Ok(FrameSource::Blank));

    // Reopened camera that fails must not resurrect the stale frame
    h.camera.fail_reads.store(true, Ordering::SeqCst);
    h.capture.start().unwrap();
    assert_eq!(frame_loop.tick(ts(66)), Ok(FrameSource::Blank));
}

#[test]
fn test_mask_computed_once_per_tick() {
    let h = Harness::new();
    h.controller
        .add_or_update(EffectKind::Blur, EffectConfig::new())
        .unwrap();
    h.controller
        .add_or_update(EffectKind::Beautify, EffectConfig::new())
        .unwrap();
    h.controller
        .add_or_update(EffectKind::AutoFrame, EffectConfig::new())
        .unwrap();
    let mut frame_loop = h.frame_loop(30, 30);
    h.capture.start().unwrap();

    for n in 0..4 {
        frame_loop.tick(ts(n * 33)).unwrap();
    }
    assert_eq!(h.segmenter.calls(), 4);
    assert_eq!(frame_loop.stats().effect_failures, 0);
}

#[test]
fn test_mask_not_computed_when_no_entry_needs_it() {
    let h = Harness::new();
    let mut config = EffectConfig::new();
    config.insert("brightness".into(), ParamValue::Int(20));
    h.controller
        .add_or_update(EffectKind::Brightness, config)
        .unwrap();
    let mut frame_loop = h.frame_loop(30, 30);

    frame_loop.tick(ts(0)).unwrap();
    assert_eq!(h.segmenter.calls(), 0);
    // Brightness applied to the blank frame
    assert!(!h.sink.frames()[0].is_blank());
}

#[test]
fn test_chain_change_takes_effect_next_tick() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 30);

    frame_loop.tick(ts(0)).unwrap();
    let mut config = EffectConfig::new();
    config.insert("brightness".into(), ParamValue::Int(50));
    h.controller
        .set_effect(EffectKind::Brightness, config)
        .unwrap();
    frame_loop.tick(ts(33)).unwrap();

    let frames = h.sink.frames();
    assert!(frames[0].is_blank());
    assert_eq!(frames[1].data[0], 50);
}

#[test]
fn test_backpressure_is_not_a_failure() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 2);

    h.sink.set_mode(SINK_FULL);
    for n in 0..10 {
        assert!(frame_loop.tick(ts(n * 33)).is_ok());
    }
    assert_eq!(frame_loop.stats().backpressure_drops, 10);
    assert_eq!(frame_loop.stats().sink_errors, 0);

    // One failure after a long run of backpressure is still below the threshold
    h.sink.set_mode(SINK_FAIL);
    assert!(frame_loop.tick(ts(330)).is_ok());
    assert!(frame_loop.tick(ts(363)).is_err());
}

#[test]
fn test_sink_failures_reset_on_success() {
    let h = Harness::new();
    let mut frame_loop = h.frame_loop(30, 3);

    h.sink.set_mode(SINK_FAIL);
    assert!(frame_loop.tick(ts(0)).is_ok());
    assert!(frame_loop.tick(ts(33)).is_ok());
    h.sink.set_mode(common::SINK_ACCEPT);
    assert!(frame_loop.tick(ts(66)).is_ok());
    h.sink.set_mode(SINK_FAIL);
    assert!(frame_loop.tick(ts(99)).is_ok());
    assert!(frame_loop.tick(ts(132)).is_ok());
    assert!(matches!(
        frame_loop.tick(ts(165)),
        Err(SinkError::Unavailable(_))
    ));
    assert_eq!(frame_loop.stats().sink_errors, 5);
}

#[test]
fn test_persistent_sink_failure_stops_loop() {
    let h = Harness::new();
    h.capture.start().unwrap();
    let mut signals = h.signals.subscribe();
    h.sink.set_mode(SINK_FAIL);

    let mut handle = h.frame_loop(100, 3).spawn().unwrap();
    let exit = handle.join();

    assert!(matches!(exit, Some(LoopExit::SinkFailed(_))));
    assert_eq!(handle.stats().map(|s| s.sink_errors), Some(3));
    // Camera closed before the sink, both released
    assert!(!h.capture.is_open());
    assert_eq!(h.camera.open_devices.load(Ordering::SeqCst), 0);
    assert!(h.sink.dropped.load(Ordering::SeqCst));

    assert_eq!(
        signals.try_recv().unwrap(),
        ControlSignal::CameraStateChanged(false)
    );
    assert!(matches!(
        signals.try_recv().unwrap(),
        ControlSignal::PipelineStopped(_)
    ));

    // A start arriving after the loop exited must not reopen the device
    assert_eq!(h.capture.start(), Err(CaptureError::Retired));
    assert!(!h.capture.is_open());
    assert_eq!(h.camera.open_devices.load(Ordering::SeqCst), 0);
    assert!(signals.try_recv().is_err());
}

#[test]
fn test_start_racing_loop_exit_cannot_reopen() {
    let h = Harness::new();
    h.sink.set_mode(SINK_FAIL);

    let mut handle = h.frame_loop(200, 5).spawn().unwrap();
    let racer = {
        let capture = Arc::clone(&h.capture);
        thread::spawn(move || {
            while capture.start() != Err(CaptureError::Retired) {
                capture.stop();
            }
        })
    };
    assert!(matches!(handle.join(), Some(LoopExit::SinkFailed(_))));
    racer.join().unwrap();

    assert!(!h.capture.is_open());
    assert_eq!(h.camera.open_devices.load(Ordering::SeqCst), 0);
}

#[test]
fn test_stop_releases_camera() {
    let h = Harness::new();
    h.capture.start().unwrap();

    let mut handle = h.frame_loop(100, 30).spawn().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(handle.is_running());

    assert_eq!(handle.stop(), Some(LoopExit::Stopped));
    assert!(!handle.is_running());
    assert!(!h.capture.is_open());
    assert_eq!(h.camera.open_devices.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cadence_does_not_drift() {
    let h = Harness::new();
    let fps = 50;
    let run_for = Duration::from_millis(1000);

    let started = Instant::now();
    let mut handle = h.frame_loop(fps, 30).spawn().unwrap();
    thread::sleep(run_for);
    handle.stop();
    let elapsed = started.elapsed();

    let stats = handle.stats().unwrap();
    let ticks = stats.ticks + stats.skipped_ticks;
    let lower = (run_for.as_secs_f64() * fps as f64) as u64 - 1;
    let upper = (elapsed.as_secs_f64() * fps as f64) as u64 + 2;
    assert!(
        (lower..=upper).contains(&ticks),
        "{} ticks outside {}..={}",
        ticks,
        lower,
        upper
    );

    // Timestamps sit on the tick grid
    let interval = Framerate::from_int(fps).interval();
    let frames = h.sink.frames();
    assert_eq!(frames.len() as u64, stats.frames_pushed);
    for pair in frames.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
        let gap = pair[1].timestamp - pair[0].timestamp;
        assert_eq!(gap.as_nanos() % interval.as_nanos(), 0);
    }
}

#[test]
fn test_spawned_loop_with_closed_camera_streams_blank_frames() {
    let h = Harness::new();
    let fps = 20;
    let interval = Framerate::from_int(fps).interval();

    let mut handle = h.frame_loop(fps, 30).spawn().unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(handle.stop(), Some(LoopExit::Stopped));

    let pushed = h.sink.frames.lock().unwrap().clone();
    assert!(pushed.len() >= 5, "only {} frames pushed", pushed.len());
    for (frame, _) in &pushed {
        assert_eq!(frame.resolution, RES);
        assert!(frame.is_blank());
    }
    for pair in pushed.windows(2) {
        let gap = pair[1].0.timestamp - pair[0].0.timestamp;
        assert_eq!(gap.as_nanos() % interval.as_nanos(), 0);
    }

    // Wall-clock arrivals follow the same cadence
    let (first, last) = (pushed[0].1, pushed[pushed.len() - 1].1);
    let expected = interval * (pushed.len() as u32 - 1);
    let span = last - first;
    assert!(
        span + interval >= expected && span <= expected + interval,
        "{:?} for {} frames at {:?}",
        span,
        pushed.len(),
        interval
    );
    assert_eq!(h.camera.reads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_frames_pushed_matches_window() {
    let h = Harness::new();
    let fps = 20;

    let started = Instant::now();
    let mut handle = h.frame_loop(fps, 30).spawn().unwrap();
    thread::sleep(Duration::from_millis(500));
    let window = started.elapsed();
    handle.stop();

    let pushed = handle.stats().unwrap().frames_pushed;
    let expected = window.as_secs_f64() * fps as f64;
    assert!(
        (pushed as f64 - expected).abs() <= 1.0,
        "{} frames pushed in {:?}, expected {:.1}",
        pushed,
        window,
        expected
    );
}
