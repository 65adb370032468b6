// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for consumer-driven activation

mod common;

use camfx::backends::virtual_camera::ConsumerEvent;
use camfx::pipeline::{SourceUsageMonitor, UsageEdge, UsageStatus};
use common::RecordingSink;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ConsumerEvent::{Connected, Disconnected};

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_edges_only_on_first_and_last_consumer() {
    let mut monitor = SourceUsageMonitor::new();
    let edges: Vec<_> = [
        Connected(41),
        Connected(42),
        Disconnected(41),
        Disconnected(42),
    ]
    .into_iter()
    .filter_map(|event| monitor.handle_event(event))
    .collect();

    assert_eq!(edges, vec![UsageEdge::BecameUsed, UsageEdge::BecameUnused]);
    assert!(!monitor.is_used());
}

#[test]
fn test_duplicate_and_unknown_events_change_nothing() {
    let mut monitor = SourceUsageMonitor::new();
    assert_eq!(monitor.handle_event(Disconnected(7)), None);
    assert_eq!(monitor.handle_event(Connected(7)), Some(UsageEdge::BecameUsed));
    assert_eq!(monitor.handle_event(Connected(7)), None);
    assert_eq!(monitor.consumers().len(), 1);
    assert_eq!(monitor.handle_event(Disconnected(8)), None);
    assert!(monitor.is_used());
}

#[test]
fn test_monitor_thread_runs_callback_per_edge() {
    let (tx, rx) = mpsc::channel();
    let status = Arc::new(UsageStatus::new());
    let edges = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&edges);
    let mut handle = SourceUsageMonitor::spawn(rx, Arc::clone(&status), move |edge| {
        recorded.lock().unwrap().push(edge)
    });

    for event in [Connected(1), Connected(2)] {
        tx.send(event).unwrap();
    }
    assert!(wait_for(|| status.consumer_count() == 2));

    for event in [Disconnected(1), Disconnected(2)] {
        tx.send(event).unwrap();
    }
    assert!(wait_for(|| status.consumer_count() == 0));

    // Sender gone: the thread exits on its own
    drop(tx);
    assert!(wait_for(|| !handle.is_running()));
    handle.stop();

    assert_eq!(
        *edges.lock().unwrap(),
        vec![UsageEdge::BecameUsed, UsageEdge::BecameUnused]
    );
}

#[test]
fn test_start_subscribes_to_sink() {
    let mut sink = RecordingSink::default();
    let status = Arc::new(UsageStatus::new());
    let edges = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&edges);
    let handle = SourceUsageMonitor::start(&mut sink, Arc::clone(&status), move |edge| {
        recorded.lock().unwrap().push(edge)
    });
    assert!(handle.is_some());
    assert!(!status.is_degraded());

    sink.consumer(Connected(10));
    assert!(wait_for(|| edges.lock().unwrap().len() == 1));
    assert_eq!(edges.lock().unwrap()[0], UsageEdge::BecameUsed);

    // Dropping the handle stops the thread
    drop(handle);
}

#[test]
fn test_failed_subscription_degrades() {
    let mut sink = RecordingSink::refusing();
    let status = Arc::new(UsageStatus::new());

    let handle = SourceUsageMonitor::start(&mut sink, Arc::clone(&status), |_| {
        panic!("no edges while degraded")
    });
    assert!(handle.is_none());
    assert!(status.is_degraded());
}
