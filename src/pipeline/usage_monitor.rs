// SPDX-License-Identifier: GPL-3.0-only

//! Edge-triggered detection of downstream consumers
//!
//! The monitor owns the consumer set. It reacts only to the 0 → 1 and 1 → 0
//! cardinality changes, so several applications sharing the virtual camera
//! keep the capture device open until the last one leaves.

use crate::backends::virtual_camera::{ConsumerEvent, ConsumerId, VideoSink};
use crate::constants::timing;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Transition of the "is anyone watching" flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageEdge {
    BecameUsed,
    BecameUnused,
}

/// State shared with the control layer
#[derive(Debug, Default)]
pub struct UsageStatus {
    degraded: AtomicBool,
    consumers: AtomicUsize,
}

impl UsageStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer notifications are unavailable; the camera is only started manually
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }
}

/// Consumer set and edge detection
#[derive(Debug, Default)]
pub struct SourceUsageMonitor {
    consumers: BTreeSet<ConsumerId>,
    is_used: bool,
}

impl SourceUsageMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_used(&self) -> bool {
        self.is_used
    }

    pub fn consumers(&self) -> &BTreeSet<ConsumerId> {
        &self.consumers
    }

    /// Apply one notification and report an edge, if any
    ///
    /// A duplicate connect or a disconnect of an unknown consumer changes nothing.
    pub fn handle_event(&mut self, event: ConsumerEvent) -> Option<UsageEdge> {
        let changed = match event {
            ConsumerEvent::Connected(id) => self.consumers.insert(id),
            ConsumerEvent::Disconnected(id) => self.consumers.remove(&id),
        };
        if !changed {
            debug!(?event, "Consumer event ignored");
            return None;
        }

        let now_used = !self.consumers.is_empty();
        debug!(?event, consumers = self.consumers.len(), "Consumer set changed");
        if now_used == self.is_used {
            return None;
        }
        self.is_used = now_used;
        Some(if now_used {
            UsageEdge::BecameUsed
        } else {
            UsageEdge::BecameUnused
        })
    }

    /// Run the monitor on its own thread
    ///
    /// `on_edge` runs synchronously on the monitor thread for every edge.
    pub fn spawn<F>(
        events: Receiver<ConsumerEvent>,
        status: Arc<UsageStatus>,
        mut on_edge: F,
    ) -> MonitorHandle
    where
        F: FnMut(UsageEdge) + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);

        info!("Starting source usage monitor");
        let thread_handle = thread::spawn(move || {
            let mut monitor = SourceUsageMonitor::new();
            while !stop.load(Ordering::SeqCst) {
                match events.recv_timeout(timing::MONITOR_WAKEUP) {
                    Ok(event) => {
                        let edge = monitor.handle_event(event);
                        status
                            .consumers
                            .store(monitor.consumers.len(), Ordering::SeqCst);
                        if let Some(edge) = edge {
                            info!(?edge, consumers = monitor.consumers.len(), "Source usage changed");
                            on_edge(edge);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("Consumer event source closed");
                        break;
                    }
                }
            }
            info!("Source usage monitor exiting");
        });

        MonitorHandle {
            stop_signal,
            thread_handle: Some(thread_handle),
        }
    }

    /// Subscribe to `sink` and start the monitor thread
    ///
    /// If the sink cannot deliver consumer events the status is marked degraded
    /// and no thread is started.
    pub fn start<F>(
        sink: &mut dyn VideoSink,
        status: Arc<UsageStatus>,
        on_edge: F,
    ) -> Option<MonitorHandle>
    where
        F: FnMut(UsageEdge) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        match sink.subscribe_consumer_events(tx) {
            Ok(()) => {
                status.set_degraded(false);
                Some(Self::spawn(rx, status, on_edge))
            }
            Err(e) => {
                warn!(error = %e, "Consumer monitoring unavailable; camera must be started manually");
                status.set_degraded(true);
                None
            }
        }
    }
}

/// Owner of the monitor thread; dropping it stops the thread
pub struct MonitorHandle {
    stop_signal: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the thread and wait for it
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            warn!("Usage monitor thread panicked");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!("MonitorHandle dropped, stopping monitor");
            self.stop();
        }
    }
}
