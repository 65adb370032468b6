// SPDX-License-Identifier: GPL-3.0-only

//! Consumer detection by polling `pw-dump`
//!
//! Every poll finds the virtual camera's node and collects the input nodes of
//! all links leaving it. The difference to the previous poll becomes
//! connect/disconnect events.

use super::{ConsumerEvent, ConsumerId};
use crate::constants::{sink, timing};
use crate::errors::SinkError;
use std::collections::BTreeSet;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Find the node called `node_name` and the ids of nodes linked to its output
///
/// Returns `None` if the node is not (yet) registered with PipeWire.
pub fn linked_consumers(
    objects: &[serde_json::Value],
    node_name: &str,
) -> Option<(u32, BTreeSet<ConsumerId>)> {
    let node_id = objects.iter().find_map(|obj| {
        if obj.get("type").and_then(|v| v.as_str()) != Some("PipeWire:Interface:Node") {
            return None;
        }
        let props = obj.get("info")?.get("props")?;
        if props.get("media.class").and_then(|v| v.as_str()) != Some(sink::MEDIA_CLASS) {
            return None;
        }
        let named = ["node.name", "media.name"]
            .iter()
            .any(|key| props.get(*key).and_then(|v| v.as_str()) == Some(node_name));
        if !named {
            return None;
        }
        obj.get("id").and_then(|v| v.as_u64()).map(|id| id as u32)
    })?;

    let consumers = objects
        .iter()
        .filter(|obj| {
            obj.get("type").and_then(|v| v.as_str()) == Some("PipeWire:Interface:Link")
        })
        .filter_map(|obj| {
            let info = obj.get("info")?;
            let output = info.get("output-node-id")?.as_u64()?;
            if output != node_id as u64 {
                return None;
            }
            let input = info.get("input-node-id")?.as_u64()?;
            // Node id 0 is the core, never a consumer
            (input != 0).then_some(input as ConsumerId)
        })
        .collect();

    Some((node_id, consumers))
}

/// Events that turn `previous` into `current`, disconnects first
pub fn diff_consumers(
    previous: &BTreeSet<ConsumerId>,
    current: &BTreeSet<ConsumerId>,
) -> Vec<ConsumerEvent> {
    previous
        .difference(current)
        .map(|&id| ConsumerEvent::Disconnected(id))
        .chain(
            current
                .difference(previous)
                .map(|&id| ConsumerEvent::Connected(id)),
        )
        .collect()
}

/// Run `pw-dump` once and parse its JSON
fn pw_dump() -> Result<Vec<serde_json::Value>, String> {
    let output = Command::new("pw-dump")
        .output()
        .map_err(|e| format!("Failed to run pw-dump: {}", e))?;
    if !output.status.success() {
        return Err(format!("pw-dump exited with {}", output.status));
    }
    serde_json::from_slice(&output.stdout)
        .map_err(|e| format!("Failed to parse JSON from pw-dump: {}", e))
}

/// Background thread that polls `pw-dump` and reports consumer changes
///
/// Stops when dropped or when the receiving side of the channel goes away.
pub struct ConsumerWatcher {
    stop_signal: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ConsumerWatcher {
    /// Start watching `node_name`
    ///
    /// Fails if `pw-dump` cannot be executed at all.
    pub fn spawn(
        node_name: &str,
        poll_interval: Duration,
        events: Sender<ConsumerEvent>,
    ) -> Result<Self, SinkError> {
        let version = Command::new("pw-dump").arg("--version").output().map_err(|e| {
            SinkError::ConsumerEventsUnavailable(format!("pw-dump not runnable: {}", e))
        })?;
        if !version.status.success() {
            return Err(SinkError::ConsumerEventsUnavailable(format!(
                "pw-dump --version exited with {}",
                version.status
            )));
        }

        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let node_name = node_name.to_string();

        info!(node = %node_name, interval_ms = poll_interval.as_millis() as u64, "Starting consumer watcher");

        let thread_handle = thread::Builder::new()
            .name("camfx-consumers".into())
            .spawn(move || watch(&node_name, poll_interval, &events, &stop))
            .map_err(|e| SinkError::ConsumerEventsUnavailable(e.to_string()))?;

        Ok(Self {
            stop_signal,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            warn!("Consumer watcher thread panicked");
        }
    }
}

impl Drop for ConsumerWatcher {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!("ConsumerWatcher dropped, stopping");
            self.stop();
        }
    }
}

fn watch(node_name: &str, poll_interval: Duration, events: &Sender<ConsumerEvent>, stop: &AtomicBool) {
    let mut known = BTreeSet::new();
    let mut node_seen = false;

    while !stop.load(Ordering::SeqCst) {
        match pw_dump() {
            Ok(objects) => {
                let current = match linked_consumers(&objects, node_name) {
                    Some((node_id, consumers)) => {
                        if !node_seen {
                            debug!(node_id, "Virtual camera node registered");
                            node_seen = true;
                        }
                        consumers
                    }
                    None => BTreeSet::new(),
                };
                for event in diff_consumers(&known, &current) {
                    debug!(?event, "Consumer change");
                    if events.send(event).is_err() {
                        debug!("Consumer event receiver gone, watcher exiting");
                        return;
                    }
                }
                known = current;
            }
            // Keep the last known set; a transient failure must not look like a disconnect
            Err(e) => warn!(error = %e, "Consumer poll failed"),
        }

        let deadline = Instant::now() + poll_interval;
        while !stop.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(timing::MONITOR_WAKEUP));
        }
    }
    debug!("Consumer watcher stopped");
}
