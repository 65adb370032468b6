// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera output
//!
//! ```text
//!   FrameLoop ──push_frame()──▶ appsrc → videoconvert → pipewiresink
//!                                                            │
//!   SourceUsageMonitor ◀──ConsumerEvent── pw-dump watcher ◀──┘ links
//! ```
//!
//! The sink is owned by the frame loop thread. Consumer notifications travel
//! over a channel so the monitor never touches the sink itself.

mod consumers;
mod pipeline;

pub use consumers::{ConsumerWatcher, diff_consumers, linked_consumers};
pub use pipeline::VirtualCameraPipeline;

use crate::backends::types::Frame;
use crate::errors::SinkError;
use std::sync::mpsc::Sender;

/// PipeWire id of a node reading from the virtual camera
pub type ConsumerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerEvent {
    Connected(ConsumerId),
    Disconnected(ConsumerId),
}

/// Result of a non-blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// The sink queue is full; the frame was dropped
    Backpressure,
}

/// Downstream video sink; dropping it closes the output
pub trait VideoSink: Send {
    /// Hand one frame to the sink without blocking
    fn push_frame(&mut self, frame: Frame) -> Result<PushOutcome, SinkError>;

    /// Start delivering consumer connect/disconnect events to `events`
    fn subscribe_consumer_events(
        &mut self,
        events: Sender<ConsumerEvent>,
    ) -> Result<(), SinkError>;
}
