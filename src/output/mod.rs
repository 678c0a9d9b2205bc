//! Consumers of pipeline results.

/// VMC protocol sender over OSC/UDP
pub mod vmc;

use crate::{error::CaptureError, tracker::TrackingResult};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

pub use vmc::VmcSink;

/// Something the pipeline tells its consumer, in frame order
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// One processed frame
    Result(TrackingResult),
    /// Capture failed for good; no results follow
    Fault(CaptureError),
    /// The pipeline has shut down; always the last event
    Stopped,
}

/// Receives every pipeline event on the processing thread
pub trait ResultSink: Send {
    fn publish(&mut self, event: PipelineEvent);
}

impl<F> ResultSink for F
where
    F: FnMut(PipelineEvent) + Send,
{
    fn publish(&mut self, event: PipelineEvent) {
        self(event);
    }
}

/// Forwards events into an unbounded crossbeam channel
pub struct ChannelSink {
    sender: Sender<PipelineEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    #[must_use]
    pub fn new() -> (Self, Receiver<PipelineEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl ResultSink for ChannelSink {
    fn publish(&mut self, event: PipelineEvent) {
        if self.sender.send(event).is_err() {
            debug!("Result receiver dropped; discarding event");
        }
    }
}

/// Logs a one-line summary per event
#[derive(Debug, Default)]
pub struct LogSink {
    last_status: Option<crate::tracker::TrackStatus>,
}

impl ResultSink for LogSink {
    fn publish(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Result(result) => {
                if self.last_status != Some(result.status) {
                    info!("Frame {}: {:?}", result.sequence, result.status);
                    self.last_status = Some(result.status);
                }
                if result.pose.valid {
                    let euler = result.pose.euler_degrees();
                    debug!(
                        "Frame {}: pitch {:.1} yaw {:.1} roll {:.1} conf {:.2} err {:.2}px",
                        result.sequence, euler.pitch, euler.yaw, euler.roll, result.confidence, result.pose.reprojection_error
                    );
                }
            }
            PipelineEvent::Fault(e) => warn!("Capture fault: {}", e),
            PipelineEvent::Stopped => info!("Pipeline stopped"),
        }
    }
}

/// Delivers every event to several sinks in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ResultSink for FanoutSink {
    fn publish(&mut self, event: PipelineEvent) {
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}
