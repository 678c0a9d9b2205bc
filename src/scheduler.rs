//! Two-thread pipeline: capture into a single-slot handoff, process at a capped cadence.
//!
//! The capture thread never waits on processing. It overwrites whatever frame
//! is still pending in [`LatestFrame`] and counts the overwrite as a drop, so
//! the processing thread always works on the newest frame. The processing
//! thread owns the [`Tracker`], the `Option<TrackState>` and the sink, and
//! publishes exactly one event per processed frame in capture order.

use crate::{
    config::PipelineConfig,
    error::CaptureError,
    frame_source::{Frame, FrameSource},
    mark_detection::LandmarkModel,
    output::{PipelineEvent, ResultSink},
    tracker::{TrackState, TrackStatus, Tracker},
    Error, Result,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Processing cadence cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TargetFps {
    Fps15,
    #[default]
    Fps30,
    Fps60,
}

impl TargetFps {
    #[must_use]
    pub const fn fps(self) -> u32 {
        match self {
            Self::Fps15 => 15,
            Self::Fps30 => 30,
            Self::Fps60 => 60,
        }
    }

    /// Minimum time between the starts of two processed frames
    #[must_use]
    pub fn frame_interval(self) -> Duration {
        Duration::from_secs(1) / self.fps()
    }
}

impl TryFrom<u32> for TargetFps {
    type Error = String;

    fn try_from(fps: u32) -> std::result::Result<Self, Self::Error> {
        match fps {
            15 => Ok(Self::Fps15),
            30 => Ok(Self::Fps30),
            60 => Ok(Self::Fps60),
            other => Err(format!("unsupported target fps {other}, expected 15, 30 or 60")),
        }
    }
}

impl From<TargetFps> for u32 {
    fn from(fps: TargetFps) -> Self {
        fps.fps()
    }
}

impl std::fmt::Display for TargetFps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} fps", self.fps())
    }
}

/// Lifecycle of the tracking slot as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Tracking,
    Lost,
    Stopped,
}

impl SlotState {
    /// State while a frame is being processed
    #[must_use]
    pub const fn begin_frame(self, has_track: bool) -> Self {
        match self {
            Self::Stopped => Self::Stopped,
            _ if has_track => Self::Tracking,
            _ => Self::Acquiring,
        }
    }

    /// State after the tracker reported `status` for the frame
    #[must_use]
    pub const fn end_frame(self, status: TrackStatus) -> Self {
        match (self, status) {
            (Self::Stopped, _) => Self::Stopped,
            (_, TrackStatus::Tracking | TrackStatus::Reacquiring) => Self::Tracking,
            (_, TrackStatus::Lost) => Self::Lost,
        }
    }
}

/// What the processing thread woke up to
#[derive(Debug)]
pub enum SlotEvent {
    Frame(Frame),
    Fault(CaptureError),
    Closed,
    Timeout,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    fault: Option<CaptureError>,
    closed: bool,
    dropped: u64,
}

/// Single-slot, overwrite-on-full frame handoff
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl LatestFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, replacing any unprocessed one. Returns `true` if a frame was dropped.
    pub fn publish(&self, frame: Frame) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let overwrote = slot.frame.replace(frame).is_some();
        if overwrote {
            slot.dropped += 1;
        }
        drop(slot);
        self.ready.notify_one();
        overwrote
    }

    /// Record a fatal capture fault; a pending frame is still delivered first
    pub fn fail(&self, fault: CaptureError) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.fault = Some(fault);
        drop(slot);
        self.ready.notify_one();
    }

    /// Wake the consumer for shutdown
    pub fn close(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.closed = true;
        drop(slot);
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for the next event. Frames take priority over a fault,
    /// a fault over closing.
    pub fn wait(&self, timeout: Duration) -> SlotEvent {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |s| s.frame.is_none() && s.fault.is_none() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(frame) = slot.frame.take() {
            SlotEvent::Frame(frame)
        } else if let Some(fault) = slot.fault.take() {
            SlotEvent::Fault(fault)
        } else if slot.closed {
            SlotEvent::Closed
        } else {
            SlotEvent::Timeout
        }
    }

    /// Frames overwritten before processing
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).dropped
    }
}

struct StopFlag {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Cloneable shutdown request shared by both pipeline threads
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopFlag>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StopFlag {
                stopped: AtomicBool::new(false),
                lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn request(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.wake.notify_all();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless a stop arrives first. Returns `true` if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _unused = self
            .inner
            .wake
            .wait_timeout_while(guard, duration, |_| !self.is_stopped())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_stopped()
    }
}

/// Counters returned when the pipeline shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Frames run through the tracker
    pub processed: u64,
    /// Frames overwritten before processing
    pub dropped: u64,
    /// Events handed to the sink, including fault and stop events
    pub published: u64,
    /// Slot state when processing ended; `Stopped` after a capture fault
    pub final_state: SlotState,
}

enum Control {
    SwapModel(Box<dyn LandmarkModel>),
}

struct ProcessOutcome {
    processed: u64,
    published: u64,
    final_state: SlotState,
}

struct CaptureLoop {
    source: Box<dyn FrameSource>,
    camera_index: i32,
    slot: Arc<LatestFrame>,
    stop: StopHandle,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl CaptureLoop {
    fn run(mut self) {
        // Reconnect budget, refilled by every successful read
        let mut attempts_used = 0;
        while !self.stop.is_stopped() {
            match self.source.read() {
                Ok(frame) => {
                    attempts_used = 0;
                    let sequence = frame.sequence();
                    if self.slot.publish(frame) {
                        debug!("Dropped a pending frame in favour of frame {}", sequence);
                    }
                }
                Err(e) => {
                    warn!("Capture failed: {}", e);
                    if let Err(fault) = self.reconnect(e, &mut attempts_used) {
                        if !self.stop.is_stopped() {
                            error!("Capture lost for good: {}", fault);
                            self.slot.fail(fault);
                        }
                        break;
                    }
                }
            }
        }
        self.source.close();
        debug!("Capture thread exiting");
    }

    /// Reopen the source until it succeeds or the budget runs out; the last error is returned
    fn reconnect(&mut self, mut last: CaptureError, attempts_used: &mut u32) -> std::result::Result<(), CaptureError> {
        while *attempts_used < self.reconnect_attempts {
            *attempts_used += 1;
            if self.stop.sleep(self.reconnect_delay) {
                return Err(last);
            }
            warn!(
                "Reconnecting to camera {} (attempt {}/{})",
                self.camera_index, attempts_used, self.reconnect_attempts
            );
            self.source.close();
            match self.source.open(self.camera_index) {
                Ok(()) => {
                    info!("Camera {} reconnected", self.camera_index);
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

struct ProcessLoop {
    tracker: Tracker,
    sink: Box<dyn ResultSink>,
    slot: Arc<LatestFrame>,
    stop: StopHandle,
    control: Receiver<Control>,
    interval: Duration,
}

impl ProcessLoop {
    fn run(mut self) -> ProcessOutcome {
        let mut track: Option<TrackState> = None;
        let mut state = SlotState::Idle;
        let mut processed = 0u64;
        let mut published = 0u64;
        let mut next_due = Instant::now();

        while !self.stop.is_stopped() {
            self.apply_controls(&mut track);

            match self.slot.wait(self.interval) {
                SlotEvent::Frame(frame) => {
                    state = state.begin_frame(track.is_some());
                    let started = Instant::now();
                    let result = self.tracker.advance(&frame, &mut track);
                    let previous = state;
                    state = state.end_frame(result.status);
                    if previous != state {
                        debug!("Slot {:?} -> {:?} at frame {}", previous, state, frame.sequence());
                    }
                    debug!(
                        "Frame {} processed in {:.1}ms",
                        frame.sequence(),
                        started.elapsed().as_secs_f64() * 1000.0
                    );
                    self.sink.publish(PipelineEvent::Result(result));
                    processed += 1;
                    published += 1;

                    // Cap the cadence; an overrun restarts the schedule from now
                    next_due += self.interval;
                    let now = Instant::now();
                    if next_due > now {
                        self.stop.sleep(next_due - now);
                    } else {
                        next_due = now;
                    }
                }
                SlotEvent::Fault(fault) => {
                    self.sink.publish(PipelineEvent::Fault(fault));
                    published += 1;
                    state = SlotState::Stopped;
                    break;
                }
                SlotEvent::Closed => break,
                SlotEvent::Timeout => {}
            }
        }

        self.sink.publish(PipelineEvent::Stopped);
        published += 1;
        debug!("Processing thread exiting after {} frames", processed);
        ProcessOutcome {
            processed,
            published,
            final_state: state,
        }
    }

    fn apply_controls(&mut self, track: &mut Option<TrackState>) {
        loop {
            match self.control.try_recv() {
                Ok(Control::SwapModel(model)) => {
                    self.tracker.set_model(model);
                    // Landmarks from the old model must not seed the new crop
                    *track = None;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return,
            }
        }
    }
}

/// Entry point for running the capture and processing threads
pub struct Pipeline;

impl Pipeline {
    /// Open the source and start both threads
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capture`] if the camera cannot be opened, or an I/O
    /// error if a thread cannot be spawned
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        camera_index: i32,
        tracker: Tracker,
        sink: Box<dyn ResultSink>,
        config: &PipelineConfig,
    ) -> Result<PipelineHandle> {
        source.open(camera_index)?;
        info!(
            "Starting pipeline on camera {} at {}",
            camera_index, config.target_fps
        );

        let slot = Arc::new(LatestFrame::new());
        let stop = StopHandle::new();
        let (control_tx, control_rx) = crossbeam_channel::bounded(1);

        let capture = CaptureLoop {
            source,
            camera_index,
            slot: Arc::clone(&slot),
            stop: stop.clone(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        };
        let capture = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture.run())?;

        let processing = ProcessLoop {
            tracker,
            sink,
            slot: Arc::clone(&slot),
            stop: stop.clone(),
            control: control_rx,
            interval: config.target_fps.frame_interval(),
        };
        let processing = match thread::Builder::new()
            .name("processing".to_string())
            .spawn(move || processing.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                stop.request();
                if capture.join().is_err() {
                    error!("Capture thread panicked");
                }
                return Err(Error::Io(e));
            }
        };

        Ok(PipelineHandle {
            stop,
            slot,
            control: control_tx,
            capture: Some(capture),
            processing: Some(processing),
        })
    }
}

/// Running pipeline. Dropping it stops and joins both threads.
pub struct PipelineHandle {
    stop: StopHandle,
    slot: Arc<LatestFrame>,
    control: Sender<Control>,
    capture: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<ProcessOutcome>>,
}

impl PipelineHandle {
    /// Handle for requesting shutdown from elsewhere, e.g. a signal handler
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Replace the landmark model before the next frame; the current track is dropped
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the processing thread has already exited
    pub fn swap_model(&self, model: Box<dyn LandmarkModel>) -> Result<()> {
        info!("Queueing landmark model swap to {}", model.name());
        self.control
            .send(Control::SwapModel(model))
            .map_err(|_| Error::InvalidInput("pipeline is no longer running".to_string()))
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.processing.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Request shutdown and join both threads
    pub fn stop(mut self) -> RunStats {
        self.shutdown()
    }

    /// Block until processing ends on its own (fault or external stop), then join
    pub fn wait(mut self) -> RunStats {
        let outcome = self.join_processing();
        self.stop.request();
        self.slot.close();
        self.join_capture();
        self.stats(outcome)
    }

    fn shutdown(&mut self) -> RunStats {
        self.stop.request();
        self.slot.close();
        let outcome = self.join_processing();
        self.join_capture();
        self.stats(outcome)
    }

    fn join_processing(&mut self) -> Option<ProcessOutcome> {
        let handle = self.processing.take()?;
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                error!("Processing thread panicked");
                None
            }
        }
    }

    fn join_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }

    fn stats(&self, outcome: Option<ProcessOutcome>) -> RunStats {
        let outcome = outcome.unwrap_or(ProcessOutcome {
            processed: 0,
            published: 0,
            final_state: SlotState::Stopped,
        });
        let stats = RunStats {
            processed: outcome.processed,
            dropped: self.slot.dropped(),
            published: outcome.published,
            final_state: outcome.final_state,
        };
        info!(
            "Pipeline stopped: {} processed, {} dropped, {} published",
            stats.processed, stats.dropped, stats.published
        );
        stats
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.processing.is_some() || self.capture.is_some() {
            self.shutdown();
        }
    }
}
