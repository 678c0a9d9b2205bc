//! Main application module wiring configuration into a running pipeline.

use crate::{
    config::Config,
    error::Result,
    face_detection::ScrfdLocator,
    frame_source::{CameraSource, FrameSource},
    mark_detection::load_landmark_model,
    output::{FanoutSink, LogSink, ResultSink, VmcSink},
    pose_estimation::PoseEstimator,
    scheduler::{Pipeline, PipelineHandle, RunStats},
    tracker::Tracker,
};
use log::{info, warn};

/// Main application struct
pub struct App {
    config: Config,
    tracker: Tracker,
    source: Box<dyn FrameSource>,
    sinks: FanoutSink,
}

impl App {
    /// Load the models and build the sinks described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is out of range or a model fails to load
    pub fn new(config: Config) -> Result<Self> {
        info!("Initializing face pose tracker");
        config.validate_ranges()?;

        let locator = ScrfdLocator::from_config(&config.model)?;
        let model = load_landmark_model(&config.model)?;
        let pose = PoseEstimator::from_config(&config.pose, config.capture.width, config.capture.height)?;
        let tracker = Tracker::new(
            Box::new(locator),
            model,
            pose,
            config.tracking.clone(),
            config.filter.clone(),
        )?;

        let source = CameraSource::new(
            config.capture.clone(),
            f64::from(config.pipeline.target_fps.fps()),
        );

        let mut sinks = FanoutSink::new().with(Box::new(LogSink::default()));
        if config.vmc.enabled {
            match VmcSink::from_config(&config.vmc) {
                Ok(vmc) => sinks = sinks.with(Box::new(vmc)),
                // Tracking still runs without a receiver
                Err(e) => warn!("VMC output disabled: {}", e),
            }
        }

        Ok(Self {
            config,
            tracker,
            source: Box::new(source),
            sinks,
        })
    }

    /// Also deliver events to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sinks = self.sinks.with(sink);
        self
    }

    /// Capture from `source` instead of the configured camera
    #[must_use]
    pub fn with_source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Open the camera and start the pipeline threads
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Capture`] if the camera cannot be opened
    pub fn start(self) -> Result<PipelineHandle> {
        Pipeline::spawn(
            self.source,
            self.config.capture.camera_index,
            self.tracker,
            Box::new(self.sinks),
            &self.config.pipeline,
        )
    }

    /// Run until the capture fails for good or a stop is requested
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Capture`] if the camera cannot be opened
    pub fn run(self) -> Result<RunStats> {
        info!("Starting main application loop");
        let handle = self.start()?;
        Ok(handle.wait())
    }
}
