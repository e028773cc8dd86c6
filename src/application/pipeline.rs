//! Frame-streaming detection driver.
//!
//! Pulls frames from a source one at a time, runs the detector, draws the
//! results, counts them and pushes the annotated frame to a sink, notifying
//! the caller after every frame. Sources and sinks release their resources on
//! drop, so every exit path of [`PipelineDriver::run`] cleans up.

use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::annotator::Annotator;
use crate::application::ports::{DetectorPort, SinkProvider, SourceProvider};
use crate::domain::{
    detection::Detection,
    errors::{PipelineError, PipelineResult, PipelineWarning},
    progress::ProgressState,
    stream::OutputArtifact,
    tally::DetectionTally,
};

/// Outcome of a run that did not fail.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// What the sink produced; `None` for display-only sinks.
    pub artifact: Option<OutputArtifact>,
    pub tally: DetectionTally,
    pub progress: ProgressState,
    /// The run ended on the stop signal instead of end of stream.
    pub stopped: bool,
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineReport {
    pub fn frames_processed(&self) -> u64 {
        self.progress.frames_processed
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.contains(&PipelineWarning::EmptyRun)
    }

    /// For callers that treat a run without frames as a failure.
    pub fn require_frames(self) -> PipelineResult<Self> {
        if self.is_empty() {
            return Err(PipelineError::EmptyRun);
        }
        Ok(self)
    }
}

pub struct PipelineDriver<'a> {
    annotator: &'a Annotator,
    stop: Option<watch::Receiver<bool>>,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(annotator: &'a Annotator) -> Self {
        Self { annotator, stop: None }
    }

    /// Stops the run before the next frame once `true` is sent. The frame in
    /// flight is always finished and written.
    pub fn with_stop(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    pub fn run<F>(
        &self,
        source: &dyn SourceProvider,
        detector: &mut dyn DetectorPort,
        sink: &dyn SinkProvider,
        mut on_progress: F,
    ) -> PipelineResult<PipelineReport>
    where
        F: FnMut(&ProgressState, &[Detection]),
    {
        let started = Instant::now();
        let mut source_handle = source.open()?;
        let info = source_handle.info().clone();
        info!(
            "Pipeline: {} ({}x{} @ {:.2} fps, {} frames)",
            source.describe(),
            info.width,
            info.height,
            info.fps,
            info.frames_total.map(|n| n.to_string()).unwrap_or_else(|| "live".into())
        );

        let mut sink_handle = sink.create(&info)?;
        let mut tally = DetectionTally::new();
        let mut progress = ProgressState::new(info.frames_total);
        let mut stopped = false;

        loop {
            if self.stop_requested() {
                stopped = true;
                break;
            }
            let Some(frame) = source_handle.next_frame()? else {
                break;
            };

            let t_infer = Instant::now();
            let detections = detector.detect(&frame)?;
            let infer_ms = t_infer.elapsed().as_secs_f32() * 1000.0;

            let annotated = self.annotator.annotate(&frame, &detections);
            tally.update(&detections);
            sink_handle.write(&annotated)?;

            progress.advance();
            debug!(
                "frame {}: {} detections in {:.1} ms",
                progress.frames_processed,
                detections.len(),
                infer_ms
            );
            on_progress(&progress, &detections);
        }

        // source is released before the encoder is flushed
        drop(source_handle);
        let artifact = sink_handle.finish()?;

        let mut warnings = Vec::new();
        if progress.frames_processed == 0 {
            warn!("Pipeline: no frames processed from {}", source.describe());
            warnings.push(PipelineWarning::EmptyRun);
        }

        info!(
            "Pipeline: {} frames in {:.2}s{} - {}",
            progress.frames_processed,
            started.elapsed().as_secs_f32(),
            if stopped { " (stopped)" } else { "" },
            tally.summary()
        );

        Ok(PipelineReport { artifact, tally, progress, stopped, warnings })
    }
}
