use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::dto::{JobState, JobStatusResponse};
use crate::domain::{detection::Detection, progress::ProgressState, tally::DetectionTally};

/// Finished jobs kept by [`JobRegistry::new`].
pub const DEFAULT_FINISHED_JOBS: usize = 32;

#[derive(Debug, Clone)]
struct VideoJob {
    state: JobState,
    progress: ProgressState,
    tally: DetectionTally,
    output: Option<PathBuf>,
    error: Option<String>,
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<Uuid, VideoJob>,
    /// Completed and failed jobs, oldest first.
    finished: VecDeque<Uuid>,
}

impl Jobs {
    /// Moves a job to the finished queue and drops the oldest finished jobs
    /// beyond `cap`. Returns the outputs of evicted jobs.
    fn finish(&mut self, id: Uuid, cap: usize) -> Vec<PathBuf> {
        self.finished.push_back(id);
        let mut evicted = Vec::new();
        while self.finished.len() > cap {
            let Some(old) = self.finished.pop_front() else { break };
            if let Some(job) = self.by_id.remove(&old) {
                debug!("Evicting job {}", old);
                evicted.extend(job.output);
            }
        }
        evicted
    }
}

/// In-memory record of background video jobs. Updated from the pipeline
/// thread on every frame, read by status requests. Keeps a bounded number of
/// finished jobs; evicting one deletes its output file.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<Jobs>>,
    max_finished: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FINISHED_JOBS)
    }
}

fn remove_outputs(paths: Vec<PathBuf>) {
    for path in paths {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `max_finished` completed or failed jobs (at least one).
    pub fn with_capacity(max_finished: usize) -> Self {
        Self { jobs: Arc::default(), max_finished: max_finished.max(1) }
    }

    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let job = VideoJob {
            state: JobState::Running,
            progress: ProgressState::default(),
            tally: DetectionTally::new(),
            output: None,
            error: None,
        };
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.by_id.insert(id, job);
        }
        id
    }

    pub fn record_frame(&self, id: Uuid, progress: &ProgressState, detections: &[Detection]) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(job) = jobs.by_id.get_mut(&id) {
                job.progress = *progress;
                job.tally.update(detections);
            }
        }
    }

    /// Marks the job done. The final tally replaces the running one.
    pub fn complete(&self, id: Uuid, output: PathBuf, tally: DetectionTally, progress: ProgressState) {
        let evicted = match self.jobs.write() {
            Ok(mut jobs) => match jobs.by_id.get_mut(&id) {
                Some(job) => {
                    job.state = JobState::Completed;
                    job.output = Some(output);
                    job.tally = tally;
                    job.progress = progress;
                    jobs.finish(id, self.max_finished)
                }
                None => Vec::new(),
            },
            Err(_) => Vec::new(),
        };
        remove_outputs(evicted);
    }

    pub fn fail(&self, id: Uuid, error: String) {
        let evicted = match self.jobs.write() {
            Ok(mut jobs) => match jobs.by_id.get_mut(&id) {
                Some(job) => {
                    job.state = JobState::Failed;
                    job.error = Some(error);
                    jobs.finish(id, self.max_finished)
                }
                None => Vec::new(),
            },
            Err(_) => Vec::new(),
        };
        remove_outputs(evicted);
    }

    pub fn status(&self, id: Uuid) -> Option<JobStatusResponse> {
        let jobs = self.jobs.read().ok()?;
        let job = jobs.by_id.get(&id)?;
        Some(JobStatusResponse {
            job_id: id,
            state: job.state,
            progress: job.progress,
            percent: job.progress.percent(),
            tally: job.tally.clone(),
            error: job.error.clone(),
        })
    }

    /// The processed file of a completed job.
    pub fn output(&self, id: Uuid) -> Option<PathBuf> {
        let jobs = self.jobs.read().ok()?;
        let job = jobs.by_id.get(&id)?;
        match job.state {
            JobState::Completed => job.output.clone(),
            _ => None,
        }
    }
}
