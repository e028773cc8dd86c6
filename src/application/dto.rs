use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{progress::ProgressState, tally::DetectionTally};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDetectionResponse {
    pub width: u32,
    pub height: u32,
    pub tally: DetectionTally,
    pub total: u64,
    pub image_png_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub progress: ProgressState,
    pub percent: Option<u8>,
    pub tally: DetectionTally,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
