use thiserror::Error;

/// Failures of the opaque detector. Never retried.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("detector unavailable: {0}")]
    Unavailable(String),
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not open source: {0}")]
    SourceOpen(String),
    #[error("could not create output: {0}")]
    SinkOpen(String),
    #[error("reading frame failed: {0}")]
    SourceRead(String),
    #[error("writing frame failed: {0}")]
    SinkWrite(String),
    #[error("detector invocation failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("no frames were processed")]
    EmptyRun,
}

/// Non-fatal conditions reported alongside a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineWarning {
    EmptyRun,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type DomainResult<T> = Result<T, DomainError>;
