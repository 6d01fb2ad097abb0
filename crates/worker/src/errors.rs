//! Worker error types

use harvester_common::errors::AppError;
use harvester_common::issues::Issue;
use thiserror::Error;

/// Errors surfaced by adapter flows. Contextual errors carry the issue that
/// ends up on the run; everything else is infrastructure.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("{0}")]
    Contextual(Issue),

    #[error(transparent)]
    App(#[from] AppError),
}

impl FlowError {
    /// The issue to record on the run, when there is one
    pub fn issue(&self) -> Option<&Issue> {
        match self {
            FlowError::Contextual(issue) => Some(issue),
            FlowError::App(_) => None,
        }
    }
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error("Run execution failed: {message}")]
    Execution { message: String },
}

impl From<WorkerError> for FlowError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::App(app) => FlowError::App(app),
            WorkerError::Execution { message } => {
                FlowError::App(AppError::Other(anyhow::anyhow!(message)))
            }
        }
    }
}

impl From<FlowError> for WorkerError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::App(app) => WorkerError::App(app),
            FlowError::Contextual(issue) => WorkerError::Execution {
                message: issue.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
