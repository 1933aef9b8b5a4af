use thiserror::Error;

use crate::inliner::InlineError;
use crate::tracking::TrackingError;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("email content is empty")]
    EmptyContent,
}

/// Failure of a single post-processing step. Never reaches the caller of
/// `generate`; the step's input is kept instead.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("could not parse markup: {0}")]
    Parse(String),

    #[error("css inlining failed: {0}")]
    Inline(#[from] InlineError),

    #[error("link tracking failed: {0}")]
    Tracking(#[from] TrackingError),
}
