use std::fmt;

use clipsmith_core::types::{SourceRef, TimeUs};
use thiserror::Error;

use crate::probe::ProbeError;
use crate::security::SecurityViolation;
use crate::validate::ValidationReport;

/// One failed source resolution; the resolver reports every failure in a
/// single batch rather than stopping at the first.
#[derive(Debug)]
pub struct SourceFailure {
    pub source: SourceRef,
    pub cause: ProbeError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.cause)
    }
}

fn render_failures(failures: &[SourceFailure]) -> String {
    let items: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    format!(
        "failed to resolve {} source(s): {}",
        failures.len(),
        items.join("; ")
    )
}

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("{}", render_failures(.0))]
    InputResolution(Vec<SourceFailure>),

    #[error("invalid timeline: {0}")]
    InvalidTimeline(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("output duration {total} exceeds configured maximum {max}")]
    DurationExceeded { total: TimeUs, max: TimeUs },

    #[error("{0}")]
    Validation(ValidationReport),

    #[error("security violation: {0}")]
    Security(SecurityViolation),

    #[error("ffmpeg not found")]
    FfmpegNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SynthError>;
