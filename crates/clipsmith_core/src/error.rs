use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("track not found: {0}")]
    TrackNotFound(uuid::Uuid),

    #[error("clip not found: {0}")]
    ClipNotFound(uuid::Uuid),

    #[error("clips overlap on the timeline")]
    OverlapDetected,

    #[error("invalid trim window: {0}")]
    InvalidTrim(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid overlay window: {0}")]
    InvalidOverlay(String),

    #[error("invalid audio layer: {0}")]
    InvalidLayer(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
