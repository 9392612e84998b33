use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("queue error: {0}")]
    Queue(#[from] waypoint_queue::QueueError),
    #[error("core error: {0}")]
    Core(#[from] waypoint_core::CoreError),
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("shutdown timed out waiting for: {0}")]
    ShutdownTimeout(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
