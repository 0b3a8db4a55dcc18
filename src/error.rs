use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("worker queue is full ({0} jobs waiting)")]
    QueueFull(usize),

    #[error("inference worker is not running")]
    WorkerStopped,

    #[error("job {0} did not finish within {1:?}")]
    Timeout(u64, std::time::Duration),

    #[error("face index {index} out of range for {len} detections")]
    IndexOutOfRange { index: usize, len: usize },
}

impl Error {
    pub(crate) fn model(e: impl std::fmt::Display) -> Self {
        Error::ModelInvocation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
