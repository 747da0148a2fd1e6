use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] tch::TchError),

    #[error("batch index {index} out of range ({count} batches)")]
    BatchIndexOutOfRange { index: usize, count: usize },

    #[error("no image file registered for image id {0}")]
    MissingImage(i64),
}

pub type Result<T> = std::result::Result<T, DatasetError>;
