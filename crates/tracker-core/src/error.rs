use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    #[error("index not ready for frame {0}")]
    IndexNotReady(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("segment optimization cancelled")]
    Cancelled,

    #[error("timed out waiting for queue operation")]
    Timeout,

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
