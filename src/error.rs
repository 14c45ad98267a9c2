pub type GifcapResult<T> = Result<T, GifcapError>;

#[derive(thiserror::Error, Debug)]
pub enum GifcapError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GifcapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }
}
