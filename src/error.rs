pub type OutriderResult<T> = Result<T, OutriderError>;

#[derive(thiserror::Error, Debug)]
pub enum OutriderError {
    /// The external tool is not installed (detected before spawn).
    #[error("tool unavailable: {0}")]
    Unavailable(String),

    /// The external process could not be started.
    #[error("spawn failure: {0}")]
    Spawn(String),

    /// The process ran but produced no usable result.
    #[error("tool error: {0}")]
    Tool(String),

    /// A structured status line could not be interpreted where one was required.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An ffmpeg/ffprobe invocation failed.
    #[error("media error: {0}")]
    Media(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OutriderError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// `true` for errors the caller should surface as an installation hint
    /// rather than a runtime failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
