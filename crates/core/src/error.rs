/// Result alias that carries the custom [`PulseError`] type.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    /// A capture block arrived with a non-nominal status (overflow or
    /// underflow). Informational only; the block is skipped.
    #[error("capture overrun: {0}")]
    CaptureOverrun(String),
    /// The audio device could not be opened or the stream failed to start.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// No show with the requested name is registered.
    #[error("unknown show `{0}`")]
    UnknownShow(String),
    /// The render surface reported a failure it cannot recover from.
    #[error("renderer failed: {0}")]
    Renderer(String),
    /// The spectral transform rejected its buffers.
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
    /// Free-form message for failures without a dedicated kind.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration files that fail to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PulseError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns `true` for errors that must end the current session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::CaptureOverrun(_))
    }
}

impl From<&str> for PulseError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PulseError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
