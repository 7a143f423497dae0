/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the pipeline can
/// tell recoverable platform failures (a vanished thread) from everything else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The chat platform reports the user's thread no longer exists.
    #[error("thread {thread_id} is no longer valid")]
    ThreadInvalid { thread_id: i32 },

    #[error("classifier unavailable: {0}")]
    Classifier(String),

    #[error("challenge generator unavailable: {0}")]
    Generator(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn is_thread_invalid(&self) -> bool {
        matches!(self, Error::ThreadInvalid { .. })
    }

    /// Local state could not be read or written.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Io(_) | Error::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
