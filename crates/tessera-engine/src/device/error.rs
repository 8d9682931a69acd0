/// Errors surfaced to callers of the engine API.
///
/// Failures inside tasks never reach this type: they run on the worker
/// thread and are logged there.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The backend factory failed on the worker thread.
    #[error("native backend initialization failed: {0:#}")]
    Init(anyhow::Error),

    #[error("failed to spawn thread `{name}`")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine was shut down before the request could complete.
    #[error("engine has shut down")]
    ShutDown,

    /// A blocking call was issued from the thread that would have to serve it.
    #[error("blocking call issued from worker thread `{thread}`")]
    Reentrant { thread: String },

    #[error("surface {surface} used after dispose")]
    Disposed { surface: String },

    #[error("surface {surface} is an immutable image")]
    Immutable { surface: String },

    #[error("surface {surface} cannot sample from itself")]
    SelfSample { surface: String },

    #[error("invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("expected {expected} pixels, got {actual}")]
    PixelCount { expected: usize, actual: usize },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("pixel readback failed: {0}")]
    Readback(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
