//! Engine runtime: task queue, worker threads and configuration.
//!
//! This module is responsible for:
//! - running the native backend on a dedicated GPU worker thread
//! - the bounded FIFO task queue feeding it (the only backpressure point)
//! - a second worker for completion callbacks
//! - engine lifecycle and error reporting

mod config;
pub(crate) mod engine;
mod error;
pub(crate) mod task;
mod worker;

pub use config::EngineConfig;
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, EngineResult};
pub use task::{CustomTask, PixelCallback, Task};
pub use worker::WorkerStats;
