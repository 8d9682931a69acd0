//! Tessera engine crate.
//!
//! Multi-threaded GPU command batching: producers draw onto surfaces from any
//! thread, draws with matching state merge into batches, and a single worker
//! thread replays flushed batches against a native [`backend::Backend`].

pub mod backend;
pub mod coords;
pub mod device;
pub mod logging;
pub mod paint;
pub mod pool;
pub mod render;

pub use device::{Engine, EngineConfig, EngineError, EngineResult, EngineStats};
pub use render::{BlendMode, DrawState, Painter, Surface, Vertex};
