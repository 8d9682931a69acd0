//! Surfaces, draw batching and the painter.
//!
//! Producers draw on any thread; each draw lands in its target surface's
//! open batch. Flushed batches become [`Task::Draw`](crate::device::Task)
//! entries executed by the backend on the GPU worker.
//!
//! Convention:
//! - vertex positions are target pixels (top-left origin, +Y down)
//! - texcoords are normalized to the sampled surface
//! - backends convert positions to NDC

mod batch;
mod blend;
mod flags;
mod painter;
mod surface;

pub use batch::{DrawBatch, Vertex};
pub use blend::{BlendEquation, BlendMode, BlendOp, BlendWeight};
pub use flags::{DrawFlags, Tiling};
pub use painter::Painter;
pub use surface::{DrawState, Surface, SurfaceKind};
