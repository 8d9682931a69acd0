//! Color model shared by the painter and backends.
//!
//! Texel data crosses the engine boundary as packed `0xAARRGGBB` `u32`s;
//! backends convert to their native byte layout.

pub mod color;

pub use color::{argb_to_rgba8, rgba8_to_argb, Color};
