//! Native rendering backends.
//!
//! A [`Backend`] is created on the GPU worker thread and never leaves it.
//! Every call arrives in task order, so implementations need no locking.
//!
//! Textures are named by [`TextureId`]; backends keep their own map from id
//! to native texture. Pixel data crosses this boundary as `0xAARRGGBB`
//! `u32`s in row-major order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use crate::coords::CropRect;
use crate::paint::Color;
use crate::render::{BlendMode, DrawFlags};

pub mod recording;
pub mod wgpu_backend;

pub use recording::{Call, DrawRecord, RecordingBackend, RecordingLog};
pub use wgpu_backend::{WgpuBackend, WgpuInit};

/// Engine-unique texture handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// One flushed batch, as seen by a backend.
///
/// Positions are target pixels. Texcoords are normalized to the source
/// texture. Absent colors mean opaque white; an absent texture means a
/// 1x1 white texel.
#[derive(Debug, Copy, Clone)]
pub struct GeometryCall<'a> {
    pub target: TextureId,
    pub target_width: u32,
    pub target_height: u32,
    pub scissor: CropRect,
    pub vertex_count: usize,
    /// `2 * vertex_count` floats.
    pub positions: &'a [f32],
    /// `4 * vertex_count` floats.
    pub colours: Option<&'a [f32]>,
    /// `2 * vertex_count` floats.
    pub tex_coords: Option<&'a [f32]>,
    pub texture: Option<TextureId>,
    pub blend: BlendMode,
    pub flags: DrawFlags,
}

/// Native GPU surface driven by the worker thread.
pub trait Backend {
    fn name(&self) -> &str;

    /// Creates a texture, optionally initialized from `pixels`
    /// (`width * height` texels). Uninitialized textures are transparent.
    fn create_texture(&mut self, id: TextureId, width: u32, height: u32, pixels: Option<&[u32]>) -> Result<()>;

    /// Overwrites `rect` with `pixels` (`rect.area()` texels).
    fn upload(&mut self, id: TextureId, rect: CropRect, pixels: &[u32]) -> Result<()>;

    /// Reads `rect` back, blocking until the GPU has finished.
    fn read_pixels(&mut self, id: TextureId, rect: CropRect) -> Result<Vec<u32>>;

    fn free_texture(&mut self, id: TextureId) -> Result<()>;

    /// Copies `src_rect` of `source` into `target` with its top-left corner
    /// at (`dst_x`, `dst_y`). Texels are replaced, not blended.
    fn copy_region(
        &mut self,
        source: TextureId,
        src_rect: CropRect,
        target: TextureId,
        dst_x: i32,
        dst_y: i32,
    ) -> Result<()>;

    /// Replaces every pixel inside `scissor` with `colour`.
    fn clear(&mut self, target: TextureId, scissor: CropRect, colour: Color) -> Result<()>;

    fn draw(&mut self, call: &GeometryCall<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_ids_are_unique_and_increasing() {
        let a = TextureId::next();
        let b = TextureId::next();
        assert!(b > a);
        assert_eq!(format!("{a}"), format!("tex#{}", a.raw()));
    }
}
