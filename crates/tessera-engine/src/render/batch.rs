//! Batch state and the flushed draw payload.
//!
//! A [`Batch`] is the draw state shared by an in-progress run of draws on
//! one surface. Vertex data lives in the surface's [`Staging`] vectors
//! until flush, when it is packed into one pooled buffer laid out as
//! `positions | colours | texcoords` and wrapped in a [`DrawBatch`].

use bytemuck::{Pod, Zeroable};

use crate::backend::{Backend, GeometryCall, TextureId};
use crate::coords::CropRect;
use crate::pool::FloatPool;

use super::blend::BlendMode;
use super::flags::DrawFlags;
use super::surface::Surface;

/// One vertex as submitted by producers.
///
/// `pos` is in target pixels. `uv` is normalized to the sampled surface and
/// ignored for untextured draws. `colour` is straight-alpha RGBA and ignored
/// for uncoloured draws.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub colour: [f32; 4],
}

impl Vertex {
    #[inline]
    pub const fn new(pos: [f32; 2], uv: [f32; 2], colour: [f32; 4]) -> Self {
        Self { pos, uv, colour }
    }
}

/// State key of a single draw, compared against the open batch.
pub(crate) struct DrawKey<'a> {
    /// Already clamped to the target bounds.
    pub crop: CropRect,
    pub crop_essential: bool,
    pub blend: BlendMode,
    pub flags: DrawFlags,
    pub texture: Option<&'a Surface>,
    pub has_colours: bool,
}

pub(crate) struct Batch {
    /// Keeps the sampled surface alive until the batch is flushed.
    pub texture: Option<Surface>,
    pub blend: BlendMode,
    pub flags: DrawFlags,
    pub crop: CropRect,
    pub crop_essential: bool,
    pub has_colours: bool,
    pub vertex_count: usize,
}

impl Batch {
    /// Opens a batch for `key`. Non-essential batches scissor to `bounds`.
    pub fn open(key: &DrawKey<'_>, bounds: CropRect) -> Self {
        Self {
            texture: key.texture.cloned(),
            blend: key.blend,
            flags: key.flags,
            crop: if key.crop_essential { key.crop } else { bounds },
            crop_essential: key.crop_essential,
            has_colours: key.has_colours,
            vertex_count: 0,
        }
    }

    /// Whether a draw with `key` may be appended to this batch.
    ///
    /// An essential crop must match exactly. A non-essential draw joins an
    /// essential batch only when its own crop covers the batch crop.
    pub fn matches(&self, key: &DrawKey<'_>) -> bool {
        if key.crop_essential {
            if key.crop != self.crop {
                return false;
            }
        } else if self.crop_essential && !key.crop.contains_rect(self.crop) {
            return false;
        }
        let same_texture = match (&self.texture, key.texture) {
            (None, None) => true,
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        };
        same_texture
            && self.has_colours == key.has_colours
            && self.blend == key.blend
            && self.flags == key.flags
    }
}

/// Per-surface vertex accumulation, reused across batches.
#[derive(Default)]
pub(crate) struct Staging {
    positions: Vec<f32>,
    colours: Vec<f32>,
    tex_coords: Vec<f32>,
}

impl Staging {
    pub fn push(&mut self, batch: &mut Batch, vertices: &[Vertex]) {
        let textured = batch.texture.is_some();
        for v in vertices {
            self.positions.extend_from_slice(&v.pos);
            if batch.has_colours {
                self.colours.extend_from_slice(&v.colour);
            }
            if textured {
                self.tex_coords.extend_from_slice(&v.uv);
            }
        }
        batch.vertex_count += vertices.len();
    }

    /// Packs the staged data into a pooled buffer and resets staging.
    pub fn seal(&mut self, batch: &Batch, target: Target, pool: &FloatPool) -> DrawBatch {
        let (p, c, t) = (self.positions.len(), self.colours.len(), self.tex_coords.len());
        let mut buffer = pool.acquire(p + c + t);
        buffer[..p].copy_from_slice(&self.positions);
        buffer[p..p + c].copy_from_slice(&self.colours);
        buffer[p + c..p + c + t].copy_from_slice(&self.tex_coords);
        self.clear();

        DrawBatch {
            target,
            scissor: batch.crop,
            blend: batch.blend,
            flags: batch.flags,
            texture: batch.texture.as_ref().map(Surface::texture_id),
            vertex_count: batch.vertex_count,
            buffer,
            colours: (c > 0).then_some(p..p + c),
            tex_coords: (t > 0).then_some(p + c..p + c + t),
        }
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.colours.clear();
        self.tex_coords.clear();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

/// A flushed batch: immutable, owned by its draw task.
pub struct DrawBatch {
    target: Target,
    scissor: CropRect,
    blend: BlendMode,
    flags: DrawFlags,
    texture: Option<TextureId>,
    vertex_count: usize,
    buffer: Box<[f32]>,
    colours: Option<std::ops::Range<usize>>,
    tex_coords: Option<std::ops::Range<usize>>,
}

impl DrawBatch {
    pub fn target(&self) -> TextureId {
        self.target.id
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn geometry(&self) -> GeometryCall<'_> {
        GeometryCall {
            target: self.target.id,
            target_width: self.target.width,
            target_height: self.target.height,
            scissor: self.scissor,
            vertex_count: self.vertex_count,
            positions: &self.buffer[..self.vertex_count * 2],
            colours: self.colours.clone().map(|r| &self.buffer[r]),
            tex_coords: self.tex_coords.clone().map(|r| &self.buffer[r]),
            texture: self.texture,
            blend: self.blend,
            flags: self.flags,
        }
    }

    /// Issues the draw and returns the buffer to `pool`, even on failure.
    pub(crate) fn execute(self, backend: &mut dyn Backend, pool: &FloatPool) -> anyhow::Result<()> {
        let result = backend.draw(&self.geometry());
        pool.release(self.buffer);
        result
    }
}

impl std::fmt::Debug for DrawBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawBatch")
            .field("target", &self.target.id)
            .field("texture", &self.texture)
            .field("vertex_count", &self.vertex_count)
            .field("scissor", &self.scissor)
            .field("blend", &self.blend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(crop: CropRect, essential: bool) -> DrawKey<'static> {
        DrawKey {
            crop,
            crop_essential: essential,
            blend: BlendMode::NORMAL,
            flags: DrawFlags::EMPTY,
            texture: None,
            has_colours: false,
        }
    }

    const BOUNDS: CropRect = CropRect::new(0, 0, 100, 100);

    // ── essential crop rule ───────────────────────────────────────────────

    #[test]
    fn non_essential_draws_merge_regardless_of_crop() {
        let batch = Batch::open(&key(CropRect::new(0, 0, 10, 10), false), BOUNDS);
        assert_eq!(batch.crop, BOUNDS);
        assert!(batch.matches(&key(CropRect::new(50, 50, 60, 60), false)));
    }

    #[test]
    fn essential_crop_requires_exact_match() {
        let crop = CropRect::new(10, 10, 20, 20);
        let batch = Batch::open(&key(crop, true), BOUNDS);
        assert!(batch.matches(&key(crop, true)));
        assert!(!batch.matches(&key(CropRect::new(10, 10, 21, 20), true)));
    }

    #[test]
    fn non_essential_joins_essential_only_when_covering() {
        let batch = Batch::open(&key(CropRect::new(10, 10, 20, 20), true), BOUNDS);
        assert!(batch.matches(&key(CropRect::new(0, 0, 30, 30), false)));
        assert!(!batch.matches(&key(CropRect::new(12, 10, 20, 20), false)));
    }

    #[test]
    fn essential_after_non_essential_breaks_unless_full() {
        let batch = Batch::open(&key(BOUNDS, false), BOUNDS);
        assert!(!batch.matches(&key(CropRect::new(0, 0, 50, 50), true)));
        assert!(batch.matches(&key(BOUNDS, true)));
    }

    // ── other state ───────────────────────────────────────────────────────

    #[test]
    fn blend_flags_and_colours_break_batches() {
        let batch = Batch::open(&key(BOUNDS, false), BOUNDS);
        let mut k = key(BOUNDS, false);
        k.blend = BlendMode::ADD;
        assert!(!batch.matches(&k));
        let mut k = key(BOUNDS, false);
        k.flags = DrawFlags::WRAP_S;
        assert!(!batch.matches(&k));
        let mut k = key(BOUNDS, false);
        k.has_colours = true;
        assert!(!batch.matches(&k));
    }

    // ── staging ───────────────────────────────────────────────────────────

    #[test]
    fn seal_lays_out_positions_then_colours() {
        let pool = FloatPool::default();
        let mut k = key(BOUNDS, false);
        k.has_colours = true;
        let mut batch = Batch::open(&k, BOUNDS);
        let mut staging = Staging::default();
        let v = Vertex::new([1.0, 2.0], [0.5, 0.5], [0.1, 0.2, 0.3, 0.4]);
        staging.push(&mut batch, &[v, v, v]);

        let target = Target { id: TextureId::next(), width: 100, height: 100 };
        let draw = staging.seal(&batch, target, &pool);
        let geom = draw.geometry();
        assert_eq!(geom.vertex_count, 3);
        assert_eq!(geom.positions, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(&geom.colours.unwrap()[..4], &[0.1, 0.2, 0.3, 0.4]);
        assert!(geom.tex_coords.is_none());
        assert!(staging.positions.is_empty());
    }
}
