//! Immediate-mode 2D drawing onto a [`Surface`].
//!
//! The painter keeps a clip stack and a translate/scale transform and
//! lowers every call into quads on the target's batch. Unscaled blits and
//! rect fills are clipped on the CPU, which keeps their crop non-essential
//! so they batch across clip changes. Scaled blits only mark the crop
//! essential when they actually cross it. Rotated blits always do.

use crate::coords::{CropRect, Region};
use crate::device::{EngineError, EngineResult};
use crate::paint::Color;

use super::batch::Vertex;
use super::blend::BlendMode;
use super::flags::Tiling;
use super::surface::{DrawState, Surface};

/// One quad corner: destination `x, y` and source texel `s, t`.
type Corner = [f32; 4];

pub struct Painter<'s> {
    target: &'s Surface,
    /// Top is the effective clip, already intersected with its parents.
    clip_stack: Vec<CropRect>,
    offset: (f32, f32),
    scale: (f32, f32),
}

impl<'s> Painter<'s> {
    pub fn new(target: &'s Surface) -> Self {
        Self { target, clip_stack: Vec::new(), offset: (0.0, 0.0), scale: (1.0, 1.0) }
    }

    pub fn target(&self) -> &'s Surface {
        self.target
    }

    // ── clip ──────────────────────────────────────────────────────────────

    /// Current scissor; the full target when no clip is pushed.
    pub fn scissor(&self) -> CropRect {
        self.clip_stack.last().copied().unwrap_or_else(|| self.target.bounds())
    }

    /// Narrows the scissor to `rect` intersected with the current one.
    ///
    /// Calls must be balanced with [`pop_clip`](Self::pop_clip).
    pub fn push_clip(&mut self, rect: CropRect) {
        let effective = self.scissor().intersect(rect).unwrap_or_default();
        self.clip_stack.push(effective);
    }

    pub fn pop_clip(&mut self) {
        debug_assert!(!self.clip_stack.is_empty(), "pop_clip called without matching push_clip");
        self.clip_stack.pop();
    }

    // ── transform ─────────────────────────────────────────────────────────

    pub fn offset(&self) -> (f32, f32) {
        self.offset
    }

    pub fn set_offset(&mut self, x: f32, y: f32) {
        self.offset = (x, y);
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.offset.0 += dx;
        self.offset.1 += dy;
    }

    pub fn scale(&self) -> (f32, f32) {
        self.scale
    }

    pub fn set_scale(&mut self, sx: f32, sy: f32) {
        self.scale = (sx, sy);
    }

    fn is_scaled(&self) -> bool {
        self.scale != (1.0, 1.0)
    }

    fn tx(&self, x: f32) -> f32 {
        self.offset.0 + x * self.scale.0
    }

    fn ty(&self, y: f32) -> f32 {
        self.offset.1 + y * self.scale.1
    }

    // ── blits ─────────────────────────────────────────────────────────────

    /// Copies `src` (texels of `image`) to `(x, y)` at 1:1, blended normally.
    pub fn blit(&self, src: Region, x: f32, y: f32, image: &Surface) -> EngineResult<()> {
        self.blit_with(src, x, y, image, Tiling::None, BlendMode::NORMAL)
    }

    pub fn blit_with(
        &self,
        src: Region,
        x: f32,
        y: f32,
        image: &Surface,
        tiling: Tiling,
        blend: BlendMode,
    ) -> EngineResult<()> {
        check_finite(&[src, Region::new(x, y, src.w, src.h)])?;
        if self.is_scaled() {
            return self.blit_scaled_with(src, Region::new(x, y, src.w, src.h), image, tiling, blend);
        }

        let (mut x, mut y) = (x + self.offset.0, y + self.offset.1);
        let (mut right, mut down) = (x + src.w, y + src.h);
        let (mut sx, mut sy) = (src.x, src.y);
        let (mut sr, mut sd) = (src.right(), src.bottom());

        let sc = self.scissor();
        let (l, u, r, d) = (sc.left as f32, sc.up as f32, sc.right as f32, sc.down as f32);
        if x < l {
            sx += l - x;
            x = l;
        }
        if y < u {
            sy += u - y;
            y = u;
        }
        if right > r {
            sr -= right - r;
            right = r;
        }
        if down > d {
            sd -= down - d;
            down = d;
        }
        if right <= x || down <= y {
            return Ok(());
        }

        self.quad(
            false,
            blend,
            tiling,
            Some(image),
            None,
            [[x, y, sx, sy], [right, y, sr, sy], [right, down, sr, sd], [x, down, sx, sd]],
        )
    }

    /// Repeats `tile` across `dst`.
    pub fn blit_tiled(&self, dst: Region, tile: &Surface) -> EngineResult<()> {
        self.blit_with(Region::new(0.0, 0.0, dst.w, dst.h), dst.x, dst.y, tile, Tiling::Both, BlendMode::NORMAL)
    }

    /// Stretches `src` onto `dst`, blended normally.
    pub fn blit_scaled(&self, src: Region, dst: Region, image: &Surface) -> EngineResult<()> {
        self.blit_scaled_with(src, dst, image, Tiling::None, BlendMode::NORMAL)
    }

    pub fn blit_scaled_with(
        &self,
        src: Region,
        dst: Region,
        image: &Surface,
        tiling: Tiling,
        blend: BlendMode,
    ) -> EngineResult<()> {
        check_finite(&[src, dst])?;
        let (x, y) = (self.tx(dst.x), self.ty(dst.y));
        let (right, down) = (x + dst.w * self.scale.0, y + dst.h * self.scale.1);

        let sc = self.scissor();
        let essential = x < sc.left as f32 || y < sc.up as f32 || right > sc.right as f32 || down > sc.down as f32;

        let (sx, sy, sr, sd) = (src.x, src.y, src.right(), src.bottom());
        self.quad(
            essential,
            blend,
            tiling,
            Some(image),
            None,
            [[x, y, sx, sy], [right, y, sr, sy], [right, down, sr, sd], [x, down, sx, sd]],
        )
    }

    /// Places `src` on `dst` as if unrotated, then rotates the destination
    /// anticlockwise by `angle` degrees around its centre.
    pub fn blit_rotated_scaled(
        &self,
        src: Region,
        dst: Region,
        angle: f32,
        image: &Surface,
        blend: BlendMode,
    ) -> EngineResult<()> {
        check_finite(&[src, dst])?;
        if !angle.is_finite() {
            return Err(EngineError::InvalidGeometry(format!("non-finite angle {angle}")));
        }
        if angle == 0.0 {
            return self.blit_scaled_with(src, dst, image, Tiling::None, blend);
        }

        // Screen space is +Y down, so anticlockwise is a negative angle.
        let (sin, cos) = (-angle).to_radians().sin_cos();
        let (hw, hh) = (dst.w / 2.0, dst.h / 2.0);
        let (cx, cy) = (self.tx(dst.x + hw), self.ty(dst.y + hh));

        let (xbx, xby) = (cos * hw * self.scale.0, sin * hw * self.scale.1);
        let (ybx, yby) = (-sin * hh * self.scale.0, cos * hh * self.scale.1);

        let (sx, sy, sr, sd) = (src.x, src.y, src.right(), src.bottom());
        self.quad(
            true,
            blend,
            Tiling::None,
            Some(image),
            None,
            [
                [cx - xbx - ybx, cy - xby - yby, sx, sy],
                [cx + xbx - ybx, cy + xby - yby, sr, sy],
                [cx + xbx + ybx, cy + xby + yby, sr, sd],
                [cx - xbx + ybx, cy - xby + yby, sx, sd],
            ],
        )
    }

    // ── fills ─────────────────────────────────────────────────────────────

    /// Blends a solid rectangle over the target.
    pub fn fill_rect(&self, colour: Color, rect: Region) -> EngineResult<()> {
        check_finite(&[rect])?;
        if !colour.is_finite() {
            return Err(EngineError::InvalidGeometry(format!("non-finite colour {colour:?}")));
        }
        let (mut x, mut y) = (self.tx(rect.x), self.ty(rect.y));
        let (mut right, mut down) = (x + rect.w * self.scale.0, y + rect.h * self.scale.1);

        let sc = self.scissor();
        x = x.max(sc.left as f32);
        y = y.max(sc.up as f32);
        right = right.min(sc.right as f32);
        down = down.min(sc.down as f32);
        if right <= x || down <= y {
            return Ok(());
        }

        self.quad(
            false,
            BlendMode::NORMAL,
            Tiling::None,
            None,
            Some(colour),
            [[x, y, 0.0, 0.0], [right, y, 0.0, 0.0], [right, down, 0.0, 0.0], [x, down, 0.0, 0.0]],
        )
    }

    /// Replaces everything inside the scissor with `colour`.
    pub fn clear_all(&self, colour: Color) -> EngineResult<()> {
        self.target.clear(self.scissor(), colour)
    }

    pub fn flush(&self) {
        self.target.flush();
    }

    fn quad(
        &self,
        crop_essential: bool,
        blend: BlendMode,
        tiling: Tiling,
        image: Option<&Surface>,
        colour: Option<Color>,
        corners: [Corner; 4],
    ) -> EngineResult<()> {
        let (tw, th) = image.map_or((1.0, 1.0), |i| (i.width() as f32, i.height() as f32));
        let rgba = colour.map_or([1.0; 4], Color::to_array);
        let [a, b, c, d] = corners.map(|[x, y, s, t]| Vertex::new([x, y], [s / tw, t / th], rgba));

        let mut state = DrawState::new()
            .with_crop(self.scissor(), crop_essential)
            .with_blend(blend)
            .with_flags(tiling.flags());
        state.texture = image;
        state.coloured = colour.is_some();

        self.target.draw_batch(&state, &[a, b, c, a, c, d])
    }
}

/// NaN or infinite coordinates would reach the GPU as garbage vertices.
fn check_finite(regions: &[Region]) -> EngineResult<()> {
    match regions.iter().find(|r| !r.is_finite()) {
        Some(r) => Err(EngineError::InvalidGeometry(format!("non-finite region {r:?}"))),
        None => Ok(()),
    }
}
