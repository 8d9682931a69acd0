//! GPU-backed pixel surfaces with draw batching.
//!
//! A [`Surface`] is a cheap, clonable handle. Drawable surfaces accumulate
//! consecutive same-state draws into one open batch and turn it into a
//! single draw task on flush. Image surfaces are immutable after creation
//! and only serve as draw sources.
//!
//! Ordering barrier: before surface B opens a batch sampling surface A,
//! A flushes its own batch and records B in its referrer list. Anything
//! that later writes A (a new draw group, clear, upload, dispose) first
//! flushes every recorded referrer. Draw tasks therefore see sources as
//! they were when the draw was issued.
//!
//! Locking: a surface never holds its batch lock while acquiring another
//! surface's batch lock. The referrer list lock is a leaf.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::backend::TextureId;
use crate::coords::CropRect;
use crate::device::engine::EngineShared;
use crate::device::task::Task;
use crate::device::{EngineError, EngineResult};
use crate::paint::Color;

use super::batch::{Batch, DrawKey, Staging, Target, Vertex};
use super::blend::BlendMode;
use super::flags::DrawFlags;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Render target; accepts draws, clears and uploads.
    Drawable,
    /// Immutable texture; only ever sampled.
    Image,
}

/// Draw state shared by a group of vertices.
#[derive(Debug, Copy, Clone)]
pub struct DrawState<'a> {
    /// Scissor in target pixels. Clamped to the surface before use.
    pub crop: CropRect,
    /// Whether `crop` actually clips the geometry. When false the geometry
    /// is known to lie inside `crop`, which lets differently cropped draws
    /// share a batch.
    pub crop_essential: bool,
    pub blend: BlendMode,
    pub flags: DrawFlags,
    pub texture: Option<&'a Surface>,
    /// Use per-vertex colours. Otherwise vertices are opaque white.
    pub coloured: bool,
}

impl<'a> DrawState<'a> {
    /// Untextured, uncoloured, unclipped, `BlendMode::NORMAL`.
    pub fn new() -> Self {
        Self {
            crop: CropRect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX),
            crop_essential: false,
            blend: BlendMode::NORMAL,
            flags: DrawFlags::EMPTY,
            texture: None,
            coloured: false,
        }
    }

    pub fn with_texture(mut self, texture: &'a Surface) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn with_crop(mut self, crop: CropRect, essential: bool) -> Self {
        self.crop = crop;
        self.crop_essential = essential;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_flags(mut self, flags: DrawFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn coloured(mut self) -> Self {
        self.coloured = true;
        self
    }
}

impl Default for DrawState<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a GPU surface. Clones share the same surface.
///
/// The surface is disposed by [`dispose`](Self::dispose) or when the last
/// handle is dropped.
#[derive(Clone)]
pub struct Surface {
    inner: Arc<SurfaceInner>,
}

struct BatchSlot {
    open: Option<Batch>,
    staging: Staging,
}

struct SurfaceInner {
    engine: Arc<EngineShared>,
    texture: TextureId,
    width: u32,
    height: u32,
    kind: SurfaceKind,
    debug_id: String,
    disposed: AtomicBool,
    slot: Mutex<BatchSlot>,
    referenced_by: Mutex<Vec<Weak<SurfaceInner>>>,
}

impl Surface {
    pub(crate) fn create(
        engine: &Arc<EngineShared>,
        kind: SurfaceKind,
        id: Option<&str>,
        width: u32,
        height: u32,
        pixels: Option<&[u32]>,
    ) -> EngineResult<Self> {
        if width == 0 || height == 0 || i32::try_from(width).is_err() || i32::try_from(height).is_err() {
            return Err(EngineError::InvalidSize { width, height });
        }
        if let Some(pixels) = pixels {
            let expected = width as usize * height as usize;
            if pixels.len() != expected {
                return Err(EngineError::PixelCount { expected, actual: pixels.len() });
            }
        }

        let texture = TextureId::next();
        let debug_id = match id {
            Some(id) => format!("{texture}:{id}"),
            None => texture.to_string(),
        };

        engine.submit(Task::Allocate { texture, width, height, pixels: pixels.map(<[u32]>::to_vec) });
        engine.surface_opened();
        log::debug!("surface {debug_id} created ({width}x{height}, {kind:?})");

        Ok(Self {
            inner: Arc::new(SurfaceInner {
                engine: Arc::clone(engine),
                texture,
                width,
                height,
                kind,
                debug_id,
                disposed: AtomicBool::new(false),
                slot: Mutex::new(BatchSlot { open: None, staging: Staging::default() }),
                referenced_by: Mutex::new(Vec::new()),
            }),
        })
    }

    // ── accessors ─────────────────────────────────────────────────────────

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn bounds(&self) -> CropRect {
        self.inner.bounds()
    }

    pub fn kind(&self) -> SurfaceKind {
        self.inner.kind
    }

    pub fn texture_id(&self) -> TextureId {
        self.inner.texture
    }

    /// `tex#N` or `tex#N:<id>` when created with an id.
    pub fn debug_id(&self) -> &str {
        &self.inner.debug_id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// True when both handles refer to the same surface.
    pub fn ptr_eq(&self, other: &Surface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Appends triangles to the open batch, or flushes it and opens a new
    /// one when the draw state differs.
    ///
    /// `vertices.len()` must be a multiple of 3. Draws whose essential crop
    /// is empty after clamping are dropped.
    pub fn draw_batch(&self, state: &DrawState<'_>, vertices: &[Vertex]) -> EngineResult<()> {
        self.ensure_drawable()?;
        if vertices.len() % 3 != 0 {
            return Err(EngineError::InvalidGeometry(format!(
                "vertex count {} is not a multiple of 3",
                vertices.len()
            )));
        }
        if let Some(source) = state.texture {
            if source.ptr_eq(self) {
                return Err(EngineError::SelfSample { surface: self.inner.debug_id.clone() });
            }
            source.ensure_alive()?;
        }
        if vertices.is_empty() {
            return Ok(());
        }

        let crop = state.crop.clamped_to(self.bounds());
        if state.crop_essential && crop.is_empty() {
            log::trace!("surface {}: draw fully cropped", self.inner.debug_id);
            return Ok(());
        }

        let key = DrawKey {
            crop,
            crop_essential: state.crop_essential,
            blend: state.blend,
            flags: state.flags,
            texture: state.texture,
            has_colours: state.coloured,
        };

        let max = self.inner.engine.config().max_batch_vertices;
        for group in vertices.chunks(max - max % 3) {
            self.draw_group(&key, group)?;
        }
        Ok(())
    }

    fn draw_group(&self, key: &DrawKey<'_>, vertices: &[Vertex]) -> EngineResult<()> {
        let inner = &*self.inner;
        inner.reference_barrier();

        let max = inner.engine.config().max_batch_vertices;
        {
            let mut guard = inner.lock_slot();
            let slot = &mut *guard;
            if slot.open.as_ref().is_some_and(|b| b.vertex_count + vertices.len() > max) {
                inner.flush_slot(slot);
            }
            if let Some(batch) = slot.open.as_mut().filter(|b| b.matches(key)) {
                slot.staging.push(batch, vertices);
                return Ok(());
            }
            inner.flush_slot(slot);
        }

        // Taken without our slot lock held: referencing flushes the source.
        if let Some(source) = key.texture {
            source.reference(self)?;
        }

        let mut guard = inner.lock_slot();
        let slot = &mut *guard;
        if slot.open.is_some() {
            // Another producer opened a batch in the gap.
            inner.flush_slot(slot);
        }
        let batch = slot.open.insert(Batch::open(key, inner.bounds()));
        slot.staging.push(batch, vertices);
        Ok(())
    }

    /// Submits the open batch, if any, as one draw task.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Fills `rect` (clamped to the surface) with `colour`, ignoring blending.
    pub fn clear(&self, rect: CropRect, colour: Color) -> EngineResult<()> {
        self.ensure_drawable()?;
        let scissor = rect.clamped_to(self.bounds());
        if scissor.is_empty() {
            return Ok(());
        }
        self.inner.flush();
        self.inner.reference_barrier();
        self.inner.engine.submit(Task::Clear { target: self.inner.texture, scissor, colour });
        Ok(())
    }

    /// Overwrites `rect` with `pixels` (`0xAARRGGBB`, row-major).
    pub fn upload(&self, rect: CropRect, pixels: &[u32]) -> EngineResult<()> {
        self.ensure_drawable()?;
        self.check_rect(rect)?;
        if pixels.len() != rect.area() {
            return Err(EngineError::PixelCount { expected: rect.area(), actual: pixels.len() });
        }
        self.inner.flush();
        self.inner.reference_barrier();
        self.inner.engine.submit(Task::Upload { texture: self.inner.texture, rect, pixels: pixels.to_vec() });
        Ok(())
    }

    /// Copies `src_rect` of `src` to (`dst_x`, `dst_y`) on this surface,
    /// replacing the texels there. Both rectangles must lie inside their
    /// surfaces.
    pub fn copy_from(&self, src: &Surface, src_rect: CropRect, dst_x: i32, dst_y: i32) -> EngineResult<()> {
        self.ensure_drawable()?;
        if src.ptr_eq(self) {
            return Err(EngineError::SelfSample { surface: self.inner.debug_id.clone() });
        }
        src.ensure_alive()?;
        src.check_rect(src_rect)?;
        let bounds = self.bounds();
        if dst_x < 0 || dst_y < 0 || dst_x > bounds.right || dst_y > bounds.down {
            return Err(EngineError::InvalidGeometry(format!(
                "copy destination ({dst_x}, {dst_y}) outside surface bounds {bounds}"
            )));
        }
        self.check_rect(CropRect::from_size(dst_x, dst_y, src_rect.width(), src_rect.height()))?;

        self.inner.flush();
        self.inner.reference_barrier();
        src.reference(self)?;
        self.inner.engine.submit(Task::Copy {
            source: src.inner.texture,
            src_rect,
            target: self.inner.texture,
            dst_x,
            dst_y,
        });
        src.unreference(self)
    }

    // ── readback ──────────────────────────────────────────────────────────

    /// Queues a readback of `rect`. `on_done` runs on the callback thread.
    ///
    /// If the engine shuts down first, `on_done` is dropped without being
    /// called.
    pub fn read_pixels_async<F>(&self, rect: CropRect, on_done: F) -> EngineResult<()>
    where
        F: FnOnce(EngineResult<Vec<u32>>) + Send + 'static,
    {
        self.ensure_alive()?;
        self.check_rect(rect)?;
        self.inner.flush();
        self.inner.engine.submit(Task::ReadPixels { texture: self.inner.texture, rect, reply: Box::new(on_done) });
        Ok(())
    }

    /// Blocking readback of `rect`.
    ///
    /// Fails with [`EngineError::Reentrant`] on engine threads, where
    /// waiting would deadlock.
    pub fn read_pixels(&self, rect: CropRect) -> EngineResult<Vec<u32>> {
        self.inner.engine.check_blocking_allowed()?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.read_pixels_async(rect, move |result| {
            let _ = tx.send(result);
        })?;
        rx.recv().map_err(|_| EngineError::ShutDown)?
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Flushes pending work, then queues the texture free. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    // ── barrier ───────────────────────────────────────────────────────────

    /// Must be called by `caller` before it opens a batch sampling this
    /// surface. Flushes this surface's own batch and records `caller`, so
    /// any later write here first flushes the caller.
    ///
    /// [`Surface::draw_batch`] does this itself; collaborators that embed a
    /// surface's texture in their own tasks call it directly.
    pub fn reference(&self, caller: &Surface) -> EngineResult<()> {
        self.ensure_alive()?;
        caller.ensure_alive()?;
        if self.inner.kind == SurfaceKind::Image {
            return Ok(());
        }
        self.inner.flush();
        self.inner.lock_refs().push(Arc::downgrade(&caller.inner));
        Ok(())
    }

    /// Drops the edge recorded by [`Surface::reference`] once `caller`'s
    /// dependent task has been queued.
    pub fn unreference(&self, caller: &Surface) -> EngineResult<()> {
        self.ensure_alive()?;
        if self.inner.kind == SurfaceKind::Image {
            return Ok(());
        }
        self.inner.unreference(Arc::as_ptr(&caller.inner));
        Ok(())
    }

    fn ensure_alive(&self) -> EngineResult<()> {
        if self.is_disposed() {
            return Err(EngineError::Disposed { surface: self.inner.debug_id.clone() });
        }
        Ok(())
    }

    fn ensure_drawable(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        if self.inner.kind == SurfaceKind::Image {
            return Err(EngineError::Immutable { surface: self.inner.debug_id.clone() });
        }
        Ok(())
    }

    fn check_rect(&self, rect: CropRect) -> EngineResult<()> {
        let bounds = self.bounds();
        if rect.is_empty() || !bounds.contains_rect(rect) {
            return Err(EngineError::InvalidGeometry(format!("rect {rect} outside surface bounds {bounds}")));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn referrer_count(&self) -> usize {
        self.inner.lock_refs().len()
    }

    #[cfg(test)]
    pub(crate) fn open_batch_vertices(&self) -> Option<usize> {
        self.inner.lock_slot().open.as_ref().map(|b| b.vertex_count)
    }
}

impl SurfaceInner {
    fn bounds(&self) -> CropRect {
        CropRect::full(self.width, self.height)
    }

    fn target(&self) -> Target {
        Target { id: self.texture, width: self.width, height: self.height }
    }

    fn lock_slot(&self) -> MutexGuard<'_, BatchSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_refs(&self) -> MutexGuard<'_, Vec<Weak<SurfaceInner>>> {
        self.referenced_by.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self) {
        let mut slot = self.lock_slot();
        self.flush_slot(&mut slot);
    }

    fn flush_slot(&self, slot: &mut BatchSlot) {
        let Some(batch) = slot.open.take() else { return };
        if batch.vertex_count == 0 {
            slot.staging.clear();
        } else {
            let draw = slot.staging.seal(&batch, self.target(), self.engine.pool());
            self.engine.submit(Task::Draw(draw));
        }
        if let Some(source) = &batch.texture {
            source.inner.unreference(self);
        }
    }

    fn unreference(&self, caller: *const SurfaceInner) {
        let mut refs = self.lock_refs();
        if let Some(pos) = refs.iter().position(|w| std::ptr::eq(w.as_ptr(), caller)) {
            refs.swap_remove(pos);
        }
    }

    /// Flushes every surface whose open batch samples this one.
    fn reference_barrier(&self) {
        loop {
            let next = self.lock_refs().pop();
            let Some(referrer) = next else { break };
            if let Some(referrer) = referrer.upgrade() {
                referrer.flush();
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reference_barrier();
        self.flush();
        self.engine.submit(Task::Free { texture: self.texture });
        self.engine.surface_closed();
        log::debug!("surface {} disposed", self.debug_id);
    }
}

impl Drop for SurfaceInner {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) && self.engine.config().report_leaks {
            log::warn!("surface {} dropped without dispose()", self.debug_id);
        }
        self.dispose();
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.inner.debug_id)
            .field("size", &(self.inner.width, self.inner.height))
            .field("kind", &self.inner.kind)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
