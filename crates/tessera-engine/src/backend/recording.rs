//! CPU backend that records every call.
//!
//! Textures are plain `Vec<u32>`s so uploads, clears and readback behave
//! like a real device. Geometry is recorded but not rasterized. The
//! [`RecordingLog`] handle is cloned before the backend moves onto the
//! worker thread and read from the test (or dry-run) side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};

use super::{Backend, GeometryCall, TextureId};
use crate::coords::CropRect;
use crate::paint::Color;
use crate::render::{BlendMode, DrawFlags};

/// One flushed batch as received by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub target: TextureId,
    pub texture: Option<TextureId>,
    pub vertex_count: usize,
    pub scissor: CropRect,
    pub blend: BlendMode,
    pub flags: DrawFlags,
    pub has_colours: bool,
    pub positions: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { id: TextureId, width: u32, height: u32 },
    Upload { id: TextureId, rect: CropRect },
    ReadPixels { id: TextureId, rect: CropRect },
    Free { id: TextureId },
    Copy { source: TextureId, src_rect: CropRect, target: TextureId, dst_x: i32, dst_y: i32 },
    Clear { target: TextureId, scissor: CropRect, colour: Color },
    Draw(DrawRecord),
}

/// Shared, append-only call log.
#[derive(Debug, Clone, Default)]
pub struct RecordingLog(Arc<Mutex<Vec<Call>>>);

impl RecordingLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, call: Call) {
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.lock()
            .iter()
            .filter_map(|c| match c {
                Call::Draw(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    /// Draw records whose target is `target`.
    pub fn draws_into(&self, target: TextureId) -> Vec<DrawRecord> {
        self.draws().into_iter().filter(|d| d.target == target).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

struct CpuTexture {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl CpuTexture {
    fn bounds(&self) -> CropRect {
        CropRect::full(self.width, self.height)
    }

    fn rows(&self, rect: CropRect) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        let w = self.width as usize;
        (rect.up..rect.down).map(move |y| {
            let start = y as usize * w + rect.left as usize;
            start..start + rect.width() as usize
        })
    }
}

pub struct RecordingBackend {
    log: RecordingLog,
    textures: HashMap<TextureId, CpuTexture>,
}

impl RecordingBackend {
    pub fn new(log: RecordingLog) -> Self {
        Self { log, textures: HashMap::new() }
    }

    fn texture(&mut self, id: TextureId) -> Result<&mut CpuTexture> {
        self.textures
            .get_mut(&id)
            .with_context(|| format!("texture {id} does not exist"))
    }
}

fn check_rect(tex: &CpuTexture, rect: CropRect) -> Result<()> {
    if rect.is_empty() || !tex.bounds().contains_rect(rect) {
        bail!("rect {rect} outside texture bounds {}", tex.bounds());
    }
    Ok(())
}

impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn create_texture(&mut self, id: TextureId, width: u32, height: u32, pixels: Option<&[u32]>) -> Result<()> {
        let len = width as usize * height as usize;
        let pixels = match pixels {
            Some(p) if p.len() != len => bail!("expected {len} pixels, got {}", p.len()),
            Some(p) => p.to_vec(),
            None => vec![0; len],
        };
        self.textures.insert(id, CpuTexture { width, height, pixels });
        self.log.push(Call::Create { id, width, height });
        Ok(())
    }

    fn upload(&mut self, id: TextureId, rect: CropRect, pixels: &[u32]) -> Result<()> {
        let tex = self.texture(id)?;
        check_rect(tex, rect)?;
        if pixels.len() != rect.area() {
            bail!("expected {} pixels, got {}", rect.area(), pixels.len());
        }
        let rows: Vec<_> = tex.rows(rect).collect();
        for (row, src) in rows.into_iter().zip(pixels.chunks_exact(rect.width() as usize)) {
            tex.pixels[row].copy_from_slice(src);
        }
        self.log.push(Call::Upload { id, rect });
        Ok(())
    }

    fn read_pixels(&mut self, id: TextureId, rect: CropRect) -> Result<Vec<u32>> {
        let tex = self.texture(id)?;
        check_rect(tex, rect)?;
        let mut out = Vec::with_capacity(rect.area());
        for row in tex.rows(rect) {
            out.extend_from_slice(&tex.pixels[row]);
        }
        self.log.push(Call::ReadPixels { id, rect });
        Ok(out)
    }

    fn free_texture(&mut self, id: TextureId) -> Result<()> {
        if self.textures.remove(&id).is_none() {
            bail!("texture {id} freed twice");
        }
        self.log.push(Call::Free { id });
        Ok(())
    }

    fn copy_region(
        &mut self,
        source: TextureId,
        src_rect: CropRect,
        target: TextureId,
        dst_x: i32,
        dst_y: i32,
    ) -> Result<()> {
        let src = self.texture(source)?;
        check_rect(src, src_rect)?;
        let texels: Vec<u32> = src.rows(src_rect).flat_map(|row| src.pixels[row].to_vec()).collect();

        let dst_rect = CropRect::from_size(dst_x, dst_y, src_rect.width(), src_rect.height());
        let dst = self.texture(target)?;
        check_rect(dst, dst_rect)?;
        let rows: Vec<_> = dst.rows(dst_rect).collect();
        for (row, line) in rows.into_iter().zip(texels.chunks_exact(dst_rect.width() as usize)) {
            dst.pixels[row].copy_from_slice(line);
        }
        self.log.push(Call::Copy { source, src_rect, target, dst_x, dst_y });
        Ok(())
    }

    fn clear(&mut self, target: TextureId, scissor: CropRect, colour: Color) -> Result<()> {
        let tex = self.texture(target)?;
        let rect = scissor.clamped_to(tex.bounds());
        let texel = colour.to_argb();
        if !rect.is_empty() {
            let rows: Vec<_> = tex.rows(rect).collect();
            for row in rows {
                tex.pixels[row].fill(texel);
            }
        }
        self.log.push(Call::Clear { target, scissor, colour });
        Ok(())
    }

    fn draw(&mut self, call: &GeometryCall<'_>) -> Result<()> {
        if !self.textures.contains_key(&call.target) {
            bail!("draw target {} does not exist", call.target);
        }
        if let Some(src) = call.texture {
            if !self.textures.contains_key(&src) {
                bail!("draw source {src} does not exist");
            }
        }
        self.log.push(Call::Draw(DrawRecord {
            target: call.target,
            texture: call.texture,
            vertex_count: call.vertex_count,
            scissor: call.scissor,
            blend: call.blend,
            flags: call.flags,
            has_colours: call.colours.is_some(),
            positions: call.positions.to_vec(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (RecordingBackend, RecordingLog) {
        let log = RecordingLog::default();
        (RecordingBackend::new(log.clone()), log)
    }

    #[test]
    fn upload_then_read_sub_rect() {
        let (mut b, log) = backend();
        let id = TextureId::next();
        b.create_texture(id, 4, 4, None).unwrap();
        let rect = CropRect::from_size(1, 1, 2, 2);
        b.upload(id, rect, &[1, 2, 3, 4]).unwrap();

        assert_eq!(b.read_pixels(id, rect).unwrap(), vec![1, 2, 3, 4]);
        let row0 = b.read_pixels(id, CropRect::from_size(0, 0, 4, 1)).unwrap();
        assert_eq!(row0, vec![0; 4]);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn clear_respects_scissor() {
        let (mut b, _) = backend();
        let id = TextureId::next();
        b.create_texture(id, 3, 1, None).unwrap();
        b.clear(id, CropRect::new(1, 0, 10, 1), Color::WHITE).unwrap();
        assert_eq!(b.read_pixels(id, CropRect::full(3, 1)).unwrap(), vec![0, 0xFFFFFFFF, 0xFFFFFFFF]);
    }

    #[test]
    fn unknown_texture_is_an_error() {
        let (mut b, _) = backend();
        let id = TextureId::next();
        assert!(b.read_pixels(id, CropRect::full(1, 1)).is_err());
        assert!(b.free_texture(id).is_err());
    }

    #[test]
    fn copy_region_moves_texels() {
        let (mut b, log) = backend();
        let (src, dst) = (TextureId::next(), TextureId::next());
        b.create_texture(src, 2, 2, Some(&[1, 2, 3, 4])).unwrap();
        b.create_texture(dst, 3, 3, None).unwrap();

        b.copy_region(src, CropRect::from_size(1, 0, 1, 2), dst, 2, 1).unwrap();

        assert_eq!(b.read_pixels(dst, CropRect::full(3, 3)).unwrap(), vec![0, 0, 0, 0, 0, 2, 0, 0, 4]);
        assert!(log.calls().iter().any(|c| matches!(c, Call::Copy { dst_x: 2, dst_y: 1, .. })));
        assert!(b.copy_region(src, CropRect::full(2, 2), dst, 2, 2).is_err());
    }

    #[test]
    fn out_of_bounds_read_fails() {
        let (mut b, _) = backend();
        let id = TextureId::next();
        b.create_texture(id, 2, 2, None).unwrap();
        assert!(b.read_pixels(id, CropRect::full(3, 3)).is_err());
    }
}
