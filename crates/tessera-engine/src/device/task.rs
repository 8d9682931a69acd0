//! Units of work executed on the GPU worker thread.

use std::fmt;

use anyhow::Context;

use crate::backend::{Backend, TextureId};
use crate::coords::CropRect;
use crate::paint::Color;
use crate::pool::FloatPool;
use crate::render::DrawBatch;

use super::error::{EngineError, EngineResult};
use super::worker::Worker;

/// Arbitrary work run against the backend.
pub type CustomTask = Box<dyn FnOnce(&mut dyn Backend) -> anyhow::Result<()> + Send>;

/// Completion callback for a readback. Runs on the callback thread.
pub type PixelCallback = Box<dyn FnOnce(EngineResult<Vec<u32>>) + Send>;

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// One queued GPU operation. Executed at most once, in submission order.
pub enum Task {
    Allocate {
        texture: TextureId,
        width: u32,
        height: u32,
        pixels: Option<Vec<u32>>,
    },
    Upload {
        texture: TextureId,
        rect: CropRect,
        pixels: Vec<u32>,
    },
    Draw(DrawBatch),
    Clear {
        target: TextureId,
        scissor: CropRect,
        colour: Color,
    },
    ReadPixels {
        texture: TextureId,
        rect: CropRect,
        reply: PixelCallback,
    },
    Free {
        texture: TextureId,
    },
    Copy {
        source: TextureId,
        src_rect: CropRect,
        target: TextureId,
        dst_x: i32,
        dst_y: i32,
    },
    Custom(CustomTask),
}

/// What a task may touch while running.
pub(crate) struct TaskContext<'a> {
    pub backend: &'a mut dyn Backend,
    pub pool: &'a FloatPool,
    pub callbacks: &'a Worker<Callback>,
}

impl Task {
    pub(crate) fn run(self, cx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        match self {
            Task::Allocate { texture, width, height, pixels } => cx
                .backend
                .create_texture(texture, width, height, pixels.as_deref())
                .with_context(|| format!("allocate {texture} ({width}x{height})")),
            Task::Upload { texture, rect, pixels } => {
                cx.backend.upload(texture, rect, &pixels).with_context(|| format!("upload to {texture}"))
            }
            Task::Draw(batch) => {
                let target = batch.target();
                batch.execute(&mut *cx.backend, cx.pool).with_context(|| format!("draw into {target}"))
            }
            Task::Clear { target, scissor, colour } => {
                cx.backend.clear(target, scissor, colour).with_context(|| format!("clear {target}"))
            }
            Task::ReadPixels { texture, rect, reply } => {
                let result = cx.backend.read_pixels(texture, rect);
                let failure = result.as_ref().err().map(|e| format!("{e:#}"));
                let reply_value = result.map_err(|e| EngineError::Readback(format!("{e:#}")));
                cx.callbacks.submit(Box::new(move || reply(reply_value)));
                match failure {
                    Some(msg) => anyhow::bail!("read back {texture}: {msg}"),
                    None => Ok(()),
                }
            }
            Task::Free { texture } => cx.backend.free_texture(texture).with_context(|| format!("free {texture}")),
            Task::Copy { source, src_rect, target, dst_x, dst_y } => cx
                .backend
                .copy_region(source, src_rect, target, dst_x, dst_y)
                .with_context(|| format!("copy {source} {src_rect} into {target}")),
            Task::Custom(f) => f(&mut *cx.backend),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Allocate { texture, width, height, pixels } => f
                .debug_struct("Allocate")
                .field("texture", texture)
                .field("size", &(width, height))
                .field("initialized", &pixels.is_some())
                .finish(),
            Task::Upload { texture, rect, .. } => {
                f.debug_struct("Upload").field("texture", texture).field("rect", rect).finish()
            }
            Task::Draw(batch) => f.debug_tuple("Draw").field(batch).finish(),
            Task::Clear { target, scissor, colour } => f
                .debug_struct("Clear")
                .field("target", target)
                .field("scissor", scissor)
                .field("colour", colour)
                .finish(),
            Task::ReadPixels { texture, rect, .. } => {
                f.debug_struct("ReadPixels").field("texture", texture).field("rect", rect).finish()
            }
            Task::Free { texture } => f.debug_struct("Free").field("texture", texture).finish(),
            Task::Copy { source, src_rect, target, dst_x, dst_y } => f
                .debug_struct("Copy")
                .field("source", source)
                .field("src_rect", src_rect)
                .field("target", target)
                .field("dst", &(dst_x, dst_y))
                .finish(),
            Task::Custom(_) => f.write_str("Custom"),
        }
    }
}
