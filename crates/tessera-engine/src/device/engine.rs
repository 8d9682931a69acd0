//! Engine facade: owns the GPU worker, the callback worker and the pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;

use crate::backend::{Backend, WgpuBackend, WgpuInit};
use crate::pool::{FloatPool, FloatPoolStats};
use crate::render::{Surface, SurfaceKind};

use super::config::EngineConfig;
use super::error::{EngineError, EngineResult};
use super::task::{Callback, Task, TaskContext};
use super::worker::{Worker, WorkerStats};

/// Snapshot of engine counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub tasks: WorkerStats,
    pub callbacks: WorkerStats,
    /// Surfaces created and not yet disposed.
    pub live_surfaces: usize,
    pub pool: FloatPoolStats,
}

pub(crate) struct EngineShared {
    config: EngineConfig,
    // Declared first: dropped (and joined) before the callback worker.
    gpu: Worker<Task>,
    callbacks: Arc<Worker<Callback>>,
    pool: Arc<FloatPool>,
    live_surfaces: AtomicUsize,
}

impl EngineShared {
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &FloatPool {
        &self.pool
    }

    pub(crate) fn submit(&self, task: Task) {
        self.gpu.submit(task);
    }

    pub(crate) fn surface_opened(&self) {
        self.live_surfaces.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn surface_closed(&self) {
        self.live_surfaces.fetch_sub(1, Ordering::Relaxed);
    }

    /// Rejects blocking waits on threads that would have to serve them.
    pub(crate) fn check_blocking_allowed(&self) -> EngineResult<()> {
        let busy = if self.gpu.is_current_thread() {
            Some(self.gpu.name())
        } else if self.callbacks.is_current_thread() {
            Some(self.callbacks.name())
        } else {
            None
        };
        match busy {
            Some(thread) => Err(EngineError::Reentrant { thread: thread.to_string() }),
            None => Ok(()),
        }
    }
}

/// Command-batching GPU engine.
///
/// Owns one GPU worker thread, which holds the native backend, and one
/// callback thread. Dropping the engine shuts both down; surfaces that
/// outlive it become inert.
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Starts the engine. `factory` runs on the GPU worker thread; its
    /// failure is returned as [`EngineError::Init`].
    pub fn new<F>(config: EngineConfig, factory: F) -> EngineResult<Self>
    where
        F: FnOnce() -> anyhow::Result<Box<dyn Backend>> + Send + 'static,
    {
        let config = config.sanitized();
        let pool = Arc::new(FloatPool::new(config.pool_retention));

        let callbacks: Arc<Worker<Callback>> = Arc::new(Worker::spawn(
            &config.callback_thread_name,
            config.callback_queue_capacity,
            || Ok(()),
            |_: &mut (), callback: Callback| {
                callback();
                Ok(())
            },
        )?);

        let gpu = {
            let pool = Arc::clone(&pool);
            let callbacks = Arc::clone(&callbacks);
            Worker::spawn(
                &config.worker_thread_name,
                config.task_queue_capacity,
                move || {
                    let backend = factory().context("create native backend")?;
                    log::info!("backend `{}` ready", backend.name());
                    Ok(backend)
                },
                move |backend: &mut Box<dyn Backend>, task: Task| {
                    task.run(&mut TaskContext { backend: backend.as_mut(), pool: &pool, callbacks: &callbacks })
                },
            )?
        };

        log::debug!(
            "engine started (queue {}, batch {} vertices)",
            config.task_queue_capacity,
            config.max_batch_vertices
        );

        Ok(Self {
            shared: Arc::new(EngineShared { config, gpu, callbacks, pool, live_surfaces: AtomicUsize::new(0) }),
        })
    }

    /// Starts the engine around an already constructed backend.
    pub fn with_backend<B>(config: EngineConfig, backend: B) -> EngineResult<Self>
    where
        B: Backend + Send + 'static,
    {
        Self::new(config, move || Ok(Box::new(backend) as Box<dyn Backend>))
    }

    /// Starts the engine on a headless wgpu device.
    pub fn new_wgpu(config: EngineConfig, init: WgpuInit) -> EngineResult<Self> {
        Self::new(config, move || Ok(Box::new(WgpuBackend::new(&init)?) as Box<dyn Backend>))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn float_pool(&self) -> &FloatPool {
        &self.shared.pool
    }

    // ── queues ────────────────────────────────────────────────────────────

    /// Enqueues a task, blocking while the queue is full.
    ///
    /// Tasks submitted after shutdown are dropped.
    pub fn submit(&self, task: Task) {
        self.shared.submit(task);
    }

    /// Runs `f` on the callback thread.
    pub fn submit_callback<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.callbacks.submit(Box::new(f));
    }

    /// Blocks until every task and callback submitted so far has run.
    pub fn sync(&self) -> EngineResult<()> {
        self.shared.check_blocking_allowed()?;

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(Task::Custom(Box::new(move |_: &mut dyn Backend| -> anyhow::Result<()> {
            let _ = tx.send(());
            Ok(())
        })));
        rx.recv().map_err(|_| EngineError::ShutDown)?;

        // Readback callbacks were queued by tasks that have now run.
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit_callback(move || {
            let _ = tx.send(());
        });
        rx.recv().map_err(|_| EngineError::ShutDown)
    }

    // ── surfaces ──────────────────────────────────────────────────────────

    /// Creates a transparent drawable surface.
    pub fn new_surface(&self, id: Option<&str>, width: u32, height: u32) -> EngineResult<Surface> {
        Surface::create(&self.shared, SurfaceKind::Drawable, id, width, height, None)
    }

    /// Creates a drawable surface initialized from `pixels` (`0xAARRGGBB`).
    pub fn new_surface_with(&self, id: Option<&str>, width: u32, height: u32, pixels: &[u32]) -> EngineResult<Surface> {
        Surface::create(&self.shared, SurfaceKind::Drawable, id, width, height, Some(pixels))
    }

    /// Creates an immutable image from `pixels` (`0xAARRGGBB`).
    pub fn new_image(&self, id: Option<&str>, width: u32, height: u32, pixels: &[u32]) -> EngineResult<Surface> {
        Surface::create(&self.shared, SurfaceKind::Image, id, width, height, Some(pixels))
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            tasks: self.shared.gpu.stats(),
            callbacks: self.shared.callbacks.stats(),
            live_surfaces: self.shared.live_surfaces.load(Ordering::Relaxed),
            pool: self.shared.pool.stats(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.gpu.is_shut_down()
    }

    /// Stops the GPU worker, then the callback worker. Idempotent.
    ///
    /// Waits for the task in flight; anything still queued is dropped.
    pub fn shutdown(&self) {
        if self.shared.gpu.is_shut_down() && self.shared.callbacks.is_shut_down() {
            return;
        }
        let live = self.shared.live_surfaces.load(Ordering::Relaxed);
        if live > 0 && self.shared.config.report_leaks {
            log::warn!("{live} surface(s) never disposed at engine shutdown");
        }
        self.shared.gpu.shutdown();
        self.shared.callbacks.shutdown();
        log::info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{Call, RecordingBackend, RecordingLog};
    use crate::coords::CropRect;
    use crate::paint::Color;
    use crate::render::{BlendMode, DrawState, Vertex};

    /// Test engines drop their surfaces implicitly; leak warnings stay off.
    pub(crate) fn recording_engine(config: EngineConfig) -> (Engine, RecordingLog) {
        let log = RecordingLog::default();
        let config = EngineConfig { report_leaks: false, ..config };
        let engine = Engine::with_backend(config, RecordingBackend::new(log.clone())).unwrap();
        (engine, log)
    }

    /// Two triangles covering `w` x `h` at (`x`, `y`), full texture.
    pub(crate) fn quad(x: f32, y: f32, w: f32, h: f32) -> [Vertex; 6] {
        let c = [1.0; 4];
        let v = |px: f32, py: f32, u: f32, t: f32| Vertex::new([px, py], [u, t], c);
        let (a, b, cc, d) = (v(x, y, 0.0, 0.0), v(x + w, y, 1.0, 0.0), v(x + w, y + h, 1.0, 1.0), v(x, y + h, 0.0, 1.0));
        [a, b, cc, a, cc, d]
    }

    fn frees(log: &RecordingLog) -> usize {
        log.calls().iter().filter(|c| matches!(c, Call::Free { .. })).count()
    }

    // ── batching ──────────────────────────────────────────────────────────

    #[test]
    fn same_state_sprites_become_one_task() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let atlas_t = engine.new_image(Some("t"), 16, 16, &[0xFFFFFFFF; 256]).unwrap();
        let atlas_u = engine.new_image(Some("u"), 16, 16, &[0xFF000000; 256]).unwrap();
        let target = engine.new_surface(Some("target"), 64, 64).unwrap();

        let state_t = DrawState::new().with_texture(&atlas_t);
        target.draw_batch(&state_t, &quad(0.0, 0.0, 10.0, 10.0)).unwrap();
        target.draw_batch(&state_t, &quad(5.0, 5.0, 10.0, 10.0)).unwrap();
        engine.sync().unwrap();
        assert!(log.draws().is_empty());

        target.draw_batch(&DrawState::new().with_texture(&atlas_u), &quad(0.0, 0.0, 10.0, 10.0)).unwrap();
        engine.sync().unwrap();
        let draws = log.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].vertex_count, 12);
        assert_eq!(draws[0].texture, Some(atlas_t.texture_id()));

        target.flush();
        engine.sync().unwrap();
        let draws = log.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[1].texture, Some(atlas_u.texture_id()));
    }

    #[test]
    fn blend_change_splits_batch() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let target = engine.new_surface(None, 32, 32).unwrap();
        let normal = DrawState::new();
        for i in 0..5 {
            target.draw_batch(&normal, &quad(i as f32, 0.0, 1.0, 1.0)).unwrap();
        }
        target.draw_batch(&normal.with_blend(BlendMode::ADD), &quad(0.0, 0.0, 1.0, 1.0)).unwrap();
        target.flush();
        engine.sync().unwrap();

        let draws = log.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].vertex_count, 30);
        assert_eq!(draws[1].blend, BlendMode::ADD);
    }

    #[test]
    fn essential_crop_change_splits_batch() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let target = engine.new_surface(None, 32, 32).unwrap();
        let a = DrawState::new().with_crop(CropRect::new(0, 0, 16, 16), true);
        let b = DrawState::new().with_crop(CropRect::new(0, 0, 8, 8), true);
        target.draw_batch(&a, &quad(0.0, 0.0, 20.0, 20.0)).unwrap();
        target.draw_batch(&a, &quad(0.0, 0.0, 20.0, 20.0)).unwrap();
        target.draw_batch(&b, &quad(0.0, 0.0, 20.0, 20.0)).unwrap();
        target.flush();
        engine.sync().unwrap();

        let draws = log.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].scissor, CropRect::new(0, 0, 16, 16));
        assert_eq!(draws[1].scissor, CropRect::new(0, 0, 8, 8));
    }

    #[test]
    fn non_essential_crops_merge_with_full_scissor() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let target = engine.new_surface(None, 32, 32).unwrap();
        target.draw_batch(&DrawState::new().with_crop(CropRect::new(0, 0, 4, 4), false), &quad(0.0, 0.0, 2.0, 2.0)).unwrap();
        target.draw_batch(&DrawState::new().with_crop(CropRect::new(10, 10, 20, 20), false), &quad(12.0, 12.0, 2.0, 2.0)).unwrap();
        target.flush();
        engine.sync().unwrap();

        let draws = log.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].scissor, target.bounds());
    }

    #[test]
    fn empty_essential_crop_drops_draw() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let target = engine.new_surface(None, 32, 32).unwrap();
        let outside = DrawState::new().with_crop(CropRect::new(40, 40, 50, 50), true);
        target.draw_batch(&outside, &quad(40.0, 40.0, 5.0, 5.0)).unwrap();
        target.flush();
        engine.sync().unwrap();
        assert!(log.draws().is_empty());
    }

    #[test]
    fn overflow_flushes_early() {
        let config = EngineConfig { max_batch_vertices: 9, ..Default::default() };
        let (engine, log) = recording_engine(config);
        let target = engine.new_surface(None, 8, 8).unwrap();
        for _ in 0..3 {
            target.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 1.0, 1.0)).unwrap();
        }
        target.flush();
        engine.sync().unwrap();

        let counts: Vec<_> = log.draws().iter().map(|d| d.vertex_count).collect();
        assert_eq!(counts, vec![6, 6, 6]);
    }

    #[test]
    fn oversized_draw_is_split_into_groups() {
        let config = EngineConfig { max_batch_vertices: 6, ..Default::default() };
        let (engine, log) = recording_engine(config);
        let target = engine.new_surface(None, 8, 8).unwrap();
        let mut verts = quad(0.0, 0.0, 1.0, 1.0).to_vec();
        verts.extend_from_slice(&quad(1.0, 1.0, 1.0, 1.0));
        verts.extend_from_slice(&quad(2.0, 2.0, 1.0, 1.0));
        target.draw_batch(&DrawState::new(), &verts).unwrap();
        target.flush();
        engine.sync().unwrap();
        assert_eq!(log.draws().len(), 3);
    }

    #[test]
    fn flush_without_draws_submits_nothing() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let target = engine.new_surface(None, 8, 8).unwrap();
        target.flush();
        target.flush();
        engine.sync().unwrap();
        assert!(log.draws().is_empty());
    }

    // ── reference barrier ─────────────────────────────────────────────────

    #[test]
    fn source_flushes_before_consumer() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let a = engine.new_surface(Some("a"), 16, 16).unwrap();
        let b = engine.new_surface(Some("b"), 16, 16).unwrap();

        a.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 4.0, 4.0)).unwrap();
        b.draw_batch(&DrawState::new().with_texture(&a), &quad(0.0, 0.0, 16.0, 16.0)).unwrap();
        // Writing A again must push B's pending sample of A out first.
        a.draw_batch(&DrawState::new(), &quad(4.0, 4.0, 4.0, 4.0)).unwrap();
        a.flush();
        b.flush();
        engine.sync().unwrap();

        let targets: Vec<_> = log.draws().iter().map(|d| d.target).collect();
        assert_eq!(targets, vec![a.texture_id(), b.texture_id(), a.texture_id()]);
        assert_eq!(a.referrer_count(), 0);
    }

    #[test]
    fn dispose_flushes_referrers_before_free() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let a = engine.new_surface(Some("a"), 8, 8).unwrap();
        let b = engine.new_surface(Some("b"), 8, 8).unwrap();
        b.draw_batch(&DrawState::new().with_texture(&a), &quad(0.0, 0.0, 8.0, 8.0)).unwrap();
        a.dispose();
        engine.sync().unwrap();

        let calls = log.calls();
        let draw_at = calls.iter().position(|c| matches!(c, Call::Draw(d) if d.target == b.texture_id()));
        let free_at = calls.iter().position(|c| matches!(c, Call::Free { id } if *id == a.texture_id()));
        assert!(draw_at.unwrap() < free_at.unwrap());
    }

    #[test]
    fn explicit_reference_flushes_source_and_tracks_caller() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let a = engine.new_surface(Some("a"), 8, 8).unwrap();
        let b = engine.new_surface(Some("b"), 8, 8).unwrap();
        a.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 2.0, 2.0)).unwrap();

        a.reference(&b).unwrap();
        assert_eq!(a.open_batch_vertices(), None);
        assert_eq!(a.referrer_count(), 1);
        a.unreference(&b).unwrap();
        assert_eq!(a.referrer_count(), 0);

        engine.sync().unwrap();
        assert_eq!(log.draws_into(a.texture_id()).len(), 1);

        a.dispose();
        assert!(matches!(a.reference(&b), Err(EngineError::Disposed { .. })));
    }

    #[test]
    fn disposed_caller_cannot_reference() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let a = engine.new_surface(Some("a"), 8, 8).unwrap();
        let b = engine.new_surface(Some("b"), 8, 8).unwrap();
        b.dispose();

        assert!(matches!(a.reference(&b), Err(EngineError::Disposed { .. })));
        assert_eq!(a.referrer_count(), 0);
    }

    #[test]
    fn test_engines_keep_leak_reports_quiet() {
        let (engine, _log) = recording_engine(EngineConfig { report_leaks: true, ..EngineConfig::default() });
        assert!(!engine.config().report_leaks);
    }

    // ── region copy ───────────────────────────────────────────────────────

    #[test]
    fn copy_from_flushes_source_batch_first() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let a = engine.new_surface(Some("a"), 8, 8).unwrap();
        let b = engine.new_surface(Some("b"), 8, 8).unwrap();

        a.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 4.0, 4.0)).unwrap();
        b.copy_from(&a, CropRect::from_size(0, 0, 4, 4), 2, 2).unwrap();
        engine.sync().unwrap();

        let calls = log.calls();
        let draw_at = calls.iter().position(|c| matches!(c, Call::Draw(d) if d.target == a.texture_id()));
        let copy_at = calls.iter().position(|c| {
            matches!(c, Call::Copy { source, target, .. } if *source == a.texture_id() && *target == b.texture_id())
        });
        assert!(draw_at.unwrap() < copy_at.unwrap());
        assert_eq!(a.referrer_count(), 0);
    }

    #[test]
    fn copy_from_flushes_own_batch_and_copies_pixels() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let src = engine.new_image(None, 2, 1, &[0xFF00_00FF, 0xFFFF_0000]).unwrap();
        let dst = engine.new_surface(None, 4, 4).unwrap();

        dst.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 1.0, 1.0)).unwrap();
        dst.copy_from(&src, CropRect::from_size(0, 0, 2, 1), 1, 3).unwrap();

        let row = dst.read_pixels(CropRect::from_size(0, 3, 4, 1)).unwrap();
        assert_eq!(row, vec![0, 0xFF00_00FF, 0xFFFF_0000, 0]);
        let calls = log.calls();
        let draw_at = calls.iter().position(|c| matches!(c, Call::Draw(d) if d.target == dst.texture_id()));
        let copy_at = calls.iter().position(|c| matches!(c, Call::Copy { .. }));
        assert!(draw_at.unwrap() < copy_at.unwrap());
    }

    #[test]
    fn copy_from_validates_rects() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let src = engine.new_surface(None, 4, 4).unwrap();
        let dst = engine.new_surface(None, 4, 4).unwrap();

        let oob_src = dst.copy_from(&src, CropRect::from_size(2, 2, 4, 4), 0, 0);
        assert!(matches!(oob_src, Err(EngineError::InvalidGeometry(_))));
        let oob_dst = dst.copy_from(&src, CropRect::from_size(0, 0, 2, 2), 3, 0);
        assert!(matches!(oob_dst, Err(EngineError::InvalidGeometry(_))));
        let far = dst.copy_from(&src, CropRect::from_size(0, 0, 2, 2), i32::MAX, 0);
        assert!(matches!(far, Err(EngineError::InvalidGeometry(_))));
        assert!(matches!(dst.copy_from(&dst, dst.bounds(), 0, 0), Err(EngineError::SelfSample { .. })));
    }

    #[test]
    fn self_sampling_is_rejected() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let a = engine.new_surface(None, 8, 8).unwrap();
        let err = a.draw_batch(&DrawState::new().with_texture(&a), &quad(0.0, 0.0, 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, EngineError::SelfSample { .. }));
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[test]
    fn double_dispose_frees_once() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface(None, 4, 4).unwrap();
        s.dispose();
        s.dispose();
        drop(s);
        engine.sync().unwrap();
        assert_eq!(frees(&log), 1);
        assert_eq!(engine.stats().live_surfaces, 0);
    }

    #[test]
    fn dropping_last_handle_disposes() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface(None, 4, 4).unwrap();
        let clone = s.clone();
        s.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 1.0, 1.0)).unwrap();
        drop(s);
        engine.sync().unwrap();
        assert_eq!(frees(&log), 0);

        drop(clone);
        engine.sync().unwrap();
        assert_eq!(log.draws().len(), 1);
        assert_eq!(frees(&log), 1);
    }

    #[test]
    fn disposed_surface_rejects_use() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let src = engine.new_surface(None, 4, 4).unwrap();
        let dst = engine.new_surface(None, 4, 4).unwrap();
        src.dispose();
        assert!(matches!(src.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 1.0, 1.0)), Err(EngineError::Disposed { .. })));
        assert!(matches!(
            dst.draw_batch(&DrawState::new().with_texture(&src), &quad(0.0, 0.0, 1.0, 1.0)),
            Err(EngineError::Disposed { .. })
        ));
    }

    #[test]
    fn images_are_immutable() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let img = engine.new_image(None, 2, 2, &[0; 4]).unwrap();
        assert!(matches!(img.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 1.0, 1.0)), Err(EngineError::Immutable { .. })));
        assert!(matches!(img.clear(img.bounds(), Color::WHITE), Err(EngineError::Immutable { .. })));
        assert_eq!(img.read_pixels(img.bounds()).unwrap(), vec![0; 4]);
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        assert!(matches!(engine.new_surface(None, 0, 4), Err(EngineError::InvalidSize { .. })));
        assert!(matches!(engine.new_image(None, 2, 2, &[0; 3]), Err(EngineError::PixelCount { expected: 4, actual: 3 })));
    }

    #[test]
    fn vertex_count_must_form_triangles() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface(None, 4, 4).unwrap();
        let q = quad(0.0, 0.0, 1.0, 1.0);
        assert!(matches!(s.draw_batch(&DrawState::new(), &q[..4]), Err(EngineError::InvalidGeometry(_))));
    }

    // ── pixels ────────────────────────────────────────────────────────────

    #[test]
    fn upload_clear_and_read_back() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface(None, 2, 2).unwrap();
        s.upload(CropRect::full(2, 2), &[1, 2, 3, 4]).unwrap();
        s.clear(CropRect::new(1, 0, 2, 2), Color::BLACK).unwrap();
        assert_eq!(s.read_pixels(s.bounds()).unwrap(), vec![1, 0xFF000000, 3, 0xFF000000]);
    }

    #[test]
    fn async_readback_runs_on_callback_thread() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface_with(None, 1, 1, &[7]).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        s.read_pixels_async(s.bounds(), move |res| {
            let name = std::thread::current().name().map(str::to_string);
            tx.send((res.unwrap(), name)).unwrap();
        })
        .unwrap();
        let (pixels, thread) = rx.recv().unwrap();
        assert_eq!(pixels, vec![7]);
        assert_eq!(thread.as_deref(), Some("tessera-callbacks"));
    }

    #[test]
    fn readback_out_of_bounds_is_rejected() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface(None, 2, 2).unwrap();
        assert!(matches!(s.read_pixels(CropRect::full(3, 3)), Err(EngineError::InvalidGeometry(_))));
    }

    // ── failures ──────────────────────────────────────────────────────────

    #[test]
    fn failing_task_does_not_stop_pipeline() {
        let (engine, log) = recording_engine(EngineConfig::default());
        engine.submit(Task::Custom(Box::new(|_: &mut dyn Backend| -> anyhow::Result<()> { anyhow::bail!("bad task") })));
        engine.submit(Task::Custom(Box::new(|_: &mut dyn Backend| -> anyhow::Result<()> { panic!("worse task") })));
        let s = engine.new_surface(None, 4, 4).unwrap();
        s.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 1.0, 1.0)).unwrap();
        s.flush();
        engine.sync().unwrap();

        assert_eq!(log.draws().len(), 1);
        assert_eq!(engine.stats().tasks.failed, 2);
    }

    #[test]
    fn init_failure_is_reported_once() {
        let res = Engine::new(EngineConfig::default(), || anyhow::bail!("no adapter"));
        match res {
            Err(EngineError::Init(err)) => assert!(format!("{err:#}").contains("no adapter")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("engine started without backend"),
        }
    }

    #[test]
    fn work_after_shutdown_is_dropped() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface(None, 2, 2).unwrap();
        engine.sync().unwrap();
        engine.shutdown();
        engine.shutdown();

        s.draw_batch(&DrawState::new(), &quad(0.0, 0.0, 1.0, 1.0)).unwrap();
        s.flush();
        assert!(matches!(s.read_pixels(s.bounds()), Err(EngineError::ShutDown)));
        assert!(matches!(engine.sync(), Err(EngineError::ShutDown)));
        assert!(log.draws().is_empty());
        assert!(engine.stats().tasks.dropped >= 2);
    }

    #[test]
    fn sync_from_worker_is_reentrant_error() {
        let (engine, _log) = recording_engine(EngineConfig::default());
        let s = engine.new_surface(None, 1, 1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        engine.submit_callback(move || {
            tx.send(s.read_pixels(CropRect::full(1, 1))).unwrap();
        });
        assert!(matches!(rx.recv().unwrap(), Err(EngineError::Reentrant { .. })));
    }

    // ── concurrency ───────────────────────────────────────────────────────

    #[test]
    fn producers_on_many_threads() {
        let (engine, log) = recording_engine(EngineConfig::default());
        let atlas = engine.new_image(Some("atlas"), 4, 4, &[0xFFFFFFFF; 16]).unwrap();
        let targets: Vec<_> = (0..4).map(|_| engine.new_surface(None, 32, 32).unwrap()).collect();

        std::thread::scope(|scope| {
            for target in &targets {
                let atlas = &atlas;
                scope.spawn(move || {
                    let state = DrawState::new().with_texture(atlas);
                    for i in 0..50 {
                        target.draw_batch(&state, &quad(i as f32 % 32.0, 0.0, 1.0, 1.0)).unwrap();
                    }
                    target.flush();
                });
            }
        });
        engine.sync().unwrap();

        for target in &targets {
            let draws = log.draws_into(target.texture_id());
            assert_eq!(draws.len(), 1);
            assert_eq!(draws[0].vertex_count, 300);
        }
        assert_eq!(engine.stats().live_surfaces, 5);
    }
}
