use crate::pool::{DEFAULT_RETENTION, SIZE_CLASSES};

/// Vertex data per vertex in a batch buffer: position, color, texcoord.
pub(crate) const FLOATS_PER_VERTEX: usize = 2 + 4 + 2;

/// Engine configuration.
///
/// Defaults are sized for interactive 2D work: a deep task queue so
/// producers rarely block, and batches that fit the largest pool class.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the GPU task queue. Submitters block when it is full.
    pub task_queue_capacity: usize,
    /// Capacity of the callback queue.
    pub callback_queue_capacity: usize,
    /// Vertices accumulated per batch before it is flushed.
    pub max_batch_vertices: usize,
    /// Free buffers kept per float pool size class.
    pub pool_retention: usize,
    pub worker_thread_name: String,
    pub callback_thread_name: String,
    /// Warn at shutdown about surfaces that were never disposed.
    pub report_leaks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_queue_capacity: 65536,
            callback_queue_capacity: 4096,
            max_batch_vertices: 65536,
            pool_retention: DEFAULT_RETENTION,
            worker_thread_name: "tessera-gpu".to_string(),
            callback_thread_name: "tessera-callbacks".to_string(),
            report_leaks: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    /// Clamps values that would deadlock or overflow the pool.
    pub(crate) fn sanitized(mut self) -> Self {
        if self.task_queue_capacity == 0 {
            log::warn!("task_queue_capacity of 0 raised to 1");
            self.task_queue_capacity = 1;
        }
        if self.callback_queue_capacity == 0 {
            log::warn!("callback_queue_capacity of 0 raised to 1");
            self.callback_queue_capacity = 1;
        }

        let largest = SIZE_CLASSES[SIZE_CLASSES.len() - 1] / FLOATS_PER_VERTEX;
        let limit = largest - largest % 3;
        if self.max_batch_vertices > limit {
            log::warn!("max_batch_vertices {} clamped to {limit}", self.max_batch_vertices);
            self.max_batch_vertices = limit;
        }
        if self.max_batch_vertices < 3 {
            log::warn!("max_batch_vertices {} raised to 3", self.max_batch_vertices);
            self.max_batch_vertices = 3;
        }
        self
    }
}
