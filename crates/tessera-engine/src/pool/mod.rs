//! Buffer recycling for batch vertex data.

mod float_pool;

pub use float_pool::{FloatPool, FloatPoolStats, DEFAULT_RETENTION, SIZE_CLASSES};
