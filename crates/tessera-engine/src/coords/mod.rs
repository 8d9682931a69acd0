//! Pixel-space geometry shared by surfaces, the painter and backends.
//!
//! Canonical space:
//! - physical pixels of the target surface
//! - origin top-left
//! - +X right, +Y down
//!
//! Backends convert to NDC themselves.

mod rect;
mod region;

pub use rect::CropRect;
pub use region::Region;
