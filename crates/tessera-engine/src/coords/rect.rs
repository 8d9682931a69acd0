use std::fmt;

/// Integer pixel rectangle stored as edges: `[left, right) x [up, down)`.
///
/// Used for crop/scissor rectangles. Origin is top-left, +Y down.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct CropRect {
    pub left: i32,
    pub up: i32,
    pub right: i32,
    pub down: i32,
}

impl CropRect {
    #[inline]
    pub const fn new(left: i32, up: i32, right: i32, down: i32) -> Self {
        Self { left, up, right, down }
    }

    #[inline]
    pub const fn from_size(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    /// The full bounds of a `width` x `height` surface.
    #[inline]
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, clamp_dim(width), clamp_dim(height))
    }

    #[inline]
    pub fn width(self) -> i32 {
        self.right - self.left
    }

    #[inline]
    pub fn height(self) -> i32 {
        self.down - self.up
    }

    /// Number of pixels covered; zero for empty rectangles.
    #[inline]
    pub fn area(self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width() as usize * self.height() as usize
        }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.right <= self.left || self.down <= self.up
    }

    /// Clamps every edge into `bounds`.
    ///
    /// Unlike [`intersect`](Self::intersect) this never fails; a rectangle
    /// entirely outside `bounds` collapses onto its border and becomes empty.
    #[inline]
    pub fn clamped_to(self, bounds: CropRect) -> Self {
        Self {
            left: self.left.clamp(bounds.left, bounds.right),
            up: self.up.clamp(bounds.up, bounds.down),
            right: self.right.clamp(bounds.left, bounds.right),
            down: self.down.clamp(bounds.up, bounds.down),
        }
    }

    #[inline]
    pub fn intersect(self, other: CropRect) -> Option<CropRect> {
        let r = Self {
            left: self.left.max(other.left),
            up: self.up.max(other.up),
            right: self.right.min(other.right),
            down: self.down.min(other.down),
        };
        if r.is_empty() { None } else { Some(r) }
    }

    /// True when `other` lies entirely within `self`.
    #[inline]
    pub fn contains_rect(self, other: CropRect) -> bool {
        other.left >= self.left
            && other.up >= self.up
            && other.right <= self.right
            && other.down <= self.down
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} .. {},{}]", self.left, self.up, self.right, self.down)
    }
}

fn clamp_dim(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}
