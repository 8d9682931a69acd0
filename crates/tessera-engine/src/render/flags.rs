use std::ops::{BitOr, BitOrAssign};

/// Per-batch draw flags. Currently only texture wrapping.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct DrawFlags(u32);

impl DrawFlags {
    pub const EMPTY: DrawFlags = DrawFlags(0);
    /// Repeat the texture horizontally instead of clamping.
    pub const WRAP_S: DrawFlags = DrawFlags(1);
    /// Repeat the texture vertically instead of clamping.
    pub const WRAP_T: DrawFlags = DrawFlags(2);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: DrawFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DrawFlags {
    type Output = DrawFlags;

    fn bitor(self, rhs: DrawFlags) -> DrawFlags {
        DrawFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DrawFlags {
    fn bitor_assign(&mut self, rhs: DrawFlags) {
        self.0 |= rhs.0;
    }
}

/// Painter-level tiling choice, lowered into [`DrawFlags`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum Tiling {
    #[default]
    None,
    X,
    Y,
    Both,
}

impl Tiling {
    pub fn flags(self) -> DrawFlags {
        match self {
            Tiling::None => DrawFlags::EMPTY,
            Tiling::X => DrawFlags::WRAP_S,
            Tiling::Y => DrawFlags::WRAP_T,
            Tiling::Both => DrawFlags::WRAP_S | DrawFlags::WRAP_T,
        }
    }
}
