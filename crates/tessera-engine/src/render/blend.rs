//! Packed blend programs.
//!
//! A [`BlendMode`] is a small integer code describing one equation for the
//! color channels and one for alpha. Batches compare codes for equality; the
//! native backend decodes them into pipeline state.

use std::fmt;

/// Factor applied to one side of the blend equation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlendWeight {
    Zero = 0,
    One = 1,
    Src = 2,
    InvertSrc = 3,
    Dst = 4,
    InvertDst = 5,
    SrcA = 6,
    InvertSrcA = 7,
    DstA = 8,
    InvertDstA = 9,
    SrcAlphaSaturate = 10,
}

impl BlendWeight {
    fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => Self::Zero,
            1 => Self::One,
            2 => Self::Src,
            3 => Self::InvertSrc,
            4 => Self::Dst,
            5 => Self::InvertDst,
            6 => Self::SrcA,
            7 => Self::InvertSrcA,
            8 => Self::DstA,
            9 => Self::InvertDstA,
            10 => Self::SrcAlphaSaturate,
            _ => return None,
        })
    }
}

/// How the weighted source and destination terms are combined.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlendOp {
    /// `src + dst`
    Add = 0,
    /// `src - dst`
    Sub = 1,
    /// `dst - src`
    ReverseSub = 2,
}

impl BlendOp {
    fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => Self::Add,
            1 => Self::Sub,
            2 => Self::ReverseSub,
            _ => return None,
        })
    }
}

/// One blend equation: `op(src * src_weight, dst * dst_weight)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendEquation {
    pub src: BlendWeight,
    pub dst: BlendWeight,
    pub op: BlendOp,
}

impl BlendEquation {
    pub const fn new(src: BlendWeight, dst: BlendWeight, op: BlendOp) -> Self {
        Self { src, dst, op }
    }

    const fn pack(self) -> u32 {
        (self.src as u32) | ((self.dst as u32) << 4) | ((self.op as u32) << 8)
    }

    fn unpack(bits: u32) -> Option<Self> {
        Some(Self {
            src: BlendWeight::from_bits(bits & 0xF)?,
            dst: BlendWeight::from_bits((bits >> 4) & 0xF)?,
            op: BlendOp::from_bits((bits >> 8) & 0xF)?,
        })
    }
}

/// Packed blend program. Color equation in bits `0..12`, alpha in `12..24`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendMode(u32);

impl BlendMode {
    /// Replace: `One, Zero, Add` on both channels. Backends disable blending.
    pub const NONE: BlendMode = BlendMode::program(
        BlendEquation::new(BlendWeight::One, BlendWeight::Zero, BlendOp::Add),
        BlendEquation::new(BlendWeight::One, BlendWeight::Zero, BlendOp::Add),
    );

    /// Straight-alpha "over". Fully transparent fragments are discarded.
    pub const NORMAL: BlendMode = BlendMode::program(
        BlendEquation::new(BlendWeight::SrcA, BlendWeight::InvertSrcA, BlendOp::Add),
        BlendEquation::new(BlendWeight::SrcA, BlendWeight::InvertSrcA, BlendOp::Add),
    );

    /// Additive color; destination alpha is kept.
    pub const ADD: BlendMode = BlendMode::program(
        BlendEquation::new(BlendWeight::One, BlendWeight::One, BlendOp::Add),
        BlendEquation::new(BlendWeight::Zero, BlendWeight::One, BlendOp::Add),
    );

    /// Subtractive color (`dst - src`); destination alpha is kept.
    pub const SUB: BlendMode = BlendMode::program(
        BlendEquation::new(BlendWeight::One, BlendWeight::One, BlendOp::ReverseSub),
        BlendEquation::new(BlendWeight::Zero, BlendWeight::One, BlendOp::Add),
    );

    pub const fn program(rgb: BlendEquation, alpha: BlendEquation) -> Self {
        Self(rgb.pack() | (alpha.pack() << 12))
    }

    /// Rebuilds a mode from its raw code, rejecting unknown weights and ops.
    pub fn from_code(code: u32) -> Option<Self> {
        if code >> 24 != 0 {
            return None;
        }
        BlendEquation::unpack(code & 0xFFF)?;
        BlendEquation::unpack(code >> 12)?;
        Some(Self(code))
    }

    #[inline]
    pub const fn code(self) -> u32 {
        self.0
    }

    pub fn rgb(self) -> BlendEquation {
        // Constructed only from valid equations.
        BlendEquation::unpack(self.0 & 0xFFF).unwrap_or(NONE_EQ)
    }

    pub fn alpha(self) -> BlendEquation {
        BlendEquation::unpack(self.0 >> 12).unwrap_or(NONE_EQ)
    }

    /// False for [`BlendMode::NONE`], which backends draw without blending.
    #[inline]
    pub fn is_enabled(self) -> bool {
        self != Self::NONE
    }

    /// Only [`BlendMode::NORMAL`] discards fragments with zero alpha.
    #[inline]
    pub fn alpha_test(self) -> bool {
        self == Self::NORMAL
    }
}

const NONE_EQ: BlendEquation = BlendEquation::new(BlendWeight::One, BlendWeight::Zero, BlendOp::Add);

impl Default for BlendMode {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Debug for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => f.write_str("BlendMode::NONE"),
            Self::NORMAL => f.write_str("BlendMode::NORMAL"),
            Self::ADD => f.write_str("BlendMode::ADD"),
            Self::SUB => f.write_str("BlendMode::SUB"),
            _ => f
                .debug_struct("BlendMode")
                .field("rgb", &self.rgb())
                .field("alpha", &self.alpha())
                .finish(),
        }
    }
}
