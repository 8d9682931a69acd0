/// Straight-alpha RGBA color with `f32` channels in `[0, 1]`.
///
/// Straight (non-premultiplied) alpha matches the `BlendMode::NORMAL`
/// program (`SrcA, 1 - SrcA`).
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

    #[inline]
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a color from `0`–`255` channel bytes.
    #[inline]
    pub fn from_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0)
    }

    /// Unpacks a `0xAARRGGBB` texel.
    #[inline]
    pub fn from_argb(argb: u32) -> Self {
        let [a, r, g, b] = argb.to_be_bytes();
        Self::from_u8(r, g, b, a)
    }

    /// Packs into a `0xAARRGGBB` texel, clamping and rounding each channel.
    #[inline]
    pub fn to_argb(self) -> u32 {
        u32::from_be_bytes([
            channel_to_u8(self.a),
            channel_to_u8(self.r),
            channel_to_u8(self.g),
            channel_to_u8(self.b),
        ])
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }
}

#[inline]
fn channel_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Converts `0xAARRGGBB` texels into tightly packed RGBA8 bytes.
pub fn argb_to_rgba8(pixels: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * 4);
    for &p in pixels {
        let [a, r, g, b] = p.to_be_bytes();
        out.extend_from_slice(&[r, g, b, a]);
    }
    out
}

/// Converts tightly packed RGBA8 bytes into `0xAARRGGBB` texels.
///
/// Trailing bytes that do not form a whole texel are ignored.
pub fn rgba8_to_argb(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|px| u32::from_be_bytes([px[3], px[0], px[1], px[2]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argb_unpacks_channels_in_order() {
        let c = Color::from_argb(0x80FF0000);
        assert_eq!(c.r, 1.0);
        assert_eq!(c.g, 0.0);
        assert_eq!(c.b, 0.0);
        assert!((c.a - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn to_argb_clamps_out_of_range() {
        assert_eq!(Color::rgba(2.0, -1.0, 0.5, 1.0).to_argb(), 0xFFFF0080);
    }

    #[test]
    fn rgba8_conversion_swizzles() {
        let bytes = argb_to_rgba8(&[0x11223344]);
        assert_eq!(bytes, vec![0x22, 0x33, 0x44, 0x11]);
        assert_eq!(rgba8_to_argb(&bytes), vec![0x11223344]);
    }

    #[test]
    fn rgba8_ignores_partial_texel() {
        assert_eq!(rgba8_to_argb(&[1, 2, 3, 4, 5, 6]).len(), 1);
    }
}
