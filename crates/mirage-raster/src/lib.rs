//! Pixel geometry, formats and the packed-buffer converter.
//!
//! This crate is the leaf of the display-driver stack. It knows nothing about
//! surfaces, device contexts or the wire protocol; it only describes pixel
//! rectangles and formats, and converts an arbitrary-stride source image
//! region into a tightly packed, word-aligned destination buffer suitable for
//! a downstream consumer (the software renderer or a serialized command
//! payload).
//!
//! Stride convention: a source stride is whatever the producer says it is
//! (validated against the buffer length), while every destination stride
//! computed here is rounded up to a 4-byte boundary.

mod convert;
mod geom;

pub use convert::{compute_destination_layout, convert_image, copy_rows, ConvertError, PackedImage};
pub use geom::{PixelRect, Point};

/// Supported color depths, in bits per pixel.
///
/// This is a closed set: the driver stack silently ignores images in any
/// other depth rather than failing the draw call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BitsPerPixel {
    One = 1,
    Eight = 8,
    Sixteen = 16,
    TwentyFour = 24,
    ThirtyTwo = 32,
}

impl BitsPerPixel {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::One,
            8 => Self::Eight,
            16 => Self::Sixteen,
            24 => Self::TwentyFour,
            32 => Self::ThirtyTwo,
            _ => return None,
        })
    }

    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Source pixels per byte for sub-byte formats, 1 otherwise.
    pub const fn pixels_per_byte(self) -> u32 {
        match self {
            Self::One => 8,
            _ => 1,
        }
    }
}

/// Geometry of a bitmap row layout: color depth plus the byte distance
/// between the start of consecutive rows.
///
/// `bottom_up` marks sources stored last-row-first; the converter itself
/// always copies top-down, and a caller that needs the flip applies
/// [`PackedImage::flip_rows`] on the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormat {
    pub bpp: BitsPerPixel,
    pub stride: u32,
    pub bottom_up: bool,
}

impl PixelFormat {
    pub fn new(bpp: BitsPerPixel, stride: u32) -> Self {
        Self {
            bpp,
            stride,
            bottom_up: false,
        }
    }

    pub fn bottom_up(bpp: BitsPerPixel, stride: u32) -> Self {
        Self {
            bpp,
            stride,
            bottom_up: true,
        }
    }
}

/// Packed 0x00BBGGRR color, matching the device-context color convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Self = Self(0x0000_0000);
    pub const WHITE: Self = Self(0x00FF_FFFF);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self((r as u32) | ((g as u32) << 8) | ((b as u32) << 16))
    }

    pub const fn r(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub const fn g(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub const fn b(self) -> u8 {
        ((self.0 >> 16) & 0xff) as u8
    }
}

/// Raster operation codes accepted from callers (ternary ROP encoding).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum RasterOp {
    SrcCopy = 0x00CC_0020,
    SrcPaint = 0x00EE_0086,
    SrcAnd = 0x0088_00C6,
    PatCopy = 0x00F0_0021,
    Blackness = 0x0000_0042,
    Whiteness = 0x00FF_0062,
}

impl RasterOp {
    /// Unknown codes map to `None`; callers treat that as [`RasterOp::SrcCopy`]
    /// per the default-operator rule.
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0x00CC_0020 => Self::SrcCopy,
            0x00EE_0086 => Self::SrcPaint,
            0x0088_00C6 => Self::SrcAnd,
            0x00F0_0021 => Self::PatCopy,
            0x0000_0042 => Self::Blackness,
            0x00FF_0062 => Self::Whiteness,
            _ => return None,
        })
    }

    /// Compositing operator used when this ROP combines a source image with
    /// the destination.
    pub fn composite_op(self) -> CompositeOp {
        match self {
            Self::SrcPaint => CompositeOp::Add,
            Self::SrcAnd => CompositeOp::Atop,
            _ => CompositeOp::Source,
        }
    }
}

/// The closed set of compositing operators a surface backend must implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeOp {
    /// Plain overwrite.
    Source,
    /// Per-channel saturating add (`SRCPAINT`-style raster ops).
    Add,
    /// Masked blend: destination channels are ANDed with the source
    /// (`SRCAND`-style raster ops).
    Atop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_per_pixel_rejects_unsupported_depths() {
        for bpp in [0u8, 2, 4, 15, 31, 64] {
            assert_eq!(BitsPerPixel::from_u8(bpp), None);
        }
        assert_eq!(BitsPerPixel::from_u8(24), Some(BitsPerPixel::TwentyFour));
    }

    #[test]
    fn color_channel_accessors() {
        let c = Color::from_rgb(0x12, 0x34, 0x56);
        assert_eq!(c.0, 0x0056_3412);
        assert_eq!((c.r(), c.g(), c.b()), (0x12, 0x34, 0x56));
    }

    #[test]
    fn raster_op_composite_mapping() {
        assert_eq!(RasterOp::SrcCopy.composite_op(), CompositeOp::Source);
        assert_eq!(RasterOp::SrcPaint.composite_op(), CompositeOp::Add);
        assert_eq!(RasterOp::SrcAnd.composite_op(), CompositeOp::Atop);
        assert_eq!(RasterOp::PatCopy.composite_op(), CompositeOp::Source);
        assert_eq!(RasterOp::from_u32(0xDEAD_BEEF), None);
    }
}
