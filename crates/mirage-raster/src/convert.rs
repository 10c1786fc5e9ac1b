//! Packed-buffer conversion: arbitrary-stride source region in, word-aligned
//! tightly packed destination out.

use thiserror::Error;

use crate::{BitsPerPixel, PixelFormat, PixelRect};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    /// Destination allocation failed. The caller aborts the draw call and
    /// reports it as handled with nothing drawn.
    #[error("out of memory allocating conversion buffer")]
    OutOfMemory,
    /// The source buffer does not cover the requested region at the declared
    /// stride.
    #[error("source buffer too small: need {needed} bytes, have {available}")]
    SourceTooSmall { needed: usize, available: usize },
    /// The declared stride cannot hold one row of the requested region.
    #[error("source stride {stride} too small for row of {row_bytes} bytes")]
    StrideTooSmall { stride: u32, row_bytes: u32 },
    /// The requested region cannot be described by a u32 destination stride.
    #[error("conversion region too large")]
    RegionTooLarge,
}

fn align_up_u64(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + (alignment - 1)) & !(alignment - 1)
}

/// Destination layout for converting `src_rect` out of a source described by
/// `format`, or `None` when the region cannot be described by a u32 stride.
///
/// The destination rectangle is remapped to destination-local coordinates:
/// `top = 0`, and `left` keeps only the sub-byte pixel phase of the source
/// left edge (nonzero for 1 bpp only), so whole-byte row copies stay valid
/// without bit shifting. The returned stride is rounded up to a 4-byte
/// boundary; the destination buffer size is exactly
/// `dst_stride * dst_rect.height()`.
///
/// Row math is carried in u64 so hostile rect widths reject instead of
/// overflowing.
pub fn compute_destination_layout(
    format: &PixelFormat,
    src_rect: &PixelRect,
) -> Option<(u32, PixelRect)> {
    let ppb = format.bpp.pixels_per_byte() as i32;
    let left = if ppb > 1 {
        src_rect.left.rem_euclid(ppb)
    } else {
        0
    };
    let dst_rect = PixelRect {
        left,
        top: 0,
        right: left.checked_add(src_rect.width())?,
        bottom: src_rect.height(),
    };
    let row_bits = dst_rect.right as u64 * format.bpp.bits() as u64;
    let dst_stride = align_up_u64((row_bits + 7) / 8, 4);
    let dst_stride = u32::try_from(dst_stride).ok()?;
    Some((dst_stride, dst_rect))
}

/// Byte span copied per row: from the floored byte of the destination left
/// edge through the ceiled byte of the right edge.
fn row_copy_bytes(bpp: BitsPerPixel, dst_rect: &PixelRect) -> usize {
    let start = (dst_rect.left as usize * bpp.bits() as usize) / 8;
    let end = (dst_rect.right as usize * bpp.bits() as usize + 7) / 8;
    end - start
}

/// Row-by-row copy of `src_rect` from `src` into `dst` at `dst_stride`.
///
/// Rows are copied top-down in source order; `bottom_up` sources are the
/// caller's concern (see [`PackedImage::flip_rows`]). `dst_rect` must come
/// from [`compute_destination_layout`] for the same `format`/`src_rect` pair.
pub fn copy_rows(
    src: &[u8],
    format: &PixelFormat,
    src_rect: &PixelRect,
    dst: &mut [u8],
    dst_stride: u32,
    dst_rect: &PixelRect,
) -> Result<(), ConvertError> {
    let height = src_rect.height() as usize;
    if height == 0 {
        return Ok(());
    }
    let copy_bytes = row_copy_bytes(format.bpp, dst_rect);
    let src_left_byte = (src_rect.left as usize * format.bpp.bits() as usize) / 8;

    if copy_bytes > format.stride as usize {
        return Err(ConvertError::StrideTooSmall {
            stride: format.stride,
            row_bytes: copy_bytes as u32,
        });
    }

    let src_top = src_rect.top as usize;
    let needed = (src_top + height - 1) * format.stride as usize + src_left_byte + copy_bytes;
    if needed > src.len() {
        return Err(ConvertError::SourceTooSmall {
            needed,
            available: src.len(),
        });
    }

    for row in 0..height {
        let src_off = (src_top + row) * format.stride as usize + src_left_byte;
        let dst_off = row * dst_stride as usize;
        dst[dst_off..dst_off + copy_bytes].copy_from_slice(&src[src_off..src_off + copy_bytes]);
    }
    Ok(())
}

/// Owned, tightly packed image produced by [`convert_image`].
///
/// `rect` is destination-local (see [`compute_destination_layout`]); `stride`
/// is always a 4-byte multiple and `bytes.len() == stride * rect.height()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedImage {
    pub bytes: Vec<u8>,
    pub bpp: BitsPerPixel,
    pub stride: u32,
    pub rect: PixelRect,
}

impl PackedImage {
    pub fn width(&self) -> i32 {
        self.rect.width()
    }

    pub fn height(&self) -> i32 {
        self.rect.height()
    }

    /// Reverses row order in place, for sources stored bottom-up.
    pub fn flip_rows(&mut self) {
        let stride = self.stride as usize;
        let height = self.rect.height() as usize;
        let (mut lo, mut hi) = (0usize, height.saturating_sub(1));
        while lo < hi {
            let (a, b) = self.bytes.split_at_mut(hi * stride);
            a[lo * stride..lo * stride + stride].swap_with_slice(&mut b[..stride]);
            lo += 1;
            hi -= 1;
        }
    }
}

/// Convert `src_rect` of `src` into a fresh [`PackedImage`].
///
/// Allocation is fallible by contract: primitives that cannot be satisfied
/// degrade to "nothing drawn" rather than a hard error, so the allocation
/// failure must be observable to the caller instead of aborting.
pub fn convert_image(
    src: &[u8],
    format: &PixelFormat,
    src_rect: &PixelRect,
) -> Result<PackedImage, ConvertError> {
    let (dst_stride, dst_rect) =
        compute_destination_layout(format, src_rect).ok_or(ConvertError::RegionTooLarge)?;
    let size = dst_stride as usize * dst_rect.height() as usize;

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(size)
        .map_err(|_| ConvertError::OutOfMemory)?;
    bytes.resize(size, 0);

    copy_rows(src, format, src_rect, &mut bytes, dst_stride, &dst_rect)?;

    let mut image = PackedImage {
        bytes,
        bpp: format.bpp,
        stride: dst_stride,
        rect: dst_rect,
    };
    if format.bottom_up {
        image.flip_rows();
    }
    Ok(image)
}
