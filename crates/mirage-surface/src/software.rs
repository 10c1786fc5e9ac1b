//! CPU raster target over a BGRX8888 framebuffer.

use mirage_raster::{BitsPerPixel, Color, CompositeOp, PackedImage, PixelRect, Point};

use crate::target::RasterTarget;

/// Software renderer backing the local-render backend and the remote
/// consumer's replay path.
///
/// The framebuffer is tightly packed BGRX8888 (byte order in memory is
/// `[B, G, R, X]`). Sub-32bpp blit sources are expanded per pixel: 24 bpp is
/// BGR, 16 bpp is B5G6R5, 8 bpp is grayscale and 1 bpp is bilevel
/// (MSB-first within each byte, set bit = white).
pub struct SoftwareTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    origin: Point,
    clip: Vec<PixelRect>,
}

impl SoftwareTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
            origin: Point::new(0, 0),
            clip: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw BGRX8888 framebuffer contents.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Framebuffer pixel at physical coordinates, `None` out of bounds.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Color> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return None;
        }
        let off = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.pixels[off..off + 4];
        Some(Color::from_rgb(px[2], px[1], px[0]))
    }

    fn clip_allows(&self, x: i32, y: i32) -> bool {
        self.clip.is_empty() || self.clip.iter().any(|r| r.contains(x, y))
    }

    /// Write one window-relative pixel through clip, origin translation and
    /// bounds checks.
    fn put(&mut self, x: i32, y: i32, color: Color, op: CompositeOp) {
        if !self.clip_allows(x, y) {
            return;
        }
        let (px, py) = (x + self.origin.x, y + self.origin.y);
        if px < 0 || py < 0 || px as u32 >= self.width || py as u32 >= self.height {
            return;
        }
        let off = (py as usize * self.width as usize + px as usize) * 4;
        let dst = &mut self.pixels[off..off + 4];
        let src = [color.b(), color.g(), color.r()];
        match op {
            CompositeOp::Source => {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2] = src[2];
            }
            CompositeOp::Add => {
                dst[0] = dst[0].saturating_add(src[0]);
                dst[1] = dst[1].saturating_add(src[1]);
                dst[2] = dst[2].saturating_add(src[2]);
            }
            CompositeOp::Atop => {
                dst[0] &= src[0];
                dst[1] &= src[1];
                dst[2] &= src[2];
            }
        }
    }

    /// Sample `image` at image-local pixel coordinates (including the
    /// sub-byte left phase recorded in `image.rect`).
    fn sample(image: &PackedImage, x: i32, y: i32) -> Option<Color> {
        if y < 0 || y >= image.rect.height() {
            return None;
        }
        let row = y as usize * image.stride as usize;
        let bytes = &image.bytes;
        Some(match image.bpp {
            BitsPerPixel::ThirtyTwo => {
                let off = row + x as usize * 4;
                let px = bytes.get(off..off + 4)?;
                Color::from_rgb(px[2], px[1], px[0])
            }
            BitsPerPixel::TwentyFour => {
                let off = row + x as usize * 3;
                let px = bytes.get(off..off + 3)?;
                Color::from_rgb(px[2], px[1], px[0])
            }
            BitsPerPixel::Sixteen => {
                let off = row + x as usize * 2;
                let px = bytes.get(off..off + 2)?;
                let v = u16::from_le_bytes([px[0], px[1]]);
                let b = (v & 0x1f) as u8;
                let g = ((v >> 5) & 0x3f) as u8;
                let r = ((v >> 11) & 0x1f) as u8;
                Color::from_rgb((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
            }
            BitsPerPixel::Eight => {
                let v = *bytes.get(row + x as usize)?;
                Color::from_rgb(v, v, v)
            }
            BitsPerPixel::One => {
                let bit_index = x as usize;
                let byte = *bytes.get(row + bit_index / 8)?;
                if byte & (0x80 >> (bit_index % 8)) != 0 {
                    Color::WHITE
                } else {
                    Color::BLACK
                }
            }
        })
    }
}

impl RasterTarget for SoftwareTarget {
    fn set_origin(&mut self, origin: Point) {
        self.origin = origin;
    }

    fn set_clip(&mut self, rects: &[PixelRect]) {
        self.clip.clear();
        self.clip.extend(rects.iter().map(|r| r.normalize()));
    }

    fn fill_rect(&mut self, rect: &PixelRect, color: Color, op: CompositeOp) {
        let rect = rect.normalize();
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                self.put(x, y, color, op);
            }
        }
    }

    fn stroke_line(&mut self, from: Point, to: Point, color: Color) {
        // Bresenham over window-relative coordinates, both endpoints
        // included.
        let (mut x, mut y) = (from.x, from.y);
        let dx = (to.x - from.x).abs();
        let dy = -(to.y - from.y).abs();
        let sx = if from.x < to.x { 1 } else { -1 };
        let sy = if from.y < to.y { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x, y, color, CompositeOp::Source);
            if x == to.x && y == to.y {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn stroke_polyline(&mut self, points: &[Point], color: Color) {
        for pair in points.windows(2) {
            self.stroke_line(pair[0], pair[1], color);
        }
    }

    fn blit(&mut self, image: &PackedImage, dst_rect: &PixelRect, op: CompositeOp) {
        let dst_rect = dst_rect.normalize();
        let (dw, dh) = (dst_rect.width(), dst_rect.height());
        let (sw, sh) = (image.rect.width(), image.rect.height());
        if dw <= 0 || dh <= 0 || sw <= 0 || sh <= 0 {
            return;
        }
        for row in 0..dh {
            let sy = (row as i64 * sh as i64 / dh as i64) as i32;
            for col in 0..dw {
                let sx = image.rect.left + (col as i64 * sw as i64 / dw as i64) as i32;
                if let Some(color) = Self::sample(image, sx, sy) {
                    self.put(dst_rect.left + col, dst_rect.top + row, color, op);
                }
            }
        }
    }

    fn as_software(&self) -> Option<&SoftwareTarget> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn packed_32bpp(colors: &[Color], width: i32, height: i32) -> PackedImage {
        let mut bytes = Vec::new();
        for c in colors {
            bytes.extend_from_slice(&[c.b(), c.g(), c.r(), 0]);
        }
        PackedImage {
            bytes,
            bpp: BitsPerPixel::ThirtyTwo,
            stride: width as u32 * 4,
            rect: PixelRect::new(0, 0, width, height),
        }
    }

    #[test]
    fn fill_respects_clip_and_bounds() {
        let mut t = SoftwareTarget::new(4, 4);
        t.set_clip(&[PixelRect::new(1, 1, 3, 3)]);
        t.fill_rect(
            &PixelRect::new(0, 0, 4, 4),
            Color::WHITE,
            CompositeOp::Source,
        );
        assert_eq!(t.pixel(0, 0), Some(Color::BLACK));
        assert_eq!(t.pixel(1, 1), Some(Color::WHITE));
        assert_eq!(t.pixel(2, 2), Some(Color::WHITE));
        assert_eq!(t.pixel(3, 3), Some(Color::BLACK));

        // Empty clip set restores unclipped drawing.
        t.set_clip(&[]);
        t.fill_rect(
            &PixelRect::new(0, 0, 1, 1),
            Color::WHITE,
            CompositeOp::Source,
        );
        assert_eq!(t.pixel(0, 0), Some(Color::WHITE));
    }

    #[test]
    fn composite_add_saturates_and_atop_masks() {
        let mut t = SoftwareTarget::new(1, 1);
        let r = PixelRect::new(0, 0, 1, 1);
        t.fill_rect(&r, Color::from_rgb(0xF0, 0x10, 0xFF), CompositeOp::Source);
        t.fill_rect(&r, Color::from_rgb(0x20, 0x20, 0x01), CompositeOp::Add);
        assert_eq!(t.pixel(0, 0), Some(Color::from_rgb(0xFF, 0x30, 0xFF)));

        t.fill_rect(&r, Color::from_rgb(0x0F, 0xFF, 0x00), CompositeOp::Atop);
        assert_eq!(t.pixel(0, 0), Some(Color::from_rgb(0x0F, 0x30, 0x00)));
    }

    #[test]
    fn blit_copies_and_scales_nearest() {
        let red = Color::from_rgb(0xFF, 0, 0);
        let blue = Color::from_rgb(0, 0, 0xFF);
        let image = packed_32bpp(&[red, blue], 2, 1);

        let mut t = SoftwareTarget::new(4, 1);
        t.blit(&image, &PixelRect::new(0, 0, 4, 1), CompositeOp::Source);
        assert_eq!(t.pixel(0, 0), Some(red));
        assert_eq!(t.pixel(1, 0), Some(red));
        assert_eq!(t.pixel(2, 0), Some(blue));
        assert_eq!(t.pixel(3, 0), Some(blue));
    }

    #[test]
    fn blit_1bpp_honors_left_phase() {
        // Bits 0b0101_0000 with rect.left = 1: pixels 1..4 are 1,0,1.
        let image = PackedImage {
            bytes: vec![0b0101_0000, 0, 0, 0],
            bpp: BitsPerPixel::One,
            stride: 4,
            rect: PixelRect::new(1, 0, 4, 1),
        };
        let mut t = SoftwareTarget::new(3, 1);
        t.blit(&image, &PixelRect::new(0, 0, 3, 1), CompositeOp::Source);
        assert_eq!(t.pixel(0, 0), Some(Color::WHITE));
        assert_eq!(t.pixel(1, 0), Some(Color::BLACK));
        assert_eq!(t.pixel(2, 0), Some(Color::WHITE));
    }

    #[test]
    fn stroke_line_draws_diagonal() {
        let mut t = SoftwareTarget::new(3, 3);
        t.stroke_line(Point::new(0, 0), Point::new(2, 2), Color::WHITE);
        for i in 0..3 {
            assert_eq!(t.pixel(i, i), Some(Color::WHITE));
        }
        assert_eq!(t.pixel(0, 2), Some(Color::BLACK));
    }
}
