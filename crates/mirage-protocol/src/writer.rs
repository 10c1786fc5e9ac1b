//! Safe command stream builder.
//!
//! Maintains the stream header, pads every packet to a 4-byte boundary and
//! patches the total `size_bytes` on [`CmdWriter::finish`]. The remote
//! backend resets and reuses one writer per logical draw call.

use core::mem::{offset_of, size_of};

use mirage_raster::{PackedImage, PixelRect, Point};

use crate::{
    CmdArcTo, CmdBlendImage, CmdExtTextOut, CmdHdr, CmdLineTo, CmdMoveTo, CmdOpcode, CmdPatBlt,
    CmdPolyPolygon, CmdPolyPolyline, CmdPutImage, CmdRectangle, CmdSelectBrush, CmdSelectPen,
    CmdSetBoundsRect, CmdSetClip, CmdSetPoints, CmdSetSource, CmdStreamHeader, CmdStretchBlt,
    CMD_STREAM_MAGIC, PROTOCOL_VERSION,
};

fn align_up(v: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    (v + (a - 1)) & !(a - 1)
}

#[derive(Debug, Default, Clone)]
pub struct CmdWriter {
    buf: Vec<u8>,
}

impl CmdWriter {
    pub fn new() -> Self {
        let mut w = Self { buf: Vec::new() };
        w.reset();
        w
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf.resize(CmdStreamHeader::SIZE_BYTES, 0);

        self.write_u32_at(0, CMD_STREAM_MAGIC);
        self.write_u32_at(4, PROTOCOL_VERSION);
        self.write_u32_at(8, CmdStreamHeader::SIZE_BYTES as u32);
    }

    /// Patch the stream size and hand back the finished bytes.
    pub fn finish(mut self) -> Vec<u8> {
        assert!(
            self.buf.len() <= u32::MAX as usize,
            "command stream too large for u32 size_bytes"
        );
        self.write_u32_at(8, self.buf.len() as u32);
        self.buf
    }

    /// Patch the stream size and take the bytes, leaving the writer reset
    /// for the next batch.
    pub fn take(&mut self) -> Vec<u8> {
        assert!(
            self.buf.len() <= u32::MAX as usize,
            "command stream too large for u32 size_bytes"
        );
        self.write_u32_at(8, self.buf.len() as u32);
        let out = core::mem::take(&mut self.buf);
        self.reset();
        out
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= CmdStreamHeader::SIZE_BYTES
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn write_u32_at(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn write_i32_at(&mut self, offset: usize, v: i32) {
        self.write_u32_at(offset, v as u32);
    }

    fn write_rect_at(&mut self, offset: usize, rect: &PixelRect) {
        self.write_i32_at(offset, rect.left);
        self.write_i32_at(offset + 4, rect.top);
        self.write_i32_at(offset + 8, rect.right);
        self.write_i32_at(offset + 12, rect.bottom);
    }

    fn append_raw(&mut self, opcode: CmdOpcode, cmd_size_bytes: usize) -> usize {
        let aligned_size = align_up(cmd_size_bytes, 4);
        assert!(
            aligned_size <= u32::MAX as usize,
            "command packet too large for u32 size_bytes"
        );

        let offset = self.buf.len();
        self.buf.resize(offset + aligned_size, 0);

        self.write_u32_at(offset, opcode as u32);
        self.write_u32_at(offset + 4, aligned_size as u32);
        offset
    }

    pub fn nop(&mut self) {
        let _base = self.append_raw(CmdOpcode::Nop, CmdHdr::SIZE_BYTES);
    }

    pub fn debug_marker(&mut self, tag: u32) {
        let base = self.append_raw(CmdOpcode::DebugMarker, CmdHdr::SIZE_BYTES + 4);
        self.write_u32_at(base + CmdHdr::SIZE_BYTES, tag);
    }

    /// Emit the packed image as the consumer's current source. The payload
    /// length is implied by `stride * height`.
    pub fn set_source(&mut self, image: &PackedImage) {
        let payload = &image.bytes;
        debug_assert_eq!(
            payload.len(),
            image.stride as usize * image.rect.height() as usize
        );
        let unpadded_size = size_of::<CmdSetSource>() + payload.len();
        let base = self.append_raw(CmdOpcode::SetSource, unpadded_size);
        self.write_u32_at(
            base + offset_of!(CmdSetSource, bits_per_pixel),
            image.bpp.bits(),
        );
        self.write_u32_at(base + offset_of!(CmdSetSource, stride), image.stride);
        self.write_rect_at(base + offset_of!(CmdSetSource, rect), &image.rect);
        self.buf[base + size_of::<CmdSetSource>()..base + size_of::<CmdSetSource>() + payload.len()]
            .copy_from_slice(payload);
    }

    /// Emit the consumer's current point set, already transformed to device
    /// coordinates.
    pub fn set_points(&mut self, points: &[Point]) {
        assert!(points.len() <= u32::MAX as usize);
        let unpadded_size = size_of::<CmdSetPoints>() + points.len() * 8;
        let base = self.append_raw(CmdOpcode::SetPoints, unpadded_size);
        self.write_u32_at(base + offset_of!(CmdSetPoints, count), points.len() as u32);

        let payload_base = base + size_of::<CmdSetPoints>();
        for (i, p) in points.iter().enumerate() {
            self.write_i32_at(payload_base + i * 8, p.x);
            self.write_i32_at(payload_base + i * 8 + 4, p.y);
        }
    }

    /// Emit the consumer's current clip region; an empty slice clears it.
    pub fn set_clip(&mut self, rects: &[PixelRect]) {
        assert!(rects.len() <= u32::MAX as usize);
        let unpadded_size = size_of::<CmdSetClip>() + rects.len() * 16;
        let base = self.append_raw(CmdOpcode::SetClip, unpadded_size);
        self.write_u32_at(base + offset_of!(CmdSetClip, rect_count), rects.len() as u32);

        let payload_base = base + size_of::<CmdSetClip>();
        for (i, r) in rects.iter().enumerate() {
            self.write_rect_at(payload_base + i * 16, r);
        }
    }

    pub fn put_image(&mut self, dst: &PixelRect, src: &PixelRect, rop: u32) {
        let base = self.append_raw(CmdOpcode::PutImage, size_of::<CmdPutImage>());
        self.write_rect_at(base + offset_of!(CmdPutImage, dst), dst);
        self.write_rect_at(base + offset_of!(CmdPutImage, src), src);
        self.write_u32_at(base + offset_of!(CmdPutImage, rop), rop);
    }

    pub fn blend_image(&mut self, dst: &PixelRect, src: &PixelRect, blend_fn: u32) {
        let base = self.append_raw(CmdOpcode::BlendImage, size_of::<CmdBlendImage>());
        self.write_rect_at(base + offset_of!(CmdBlendImage, dst), dst);
        self.write_rect_at(base + offset_of!(CmdBlendImage, src), src);
        self.write_u32_at(base + offset_of!(CmdBlendImage, blend_fn), blend_fn);
    }

    pub fn stretch_blt(&mut self, dst: &PixelRect, src: &PixelRect, rop: u32) {
        let base = self.append_raw(CmdOpcode::StretchBlt, size_of::<CmdStretchBlt>());
        self.write_rect_at(base + offset_of!(CmdStretchBlt, dst), dst);
        self.write_rect_at(base + offset_of!(CmdStretchBlt, src), src);
        self.write_u32_at(base + offset_of!(CmdStretchBlt, rop), rop);
    }

    pub fn pat_blt(&mut self, dst: &PixelRect, rop: u32, color: u32) {
        let base = self.append_raw(CmdOpcode::PatBlt, size_of::<CmdPatBlt>());
        self.write_rect_at(base + offset_of!(CmdPatBlt, dst), dst);
        self.write_u32_at(base + offset_of!(CmdPatBlt, rop), rop);
        self.write_u32_at(base + offset_of!(CmdPatBlt, color), color);
    }

    pub fn rectangle(&mut self, rect: &PixelRect, pen_color: u32, brush_color: u32) {
        let base = self.append_raw(CmdOpcode::Rectangle, size_of::<CmdRectangle>());
        self.write_rect_at(base + offset_of!(CmdRectangle, rect), rect);
        self.write_u32_at(base + offset_of!(CmdRectangle, pen_color), pen_color);
        self.write_u32_at(base + offset_of!(CmdRectangle, brush_color), brush_color);
    }

    pub fn arc_to(&mut self, rect: &PixelRect, start: Point, end: Point) {
        let base = self.append_raw(CmdOpcode::ArcTo, size_of::<CmdArcTo>());
        self.write_rect_at(base + offset_of!(CmdArcTo, rect), rect);
        self.write_i32_at(base + offset_of!(CmdArcTo, start), start.x);
        self.write_i32_at(base + offset_of!(CmdArcTo, start) + 4, start.y);
        self.write_i32_at(base + offset_of!(CmdArcTo, end), end.x);
        self.write_i32_at(base + offset_of!(CmdArcTo, end) + 4, end.y);
    }

    pub fn move_to(&mut self, x: i32, y: i32) {
        let base = self.append_raw(CmdOpcode::MoveTo, size_of::<CmdMoveTo>());
        self.write_i32_at(base + offset_of!(CmdMoveTo, x), x);
        self.write_i32_at(base + offset_of!(CmdMoveTo, y), y);
    }

    pub fn line_to(&mut self, x: i32, y: i32) {
        let base = self.append_raw(CmdOpcode::LineTo, size_of::<CmdLineTo>());
        self.write_i32_at(base + offset_of!(CmdLineTo, x), x);
        self.write_i32_at(base + offset_of!(CmdLineTo, y), y);
    }

    pub fn poly_polyline(&mut self, counts: &[u32]) {
        assert!(counts.len() <= u32::MAX as usize);
        let unpadded_size = size_of::<CmdPolyPolyline>() + counts.len() * 4;
        let base = self.append_raw(CmdOpcode::PolyPolyline, unpadded_size);
        self.write_u32_at(
            base + offset_of!(CmdPolyPolyline, poly_count),
            counts.len() as u32,
        );
        let payload_base = base + size_of::<CmdPolyPolyline>();
        for (i, &c) in counts.iter().enumerate() {
            self.write_u32_at(payload_base + i * 4, c);
        }
    }

    pub fn poly_polygon(&mut self, counts: &[u32]) {
        assert!(counts.len() <= u32::MAX as usize);
        let unpadded_size = size_of::<CmdPolyPolygon>() + counts.len() * 4;
        let base = self.append_raw(CmdOpcode::PolyPolygon, unpadded_size);
        self.write_u32_at(
            base + offset_of!(CmdPolyPolygon, poly_count),
            counts.len() as u32,
        );
        let payload_base = base + size_of::<CmdPolyPolygon>();
        for (i, &c) in counts.iter().enumerate() {
            self.write_u32_at(payload_base + i * 4, c);
        }
    }

    pub fn ext_text_out(&mut self, x: i32, y: i32, flags: u32, rect: &PixelRect, text: &[u16]) {
        assert!(text.len() <= u32::MAX as usize);
        let unpadded_size = size_of::<CmdExtTextOut>() + text.len() * 2;
        let base = self.append_raw(CmdOpcode::ExtTextOut, unpadded_size);
        self.write_i32_at(base + offset_of!(CmdExtTextOut, x), x);
        self.write_i32_at(base + offset_of!(CmdExtTextOut, y), y);
        self.write_u32_at(base + offset_of!(CmdExtTextOut, flags), flags);
        self.write_rect_at(base + offset_of!(CmdExtTextOut, rect), rect);
        self.write_u32_at(base + offset_of!(CmdExtTextOut, count), text.len() as u32);

        let payload_base = base + size_of::<CmdExtTextOut>();
        for (i, &unit) in text.iter().enumerate() {
            self.buf[payload_base + i * 2..payload_base + i * 2 + 2]
                .copy_from_slice(&unit.to_le_bytes());
        }
    }

    pub fn select_brush(&mut self, style: u32, color: u32) {
        let base = self.append_raw(CmdOpcode::SelectBrush, size_of::<CmdSelectBrush>());
        self.write_u32_at(base + offset_of!(CmdSelectBrush, style), style);
        self.write_u32_at(base + offset_of!(CmdSelectBrush, color), color);
    }

    pub fn select_pen(&mut self, style: u32, color: u32, width: u32) {
        let base = self.append_raw(CmdOpcode::SelectPen, size_of::<CmdSelectPen>());
        self.write_u32_at(base + offset_of!(CmdSelectPen, style), style);
        self.write_u32_at(base + offset_of!(CmdSelectPen, color), color);
        self.write_u32_at(base + offset_of!(CmdSelectPen, width), width);
    }

    pub fn set_bounds_rect(&mut self, rect: &PixelRect, flags: u32) {
        let base = self.append_raw(CmdOpcode::SetBoundsRect, size_of::<CmdSetBoundsRect>());
        self.write_rect_at(base + offset_of!(CmdSetBoundsRect, rect), rect);
        self.write_u32_at(base + offset_of!(CmdSetBoundsRect, flags), flags);
    }

    pub fn flush(&mut self) {
        let _base = self.append_raw(CmdOpcode::Flush, CmdHdr::SIZE_BYTES);
    }
}
