//! Serializing backend. Encodes every primitive as a command-stream batch
//! and hands the finished bytes to a [`CommandSink`] for transport.
//!
//! Dependent state always precedes the primary command inside a batch
//! (`SetSource` / `SetPoints` / `SetClip` first), so the consumer can hold a
//! single slot of each and never sees a primary command whose inputs have
//! not arrived.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use mirage_raster::{convert_image, PixelFormat, PixelRect, Point};
use mirage_surface::WindowId;

use mirage_protocol::CmdWriter;

use crate::driver::{Brush, DisplayDriver, FontHandle, ImageSource, Pen, TextOutFlags};
use crate::PRIORITY_REMOTE;

/// Transport for finished command streams.
pub trait CommandSink: Send {
    fn submit(&mut self, stream: Vec<u8>);
}

/// In-process sink that retains every submitted stream. Backs loopback
/// setups where the consumer replays from the same address space, and the
/// integration tests.
#[derive(Clone, Default)]
pub struct CollectingSink {
    streams: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut streams = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *streams)
    }
}

impl CommandSink for CollectingSink {
    fn submit(&mut self, stream: Vec<u8>) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stream);
    }
}

/// Chain entry that forwards drawing to a remote consumer.
pub struct RemoteDriver {
    writer: CmdWriter,
    sink: Box<dyn CommandSink>,
    clip: Vec<PixelRect>,
    clip_dirty: bool,
    brush: Brush,
    pen: Pen,
}

impl RemoteDriver {
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self {
            writer: CmdWriter::new(),
            sink,
            clip: Vec::new(),
            clip_dirty: false,
            brush: Brush::default(),
            pen: Pen::default(),
        }
    }

    /// Re-emits the device clip ahead of the primary command when it changed
    /// since the last batch.
    fn begin(&mut self) {
        if self.clip_dirty {
            self.writer.set_clip(&self.clip);
            self.clip_dirty = false;
        }
    }

    fn submit(&mut self) {
        let stream = self.writer.take();
        trace!(bytes = stream.len(), "submitting command batch");
        self.sink.submit(stream);
    }

    /// Fetch, convert, and emit a `SetSource` for an operation whose pixels
    /// live in another device context. Returns the re-origined source rect,
    /// or `None` when the draw must be dropped without emitting anything.
    fn emit_fetched_source(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
    ) -> Option<PixelRect> {
        let Some((format, bits)) = source.get_image(src) else {
            trace!("source fetch failed, dropping the draw");
            return None;
        };
        match convert_image(&bits, &format, src) {
            Ok(image) => {
                self.writer.set_source(&image);
                Some(image.rect)
            }
            Err(err) => {
                trace!(?err, "source conversion failed, dropping the draw");
                None
            }
        }
    }
}

impl DisplayDriver for RemoteDriver {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn priority(&self) -> i32 {
        PRIORITY_REMOTE
    }

    fn move_to(&mut self, p: Point) -> bool {
        self.begin();
        self.writer.move_to(p.x, p.y);
        self.submit();
        true
    }

    fn line_to(&mut self, p: Point) -> bool {
        self.begin();
        self.writer.line_to(p.x, p.y);
        self.submit();
        true
    }

    fn arc_to(&mut self, rect: &PixelRect, start: Point, end: Point) -> bool {
        self.begin();
        self.writer.arc_to(rect, start, end);
        self.submit();
        true
    }

    fn rectangle(&mut self, rect: &PixelRect) -> bool {
        self.begin();
        // Colors ride along so the consumer does not depend on selection
        // state from an earlier batch that may have been dropped.
        self.writer
            .rectangle(rect, self.pen.color.0, self.brush.color.0);
        self.submit();
        true
    }

    fn pat_blt(&mut self, dst: &PixelRect, rop: u32) -> bool {
        self.begin();
        self.writer.pat_blt(dst, rop, self.brush.color.0);
        self.submit();
        true
    }

    fn put_image(
        &mut self,
        clip: &[PixelRect],
        format: &PixelFormat,
        bits: &[u8],
        src: &PixelRect,
        dst: &PixelRect,
        rop: u32,
    ) -> bool {
        let image = match convert_image(bits, format, src) {
            Ok(image) => image,
            Err(err) => {
                trace!(?err, "put_image conversion failed, dropping the draw");
                return false;
            }
        };
        self.begin();
        let src = image.rect;
        self.writer.set_source(&image);
        if !clip.is_empty() {
            self.writer.set_clip(clip);
            // The per-call clip clobbered the consumer's clip slot.
            self.clip_dirty = true;
        }
        self.writer.put_image(dst, &src, rop);
        self.submit();
        true
    }

    fn blend_image(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        blend_fn: u32,
    ) -> bool {
        self.begin();
        let Some(src) = self.emit_fetched_source(source, src) else {
            return false;
        };
        self.writer.blend_image(dst, &src, blend_fn);
        self.submit();
        true
    }

    fn stretch_blt(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        rop: u32,
    ) -> bool {
        self.begin();
        let Some(src) = self.emit_fetched_source(source, src) else {
            return false;
        };
        self.writer.stretch_blt(dst, &src, rop);
        self.submit();
        true
    }

    fn poly_polyline(&mut self, points: &[Point], counts: &[u32]) -> bool {
        self.begin();
        self.writer.set_points(points);
        self.writer.poly_polyline(counts);
        self.submit();
        true
    }

    fn poly_polygon(&mut self, points: &[Point], counts: &[u32]) -> bool {
        self.begin();
        self.writer.set_points(points);
        self.writer.poly_polygon(counts);
        self.submit();
        true
    }

    fn ext_text_out(
        &mut self,
        p: Point,
        flags: TextOutFlags,
        rect: &PixelRect,
        text: &[u16],
    ) -> bool {
        self.begin();
        self.writer.ext_text_out(p.x, p.y, flags.bits(), rect, text);
        self.submit();
        true
    }

    fn select_brush(&mut self, brush: Brush) -> bool {
        self.brush = brush;
        self.begin();
        self.writer
            .select_brush(brush.style as u32, brush.color.0);
        self.submit();
        true
    }

    fn select_pen(&mut self, pen: Pen) -> bool {
        self.pen = pen;
        self.begin();
        self.writer
            .select_pen(pen.style as u32, pen.color.0, pen.width);
        self.submit();
        true
    }

    fn select_font(&mut self, _font: FontHandle) -> bool {
        // Fonts are resolved consumer-side; nothing to serialize yet.
        true
    }

    fn set_bounds_rect(&mut self, rect: &PixelRect, flags: u32) -> bool {
        self.begin();
        self.writer.set_bounds_rect(rect, flags);
        self.submit();
        true
    }

    fn set_device_clipping(&mut self, rects: &[PixelRect]) -> bool {
        self.clip = rects.to_vec();
        self.clip_dirty = true;
        true
    }

    fn set_window_region(
        &mut self,
        _window: WindowId,
        _top_level: WindowId,
        _window_rect: &PixelRect,
        _top_level_rect: &PixelRect,
    ) -> bool {
        // Window-to-surface routing is the consumer's concern; the stream
        // carries window-relative coordinates already.
        true
    }

    fn flush(&mut self) -> bool {
        self.begin();
        self.writer.flush();
        self.submit();
        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use mirage_protocol::{parse_cmd_stream, DisplayCmd};
    use mirage_raster::BitsPerPixel;

    use super::*;

    fn parse_batches(sink: &CollectingSink) -> Vec<Vec<DisplayCmd>> {
        sink.drain()
            .iter()
            .map(|s| parse_cmd_stream(s).unwrap())
            .collect()
    }

    #[test]
    fn each_operation_is_its_own_batch() {
        let sink = CollectingSink::new();
        let mut drv = RemoteDriver::new(Box::new(sink.clone()));
        drv.move_to(Point::new(1, 2));
        drv.line_to(Point::new(3, 4));

        let batches = parse_batches(&sink);
        assert_eq!(
            batches,
            vec![
                vec![DisplayCmd::MoveTo { x: 1, y: 2 }],
                vec![DisplayCmd::LineTo { x: 3, y: 4 }],
            ]
        );
    }

    #[test]
    fn clip_changes_ride_ahead_of_the_next_primary_command() {
        let sink = CollectingSink::new();
        let mut drv = RemoteDriver::new(Box::new(sink.clone()));
        let clip = [PixelRect::new(0, 0, 4, 4)];
        drv.set_device_clipping(&clip);
        drv.line_to(Point::new(5, 5));
        drv.line_to(Point::new(6, 6));

        let batches = parse_batches(&sink);
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[0],
            vec![
                DisplayCmd::SetClip {
                    rects: clip.to_vec()
                },
                DisplayCmd::LineTo { x: 5, y: 5 },
            ]
        );
        // Unchanged clip is not re-sent.
        assert_eq!(batches[1], vec![DisplayCmd::LineTo { x: 6, y: 6 }]);
    }

    #[test]
    fn put_image_emits_source_before_the_primary_command() {
        let sink = CollectingSink::new();
        let mut drv = RemoteDriver::new(Box::new(sink.clone()));

        let format = PixelFormat::new(BitsPerPixel::ThirtyTwo, 16);
        let bits = vec![0x55u8; 16 * 2];
        let src = PixelRect::new(0, 0, 4, 2);
        drv.put_image(&[], &format, &bits, &src, &src, 0x00CC_0020);

        let batches = parse_batches(&sink);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(matches!(batches[0][0], DisplayCmd::SetSource { .. }));
        assert!(matches!(batches[0][1], DisplayCmd::PutImage { .. }));
    }

    #[test]
    fn failed_conversion_emits_nothing() {
        let sink = CollectingSink::new();
        let mut drv = RemoteDriver::new(Box::new(sink.clone()));

        let format = PixelFormat::new(BitsPerPixel::ThirtyTwo, 16);
        let bits = vec![0u8; 4];
        let src = PixelRect::new(0, 0, 4, 2);
        assert!(!drv.put_image(&[], &format, &bits, &src, &src, 0x00CC_0020));
        assert!(sink.drain().is_empty());
    }
}
