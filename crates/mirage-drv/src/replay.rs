//! Consumer-side replay: applies a parsed command stream to a surface.
//!
//! Holds exactly one slot of each dependent state (source image, point
//! array, clip region); a primary command consumes whatever is in the slot
//! at that moment. The producer guarantees dependent commands precede their
//! primary command within a batch, so no cross-batch bookkeeping is needed.

use std::sync::Arc;

use tracing::trace;

use mirage_protocol::{parse_cmd_stream, DisplayCmd, StreamParseError};
use mirage_raster::{Color, CompositeOp, PixelRect, Point, RasterOp};
use mirage_surface::{LockedSurface, SharedSurface};

use crate::driver::arc_polyline;

/// Replays command batches into one surface.
pub struct Replayer {
    surface: SharedSurface,
    points: Vec<Point>,
    pos: Point,
    pen_color: Color,
    brush_color: Color,
}

impl Replayer {
    pub fn new(surface: SharedSurface) -> Self {
        Self {
            surface,
            points: Vec::new(),
            pos: Point::new(0, 0),
            pen_color: Color::BLACK,
            brush_color: Color::WHITE,
        }
    }

    /// Parse and apply one batch. The surface is held for the whole batch so
    /// a concurrent producer cannot interleave.
    pub fn apply_stream(&mut self, bytes: &[u8]) -> Result<(), StreamParseError> {
        let cmds = parse_cmd_stream(bytes)?;
        let surface = Arc::clone(&self.surface);
        let mut locked = surface.acquire(Point::new(0, 0));
        for cmd in cmds {
            self.apply(&mut locked, cmd);
        }
        Ok(())
    }

    fn apply(&mut self, locked: &mut LockedSurface<'_>, cmd: DisplayCmd) {
        match cmd {
            DisplayCmd::Nop => {}
            DisplayCmd::DebugMarker { tag } => trace!(tag, "debug marker"),
            DisplayCmd::SetSource { image } => locked.set_source(image),
            DisplayCmd::SetPoints { points } => self.points = points,
            DisplayCmd::SetClip { rects } => locked.set_clip(&rects),
            DisplayCmd::PutImage { dst, rop, .. } | DisplayCmd::StretchBlt { dst, rop, .. } => {
                let op = RasterOp::from_u32(rop)
                    .map(RasterOp::composite_op)
                    .unwrap_or(CompositeOp::Source);
                locked.composite_rect(&dst, op);
            }
            DisplayCmd::BlendImage { dst, .. } => {
                locked.composite_rect(&dst, CompositeOp::Add);
            }
            DisplayCmd::PatBlt { dst, rop, color } => {
                let color = match RasterOp::from_u32(rop) {
                    Some(RasterOp::Blackness) => Color::BLACK,
                    Some(RasterOp::Whiteness) => Color::WHITE,
                    _ => Color(color),
                };
                locked.fill_rect(&dst.normalize(), color, CompositeOp::Source);
            }
            DisplayCmd::Rectangle {
                rect,
                pen_color,
                brush_color,
            } => {
                let rect = rect.normalize();
                locked.fill_rect(&rect, Color(brush_color), CompositeOp::Source);
                let outline = [
                    Point::new(rect.left, rect.top),
                    Point::new(rect.right - 1, rect.top),
                    Point::new(rect.right - 1, rect.bottom - 1),
                    Point::new(rect.left, rect.bottom - 1),
                    Point::new(rect.left, rect.top),
                ];
                locked.stroke_polyline(&outline, Color(pen_color));
            }
            DisplayCmd::ArcTo { rect, start, end } => {
                let points = arc_polyline(&rect, start, end);
                locked.stroke_polyline(&points, self.pen_color);
                if let Some(last) = points.last() {
                    self.pos = *last;
                }
            }
            DisplayCmd::MoveTo { x, y } => self.pos = Point::new(x, y),
            DisplayCmd::LineTo { x, y } => {
                let to = Point::new(x, y);
                locked.stroke_line(self.pos, to, self.pen_color);
                self.pos = to;
            }
            DisplayCmd::PolyPolyline { counts } => self.stroke_runs(locked, &counts, false),
            DisplayCmd::PolyPolygon { counts } => self.stroke_runs(locked, &counts, true),
            DisplayCmd::ExtTextOut { flags, rect, .. } => {
                // Opaque background only; glyphs are not rasterized here.
                if flags & crate::driver::TextOutFlags::OPAQUE.bits() != 0 {
                    locked.fill_rect(&rect.normalize(), self.brush_color, CompositeOp::Source);
                }
            }
            DisplayCmd::SelectBrush { color, .. } => self.brush_color = Color(color),
            DisplayCmd::SelectPen { color, .. } => self.pen_color = Color(color),
            DisplayCmd::SetBoundsRect { .. } => {}
            DisplayCmd::Flush => {}
        }
    }

    fn stroke_runs(&mut self, locked: &mut LockedSurface<'_>, counts: &[u32], close: bool) {
        let mut offset = 0usize;
        for &count in counts {
            let count = count as usize;
            let Some(run) = self.points.get(offset..offset + count) else {
                break;
            };
            offset += count;
            if close && run.len() >= 2 {
                let mut closed = run.to_vec();
                closed.push(run[0]);
                locked.stroke_polyline(&closed, self.pen_color);
            } else {
                locked.stroke_polyline(run, self.pen_color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use mirage_protocol::CmdWriter;
    use mirage_surface::{SoftwareTarget, Surface};

    use super::*;

    fn pixel(surface: &SharedSurface, x: i32, y: i32) -> Color {
        surface.acquire(Point::new(0, 0)).read_pixel(x, y).unwrap()
    }

    #[test]
    fn replays_pat_blt_and_lines() {
        let surface = Surface::new(Box::new(SoftwareTarget::new(8, 8)));
        let mut replayer = Replayer::new(Arc::clone(&surface));

        let mut w = CmdWriter::new();
        w.pat_blt(
            &PixelRect::new(0, 0, 8, 8),
            RasterOp::Whiteness as u32,
            0,
        );
        w.select_pen(0, Color::from_rgb(200, 0, 0).0, 1);
        w.move_to(0, 0);
        w.line_to(7, 0);
        replayer.apply_stream(&w.finish()).unwrap();

        assert_eq!(pixel(&surface, 3, 0), Color::from_rgb(200, 0, 0));
        assert_eq!(pixel(&surface, 3, 3), Color::WHITE);
    }

    #[test]
    fn set_points_feeds_the_following_polyline() {
        let surface = Surface::new(Box::new(SoftwareTarget::new(8, 8)));
        let mut replayer = Replayer::new(Arc::clone(&surface));

        let mut w = CmdWriter::new();
        w.select_pen(0, Color::WHITE.0, 1);
        w.set_points(&[Point::new(0, 2), Point::new(5, 2)]);
        w.poly_polyline(&[2]);
        replayer.apply_stream(&w.finish()).unwrap();

        assert_eq!(pixel(&surface, 4, 2), Color::WHITE);
        assert_eq!(pixel(&surface, 4, 3), Color::BLACK);
    }

    #[test]
    fn malformed_stream_is_rejected_before_any_drawing() {
        let surface = Surface::new(Box::new(SoftwareTarget::new(4, 4)));
        let mut replayer = Replayer::new(Arc::clone(&surface));

        let mut w = CmdWriter::new();
        w.pat_blt(&PixelRect::new(0, 0, 4, 4), RasterOp::Whiteness as u32, 0);
        let mut bytes = w.finish();
        bytes.truncate(bytes.len() - 1);

        assert!(replayer.apply_stream(&bytes).is_err());
        assert_eq!(pixel(&surface, 1, 1), Color::BLACK);
    }
}
