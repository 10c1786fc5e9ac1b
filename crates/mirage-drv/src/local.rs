//! CPU-rendering backend. Draws every primitive directly into the shared
//! surface bound to the target window's top-level ancestor.

use std::sync::Arc;

use tracing::trace;

use mirage_raster::{Color, CompositeOp, PixelFormat, PixelRect, Point, RasterOp};
use mirage_surface::{LockedSurface, SharedSurface, SurfaceMap, WindowId};

use crate::driver::{
    arc_polyline, Brush, BrushStyle, DisplayDriver, FontHandle, ImageSource, Pen, PenStyle,
    TextOutFlags,
};
use crate::PRIORITY_RASTER;

/// Chain entry that rasterizes locally.
///
/// Holds no surface lock between operations; each primitive acquires the
/// bound surface, draws, and releases. Acquisition re-applies the window
/// offset and device clip because the surface is shared with sibling
/// windows whose offsets differ.
pub struct LocalDriver {
    surfaces: Arc<SurfaceMap>,
    surface: Option<SharedSurface>,
    window_offset: Point,
    pos: Point,
    brush: Brush,
    pen: Pen,
    clip: Vec<PixelRect>,
    bounds: Option<PixelRect>,
}

impl LocalDriver {
    pub fn new(surfaces: Arc<SurfaceMap>) -> Self {
        Self {
            surfaces,
            surface: None,
            window_offset: Point::new(0, 0),
            pos: Point::new(0, 0),
            brush: Brush::default(),
            pen: Pen::default(),
            clip: Vec::new(),
            bounds: None,
        }
    }

    fn with_surface(&mut self, draw: impl FnOnce(&mut LockedSurface<'_>, &Brush, &Pen)) -> bool {
        let Some(surface) = self.surface.as_ref() else {
            return false;
        };
        let mut locked = surface.acquire(self.window_offset);
        locked.set_clip(&self.clip);
        draw(&mut locked, &self.brush, &self.pen);
        true
    }

    /// Dirty-rect accumulated from `set_bounds_rect` since creation.
    pub fn bounds(&self) -> Option<PixelRect> {
        self.bounds
    }

    fn accumulate_bounds(&mut self, rect: &PixelRect) {
        self.bounds = Some(match self.bounds {
            Some(b) => PixelRect::new(
                b.left.min(rect.left),
                b.top.min(rect.top),
                b.right.max(rect.right),
                b.bottom.max(rect.bottom),
            ),
            None => *rect,
        });
    }

    fn stroke_runs(&mut self, points: &[Point], counts: &[u32], close: bool) -> bool {
        self.with_surface(|locked, _brush, pen| {
            if pen.style == PenStyle::Null {
                return;
            }
            let mut offset = 0usize;
            for &count in counts {
                let count = count as usize;
                let Some(run) = points.get(offset..offset + count) else {
                    break;
                };
                offset += count;
                if close && run.len() >= 2 {
                    let mut closed = run.to_vec();
                    closed.push(run[0]);
                    locked.stroke_polyline(&closed, pen.color);
                } else {
                    locked.stroke_polyline(run, pen.color);
                }
            }
        })
    }
}

impl DisplayDriver for LocalDriver {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn priority(&self) -> i32 {
        PRIORITY_RASTER
    }

    fn move_to(&mut self, p: Point) -> bool {
        self.pos = p;
        true
    }

    fn line_to(&mut self, p: Point) -> bool {
        let from = self.pos;
        let handled = self.with_surface(|locked, _brush, pen| {
            if pen.style != PenStyle::Null {
                locked.stroke_line(from, p, pen.color);
            }
        });
        // Position advances even when no surface is bound, so a later bind
        // picks up drawing from the right place.
        self.pos = p;
        handled
    }

    fn arc_to(&mut self, rect: &PixelRect, start: Point, end: Point) -> bool {
        let points = arc_polyline(rect, start, end);
        let handled = self.with_surface(|locked, _brush, pen| {
            if pen.style != PenStyle::Null && !points.is_empty() {
                locked.stroke_polyline(&points, pen.color);
            }
        });
        if let Some(last) = points.last() {
            self.pos = *last;
        }
        handled
    }

    fn rectangle(&mut self, rect: &PixelRect) -> bool {
        let rect = rect.normalize();
        self.with_surface(|locked, brush, pen| {
            if brush.style == BrushStyle::Solid {
                locked.fill_rect(&rect, brush.color, CompositeOp::Source);
            }
            if pen.style != PenStyle::Null {
                let outline = [
                    Point::new(rect.left, rect.top),
                    Point::new(rect.right - 1, rect.top),
                    Point::new(rect.right - 1, rect.bottom - 1),
                    Point::new(rect.left, rect.bottom - 1),
                    Point::new(rect.left, rect.top),
                ];
                locked.stroke_polyline(&outline, pen.color);
            }
        })
    }

    fn pat_blt(&mut self, dst: &PixelRect, rop: u32) -> bool {
        // Unknown ternary codes degrade to a straight brush fill.
        let rop = RasterOp::from_u32(rop).unwrap_or(RasterOp::SrcCopy);
        let dst = dst.normalize();
        self.with_surface(|locked, brush, _pen| {
            let color = match rop {
                RasterOp::Blackness => Color::BLACK,
                RasterOp::Whiteness => Color::WHITE,
                _ => brush.color,
            };
            locked.fill_rect(&dst, color, CompositeOp::Source);
        })
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
        let op = RasterOp::from_u32(rop)
            .map(RasterOp::composite_op)
            .unwrap_or(CompositeOp::Source);
        let device_clip = self.clip.clone();
        let Some(surface) = self.surface.as_ref() else {
            return false;
        };
        let mut locked = surface.acquire(self.window_offset);
        // The per-call clip overrides the device clip when present.
        locked.set_clip(if clip.is_empty() { &device_clip } else { clip });
        locked.set_source_from_image(bits, format, src);
        locked.composite_rect(dst, op);
        locked.clear_source();
        true
    }

    fn blend_image(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        _blend_fn: u32,
    ) -> bool {
        let Some((format, bits)) = source.get_image(src) else {
            trace!("blend_image source fetch failed, dropping the draw");
            return false;
        };
        self.with_surface(|locked, _brush, _pen| {
            locked.set_source_from_image(&bits, &format, src);
            locked.composite_rect(dst, CompositeOp::Add);
            locked.clear_source();
        })
    }

    fn stretch_blt(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        rop: u32,
    ) -> bool {
        let Some((format, bits)) = source.get_image(src) else {
            trace!("stretch_blt source fetch failed, dropping the draw");
            return false;
        };
        let op = RasterOp::from_u32(rop)
            .map(RasterOp::composite_op)
            .unwrap_or(CompositeOp::Source);
        self.with_surface(|locked, _brush, _pen| {
            locked.set_source_from_image(&bits, &format, src);
            locked.composite_rect(dst, op);
            locked.clear_source();
        })
    }

    fn poly_polyline(&mut self, points: &[Point], counts: &[u32]) -> bool {
        self.stroke_runs(points, counts, false)
    }

    fn poly_polygon(&mut self, points: &[Point], counts: &[u32]) -> bool {
        self.stroke_runs(points, counts, true)
    }

    fn ext_text_out(
        &mut self,
        p: Point,
        flags: TextOutFlags,
        rect: &PixelRect,
        text: &[u16],
    ) -> bool {
        // Glyph rasterization belongs to the text engine; this backend only
        // honors the opaque background fill.
        trace!(x = p.x, y = p.y, glyphs = text.len(), "ext_text_out");
        if !flags.contains(TextOutFlags::OPAQUE) {
            return true;
        }
        let rect = rect.normalize();
        self.with_surface(|locked, brush, _pen| {
            locked.fill_rect(&rect, brush.color, CompositeOp::Source);
        })
    }

    fn select_brush(&mut self, brush: Brush) -> bool {
        self.brush = brush;
        true
    }

    fn select_pen(&mut self, pen: Pen) -> bool {
        self.pen = pen;
        true
    }

    fn select_font(&mut self, _font: FontHandle) -> bool {
        true
    }

    fn set_bounds_rect(&mut self, rect: &PixelRect, _flags: u32) -> bool {
        self.accumulate_bounds(&rect.normalize());
        true
    }

    fn set_device_clipping(&mut self, rects: &[PixelRect]) -> bool {
        self.clip = rects.to_vec();
        true
    }

    fn set_window_region(
        &mut self,
        window: WindowId,
        top_level: WindowId,
        window_rect: &PixelRect,
        top_level_rect: &PixelRect,
    ) -> bool {
        self.surface = self.surfaces.lookup(top_level);
        self.window_offset = Point::new(
            window_rect.left - top_level_rect.left,
            window_rect.top - top_level_rect.top,
        );
        trace!(
            window = window.0,
            top_level = top_level.0,
            bound = self.surface.is_some(),
            "window region update"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use mirage_raster::BitsPerPixel;
    use mirage_surface::{SoftwareTarget, Surface};

    use super::*;

    fn bound_driver(size: u32) -> (LocalDriver, SharedSurface) {
        let surfaces = Arc::new(SurfaceMap::new());
        let surface = Surface::new(Box::new(SoftwareTarget::new(size, size)));
        surfaces.bind(WindowId(1), Arc::clone(&surface));

        let mut drv = LocalDriver::new(surfaces);
        let rect = PixelRect::new(0, 0, size as i32, size as i32);
        drv.set_window_region(WindowId(1), WindowId(1), &rect, &rect);
        (drv, surface)
    }

    fn pixel(surface: &SharedSurface, x: i32, y: i32) -> Color {
        let locked = surface.acquire(Point::new(0, 0));
        locked.read_pixel(x, y).unwrap()
    }

    #[test]
    fn line_to_strokes_with_the_selected_pen() {
        let (mut drv, surface) = bound_driver(8);
        drv.select_pen(Pen {
            style: PenStyle::Solid,
            color: Color::from_rgb(1, 2, 3),
            width: 1,
        });
        drv.move_to(Point::new(0, 0));
        assert!(drv.line_to(Point::new(4, 0)));

        assert_eq!(pixel(&surface, 2, 0), Color::from_rgb(1, 2, 3));
        assert_eq!(pixel(&surface, 2, 1), Color::BLACK);
    }

    #[test]
    fn pat_blt_blackness_and_whiteness_ignore_the_brush() {
        let (mut drv, surface) = bound_driver(8);
        drv.select_brush(Brush {
            style: BrushStyle::Solid,
            color: Color::from_rgb(10, 20, 30),
        });
        drv.pat_blt(&PixelRect::new(0, 0, 4, 4), RasterOp::Whiteness as u32);
        assert_eq!(pixel(&surface, 1, 1), Color::WHITE);

        drv.pat_blt(&PixelRect::new(0, 0, 4, 4), RasterOp::Blackness as u32);
        assert_eq!(pixel(&surface, 1, 1), Color::BLACK);

        drv.pat_blt(&PixelRect::new(0, 0, 4, 4), RasterOp::PatCopy as u32);
        assert_eq!(pixel(&surface, 1, 1), Color::from_rgb(10, 20, 30));
    }

    #[test]
    fn put_image_respects_the_call_clip() {
        let (mut drv, surface) = bound_driver(8);
        let format = PixelFormat::new(BitsPerPixel::ThirtyTwo, 8 * 4);
        let bits = vec![0xFFu8; 8 * 4 * 2];
        let src = PixelRect::new(0, 0, 8, 2);
        let clip = [PixelRect::new(0, 0, 3, 2)];
        drv.put_image(&clip, &format, &bits, &src, &src, RasterOp::SrcCopy as u32);

        assert_eq!(pixel(&surface, 2, 1), Color::WHITE);
        assert_eq!(pixel(&surface, 4, 1), Color::BLACK);
    }

    #[test]
    fn unbound_driver_reports_unhandled_but_tracks_position() {
        let surfaces = Arc::new(SurfaceMap::new());
        let mut drv = LocalDriver::new(surfaces);
        drv.move_to(Point::new(3, 3));
        assert!(!drv.line_to(Point::new(5, 5)));
        assert_eq!(drv.pos, Point::new(5, 5));
    }

    #[test]
    fn bounds_accumulate_across_calls() {
        let (mut drv, _surface) = bound_driver(8);
        assert_eq!(drv.bounds(), None);
        drv.set_bounds_rect(&PixelRect::new(2, 2, 4, 4), 0);
        drv.set_bounds_rect(&PixelRect::new(6, 0, 8, 3), 0);
        assert_eq!(drv.bounds(), Some(PixelRect::new(2, 0, 8, 4)));
    }

    #[test]
    fn stretch_blt_with_no_source_is_a_no_op() {
        struct NoSource;
        impl ImageSource for NoSource {
            fn get_image(&mut self, _src_rect: &PixelRect) -> Option<(PixelFormat, Vec<u8>)> {
                None
            }
        }

        let (mut drv, surface) = bound_driver(8);
        let rect = PixelRect::new(0, 0, 4, 4);
        assert!(!drv.stretch_blt(&mut NoSource, &rect, &rect, RasterOp::SrcCopy as u32));
        assert_eq!(pixel(&surface, 0, 0), Color::BLACK);
    }
}
