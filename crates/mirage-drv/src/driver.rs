//! The display-driver trait every chain entry implements.
//!
//! Every operation has a default observe-only body that reports "not
//! handled", so a backend only overrides the hooks it cares about. Return
//! values are advisory: the device context invokes every driver in the chain
//! regardless, and drawing failures degrade to "nothing drawn" rather than
//! surfacing to the caller.

use bitflags::bitflags;

use mirage_raster::{Color, PixelFormat, PixelRect, Point};
use mirage_surface::WindowId;

/// Logical brush selected into a device context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Brush {
    pub style: BrushStyle,
    pub color: Color,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum BrushStyle {
    Solid = 0,
    Hollow = 1,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            style: BrushStyle::Solid,
            color: Color::WHITE,
        }
    }
}

/// Logical pen selected into a device context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pen {
    pub style: PenStyle,
    pub color: Color,
    pub width: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PenStyle {
    Solid = 0,
    Null = 1,
}

impl Default for Pen {
    fn default() -> Self {
        Self {
            style: PenStyle::Solid,
            color: Color::BLACK,
            width: 1,
        }
    }
}

/// Opaque font selection token. Glyph shaping is the text engine's problem;
/// drivers only track which font is current.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FontHandle(pub u32);

bitflags! {
    /// `ext_text_out` behavior flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TextOutFlags: u32 {
        /// Fill the given rectangle with the background color first.
        const OPAQUE = 0x0002;
        /// Clip output to the given rectangle.
        const CLIPPED = 0x0004;
    }
}

/// Pixel supplier for operations whose source lives in another device
/// context. A `None` return means the bits could not be fetched and the
/// operation becomes a no-op.
pub trait ImageSource {
    fn get_image(&mut self, src_rect: &PixelRect) -> Option<(PixelFormat, Vec<u8>)>;
}

/// One entry in a device context's driver chain.
///
/// All coordinates arriving here are device coordinates; the device context
/// applies the logical-to-device transform before dispatch, so every driver
/// in the chain observes the same positions.
#[allow(unused_variables)]
pub trait DisplayDriver: Send {
    fn name(&self) -> &'static str;

    /// Chain position. Drivers run in ascending priority order.
    fn priority(&self) -> i32;

    fn move_to(&mut self, p: Point) -> bool {
        false
    }

    fn line_to(&mut self, p: Point) -> bool {
        false
    }

    fn arc_to(&mut self, rect: &PixelRect, start: Point, end: Point) -> bool {
        false
    }

    fn rectangle(&mut self, rect: &PixelRect) -> bool {
        false
    }

    fn pat_blt(&mut self, dst: &PixelRect, rop: u32) -> bool {
        false
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
        false
    }

    fn blend_image(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        blend_fn: u32,
    ) -> bool {
        false
    }

    fn stretch_blt(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        rop: u32,
    ) -> bool {
        false
    }

    fn poly_polyline(&mut self, points: &[Point], counts: &[u32]) -> bool {
        false
    }

    fn poly_polygon(&mut self, points: &[Point], counts: &[u32]) -> bool {
        false
    }

    fn ext_text_out(
        &mut self,
        p: Point,
        flags: TextOutFlags,
        rect: &PixelRect,
        text: &[u16],
    ) -> bool {
        false
    }

    fn select_brush(&mut self, brush: Brush) -> bool {
        false
    }

    fn select_pen(&mut self, pen: Pen) -> bool {
        false
    }

    fn select_font(&mut self, font: FontHandle) -> bool {
        false
    }

    fn set_bounds_rect(&mut self, rect: &PixelRect, flags: u32) -> bool {
        false
    }

    fn set_device_clipping(&mut self, rects: &[PixelRect]) -> bool {
        false
    }

    fn set_window_region(
        &mut self,
        window: WindowId,
        top_level: WindowId,
        window_rect: &PixelRect,
        top_level_rect: &PixelRect,
    ) -> bool {
        false
    }

    fn flush(&mut self) -> bool {
        false
    }
}

/// Terminal chain entry. Consumes every operation without drawing so a chain
/// always has at least one driver behind it.
pub struct NullDriver;

impl DisplayDriver for NullDriver {
    fn name(&self) -> &'static str {
        "null"
    }

    fn priority(&self) -> i32 {
        crate::PRIORITY_NULL
    }
}

/// Flatten an elliptical arc inscribed in `rect` into a polyline. `start`
/// and `end` are ray targets from the ellipse center, counter-clockwise
/// sweep, matching the arc primitive's wire form.
pub(crate) fn arc_polyline(rect: &PixelRect, start: Point, end: Point) -> Vec<Point> {
    const SEGMENTS: usize = 32;

    let cx = f64::from(rect.left) + f64::from(rect.width()) / 2.0;
    let cy = f64::from(rect.top) + f64::from(rect.height()) / 2.0;
    let rx = f64::from(rect.width()) / 2.0;
    let ry = f64::from(rect.height()) / 2.0;
    if rx <= 0.0 || ry <= 0.0 {
        return Vec::new();
    }

    // Screen y grows downward, so negate for the usual CCW convention.
    let a0 = (-(f64::from(start.y) - cy)).atan2(f64::from(start.x) - cx);
    let mut a1 = (-(f64::from(end.y) - cy)).atan2(f64::from(end.x) - cx);
    if a1 <= a0 {
        a1 += std::f64::consts::TAU;
    }

    let mut points = Vec::with_capacity(SEGMENTS + 1);
    for i in 0..=SEGMENTS {
        let t = a0 + (a1 - a0) * (i as f64) / (SEGMENTS as f64);
        points.push(Point::new(
            (cx + rx * t.cos()).round() as i32,
            (cy - ry * t.sin()).round() as i32,
        ));
    }
    points
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_trait_bodies_report_not_handled() {
        struct Probe;
        impl DisplayDriver for Probe {
            fn name(&self) -> &'static str {
                "probe"
            }
            fn priority(&self) -> i32 {
                0
            }
        }

        let mut probe = Probe;
        assert!(!probe.move_to(Point::new(1, 2)));
        assert!(!probe.rectangle(&PixelRect::new(0, 0, 4, 4)));
        assert!(!probe.select_brush(Brush::default()));
        assert!(!probe.flush());
    }

    #[test]
    fn arc_polyline_stays_on_the_ellipse() {
        let rect = PixelRect::new(0, 0, 100, 100);
        let points = arc_polyline(&rect, Point::new(100, 50), Point::new(50, 0));
        assert_eq!(points.first(), Some(&Point::new(100, 50)));
        assert_eq!(points.last(), Some(&Point::new(50, 0)));
        for p in &points {
            let dx = f64::from(p.x) - 50.0;
            let dy = f64::from(p.y) - 50.0;
            let r = (dx * dx + dy * dy).sqrt();
            assert!((r - 50.0).abs() < 1.5, "point {p:?} off the arc");
        }
    }

    #[test]
    fn degenerate_arc_rect_yields_no_points() {
        let rect = PixelRect::new(10, 10, 10, 20);
        assert!(arc_polyline(&rect, Point::new(10, 10), Point::new(10, 10)).is_empty());
    }
}
