use mirage_raster::{Color, CompositeOp, PackedImage, PixelRect, Point};

use crate::SoftwareTarget;

/// The seam between the surface lifecycle and a concrete renderer.
///
/// Coordinates passed to drawing methods are window-relative; the target
/// translates by the origin installed via [`set_origin`](Self::set_origin)
/// (reapplied on every surface acquisition). Clip rectangles are in the same
/// window-relative space. Every method is best-effort and infallible from
/// the caller's perspective.
pub trait RasterTarget: Send {
    fn set_origin(&mut self, origin: Point);

    /// Replace the active clip with the union of `rects`; empty means
    /// unclipped.
    fn set_clip(&mut self, rects: &[PixelRect]);

    fn fill_rect(&mut self, rect: &PixelRect, color: Color, op: CompositeOp);

    fn stroke_line(&mut self, from: Point, to: Point, color: Color);

    fn stroke_polyline(&mut self, points: &[Point], color: Color);

    /// Composite `image` into `dst_rect`, scaling nearest-neighbor when the
    /// sizes differ.
    fn blit(&mut self, image: &PackedImage, dst_rect: &PixelRect, op: CompositeOp);

    /// Concrete-type escape hatch for inspection in tests and the present
    /// path; non-software targets keep the default.
    fn as_software(&self) -> Option<&SoftwareTarget> {
        None
    }
}
