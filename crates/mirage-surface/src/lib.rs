//! The shared rendering surface and its lifecycle.
//!
//! A [`Surface`] wraps a native drawing target behind a mutex and is shared
//! (via [`SharedSurface`], an `Arc`) between the window that owns it and any
//! device context currently drawing into it. All drawing goes through a
//! [`LockedSurface`] guard obtained from [`Surface::acquire`]; acquisition
//! resets the target's coordinate origin to the acquiring device's
//! window-relative offset, and release is scoped-guard only.
//!
//! The concrete renderer sits behind the [`RasterTarget`] trait;
//! [`SoftwareTarget`] is the CPU implementation used by the local backend and
//! by the remote consumer's replay path.

mod binding;
mod software;
mod target;

pub use binding::{SurfaceMap, WindowId};
pub use software::SoftwareTarget;
pub use target::RasterTarget;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mirage_raster::{
    convert_image, Color, CompositeOp, PackedImage, PixelFormat, PixelRect, Point,
};

/// Owning handle to a [`Surface`]. The `Arc` strong count is the surface's
/// refcount: the underlying target is destroyed when the last handle drops.
pub type SharedSurface = Arc<Surface>;

struct SurfaceInner {
    // Declared before `target` so a retained source is released first when
    // the surface is destroyed.
    pending_source: Option<PackedImage>,
    target: Box<dyn RasterTarget>,
}

/// A reference-counted, mutex-guarded rendering target.
pub struct Surface {
    inner: Mutex<SurfaceInner>,
}

impl Surface {
    pub fn new(target: Box<dyn RasterTarget>) -> SharedSurface {
        Arc::new(Self {
            inner: Mutex::new(SurfaceInner {
                pending_source: None,
                target,
            }),
        })
    }

    /// Block until the surface is exclusively held, then reset the target
    /// origin to `window_offset`.
    ///
    /// No recursive acquisition: a draw that needs the surface twice must
    /// pre-slice its work rather than nest guards.
    pub fn acquire(&self, window_offset: Point) -> LockedSurface<'_> {
        // A poisoned lock only means another thread panicked mid-draw; the
        // surface state is still structurally valid, so keep rendering.
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.target.set_origin(window_offset);
        LockedSurface { guard }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").finish_non_exhaustive()
    }
}

/// Scoped exclusive access to a surface's target. All operations are
/// best-effort: a conversion or format failure degrades to "nothing drawn".
pub struct LockedSurface<'a> {
    guard: MutexGuard<'a, SurfaceInner>,
}

impl LockedSurface<'_> {
    /// Convert `bits` and retain the result as the pending source for a
    /// following [`composite_rect`](Self::composite_rect), replacing any
    /// previous one. On failure the pending source is cleared so a later
    /// composite cannot pick up a stale image.
    pub fn set_source_from_image(&mut self, bits: &[u8], format: &PixelFormat, rect: &PixelRect) {
        match convert_image(bits, format, rect) {
            Ok(image) => self.guard.pending_source = Some(image),
            Err(err) => {
                tracing::debug!(?err, "source conversion failed, clearing pending source");
                self.guard.pending_source = None;
            }
        }
    }

    /// Retain an already-packed image as the pending source.
    pub fn set_source(&mut self, image: PackedImage) {
        self.guard.pending_source = Some(image);
    }

    pub fn has_source(&self) -> bool {
        self.guard.pending_source.is_some()
    }

    pub fn clear_source(&mut self) {
        self.guard.pending_source = None;
    }

    /// Paint the pending source into `dst_rect`. A missing source is a no-op.
    pub fn composite_rect(&mut self, dst_rect: &PixelRect, op: CompositeOp) {
        let inner = &mut *self.guard;
        if let Some(source) = inner.pending_source.as_ref() {
            inner.target.blit(source, dst_rect, op);
        }
    }

    /// Replace the active clip with the union of `rects`; an empty slice
    /// means "no clipping".
    pub fn set_clip(&mut self, rects: &[PixelRect]) {
        self.guard.target.set_clip(rects);
    }

    pub fn fill_rect(&mut self, rect: &PixelRect, color: Color, op: CompositeOp) {
        self.guard.target.fill_rect(rect, color, op);
    }

    pub fn stroke_line(&mut self, from: Point, to: Point, color: Color) {
        self.guard.target.stroke_line(from, to, color);
    }

    pub fn stroke_polyline(&mut self, points: &[Point], color: Color) {
        self.guard.target.stroke_polyline(points, color);
    }

    /// Physical-coordinate readback, available when the target is the
    /// software renderer. `None` for native targets or out-of-bounds reads.
    pub fn read_pixel(&self, x: i32, y: i32) -> Option<Color> {
        self.guard.target.as_software().and_then(|t| t.pixel(x, y))
    }
}
