//! Device contexts and the layered driver chain.
//!
//! A [`DeviceContext`] owns an ordered chain of [`DisplayDriver`]s built
//! from a [`DriverRegistry`]. Every drawing operation is translated from
//! logical to device coordinates once, then dispatched to every driver in
//! ascending priority order; a driver's return value never short-circuits
//! the chain, so observers behind a renderer always see the full operation
//! stream.

mod driver;
mod local;
mod remote;
mod replay;

pub use driver::{
    Brush, BrushStyle, DisplayDriver, FontHandle, ImageSource, NullDriver, Pen, PenStyle,
    TextOutFlags,
};
pub use local::LocalDriver;
pub use remote::{CollectingSink, CommandSink, RemoteDriver};
pub use replay::Replayer;

use std::sync::Arc;

use tracing::debug;

use mirage_raster::{PixelFormat, PixelRect, Point};
use mirage_surface::{SurfaceMap, WindowId};

/// Chain position of the CPU renderer.
pub const PRIORITY_RASTER: i32 = 500;
/// Chain position of the serializing forwarder. Runs after the renderer so
/// local pixels are current before the stream batch is submitted.
pub const PRIORITY_REMOTE: i32 = PRIORITY_RASTER + 50;
/// Reserved slot for an accelerated backend.
pub const PRIORITY_GRAPHICS: i32 = 1000;
/// The null driver terminates every chain.
pub const PRIORITY_NULL: i32 = i32::MAX;

type DriverFactory = Box<dyn Fn() -> Box<dyn DisplayDriver> + Send + Sync>;

/// Process-wide driver table. Instantiates one fresh chain per device
/// context; drivers themselves are per-DC and carry no shared state beyond
/// what their constructors capture.
pub struct DriverRegistry {
    factories: Vec<DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &'static str,
        factory: impl Fn() -> Box<dyn DisplayDriver> + Send + Sync + 'static,
    ) {
        debug!(name, "registered display driver");
        self.factories.push(Box::new(factory));
    }

    fn instantiate(&self) -> Vec<Box<dyn DisplayDriver>> {
        let mut drivers: Vec<Box<dyn DisplayDriver>> =
            self.factories.iter().map(|f| f()).collect();
        drivers.sort_by_key(|d| d.priority());
        drivers
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Which backends a registry should carry.
pub enum BackendConfig {
    /// CPU rendering only.
    Local { surfaces: Arc<SurfaceMap> },
    /// CPU rendering plus stream forwarding to a remote consumer.
    Remote {
        surfaces: Arc<SurfaceMap>,
        make_sink: Arc<dyn Fn() -> Box<dyn CommandSink> + Send + Sync>,
    },
}

/// Build the standard driver table for a backend configuration. Every table
/// ends in the null driver so a chain is never empty.
pub fn build_driver_table(config: BackendConfig) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    match config {
        BackendConfig::Local { surfaces } => {
            registry.register("raster", move || {
                Box::new(LocalDriver::new(Arc::clone(&surfaces)))
            });
        }
        BackendConfig::Remote {
            surfaces,
            make_sink,
        } => {
            registry.register("raster", {
                let surfaces = Arc::clone(&surfaces);
                move || Box::new(LocalDriver::new(Arc::clone(&surfaces)))
            });
            registry.register("remote", move || Box::new(RemoteDriver::new(make_sink())));
        }
    }
    registry.register("null", || Box::new(NullDriver));
    registry
}

/// A drawing context bound to a window, holding the driver chain plus the
/// canonical selection state (brush, pen, font) and the logical-to-device
/// translation.
pub struct DeviceContext {
    registry: Arc<DriverRegistry>,
    drivers: Vec<Box<dyn DisplayDriver>>,
    viewport_origin: Point,
    brush: Brush,
    pen: Pen,
    font: FontHandle,
}

impl DeviceContext {
    pub fn create_dc(registry: Arc<DriverRegistry>) -> Self {
        let drivers = registry.instantiate();
        debug!(
            chain = ?drivers.iter().map(|d| d.name()).collect::<Vec<_>>(),
            "created device context"
        );
        Self {
            registry,
            drivers,
            viewport_origin: Point::new(0, 0),
            brush: Brush::default(),
            pen: Pen::default(),
            font: FontHandle::default(),
        }
    }

    /// A fresh context sharing this one's driver table. Selection state and
    /// transform start from defaults, not from `self`.
    pub fn create_compatible_dc(&self) -> Self {
        Self::create_dc(Arc::clone(&self.registry))
    }

    pub fn driver_names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub fn set_viewport_origin(&mut self, origin: Point) {
        self.viewport_origin = origin;
    }

    fn to_device(&self, p: Point) -> Point {
        Point::new(p.x + self.viewport_origin.x, p.y + self.viewport_origin.y)
    }

    fn rect_to_device(&self, rect: &PixelRect) -> PixelRect {
        rect.translate(self.viewport_origin.x, self.viewport_origin.y)
    }

    pub fn move_to(&mut self, x: i32, y: i32) -> bool {
        let p = self.to_device(Point::new(x, y));
        for d in &mut self.drivers {
            d.move_to(p);
        }
        true
    }

    pub fn line_to(&mut self, x: i32, y: i32) -> bool {
        let p = self.to_device(Point::new(x, y));
        for d in &mut self.drivers {
            d.line_to(p);
        }
        true
    }

    pub fn arc_to(&mut self, rect: &PixelRect, start: Point, end: Point) -> bool {
        let rect = self.rect_to_device(rect);
        let start = self.to_device(start);
        let end = self.to_device(end);
        for d in &mut self.drivers {
            d.arc_to(&rect, start, end);
        }
        true
    }

    pub fn rectangle(&mut self, rect: &PixelRect) -> bool {
        let rect = self.rect_to_device(rect);
        for d in &mut self.drivers {
            d.rectangle(&rect);
        }
        true
    }

    pub fn pat_blt(&mut self, dst: &PixelRect, rop: u32) -> bool {
        let dst = self.rect_to_device(dst);
        for d in &mut self.drivers {
            d.pat_blt(&dst, rop);
        }
        true
    }

    /// Source coordinates stay in the caller's bitmap space; only the
    /// destination is translated.
    pub fn put_image(
        &mut self,
        clip: &[PixelRect],
        format: &PixelFormat,
        bits: &[u8],
        src: &PixelRect,
        dst: &PixelRect,
        rop: u32,
    ) -> bool {
        let dst = self.rect_to_device(dst);
        let clip: Vec<PixelRect> = clip.iter().map(|r| self.rect_to_device(r)).collect();
        for d in &mut self.drivers {
            d.put_image(&clip, format, bits, src, &dst, rop);
        }
        true
    }

    pub fn blend_image(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        blend_fn: u32,
    ) -> bool {
        let dst = self.rect_to_device(dst);
        for d in &mut self.drivers {
            d.blend_image(source, src, &dst, blend_fn);
        }
        true
    }

    pub fn stretch_blt(
        &mut self,
        source: &mut dyn ImageSource,
        src: &PixelRect,
        dst: &PixelRect,
        rop: u32,
    ) -> bool {
        let dst = self.rect_to_device(dst);
        for d in &mut self.drivers {
            d.stretch_blt(source, src, &dst, rop);
        }
        true
    }

    pub fn poly_polyline(&mut self, points: &[Point], counts: &[u32]) -> bool {
        let points: Vec<Point> = points.iter().map(|p| self.to_device(*p)).collect();
        for d in &mut self.drivers {
            d.poly_polyline(&points, counts);
        }
        true
    }

    pub fn poly_polygon(&mut self, points: &[Point], counts: &[u32]) -> bool {
        let points: Vec<Point> = points.iter().map(|p| self.to_device(*p)).collect();
        for d in &mut self.drivers {
            d.poly_polygon(&points, counts);
        }
        true
    }

    pub fn ext_text_out(
        &mut self,
        x: i32,
        y: i32,
        flags: TextOutFlags,
        rect: &PixelRect,
        text: &[u16],
    ) -> bool {
        let p = self.to_device(Point::new(x, y));
        let rect = self.rect_to_device(rect);
        for d in &mut self.drivers {
            d.ext_text_out(p, flags, &rect, text);
        }
        true
    }

    /// Returns the previously selected brush.
    pub fn select_brush(&mut self, brush: Brush) -> Brush {
        let previous = self.brush;
        self.brush = brush;
        for d in &mut self.drivers {
            d.select_brush(brush);
        }
        previous
    }

    /// Returns the previously selected pen.
    pub fn select_pen(&mut self, pen: Pen) -> Pen {
        let previous = self.pen;
        self.pen = pen;
        for d in &mut self.drivers {
            d.select_pen(pen);
        }
        previous
    }

    /// Returns the previously selected font.
    pub fn select_font(&mut self, font: FontHandle) -> FontHandle {
        let previous = self.font;
        self.font = font;
        for d in &mut self.drivers {
            d.select_font(font);
        }
        previous
    }

    pub fn set_bounds_rect(&mut self, rect: &PixelRect, flags: u32) -> bool {
        let rect = self.rect_to_device(rect);
        for d in &mut self.drivers {
            d.set_bounds_rect(&rect, flags);
        }
        true
    }

    pub fn set_device_clipping(&mut self, rects: &[PixelRect]) -> bool {
        for d in &mut self.drivers {
            d.set_device_clipping(rects);
        }
        true
    }

    /// Rebind this context to `window`, whose pixels live in the surface of
    /// `top_level`. Rects are screen coordinates; drivers derive the
    /// window-relative offset from them.
    pub fn set_window_region(
        &mut self,
        window: WindowId,
        top_level: WindowId,
        window_rect: &PixelRect,
        top_level_rect: &PixelRect,
    ) -> bool {
        for d in &mut self.drivers {
            d.set_window_region(window, top_level, window_rect, top_level_rect);
        }
        true
    }

    pub fn flush(&mut self) -> bool {
        for d in &mut self.drivers {
            d.flush();
        }
        true
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        // delete_dc semantics: give every driver a final flush before the
        // chain is torn down.
        for d in &mut self.drivers {
            d.flush();
        }
    }
}
