/// Integer pixel-space point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Integer pixel-space rectangle, half-open on the right/bottom edges.
///
/// Rectangles handed across component boundaries are always normalized
/// (`left <= right`, `top <= bottom`); [`PixelRect::normalize`] exists for
/// caller-supplied geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelRect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn normalize(mut self) -> Self {
        if self.left > self.right {
            core::mem::swap(&mut self.left, &mut self.right);
        }
        if self.top > self.bottom {
            core::mem::swap(&mut self.top, &mut self.bottom);
        }
        self
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }

    /// Intersection with `other`; empty results collapse to a zero rect at
    /// the overlap corner.
    pub fn intersect(&self, other: &Self) -> Self {
        let r = Self {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };
        if r.is_empty() {
            Self {
                left: r.left,
                top: r.top,
                right: r.left,
                bottom: r.top,
            }
        } else {
            r
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}
