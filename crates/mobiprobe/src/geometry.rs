//! Integer pixel geometry shared by the reconciler, gestures and locator.

use serde::{Deserialize, Serialize};

/// A point in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: i32,
    /// Y coordinate
    pub y: i32,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset by `dx`, `dy`
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Clamp into `[0, size)` on both axes
    #[must_use]
    pub fn clamp_into(self, size: Size) -> Self {
        Self::new(
            self.x.clamp(0, (size.width - 1).max(0)),
            self.y.clamp(0, (size.height - 1).max(0)),
        )
    }
}

/// Screen or viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
}

impl Size {
    /// Create a new size
    #[must_use]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Divide by a scale factor, flooring each axis
    #[must_use]
    pub fn unscaled(self, scale: f64) -> Self {
        if scale <= 0.0 {
            return self;
        }
        Self::new(
            (f64::from(self.width) / scale).floor() as i32,
            (f64::from(self.height) / scale).floor() as i32,
        )
    }

    /// Center of a screen of this size
    #[must_use]
    pub const fn center(self) -> Point {
        Point::new(self.width / 2, self.height / 2)
    }
}

/// Axis-aligned rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole screen
    #[must_use]
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Right edge (exclusive)
    #[must_use]
    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive)
    #[must_use]
    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Top-left corner
    #[must_use]
    pub const fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Center point, rounded toward the origin
    #[must_use]
    pub const fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// True when `other` lies entirely inside `self`
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        self.x <= other.x
            && self.y <= other.y
            && self.right() >= other.right()
            && self.bottom() >= other.bottom()
    }

    /// True when the rectangle has area and a non-negative origin
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.x >= 0 && self.y >= 0 && self.width > 0 && self.height > 0
    }

    /// Shift by `dx`, `dy`
    #[must_use]
    pub const fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Clip to `bound`.
    ///
    /// The origin is clamped into `bound` and the far edges are pulled in to
    /// `bound`'s far edges. A rectangle lying entirely outside collapses to a
    /// zero-sized rectangle on the nearest boundary.
    #[must_use]
    pub fn crop_to(&self, bound: &Self) -> Self {
        let x = self.x.clamp(bound.x, bound.right().max(bound.x));
        let y = self.y.clamp(bound.y, bound.bottom().max(bound.y));
        let right = self.right().min(bound.right());
        let bottom = self.bottom().min(bound.bottom());
        Self::new(x, y, (right - x).max(0), (bottom - y).max(0))
    }

    /// Multiply every component by `factor`, flooring
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        let f = |v: i32| (f64::from(v) * factor).floor() as i32;
        Self::new(f(self.x), f(self.y), f(self.width), f(self.height))
    }

    /// Divide every component by `divisor`, flooring; non-positive divisors leave it unchanged
    #[must_use]
    pub fn unscaled(&self, divisor: f64) -> Self {
        if divisor <= 0.0 {
            return *self;
        }
        let f = |v: i32| (f64::from(v) / divisor).floor() as i32;
        Self::new(f(self.x), f(self.y), f(self.width), f(self.height))
    }

    /// Move the top edge down to `top`, keeping the bottom edge
    #[must_use]
    pub fn with_top(&self, top: i32) -> Self {
        let top = top.max(self.y);
        Self::new(self.x, top, self.width, (self.bottom() - top).max(0))
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{x:{}, y:{}, w:{}, h:{}}}",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Proptest strategies for geometry types
#[cfg(any(test, feature = "proptest"))]
pub mod strategies {
    use super::Rect;
    use proptest::prelude::*;

    /// Arbitrary rectangle with non-negative size
    pub fn arb_rect() -> impl Strategy<Value = Rect> {
        (-2000..4000i32, -2000..4000i32, 0..3000i32, 0..3000i32)
            .prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
    }
}
