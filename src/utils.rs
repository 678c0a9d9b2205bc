//! Geometry helpers shared by the locator, tracker and crop stages.

pub mod image_conversion;
pub mod safe_cast;

use opencv::core::Rect;
use safe_cast::f32_to_i32_clamp;

/// Axis-aligned rectangle in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Box of the given size centred on `(cx, cy)`
    #[must_use]
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Tight box around a set of points, `None` when the iterator is empty
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f32, f32)>,
    {
        let mut iter = points.into_iter().filter(|(x, y)| x.is_finite() && y.is_finite());
        let (x0, y0) = iter.next()?;
        let (min_x, min_y, max_x, max_y) = iter.fold((x0, y0, x0, y0), |(lx, ly, hx, hy), (x, y)| {
            (lx.min(x), ly.min(y), hx.max(x), hy.max(y))
        });
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Scale the box around its centre
    #[must_use]
    pub fn expand(&self, factor: f32) -> Self {
        let (cx, cy) = self.center();
        Self::from_center(cx, cy, self.width * factor, self.height * factor)
    }

    /// Square box with the longer side, same centre
    #[must_use]
    pub fn square(&self) -> Self {
        let (cx, cy) = self.center();
        let side = self.width.max(self.height);
        Self::from_center(cx, cy, side, side)
    }

    /// Intersect the box with the frame `[0, width) × [0, height)`.
    ///
    /// A box entirely outside the frame collapses to zero size at the nearest edge.
    #[must_use]
    pub fn clamp_to(&self, frame_width: i32, frame_height: i32) -> Self {
        let max_w = frame_width.max(0) as f32;
        let max_h = frame_height.max(0) as f32;
        let x0 = self.x.clamp(0.0, max_w);
        let y0 = self.y.clamp(0.0, max_h);
        let x1 = self.right().clamp(0.0, max_w);
        let y1 = self.bottom().clamp(0.0, max_h);
        Self::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }

    /// Intersection over union with another box
    #[must_use]
    pub fn iou(&self, other: &Self) -> f32 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Integer pixel rectangle covering the box
    #[must_use]
    pub fn to_rect(&self) -> Rect {
        let x = f32_to_i32_clamp(self.x.floor(), i32::MIN / 2, i32::MAX / 2);
        let y = f32_to_i32_clamp(self.y.floor(), i32::MIN / 2, i32::MAX / 2);
        let w = f32_to_i32_clamp(self.width.round(), 0, i32::MAX / 2);
        let h = f32_to_i32_clamp(self.height.round(), 0, i32::MAX / 2);
        Rect::new(x, y, w, h)
    }
}

impl From<Rect> for BoundingBox {
    #[allow(clippy::cast_precision_loss)] // pixel coordinates fit in f32
    fn from(rect: Rect) -> Self {
        Self::new(rect.x as f32, rect.y as f32, rect.width as f32, rect.height as f32)
    }
}
