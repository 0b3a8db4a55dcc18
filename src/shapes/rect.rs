/// Pixel region, anchored at its top-left corner.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Box in a continuous coordinate space, stored as two corners.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RectF32 {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RectF32 {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> RectF32 {
        RectF32 { x1, y1, x2, y2 }
    }

    pub fn from_center(xc: f32, yc: f32, w: f32, h: f32) -> RectF32 {
        RectF32 {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn scale(&self, s: f32) -> RectF32 {
        RectF32 {
            x1: self.x1 * s,
            y1: self.y1 * s,
            x2: self.x2 * s,
            y2: self.y2 * s,
        }
    }

    pub fn translate(&self, dx: f32, dy: f32) -> RectF32 {
        RectF32 {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Truncates to whole pixels inside a `max_w` x `max_h` image. The result
    /// may have zero area.
    pub fn to_pixels(&self, max_w: u32, max_h: u32) -> Rect {
        let clamp = |v: f32, max: u32| v.max(0.).min(max as f32) as u32;

        let left = clamp(self.x1, max_w);
        let top = clamp(self.y1, max_h);
        let right = clamp(self.x2, max_w);
        let bottom = clamp(self.y2, max_h);

        Rect {
            x: left,
            y: top,
            w: right.saturating_sub(left),
            h: bottom.saturating_sub(top),
        }
    }
}

impl From<Rect> for imageproc::rect::Rect {
    fn from(r: Rect) -> imageproc::rect::Rect {
        imageproc::rect::Rect::at(r.left() as i32, r.top() as i32).of_size(r.w.max(1), r.h.max(1))
    }
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Rect {
        Rect { x, y, w, h }
    }

    pub fn left(&self) -> u32 {
        self.x
    }
    pub fn right(&self) -> u32 {
        self.x + self.w
    }
    pub fn top(&self) -> u32 {
        self.y
    }
    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }
    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Grows a collapsed region to at least 1x1 while keeping it inside a
    /// non-empty `max_w` x `max_h` image.
    pub fn at_least_one_pixel(&self, max_w: u32, max_h: u32) -> Rect {
        let x = self.x.min(max_w.saturating_sub(1));
        let y = self.y.min(max_h.saturating_sub(1));
        Rect {
            x,
            y,
            w: self.w.max(1).min(max_w - x),
            h: self.h.max(1).min(max_h - y),
        }
    }

    pub fn overlap_pct(&self, other: &Rect) -> f32 {
        let x_min = self.left().max(other.left());
        let x_max = self.right().min(other.right());
        let y_min = self.top().max(other.top());
        let y_max = self.bottom().min(other.bottom());

        let overlap_area = if x_min < x_max && y_min < y_max {
            (x_max - x_min) as u64 * (y_max - y_min) as u64
        } else {
            0
        };

        let area_delta = self.area() + other.area() - overlap_area;

        if area_delta > 0 {
            overlap_area as f32 / area_delta as f32 * 100.
        } else {
            0.
        }
    }
}
