/// Bounding box in TLWH layout (top-left x, top-left y, width, height).
///
/// Trackers usually report TLBR corners; use [`Rect::from_tlbr`] for those.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

impl Rect {
    /// Create a new Rect from top-left coordinates and dimensions (TLWH format).
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from TLBR format (top-left x, top-left y, bottom-right x, bottom-right y).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Convert to TLBR format: (x1, y1, x2, y2).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// A box is usable when every coordinate is finite and it has positive extent.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Integer pixel window `(row0, row1, col0, col1)` of this box inside an
    /// image of the given size, truncating like array slicing does.
    ///
    /// Returns `None` when the clamped window is empty or the box is invalid.
    pub fn clamp_to(&self, width: usize, height: usize) -> Option<(usize, usize, usize, usize)> {
        if !self.is_valid() {
            return None;
        }
        let [x1, y1, x2, y2] = self.to_tlbr();
        let clamp = |v: f32, max: usize| -> usize { (v.max(0.0) as usize).min(max) };

        let (c0, c1) = (clamp(x1, width), clamp(x2, width));
        let (r0, r1) = (clamp(y1, height), clamp(y2, height));
        if r1 <= r0 || c1 <= c0 {
            return None;
        }
        Some((r0, r1, c0, c1))
    }
}
