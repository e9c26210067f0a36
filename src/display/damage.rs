use smithay::utils::{Logical, Rectangle};

/// Accumulated damage of one commit cycle, kept as a single bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRegion {
    rect: Rectangle<i32, Logical>,
}

impl DamageRegion {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            rect: Rectangle::new((x, y).into(), (width, height).into()),
        }
    }

    /// Grows the region to the smallest rectangle containing both the
    /// previous region and the given one.
    pub fn expand(&mut self, x: i32, y: i32, width: i32, height: i32) {
        let other = Rectangle::new((x, y).into(), (width, height).into());
        self.rect = self.rect.merge(other);
    }

    pub fn rect(&self) -> Rectangle<i32, Logical> {
        self.rect
    }

    pub fn x(&self) -> i32 {
        self.rect.loc.x
    }

    pub fn y(&self) -> i32 {
        self.rect.loc.y
    }

    pub fn width(&self) -> i32 {
        self.rect.size.w
    }

    pub fn height(&self) -> i32 {
        self.rect.size.h
    }
}
