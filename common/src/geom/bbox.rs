use super::coord::GridCoord;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Side of a cutline at `pos + 0.5` that `value` falls on.
    #[inline(always)]
    pub fn of(value: u32, pos: u32) -> Side {
        if value <= pos { Side::Left } else { Side::Right }
    }
}

/// Inclusive rectangle of grid columns/rows. All layers are implied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub xmin: u32,
    pub xmax: u32,
    pub ymin: u32,
    pub ymax: u32,
}

impl BoundingBox {
    pub fn new(xmin: u32, xmax: u32, ymin: u32, ymax: u32) -> Self {
        debug_assert!(xmin <= xmax && ymin <= ymax);
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    pub fn device(width: u32, height: u32) -> Self {
        Self::new(0, width.saturating_sub(1), 0, height.saturating_sub(1))
    }

    pub fn width(&self) -> u32 {
        self.xmax - self.xmin + 1
    }

    pub fn height(&self) -> u32 {
        self.ymax - self.ymin + 1
    }

    pub fn extent(&self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.width(),
            Axis::Y => self.height(),
        }
    }

    pub fn min_along(&self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.xmin,
            Axis::Y => self.ymin,
        }
    }

    pub fn max_along(&self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.xmax,
            Axis::Y => self.ymax,
        }
    }

    /// Axis of the larger extent. Ties go to X.
    pub fn larger_axis(&self) -> Axis {
        if self.height() > self.width() {
            Axis::Y
        } else {
            Axis::X
        }
    }

    #[inline(always)]
    pub fn contains(&self, c: GridCoord) -> bool {
        c.x >= self.xmin && c.x <= self.xmax && c.y >= self.ymin && c.y <= self.ymax
    }

    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        other.xmin >= self.xmin
            && other.xmax <= self.xmax
            && other.ymin >= self.ymin
            && other.ymax <= self.ymax
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.xmin.min(other.xmin),
            self.xmax.max(other.xmax),
            self.ymin.min(other.ymin),
            self.ymax.max(other.ymax),
        )
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.overlaps(other) {
            return None;
        }
        Some(BoundingBox::new(
            self.xmin.max(other.xmin),
            self.xmax.min(other.xmax),
            self.ymin.max(other.ymin),
            self.ymax.min(other.ymax),
        ))
    }

    /// Grows by `margin` on every side, clipped to `limit`.
    pub fn expand(&self, margin: u32, limit: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.xmin.saturating_sub(margin).max(limit.xmin),
            self.xmax.saturating_add(margin).min(limit.xmax),
            self.ymin.saturating_sub(margin).max(limit.ymin),
            self.ymax.saturating_add(margin).min(limit.ymax),
        )
    }

    /// True if a cutline at `pos + 0.5` along `axis` passes through this box.
    pub fn crosses_cutline(&self, axis: Axis, pos: u32) -> bool {
        self.min_along(axis) <= pos && self.max_along(axis) > pos
    }

    /// Clips to one side of a cutline at `pos + 0.5`.
    ///
    /// Returns `None` when the box lies entirely on the other side.
    pub fn clip_to_side(&self, axis: Axis, pos: u32, side: Side) -> Option<BoundingBox> {
        let mut out = *self;
        match (axis, side) {
            (Axis::X, Side::Left) => out.xmax = out.xmax.min(pos),
            (Axis::X, Side::Right) => out.xmin = out.xmin.max(pos + 1),
            (Axis::Y, Side::Left) => out.ymax = out.ymax.min(pos),
            (Axis::Y, Side::Right) => out.ymin = out.ymin.max(pos + 1),
        }
        if out.xmin > out.xmax || out.ymin > out.ymax {
            None
        } else {
            Some(out)
        }
    }

    /// Which side of the cutline the whole box falls on, if it does not cross it.
    pub fn side_of_cutline(&self, axis: Axis, pos: u32) -> Option<Side> {
        if self.max_along(axis) <= pos {
            Some(Side::Left)
        } else if self.min_along(axis) > pos {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// True if `c` lies on the outer ring of this box, `thickness` cells deep.
    pub fn is_near_edge(&self, c: GridCoord, thickness: u32) -> bool {
        c.x <= self.xmin + thickness
            || c.x + thickness >= self.xmax
            || c.y <= self.ymin + thickness
            || c.y + thickness >= self.ymax
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}]x[{}..{}]",
            self.xmin, self.xmax, self.ymin, self.ymax
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_half_cell_cutline() {
        let bb = BoundingBox::new(2, 20, 0, 9);
        let left = bb.clip_to_side(Axis::X, 10, Side::Left).unwrap();
        let right = bb.clip_to_side(Axis::X, 10, Side::Right).unwrap();
        assert_eq!(left, BoundingBox::new(2, 10, 0, 9));
        assert_eq!(right, BoundingBox::new(11, 20, 0, 9));
        assert!(!left.overlaps(&right));
        assert_eq!(left.union(&right), bb);
    }

    #[test]
    fn clip_to_far_side_is_empty() {
        let bb = BoundingBox::new(0, 4, 0, 4);
        assert!(bb.clip_to_side(Axis::Y, 7, Side::Right).is_none());
        assert_eq!(bb.side_of_cutline(Axis::Y, 7), Some(Side::Left));
        assert_eq!(bb.side_of_cutline(Axis::Y, 2), None);
        assert!(bb.crosses_cutline(Axis::Y, 2));
        assert!(!bb.crosses_cutline(Axis::Y, 4));
    }

    #[test]
    fn larger_axis_prefers_x_on_tie() {
        assert_eq!(BoundingBox::new(0, 9, 0, 9).larger_axis(), Axis::X);
        assert_eq!(BoundingBox::new(0, 3, 0, 9).larger_axis(), Axis::Y);
    }

    #[test]
    fn expand_is_clipped_to_limit() {
        let dev = BoundingBox::device(16, 8);
        let bb = BoundingBox::new(1, 3, 6, 7).expand(3, &dev);
        assert_eq!(bb, BoundingBox::new(0, 6, 3, 7));
    }
}
