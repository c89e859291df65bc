use eda_common::geom::bbox::{Axis, BoundingBox, Side};
use eda_common::geom::coord::GridCoord;

/// Exclusive write access to the occupancy counters of one rectangle of the
/// device, on all layers.
///
/// Tokens are not `Clone`. A root token only comes from
/// [`DenseGrid::begin_epoch`](super::DenseGrid::begin_epoch) and the only way
/// to obtain more is [`RegionToken::split`], which consumes its parent. Two
/// live tokens of the same epoch therefore never overlap.
#[derive(Debug)]
pub struct RegionToken {
    region: BoundingBox,
    epoch: u64,
}

impl RegionToken {
    pub(super) fn root(region: BoundingBox, epoch: u64) -> Self {
        Self { region, epoch }
    }

    pub fn region(&self) -> BoundingBox {
        self.region
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline(always)]
    pub fn covers(&self, c: GridCoord) -> bool {
        self.region.contains(c)
    }

    /// Splits along a cutline at `pos + 0.5`. Left gets `[min, pos]`.
    ///
    /// # Panics
    /// If the cutline does not pass through the region.
    pub fn split(self, axis: Axis, pos: u32) -> (RegionToken, RegionToken) {
        let left = self.region.clip_to_side(axis, pos, Side::Left);
        let right = self.region.clip_to_side(axis, pos, Side::Right);
        match (left, right) {
            (Some(l), Some(r)) => (
                RegionToken {
                    region: l,
                    epoch: self.epoch,
                },
                RegionToken {
                    region: r,
                    epoch: self.epoch,
                },
            ),
            _ => panic!(
                "cutline {:?}={} does not split region {}",
                axis, pos, self.region
            ),
        }
    }
}
