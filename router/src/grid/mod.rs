pub mod dense;
pub mod region;

pub use dense::DenseGrid;
pub use region::RegionToken;

use eda_common::geom::bbox::BoundingBox;
use eda_common::geom::coord::GridCoord;

/// Read side of the routing-resource state, shared by every worker.
///
/// Writes go through [`DenseGrid::add_wire`]/[`DenseGrid::remove_wire`] and
/// need a [`RegionToken`].
pub trait RoutingGrid: Sync + Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn layers(&self) -> u8;

    fn is_obstacle(&self, coord: GridCoord) -> bool;

    fn occupancy(&self, coord: GridCoord) -> u32;
    fn capacity(&self, coord: GridCoord) -> u32;

    /// Cost of claiming `coord` one more time under present-congestion factor `pres_fac`.
    fn get_cost(&self, coord: GridCoord, pres_fac: f64) -> f64;

    fn is_congested(&self, coord: GridCoord) -> bool {
        self.occupancy(coord) > self.capacity(coord)
    }

    /// Number of nodes whose occupancy exceeds capacity.
    fn total_overuse(&self) -> usize;
    fn max_occupancy(&self) -> u32;

    fn device_bbox(&self) -> BoundingBox {
        BoundingBox::device(self.width(), self.height())
    }
}
