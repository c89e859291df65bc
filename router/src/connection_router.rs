use crate::grid::RoutingGrid;
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::geom::coord::GridCoord;

/// An existing node of the net's route tree the search may start from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteSource {
    pub coord: GridCoord,
    pub delay: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SinkTarget {
    /// Index into the net's sink list.
    pub index: usize,
    pub coord: GridCoord,
    pub criticality: f64,
    pub min_delay: Option<u32>,
}

pub struct NetRouteRequest<'a> {
    pub net: NetId,
    pub sources: &'a [RouteSource],
    /// Routed in this order.
    pub sinks: &'a [SinkTarget],
    /// The search never leaves this box.
    pub bbox: BoundingBox,
    pub pres_fac: f64,
    pub rcv_enabled: bool,
}

/// Nodes newly added to reach one sink, ending at the sink.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkPath {
    pub sink: usize,
    pub nodes: Vec<GridCoord>,
    pub delay: u32,
}

impl SinkPath {
    pub fn nodes_with_delay(&self) -> impl Iterator<Item = (GridCoord, u32)> + '_ {
        let len = self.nodes.len() as u32;
        self.nodes
            .iter()
            .enumerate()
            .map(move |(i, &c)| (c, self.delay + 1 + i as u32 - len))
    }
}

#[derive(Clone, Debug, Default)]
pub struct NetRouteOutcome {
    pub paths: Vec<SinkPath>,
    /// First sink that could not be reached. Later sinks were not attempted.
    pub failed_sink: Option<usize>,
    pub expansions: u64,
}

impl NetRouteOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_sink.is_none()
    }

    pub fn new_nodes(&self) -> impl Iterator<Item = (GridCoord, u32)> + '_ {
        self.paths.iter().flat_map(|p| p.nodes_with_delay())
    }
}

/// Path search for a single net. Reads congestion, never writes it.
pub trait ConnectionRouter: Send {
    fn route_net(&mut self, grid: &dyn RoutingGrid, req: &NetRouteRequest<'_>) -> NetRouteOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_delays_count_up_to_the_sink() {
        let path = SinkPath {
            sink: 0,
            nodes: vec![
                GridCoord::new(1, 0, 0),
                GridCoord::new(2, 0, 0),
                GridCoord::new(3, 0, 0),
            ],
            delay: 7,
        };
        let delays: Vec<u32> = path.nodes_with_delay().map(|(_, d)| d).collect();
        assert_eq!(delays, vec![5, 6, 7]);
    }
}
