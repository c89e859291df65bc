//! Net scheduling strategies.
//!
//! All strategies walk the same [`PartitionTree`]: a node's nets are routed
//! and committed before either child starts, and the two children touch
//! disjoint parts of the device. They differ only in who runs a node.

pub mod decomp;
mod node;
pub mod nested;
pub mod parallel;
pub mod serial;
mod state;

pub use decomp::DecompNetlistRouter;
pub use nested::NestedNetlistRouter;
pub use parallel::ParallelNetlistRouter;
pub use serial::SerialNetlistRouter;

use crate::algo::astar::{AStar, AStarParams};
use crate::connection_router::ConnectionRouter;
use crate::error::RouterError;
use crate::grid::DenseGrid;
use crate::partition_tree::PartitionTree;
use crate::timing::TimingInfo;
use eda_common::db::core::{NetRoute, NetlistDB};
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::util::config::{RouterAlgorithm, RouterConfig};
use std::ops::AddAssign;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub nets_routed: usize,
    pub connections_routed: usize,
    pub heap_pops: u64,
    pub nets_decomposed: usize,
    pub virtual_nets_routed: usize,
    pub decomp_failures: usize,
    pub nets_repaired: usize,
    pub overused_nodes: usize,
}

impl AddAssign<&RouterStats> for RouterStats {
    fn add_assign(&mut self, rhs: &RouterStats) {
        self.nets_routed += rhs.nets_routed;
        self.connections_routed += rhs.connections_routed;
        self.heap_pops += rhs.heap_pops;
        self.nets_decomposed += rhs.nets_decomposed;
        self.virtual_nets_routed += rhs.virtual_nets_routed;
        self.decomp_failures += rhs.decomp_failures;
        self.nets_repaired += rhs.nets_repaired;
        self.overused_nodes += rhs.overused_nodes;
    }
}

/// Outcome of one [`NetlistRouter::route_netlist`] call.
#[derive(Clone, Debug, Default)]
pub struct RouteIterResults {
    /// False if some net cannot reach a sink even with a full-device box.
    pub is_routable: bool,
    /// Every net ripped up and rerouted in this call, ascending.
    pub rerouted_nets: Vec<NetId>,
    /// Nets whose box was grown to the whole device for the next call.
    pub nets_to_retry: Vec<NetId>,
    pub unroutable_nets: Vec<NetId>,
    pub stats: RouterStats,
}

/// Routes a whole netlist once per call on top of a shared occupancy grid.
pub trait NetlistRouter: Send {
    fn algorithm(&self) -> RouterAlgorithm;

    /// Rips up and reroutes every net that is unrouted, uses an overused
    /// node, or (with RCV and a nonzero `worst_neg_slack`) misses a hold
    /// budget. The set is fixed when the call starts. Results do not depend
    /// on thread scheduling. On error the committed routes and their
    /// occupancy are left as they were before the call.
    fn route_netlist(
        &mut self,
        itry: usize,
        pres_fac: f64,
        worst_neg_slack: f64,
    ) -> Result<RouteIterResults, RouterError>;

    /// Re-files nets whose routing box changed since the last call.
    fn handle_bb_updated_nets(&mut self, nets: &[NetId]);

    fn set_rcv_enabled(&mut self, enabled: bool) -> Result<(), RouterError>;

    fn set_timing_info(&mut self, timing: Option<Arc<dyn TimingInfo>>);

    /// Grows the routing box of `net` to cover `bb`. Boxes never shrink.
    fn set_route_bb(&mut self, net: NetId, bb: BoundingBox);

    fn route_bb(&self, net: NetId) -> BoundingBox;

    fn routes(&self) -> &[NetRoute];

    fn partition_tree(&self) -> &PartitionTree;

    fn resources(&self) -> &DenseGrid;

    /// Exclusive access between calls, e.g. for history updates.
    fn resources_mut(&mut self) -> Result<&mut DenseGrid, RouterError>;

    fn predicted_success_iteration(&self) -> Option<f64>;
}

/// Builds the strategy selected by `cfg.algorithm`.
pub fn make_netlist_router<R>(
    netlist: Arc<NetlistDB>,
    grid: DenseGrid,
    router: R,
    cfg: &RouterConfig,
) -> Result<Box<dyn NetlistRouter>, RouterError>
where
    R: ConnectionRouter + Clone + 'static,
{
    cfg.validate()?;
    log::info!(
        "Creating {} net router ({} workers)",
        cfg.algorithm,
        cfg.worker_count()
    );
    let r: Box<dyn NetlistRouter> = match cfg.algorithm {
        RouterAlgorithm::Serial => Box::new(SerialNetlistRouter::new(netlist, grid, router, cfg)),
        RouterAlgorithm::Parallel => {
            Box::new(ParallelNetlistRouter::new(netlist, grid, router, cfg)?)
        }
        RouterAlgorithm::Decomposing => {
            Box::new(DecompNetlistRouter::new(netlist, grid, router, cfg)?)
        }
        RouterAlgorithm::Nested => Box::new(NestedNetlistRouter::new(netlist, grid, router, cfg)?),
    };
    Ok(r)
}

/// [`make_netlist_router`] with a grid built from the netlist and an A* path search.
pub fn make_default_router(
    netlist: Arc<NetlistDB>,
    cfg: &RouterConfig,
) -> Result<Box<dyn NetlistRouter>, RouterError> {
    let grid = DenseGrid::from_netlist(&netlist, cfg.capacity);
    let astar = AStar::new(AStarParams::from(cfg));
    make_netlist_router(netlist, grid, astar, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::util::config::{ConfigError, GeneratorConfig};
    use eda_common::util::generator::generate_netlist;

    fn small_netlist() -> Arc<NetlistDB> {
        Arc::new(generate_netlist(&GeneratorConfig {
            width: 24,
            height: 24,
            num_nets: 30,
            high_fanout_nets: 2,
            ..GeneratorConfig::default()
        }))
    }

    #[test]
    fn factory_rejects_decomposition_with_rcv() {
        let cfg = RouterConfig {
            algorithm: RouterAlgorithm::Decomposing,
            rcv_enabled: true,
            num_workers: 2,
            ..RouterConfig::default()
        };
        match make_default_router(small_netlist(), &cfg) {
            Err(RouterError::Config(ConfigError::MutuallyExclusive { .. })) => {}
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("decomposition with rcv accepted"),
        }
    }

    #[test]
    fn factory_builds_every_strategy() {
        for algorithm in [
            RouterAlgorithm::Serial,
            RouterAlgorithm::Parallel,
            RouterAlgorithm::Decomposing,
            RouterAlgorithm::Nested,
        ] {
            let cfg = RouterConfig {
                algorithm,
                num_workers: 2,
                ..RouterConfig::default()
            };
            let netlist = small_netlist();
            let r = make_default_router(Arc::clone(&netlist), &cfg).unwrap();
            assert_eq!(r.algorithm(), algorithm);
            assert_eq!(r.routes().len(), netlist.num_nets());
        }
    }

    #[test]
    fn enabling_rcv_later_is_rejected_only_with_decomposition() {
        let mut cfg = RouterConfig {
            algorithm: RouterAlgorithm::Decomposing,
            num_workers: 2,
            ..RouterConfig::default()
        };
        let mut r = make_default_router(small_netlist(), &cfg).unwrap();
        assert!(matches!(
            r.set_rcv_enabled(true),
            Err(RouterError::Config(ConfigError::MutuallyExclusive { .. }))
        ));
        assert!(r.set_rcv_enabled(false).is_ok());

        cfg.algorithm = RouterAlgorithm::Parallel;
        let mut r = make_default_router(small_netlist(), &cfg).unwrap();
        assert!(r.set_rcv_enabled(true).is_ok());
    }

    #[test]
    fn stats_add_up() {
        let mut a = RouterStats {
            nets_routed: 2,
            heap_pops: 10,
            ..RouterStats::default()
        };
        a += &RouterStats {
            nets_routed: 3,
            heap_pops: 5,
            nets_repaired: 1,
            ..RouterStats::default()
        };
        assert_eq!(a.nets_routed, 5);
        assert_eq!(a.heap_pops, 15);
        assert_eq!(a.nets_repaired, 1);
    }
}
