use super::decomp::{rcv_conflict, DecompState};
use super::node::route_node;
use super::state::{IterCtx, RouterCore};
use super::{NetlistRouter, RouteIterResults};
use crate::connection_router::ConnectionRouter;
use crate::error::RouterError;
use crate::grid::{DenseGrid, RegionToken};
use crate::partition_tree::{NodeId, PartitionTree};
use crate::thread_pool::{PoolError, PoolHandle, ThreadPool};
use crate::timing::TimingInfo;
use crate::virtual_net::VirtualNet;
use eda_common::db::core::{NetRoute, NetlistDB};
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::util::config::{RouterAlgorithm, RouterConfig};
use eda_common::util::profiler::ScopedTimer;
use std::sync::Arc;

/// Node tasks on the crate's own [`ThreadPool`]. Every worker owns its path
/// search from pool construction on. Sink ordering of high-fanout nets is
/// handed to rayon.
pub struct NestedNetlistRouter<R: ConnectionRouter + Clone + 'static> {
    core: RouterCore<R>,
    pool: ThreadPool<R>,
    decomp: Option<DecompState>,
    high_fanout_threshold: usize,
}

impl<R: ConnectionRouter + Clone + 'static> NestedNetlistRouter<R> {
    pub fn new(
        netlist: Arc<NetlistDB>,
        grid: DenseGrid,
        router: R,
        cfg: &RouterConfig,
    ) -> Result<Self, RouterError> {
        let decomp = if cfg.nested_decomposition {
            if cfg.rcv_enabled {
                return Err(rcv_conflict());
            }
            Some(DecompState::new(&cfg.decomposition, netlist.num_nets()))
        } else {
            None
        };
        let pool = ThreadPool::new(cfg.worker_count(), |_| router.clone())?;
        Ok(Self {
            core: RouterCore::new(netlist, grid, router, cfg),
            pool,
            decomp,
            high_fanout_threshold: cfg.high_fanout_threshold.max(1),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.num_workers()
    }

    /// Stops the workers, running queued work first if `drain` is set.
    pub fn shutdown(&mut self, drain: bool) -> Result<(), RouterError> {
        Ok(self.pool.shutdown(drain)?)
    }
}

fn schedule_node<R: ConnectionRouter + 'static>(
    handle: &PoolHandle<R>,
    ctx: Arc<IterCtx>,
    node: NodeId,
    token: RegionToken,
    vnets: Vec<VirtualNet>,
) -> Result<(), PoolError> {
    handle.schedule_work(move |router: &mut R, h: &PoolHandle<R>| {
        let out = route_node(&ctx, node, &token, router, vnets);
        ctx.merge(out.results);

        let n = ctx.tree.node(node);
        if let (Some(cut), Some((l, r))) = (n.cutline(), n.children()) {
            let (lt, rt) = token.split(cut.axis, cut.pos);
            for (child, t, v) in [(l, lt, out.left), (r, rt, out.right)] {
                if let Err(e) = schedule_node(h, Arc::clone(&ctx), child, t, v) {
                    ctx.record_pool_error(e);
                }
            }
        }
    })
}

impl<R: ConnectionRouter + Clone + 'static> NetlistRouter for NestedNetlistRouter<R> {
    fn algorithm(&self) -> RouterAlgorithm {
        RouterAlgorithm::Nested
    }

    fn route_netlist(
        &mut self,
        itry: usize,
        pres_fac: f64,
        worst_neg_slack: f64,
    ) -> Result<RouteIterResults, RouterError> {
        let _t = ScopedTimer::quiet("Nested route_netlist");
        let view = self.decomp.as_ref().map(|d| d.view());
        let (ctx, token) = self.core.begin_iteration(
            itry,
            pres_fac,
            worst_neg_slack,
            view,
            Some(self.high_fanout_threshold),
        )?;
        let root = ctx.tree.root();
        let scheduled = schedule_node(&self.pool.handle(), Arc::clone(&ctx), root, token, Vec::new());
        let waited = self.pool.wait_for_all();
        if let Err(e) = scheduled.and(waited) {
            return Err(self.core.abort_iteration(Some(ctx), e.into()));
        }
        self.core.finish_iteration(ctx, self.decomp.as_mut())
    }

    fn handle_bb_updated_nets(&mut self, nets: &[NetId]) {
        self.core.handle_bb_updated_nets(nets);
    }

    fn set_rcv_enabled(&mut self, enabled: bool) -> Result<(), RouterError> {
        if enabled && self.decomp.is_some() {
            return Err(rcv_conflict());
        }
        self.core.rcv_enabled = enabled;
        Ok(())
    }

    fn set_timing_info(&mut self, timing: Option<Arc<dyn TimingInfo>>) {
        self.core.timing = timing;
    }

    fn set_route_bb(&mut self, net: NetId, bb: BoundingBox) {
        self.core.set_route_bb(net, bb);
    }

    fn route_bb(&self, net: NetId) -> BoundingBox {
        self.core.bboxes[net.index()]
    }

    fn routes(&self) -> &[NetRoute] {
        &self.core.routes
    }

    fn partition_tree(&self) -> &PartitionTree {
        &self.core.tree
    }

    fn resources(&self) -> &DenseGrid {
        &self.core.grid
    }

    fn resources_mut(&mut self) -> Result<&mut DenseGrid, RouterError> {
        self.core.resources_mut()
    }

    fn predicted_success_iteration(&self) -> Option<f64> {
        self.core.predictor.estimate_success_iteration()
    }
}
