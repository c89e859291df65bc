use super::decomp::DecompState;
use super::node::route_node;
use super::state::{catch_task_panic, lock, IterCtx, RouterCore};
use super::{NetlistRouter, RouteIterResults};
use crate::connection_router::ConnectionRouter;
use crate::error::RouterError;
use crate::grid::{DenseGrid, RegionToken};
use crate::partition_tree::{NodeId, PartitionTree};
use crate::timing::TimingInfo;
use crate::virtual_net::VirtualNet;
use eda_common::db::core::{NetRoute, NetlistDB};
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::util::config::{RouterAlgorithm, RouterConfig};
use eda_common::util::profiler::ScopedTimer;
use std::sync::{Arc, Mutex};

/// One rayon task per partition node. A node's nets are committed before
/// its children are spawned.
pub struct ParallelNetlistRouter<R: ConnectionRouter + Clone + 'static> {
    core: RouterCore<R>,
    pool: rayon::ThreadPool,
    // One path search per pool thread, indexed by rayon's thread index.
    slots: Vec<Mutex<R>>,
}

impl<R: ConnectionRouter + Clone + 'static> ParallelNetlistRouter<R> {
    pub fn new(
        netlist: Arc<NetlistDB>,
        grid: DenseGrid,
        router: R,
        cfg: &RouterConfig,
    ) -> Result<Self, RouterError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.worker_count())
            .thread_name(|i| format!("route-node-{}", i))
            .build()?;
        let slots = (0..pool.current_num_threads())
            .map(|_| Mutex::new(router.clone()))
            .collect();
        Ok(Self {
            core: RouterCore::new(netlist, grid, router, cfg),
            pool,
            slots,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub(crate) fn run(
        &mut self,
        itry: usize,
        pres_fac: f64,
        worst_neg_slack: f64,
        decomp: Option<&mut DecompState>,
    ) -> Result<RouteIterResults, RouterError> {
        let _t = ScopedTimer::quiet("Parallel route_netlist");
        let view = decomp.as_ref().map(|d| d.view());
        let (ctx, token) = self
            .core
            .begin_iteration(itry, pres_fac, worst_neg_slack, view, None)?;
        let ran = {
            let ctx: &IterCtx = &ctx;
            let slots = &self.slots;
            let pool = &self.pool;
            let root = ctx.tree.root();
            // The scope rethrows a task panic once every spawned task is done.
            catch_task_panic(|| pool.scope(|s| spawn_node(s, ctx, slots, root, token, Vec::new())))
        };
        if let Err(e) = ran {
            return Err(self.core.abort_iteration(Some(ctx), e));
        }
        self.core.finish_iteration(ctx, decomp)
    }
}

fn spawn_node<'s, R: ConnectionRouter>(
    s: &rayon::Scope<'s>,
    ctx: &'s IterCtx,
    slots: &'s [Mutex<R>],
    node: NodeId,
    token: RegionToken,
    vnets: Vec<VirtualNet>,
) {
    s.spawn(move |s| {
        let out = {
            let idx = rayon::current_thread_index().unwrap_or(0) % slots.len();
            let mut router = lock(&slots[idx]);
            route_node(ctx, node, &token, &mut *router, vnets)
        };
        ctx.merge(out.results);

        let n = ctx.tree.node(node);
        if let (Some(cut), Some((l, r))) = (n.cutline(), n.children()) {
            let (lt, rt) = token.split(cut.axis, cut.pos);
            spawn_node(s, ctx, slots, l, lt, out.left);
            spawn_node(s, ctx, slots, r, rt, out.right);
        }
    });
}

impl<R: ConnectionRouter + Clone + 'static> NetlistRouter for ParallelNetlistRouter<R> {
    fn algorithm(&self) -> RouterAlgorithm {
        RouterAlgorithm::Parallel
    }

    fn route_netlist(
        &mut self,
        itry: usize,
        pres_fac: f64,
        worst_neg_slack: f64,
    ) -> Result<RouteIterResults, RouterError> {
        self.run(itry, pres_fac, worst_neg_slack, None)
    }

    fn handle_bb_updated_nets(&mut self, nets: &[NetId]) {
        self.core.handle_bb_updated_nets(nets);
    }

    fn set_rcv_enabled(&mut self, enabled: bool) -> Result<(), RouterError> {
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
