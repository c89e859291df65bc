use super::node::route_node;
use super::state::{catch_task_panic, IterCtx, RouterCore};
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
use std::sync::Arc;

/// Baseline strategy: every net on the calling thread with one path search.
///
/// Nets are visited in partition-tree pre-order, each node's nets by sink
/// count descending then id. Parallel strategies reproduce this order's
/// results exactly.
pub struct SerialNetlistRouter<R: ConnectionRouter> {
    core: RouterCore<R>,
}

impl<R: ConnectionRouter> SerialNetlistRouter<R> {
    pub fn new(netlist: Arc<NetlistDB>, grid: DenseGrid, router: R, cfg: &RouterConfig) -> Self {
        Self {
            core: RouterCore::new(netlist, grid, router, cfg),
        }
    }
}

fn route_subtree(
    ctx: &IterCtx,
    router: &mut dyn ConnectionRouter,
    node: NodeId,
    token: RegionToken,
    vnets: Vec<VirtualNet>,
) {
    let out = route_node(ctx, node, &token, router, vnets);
    ctx.merge(out.results);
    let n = ctx.tree.node(node);
    if let (Some(cut), Some((l, r))) = (n.cutline(), n.children()) {
        let (lt, rt) = token.split(cut.axis, cut.pos);
        route_subtree(ctx, router, l, lt, out.left);
        route_subtree(ctx, router, r, rt, out.right);
    }
}

impl<R: ConnectionRouter> NetlistRouter for SerialNetlistRouter<R> {
    fn algorithm(&self) -> RouterAlgorithm {
        RouterAlgorithm::Serial
    }

    fn route_netlist(
        &mut self,
        itry: usize,
        pres_fac: f64,
        worst_neg_slack: f64,
    ) -> Result<RouteIterResults, RouterError> {
        let _t = ScopedTimer::quiet("Serial route_netlist");
        let (ctx, token) = self
            .core
            .begin_iteration(itry, pres_fac, worst_neg_slack, None, None)?;
        let root = ctx.tree.root();
        let router = &mut self.core.router;
        let ran = catch_task_panic(|| route_subtree(&ctx, router, root, token, Vec::new()));
        if let Err(e) = ran {
            return Err(self.core.abort_iteration(Some(ctx), e));
        }
        self.core.finish_iteration(ctx, None)
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
