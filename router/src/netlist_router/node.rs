use super::decomp::DecompView;
use super::state::{IterCtx, IterParams, TaskResults};
use super::RouterStats;
use crate::connection_router::{ConnectionRouter, NetRouteOutcome, NetRouteRequest, RouteSource, SinkTarget};
use crate::grid::{DenseGrid, RegionToken};
use crate::partition_tree::{NodeId, PartitionTreeNode};
use crate::timing::{effective_criticality, TimingInfo};
use crate::virtual_net::VirtualNet;
use eda_common::db::core::{NetRoute, NetlistDB};
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::geom::coord::GridCoord;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Read-only view used to route and commit single nets.
pub(crate) struct NetContext<'a> {
    pub netlist: &'a NetlistDB,
    pub grid: &'a DenseGrid,
    pub bboxes: &'a [BoundingBox],
    pub timing: Option<&'a dyn TimingInfo>,
    pub params: &'a IterParams,
}

fn by_criticality(a: &SinkTarget, b: &SinkTarget) -> Ordering {
    b.criticality
        .total_cmp(&a.criticality)
        .then_with(|| a.index.cmp(&b.index))
}

impl NetContext<'_> {
    /// Targets for `sinks`, most critical first.
    pub fn sink_targets(&self, net: NetId, sinks: impl IntoIterator<Item = usize>) -> Vec<SinkTarget> {
        let data = self.netlist.net(net);
        let mut targets: Vec<SinkTarget> = sinks
            .into_iter()
            .map(|index| SinkTarget {
                index,
                coord: data.sinks[index],
                criticality: effective_criticality(
                    self.timing,
                    net,
                    index,
                    self.params.max_criticality,
                ),
                min_delay: self.timing.and_then(|t| t.min_delay_budget(net, index)),
            })
            .collect();
        match self.params.parallel_sort_threshold {
            Some(limit) if targets.len() >= limit => targets.par_sort_by(by_criticality),
            _ => targets.sort_by(by_criticality),
        }
        targets
    }

    pub fn search(
        &self,
        router: &mut dyn ConnectionRouter,
        net: NetId,
        sources: &[RouteSource],
        sinks: &[SinkTarget],
        bbox: BoundingBox,
        stats: &mut RouterStats,
    ) -> NetRouteOutcome {
        let req = NetRouteRequest {
            net,
            sources,
            sinks,
            bbox,
            pres_fac: self.params.pres_fac,
            rcv_enabled: self.params.rcv_enabled,
        };
        let out = router.route_net(self.grid, &req);
        stats.heap_pops += out.expansions;
        stats.connections_routed += out.paths.len();
        out
    }

    pub fn rip_up(&self, token: &RegionToken, route: &NetRoute) {
        for &c in &route.nodes {
            self.grid.remove_wire(token, c);
        }
    }

    /// Claims the newly added nodes of `out` and returns them with their delays.
    pub fn commit(&self, token: &RegionToken, out: &NetRouteOutcome) -> Vec<(GridCoord, u32)> {
        let nodes: Vec<(GridCoord, u32)> = out.new_nodes().collect();
        for &(c, _) in &nodes {
            self.grid.add_wire(token, c);
        }
        nodes
    }

    /// Routes `net` from its driver inside its box and commits it. On
    /// failure nothing is claimed and the failing sink is returned.
    pub fn route_whole(
        &self,
        token: &RegionToken,
        router: &mut dyn ConnectionRouter,
        net: NetId,
        stats: &mut RouterStats,
    ) -> Result<NetRoute, usize> {
        let data = self.netlist.net(net);
        let sources = [RouteSource {
            coord: data.driver,
            delay: 0,
        }];
        let targets = self.sink_targets(net, 0..data.num_sinks());
        let out = self.search(router, net, &sources, &targets, self.bboxes[net.index()], stats);
        if let Some(sink) = out.failed_sink {
            return Err(sink);
        }

        let mut route = NetRoute::unrouted(data.num_sinks());
        self.grid.add_wire(token, data.driver);
        route.nodes.push(data.driver);
        route
            .nodes
            .extend(self.commit(token, &out).into_iter().map(|(c, _)| c));
        for p in &out.paths {
            route.sink_delays[p.sink] = Some(p.delay);
        }
        Ok(route)
    }
}

/// Work of one partition node: the virtual nets handed down by the parent,
/// then the node's own nets.
pub(crate) struct NodeTask<'a> {
    pub cx: NetContext<'a>,
    pub ctx: &'a IterCtx,
    pub decomp: Option<&'a DecompView>,
    pub node: &'a PartitionTreeNode,
    pub token: &'a RegionToken,
    pub router: &'a mut dyn ConnectionRouter,
    pub out: TaskResults,
    pub left: Vec<VirtualNet>,
    pub right: Vec<VirtualNet>,
}

pub(crate) struct NodeOutput {
    pub results: TaskResults,
    pub left: Vec<VirtualNet>,
    pub right: Vec<VirtualNet>,
}

/// Routes everything assigned to `node` under `token`.
pub(crate) fn route_node(
    ctx: &IterCtx,
    node: NodeId,
    token: &RegionToken,
    router: &mut dyn ConnectionRouter,
    vnets: Vec<VirtualNet>,
) -> NodeOutput {
    let node = ctx.tree.node(node);
    debug_assert_eq!(token.region(), node.region());
    let mut task = NodeTask {
        cx: ctx.net_context(),
        ctx,
        decomp: ctx.decomp.as_ref(),
        node,
        token,
        router,
        out: TaskResults::default(),
        left: Vec::new(),
        right: Vec::new(),
    };
    for v in vnets {
        task.route_virtual_item(v);
    }
    for &net in node.nets() {
        task.route_net_item(net);
    }
    NodeOutput {
        results: task.out,
        left: task.left,
        right: task.right,
    }
}

impl NodeTask<'_> {
    fn route_net_item(&mut self, net: NetId) {
        if !self.ctx.reroute[net.index()] {
            return;
        }
        self.cx.rip_up(self.token, &self.ctx.old_routes[net.index()]);
        self.out.rerouted.push(net);
        self.out.stats.nets_routed += 1;

        if self.try_decompose_net(net) {
            return;
        }
        self.route_net_whole(net);
    }

    pub(super) fn route_net_whole(&mut self, net: NetId) {
        match self
            .cx
            .route_whole(self.token, &mut *self.router, net, &mut self.out.stats)
        {
            Ok(route) => self.out.routes.push((net, route)),
            Err(sink) => {
                let data = self.cx.netlist.net(net);
                let bb = self.cx.bboxes[net.index()];
                log::debug!("{}: sink {} unreachable inside {}", net, sink, bb);
                self.out
                    .routes
                    .push((net, NetRoute::unrouted(data.num_sinks())));
                if bb == self.cx.netlist.device_bbox() {
                    self.out.unroutable.push(net);
                } else {
                    self.out.retry.push(net);
                }
            }
        }
    }
}
