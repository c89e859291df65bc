use super::decomp::{DecompState, DecompView};
use super::node::NetContext;
use super::{RouteIterResults, RouterStats};
use crate::connection_router::ConnectionRouter;
use crate::error::RouterError;
use crate::grid::{DenseGrid, RegionToken, RoutingGrid};
use crate::partition_tree::PartitionTree;
use crate::predictor::{CostHistoryPredictor, RoutingPredictor};
use crate::thread_pool::{panic_message, PoolError};
use crate::timing::TimingInfo;
use crate::virtual_net::PartialRoute;
use eda_common::db::core::{NetRoute, NetlistDB};
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::util::config::RouterConfig;
use eda_common::util::profiler::ScopedTimer;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs the task phase of a call, turning a panic into an error.
pub(crate) fn catch_task_panic<T>(f: impl FnOnce() -> T) -> Result<T, RouterError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| RouterError::TaskPanicked(panic_message(payload.as_ref())))
}

fn misses_hold_budget(timing: &dyn TimingInfo, net: NetId, route: &NetRoute) -> bool {
    route
        .sink_delays
        .iter()
        .enumerate()
        .any(|(sink, delay)| match (timing.min_delay_budget(net, sink), delay) {
            (Some(budget), Some(d)) => *d < budget,
            _ => false,
        })
}

/// Per-call values every task reads.
#[derive(Clone, Debug)]
pub(crate) struct IterParams {
    pub itry: usize,
    pub pres_fac: f64,
    pub worst_neg_slack: f64,
    pub rcv_enabled: bool,
    pub max_criticality: f64,
    /// Nets with at least this many sinks order them with rayon.
    pub parallel_sort_threshold: Option<usize>,
}

/// What a group of node tasks produced. Merged into the call's accumulator.
#[derive(Default)]
pub(crate) struct TaskResults {
    pub routes: Vec<(NetId, NetRoute)>,
    pub prefixes: Vec<(NetId, Arc<PartialRoute>)>,
    pub pieces: Vec<(NetId, PartialRoute)>,
    pub rerouted: Vec<NetId>,
    pub retry: Vec<NetId>,
    pub unroutable: Vec<NetId>,
    pub decomp_failed: Vec<NetId>,
    pub decomp_disabled: Vec<NetId>,
    pub stats: RouterStats,
    pub pool_error: Option<PoolError>,
}

impl TaskResults {
    pub fn merge(&mut self, other: TaskResults) {
        self.routes.extend(other.routes);
        self.prefixes.extend(other.prefixes);
        self.pieces.extend(other.pieces);
        self.rerouted.extend(other.rerouted);
        self.retry.extend(other.retry);
        self.unroutable.extend(other.unroutable);
        self.decomp_failed.extend(other.decomp_failed);
        self.decomp_disabled.extend(other.decomp_disabled);
        self.stats += &other.stats;
        if self.pool_error.is_none() {
            self.pool_error = other.pool_error;
        }
    }

    /// Brings merged results into an order independent of task timing.
    fn normalize(&mut self) {
        self.routes.sort_by_key(|(n, _)| *n);
        self.prefixes.sort_by_key(|(n, p)| (*n, p.slot));
        self.pieces.sort_by_key(|(n, p)| (*n, p.slot));
        for v in [
            &mut self.rerouted,
            &mut self.retry,
            &mut self.unroutable,
            &mut self.decomp_failed,
            &mut self.decomp_disabled,
        ] {
            v.sort_unstable();
            v.dedup();
        }
    }
}

/// Everything the tasks of one `route_netlist` call share.
pub(crate) struct IterCtx {
    pub netlist: Arc<NetlistDB>,
    pub grid: Arc<DenseGrid>,
    pub tree: Arc<PartitionTree>,
    pub bboxes: Arc<Vec<BoundingBox>>,
    pub old_routes: Arc<Vec<NetRoute>>,
    /// Nets ripped up in this call, fixed when the call starts.
    pub reroute: Vec<bool>,
    pub timing: Option<Arc<dyn TimingInfo>>,
    pub params: IterParams,
    pub decomp: Option<DecompView>,
    results: Mutex<TaskResults>,
}

impl IterCtx {
    pub fn merge(&self, results: TaskResults) {
        lock(&self.results).merge(results);
    }

    pub fn record_pool_error(&self, err: PoolError) {
        log::error!("Failed to schedule partition node: {}", err);
        let mut r = lock(&self.results);
        if r.pool_error.is_none() {
            r.pool_error = Some(err);
        }
    }

    fn into_results(self) -> TaskResults {
        self.results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn net_context(&self) -> NetContext<'_> {
        NetContext {
            netlist: &self.netlist,
            grid: &self.grid,
            bboxes: &self.bboxes,
            timing: self.timing.as_deref(),
            params: &self.params,
        }
    }
}

/// State shared by every strategy: netlist, grid, boxes, tree, committed routes.
pub(crate) struct RouterCore<R> {
    pub netlist: Arc<NetlistDB>,
    pub grid: Arc<DenseGrid>,
    pub tree: Arc<PartitionTree>,
    pub bboxes: Arc<Vec<BoundingBox>>,
    pub routes: Arc<Vec<NetRoute>>,
    pub timing: Option<Arc<dyn TimingInfo>>,
    pub rcv_enabled: bool,
    pub cfg: RouterConfig,
    pub predictor: Box<dyn RoutingPredictor>,
    /// Path search used on the calling thread.
    pub router: R,
}

impl<R: ConnectionRouter> RouterCore<R> {
    pub fn new(netlist: Arc<NetlistDB>, grid: DenseGrid, router: R, cfg: &RouterConfig) -> Self {
        let bboxes: Vec<BoundingBox> = netlist
            .net_ids()
            .map(|id| netlist.route_bbox(id, cfg.bb_factor))
            .collect();
        let weights = Self::weights_of(&netlist);
        let tree = {
            let _t = ScopedTimer::quiet("Partition tree build");
            PartitionTree::build(netlist.device_bbox(), &bboxes, &weights, &cfg.partition)
        };
        let routes = netlist
            .nets
            .iter()
            .map(|n| NetRoute::unrouted(n.num_sinks()))
            .collect();
        Self {
            grid: Arc::new(grid),
            tree: Arc::new(tree),
            bboxes: Arc::new(bboxes),
            routes: Arc::new(routes),
            timing: None,
            rcv_enabled: cfg.rcv_enabled,
            cfg: cfg.clone(),
            predictor: Box::new(CostHistoryPredictor::new(cfg.decomposition.predictor_tolerance)),
            router,
            netlist,
        }
    }

    fn weights_of(netlist: &NetlistDB) -> Vec<usize> {
        netlist.nets.iter().map(|n| n.num_sinks()).collect()
    }

    pub fn resources_mut(&mut self) -> Result<&mut DenseGrid, RouterError> {
        Arc::get_mut(&mut self.grid).ok_or(RouterError::ResourcesBusy)
    }

    /// Nets the next call rips up: unrouted or failed nets, nets on an
    /// overused node, and with RCV and a nonzero worst slack, nets that
    /// arrive before a hold budget.
    fn nets_to_reroute(&self, worst_neg_slack: f64) -> Vec<bool> {
        let grid: &DenseGrid = &self.grid;
        let hold = self.rcv_enabled && worst_neg_slack != 0.0;
        let timing = self.timing.as_deref();
        self.netlist
            .nets
            .par_iter()
            .zip(self.routes.par_iter())
            .enumerate()
            .map(|(i, (data, route))| {
                if data.sinks.is_empty() {
                    return false;
                }
                if !route.is_complete() || route.nodes.iter().any(|&c| grid.is_congested(c)) {
                    return true;
                }
                hold && timing.is_some_and(|t| misses_hold_budget(t, NetId::new(i), route))
            })
            .collect()
    }

    /// Drops a call that could not finish: everything claimed under its
    /// epoch is released and the committed routes are claimed again.
    pub fn abort_iteration(&mut self, ctx: Option<Arc<IterCtx>>, err: RouterError) -> RouterError {
        drop(ctx);
        match self.restore_occupancy() {
            Ok(()) => log::warn!("Iteration abandoned, committed routes restored: {}", err),
            Err(e) => log::error!("Cannot restore occupancy after '{}': {}", err, e),
        }
        err
    }

    fn restore_occupancy(&mut self) -> Result<(), RouterError> {
        let grid = Arc::get_mut(&mut self.grid).ok_or(RouterError::ResourcesBusy)?;
        grid.reset_occupancy();
        let token = grid.begin_epoch();
        for route in self.routes.iter() {
            for &c in &route.nodes {
                grid.add_wire(&token, c);
            }
        }
        Ok(())
    }

    /// Opens a call: a fresh write epoch and the context handed to tasks.
    pub fn begin_iteration(
        &mut self,
        itry: usize,
        pres_fac: f64,
        worst_neg_slack: f64,
        decomp: Option<DecompView>,
        parallel_sort_threshold: Option<usize>,
    ) -> Result<(Arc<IterCtx>, RegionToken), RouterError> {
        let reroute = self.nets_to_reroute(worst_neg_slack);
        let token = self.resources_mut()?.begin_epoch();
        log::debug!(
            "Iteration {}: pres_fac {:.3}, wns {:.3}, {} nets to reroute",
            itry,
            pres_fac,
            worst_neg_slack,
            reroute.iter().filter(|&&r| r).count()
        );
        let ctx = IterCtx {
            netlist: Arc::clone(&self.netlist),
            grid: Arc::clone(&self.grid),
            tree: Arc::clone(&self.tree),
            bboxes: Arc::clone(&self.bboxes),
            old_routes: Arc::clone(&self.routes),
            reroute,
            timing: self.timing.clone(),
            params: IterParams {
                itry,
                pres_fac,
                worst_neg_slack,
                rcv_enabled: self.rcv_enabled,
                max_criticality: self.cfg.max_criticality,
                parallel_sort_threshold,
            },
            decomp,
            results: Mutex::new(TaskResults::default()),
        };
        Ok((Arc::new(ctx), token))
    }

    /// Closes a call once no task holds the context any more: repairs failed
    /// decompositions, assembles split nets, grows boxes of failed nets.
    pub fn finish_iteration(
        &mut self,
        ctx: Arc<IterCtx>,
        decomp: Option<&mut DecompState>,
    ) -> Result<RouteIterResults, RouterError> {
        let params = ctx.params.clone();
        let mut res = Arc::into_inner(ctx)
            .ok_or(RouterError::ResourcesBusy)?
            .into_results();
        if let Some(err) = res.pool_error.take() {
            return Err(self.abort_iteration(None, err.into()));
        }
        res.normalize();

        let token = self.resources_mut()?.begin_epoch();
        let mut stats = res.stats.clone();
        let routes = Arc::make_mut(&mut self.routes);
        for (net, r) in res.routes.drain(..) {
            if r.is_complete() {
                self.predictor.record_cost(net, r.wirelength() as f64);
            }
            routes[net.index()] = r;
        }

        // Pieces of every split net, in slot order.
        let mut split: BTreeMap<NetId, Vec<&PartialRoute>> = BTreeMap::new();
        for (net, p) in &res.prefixes {
            split.entry(*net).or_default().push(p);
        }
        for (net, p) in &res.pieces {
            split.entry(*net).or_default().push(p);
        }

        let mut failed = res.decomp_failed.clone();
        let mut rejected = Vec::new();
        for (&net, parts) in split.iter_mut() {
            parts.sort_by_key(|p| p.slot);
            let mut route = NetRoute::unrouted(self.netlist.net(net).num_sinks());
            for p in parts.iter() {
                route.nodes.extend(p.nodes.iter().map(|&(c, _)| c));
                for &(s, d) in &p.reached {
                    route.sink_delays[s] = Some(d);
                }
            }
            let is_failed = failed.binary_search(&net).is_ok();
            if is_failed || !route.is_complete() {
                if !is_failed {
                    log::warn!("{}: split route misses sinks, repairing", net);
                    failed.push(net);
                }
                // Pieces that did route are still claimed.
                for &c in &route.nodes {
                    self.grid.remove_wire(&token, c);
                }
                continue;
            }
            stats.nets_decomposed += 1;
            if !self.predictor.accept_decomposition(net, route.wirelength() as f64) {
                log::debug!("{}: split costs more than its baseline", net);
                rejected.push(net);
            }
            routes[net.index()] = route;
        }
        failed.sort_unstable();

        let device = self.netlist.device_bbox();
        let cx = NetContext {
            netlist: &self.netlist,
            grid: &self.grid,
            bboxes: &self.bboxes,
            timing: self.timing.as_deref(),
            params: &params,
        };
        for &net in &failed {
            stats.decomp_failures += 1;
            stats.nets_repaired += 1;
            match cx.route_whole(&token, &mut self.router, net, &mut stats) {
                Ok(r) => routes[net.index()] = r,
                Err(sink) => {
                    log::debug!("{}: repair failed at sink {}", net, sink);
                    routes[net.index()] = NetRoute::unrouted(self.netlist.net(net).num_sinks());
                    if self.bboxes[net.index()] == device {
                        res.unroutable.push(net);
                    } else {
                        res.retry.push(net);
                    }
                }
            }
        }
        drop(token);

        res.retry.sort_unstable();
        res.unroutable.sort_unstable();
        if let Some(d) = decomp {
            d.disable(
                res.decomp_disabled
                    .iter()
                    .chain(&failed)
                    .chain(&rejected)
                    .chain(&res.retry)
                    .copied(),
            );
        }

        let retry: Vec<NetId> = res
            .retry
            .iter()
            .copied()
            .filter(|n| res.unroutable.binary_search(n).is_err())
            .collect();
        for &net in &retry {
            self.set_route_bb(net, device);
        }
        self.handle_bb_updated_nets(&retry);

        let overuse = self.grid.total_overuse();
        self.predictor.add_iteration_overuse(params.itry, overuse);
        stats.overused_nodes = overuse;

        if !res.unroutable.is_empty() {
            log::warn!(
                "{} net(s) unroutable with a full-device box: {:?}",
                res.unroutable.len(),
                res.unroutable
            );
        }
        Ok(RouteIterResults {
            is_routable: res.unroutable.is_empty(),
            rerouted_nets: res.rerouted,
            nets_to_retry: retry,
            unroutable_nets: res.unroutable,
            stats,
        })
    }

    pub fn set_route_bb(&mut self, net: NetId, bb: BoundingBox) {
        let device = self.netlist.device_bbox();
        let boxes = Arc::make_mut(&mut self.bboxes);
        let grown = boxes[net.index()].union(&bb);
        boxes[net.index()] = grown.intersection(&device).unwrap_or(device);
    }

    pub fn handle_bb_updated_nets(&mut self, nets: &[NetId]) {
        if nets.is_empty() {
            return;
        }
        let weights = Self::weights_of(&self.netlist);
        Arc::make_mut(&mut self.tree).update(nets, &self.bboxes, &weights);
    }
}
