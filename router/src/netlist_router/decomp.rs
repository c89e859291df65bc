//! Adaptive net decomposition on top of the parallel strategy.
//!
//! A large net whose box crosses its node's cutline is split: a sample of
//! sinks is routed first, then each side is handed to the child node as a
//! [`VirtualNet`] and routed there concurrently with the sibling. A failed
//! split disables decomposition for the net and is repaired before the
//! call returns.

use super::node::NodeTask;
use super::parallel::ParallelNetlistRouter;
use super::{NetlistRouter, RouteIterResults};
use crate::connection_router::{ConnectionRouter, RouteSource};
use crate::error::RouterError;
use crate::grid::DenseGrid;
use crate::partition_tree::{Cutline, PartitionTree};
use crate::timing::TimingInfo;
use crate::virtual_net::{bisect, select_sample, sinks_on_both_sides, PartialRoute, VirtualNet};
use dashmap::DashMap;
use eda_common::db::core::{NetRoute, NetlistDB};
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::util::config::{ConfigError, DecompositionConfig, RouterAlgorithm, RouterConfig};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Sinks that failed in an earlier split, per net. Kept for the lifetime of
/// the router.
pub type KnownHardSinks = DashMap<NetId, BTreeSet<usize>>;

/// Read-only decomposition settings of one call.
pub(crate) struct DecompView {
    pub cfg: DecompositionConfig,
    /// Snapshot taken when the call started.
    pub disabled: Arc<Vec<bool>>,
    pub known: Arc<KnownHardSinks>,
}

/// Decomposition bookkeeping that outlives a call.
pub(crate) struct DecompState {
    cfg: DecompositionConfig,
    disabled: Vec<bool>,
    known: Arc<KnownHardSinks>,
}

impl DecompState {
    pub fn new(cfg: &DecompositionConfig, num_nets: usize) -> Self {
        Self {
            cfg: cfg.clone(),
            disabled: vec![false; num_nets],
            known: Arc::new(DashMap::new()),
        }
    }

    pub fn view(&self) -> DecompView {
        DecompView {
            cfg: self.cfg.clone(),
            disabled: Arc::new(self.disabled.clone()),
            known: Arc::clone(&self.known),
        }
    }

    pub fn disable(&mut self, nets: impl IntoIterator<Item = NetId>) {
        for net in nets {
            if !self.disabled[net.index()] {
                log::debug!("{}: decomposition disabled", net);
            }
            self.disabled[net.index()] = true;
        }
    }

    pub fn is_disabled(&self, net: NetId) -> bool {
        self.disabled[net.index()]
    }

    pub fn known_hard(&self, net: NetId) -> BTreeSet<usize> {
        self.known.get(&net).map(|s| s.clone()).unwrap_or_default()
    }
}

pub(crate) fn rcv_conflict() -> RouterError {
    RouterError::Config(ConfigError::MutuallyExclusive {
        first: "net decomposition",
        second: "rcv_enabled",
    })
}

/// The piece being considered for a split.
struct SplitCandidate<'p> {
    net: NetId,
    bbox: BoundingBox,
    sinks: &'p [usize],
    depth: usize,
    slot: usize,
    prefix: Option<Arc<PartialRoute>>,
}

impl NodeTask<'_> {
    /// Cutline to split `c` at, if every decomposition condition holds.
    fn split_cutline(&self, c: &SplitCandidate<'_>) -> Option<Cutline> {
        let d = self.decomp?;
        let cut = self.node.cutline()?;
        self.node.children()?;
        let data = self.cx.netlist.net(c.net);
        let min_sinks = if c.prefix.is_some() {
            d.cfg.min_vnet_sinks
        } else {
            d.cfg.min_net_sinks
        };
        let allowed = !data.is_global
            && !d.disabled[c.net.index()]
            && self.cx.params.itry <= d.cfg.max_decomp_iter
            && c.depth < d.cfg.max_decomp_depth
            && c.sinks.len() >= min_sinks
            && c.bbox.crosses_cutline(cut.axis, cut.pos)
            && sinks_on_both_sides(data, c.sinks, cut.axis, cut.pos)
            && c.bbox.extent(cut.axis) >= 2 * d.cfg.min_split_span
            && c.slot < d.cfg.max_attempts_per_iteration;
        allowed.then_some(cut)
    }

    /// Routes the sample of `c` and hands both sides to the children.
    /// Returns false, with nothing claimed, if the sample failed.
    fn split(&mut self, c: SplitCandidate<'_>, cut: Cutline) -> bool {
        let Some(d) = self.decomp else {
            return false;
        };
        let data = self.cx.netlist.net(c.net);
        let unreached: Vec<usize> = match &c.prefix {
            Some(p) => c.sinks.iter().copied().filter(|&s| !p.is_reached(s)).collect(),
            None => c.sinks.to_vec(),
        };
        // Only this piece's sinks: entries of sibling pieces may still change.
        let known: BTreeSet<usize> = d
            .known
            .get(&c.net)
            .map(|k| c.sinks.iter().copied().filter(|s| k.contains(s)).collect())
            .unwrap_or_default();
        let sample = select_sample(
            data,
            &c.bbox,
            &unreached,
            &known,
            cut.axis,
            cut.pos,
            c.prefix.as_deref(),
            &d.cfg,
        );

        let sources = match &c.prefix {
            Some(p) => p.sources_in(&c.bbox),
            None => vec![RouteSource {
                coord: data.driver,
                delay: 0,
            }],
        };
        let targets = self.cx.sink_targets(c.net, sample);
        let out = self.cx.search(
            &mut *self.router,
            c.net,
            &sources,
            &targets,
            c.bbox,
            &mut self.out.stats,
        );
        if let Some(sink) = out.failed_sink {
            log::debug!("{}: sample sink {} failed at slot {}", c.net, sink, c.slot);
            d.known.entry(c.net).or_default().insert(sink);
            self.out.decomp_disabled.push(c.net);
            return false;
        }

        let mut nodes = Vec::new();
        if c.prefix.is_none() {
            self.cx.grid.add_wire(self.token, data.driver);
            nodes.push((data.driver, 0));
        }
        nodes.extend(self.cx.commit(self.token, &out));
        let prefix = Arc::new(PartialRoute {
            parent: c.prefix,
            slot: c.slot,
            nodes,
            reached: out.paths.iter().map(|p| (p.sink, p.delay)).collect(),
        });
        self.out.prefixes.push((c.net, Arc::clone(&prefix)));

        match bisect(data, c.net, &c.bbox, c.sinks, cut.axis, cut.pos, c.depth, prefix) {
            Some((l, r)) => {
                self.left.push(l);
                self.right.push(r);
            }
            None => self.out.decomp_failed.push(c.net),
        }
        true
    }

    pub(super) fn try_decompose_net(&mut self, net: NetId) -> bool {
        let sinks: Vec<usize> = (0..self.cx.netlist.net(net).num_sinks()).collect();
        let c = SplitCandidate {
            net,
            bbox: self.cx.bboxes[net.index()],
            sinks: &sinks,
            depth: 0,
            slot: 0,
            prefix: None,
        };
        match self.split_cutline(&c) {
            Some(cut) => self.split(c, cut),
            None => false,
        }
    }

    pub(super) fn route_virtual_item(&mut self, v: VirtualNet) {
        self.out.stats.virtual_nets_routed += 1;
        let c = SplitCandidate {
            net: v.net,
            bbox: v.clipped_bb,
            sinks: &v.sinks,
            depth: v.depth,
            slot: v.slot,
            prefix: Some(Arc::clone(&v.prefix)),
        };
        if let Some(cut) = self.split_cutline(&c)
            && self.split(c, cut)
        {
            return;
        }
        self.route_virtual_net(&v);
    }

    /// Connects the remaining sinks of `v` to its prefix inside its clipped box.
    fn route_virtual_net(&mut self, v: &VirtualNet) {
        let remaining = v.remaining_sinks();
        if remaining.is_empty() {
            return;
        }
        let sources = v.prefix.sources_in(&v.clipped_bb);
        let targets = self.cx.sink_targets(v.net, remaining);
        let out = self.cx.search(
            &mut *self.router,
            v.net,
            &sources,
            &targets,
            v.clipped_bb,
            &mut self.out.stats,
        );
        if let Some(sink) = out.failed_sink {
            log::debug!("{}: virtual net slot {} failed at sink {}", v.net, v.slot, sink);
            if let Some(d) = self.decomp {
                d.known.entry(v.net).or_default().insert(sink);
            }
            self.out.decomp_failed.push(v.net);
            return;
        }
        let nodes = self.cx.commit(self.token, &out);
        self.out.pieces.push((
            v.net,
            PartialRoute {
                parent: Some(Arc::clone(&v.prefix)),
                slot: v.slot,
                nodes,
                reached: out.paths.iter().map(|p| (p.sink, p.delay)).collect(),
            },
        ));
    }
}

/// Parallel strategy that additionally splits large nets across the
/// partition tree.
pub struct DecompNetlistRouter<R: ConnectionRouter + Clone + 'static> {
    inner: ParallelNetlistRouter<R>,
    state: DecompState,
}

impl<R: ConnectionRouter + Clone + 'static> DecompNetlistRouter<R> {
    pub fn new(
        netlist: Arc<NetlistDB>,
        grid: DenseGrid,
        router: R,
        cfg: &RouterConfig,
    ) -> Result<Self, RouterError> {
        if cfg.rcv_enabled {
            return Err(rcv_conflict());
        }
        let num_nets = netlist.num_nets();
        Ok(Self {
            inner: ParallelNetlistRouter::new(netlist, grid, router, cfg)?,
            state: DecompState::new(&cfg.decomposition, num_nets),
        })
    }

    pub fn is_decomposition_disabled(&self, net: NetId) -> bool {
        self.state.is_disabled(net)
    }

    pub fn known_hard_sinks(&self, net: NetId) -> BTreeSet<usize> {
        self.state.known_hard(net)
    }
}

impl<R: ConnectionRouter + Clone + 'static> NetlistRouter for DecompNetlistRouter<R> {
    fn algorithm(&self) -> RouterAlgorithm {
        RouterAlgorithm::Decomposing
    }

    fn route_netlist(
        &mut self,
        itry: usize,
        pres_fac: f64,
        worst_neg_slack: f64,
    ) -> Result<RouteIterResults, RouterError> {
        self.inner
            .run(itry, pres_fac, worst_neg_slack, Some(&mut self.state))
    }

    fn handle_bb_updated_nets(&mut self, nets: &[NetId]) {
        self.inner.handle_bb_updated_nets(nets);
    }

    fn set_rcv_enabled(&mut self, enabled: bool) -> Result<(), RouterError> {
        if enabled {
            return Err(rcv_conflict());
        }
        self.inner.set_rcv_enabled(false)
    }

    fn set_timing_info(&mut self, timing: Option<Arc<dyn TimingInfo>>) {
        self.inner.set_timing_info(timing);
    }

    fn set_route_bb(&mut self, net: NetId, bb: BoundingBox) {
        self.inner.set_route_bb(net, bb);
    }

    fn route_bb(&self, net: NetId) -> BoundingBox {
        self.inner.route_bb(net)
    }

    fn routes(&self) -> &[NetRoute] {
        self.inner.routes()
    }

    fn partition_tree(&self) -> &PartitionTree {
        self.inner.partition_tree()
    }

    fn resources(&self) -> &DenseGrid {
        self.inner.resources()
    }

    fn resources_mut(&mut self) -> Result<&mut DenseGrid, RouterError> {
        self.inner.resources_mut()
    }

    fn predicted_success_iteration(&self) -> Option<f64> {
        self.inner.predicted_success_iteration()
    }
}
