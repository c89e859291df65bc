//! Pieces of a decomposed net.
//!
//! A net is split by routing a sample of its sinks first (the prefix) and
//! then handing each side of a cutline to the child partition node as a
//! [`VirtualNet`]. Prefixes form a persistent chain: every piece holds an
//! `Arc` to the frozen route of its ancestors and never mutates it.

use crate::connection_router::RouteSource;
use eda_common::db::core::NetData;
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::{Axis, BoundingBox, Side};
use eda_common::geom::coord::GridCoord;
use eda_common::util::config::DecompositionConfig;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Nodes claimed by one routed piece of a net, with their hop delay.
#[derive(Debug)]
pub struct PartialRoute {
    pub parent: Option<Arc<PartialRoute>>,
    /// Position in the decomposition: root 0, children of `k` are `2k+1`, `2k+2`.
    pub slot: usize,
    pub nodes: Vec<(GridCoord, u32)>,
    /// Sink index and delay of every sink this piece reached.
    pub reached: Vec<(usize, u32)>,
}

impl PartialRoute {
    /// This piece followed by its ancestors.
    pub fn chain(&self) -> impl Iterator<Item = &PartialRoute> {
        std::iter::successors(Some(self), |p| p.parent.as_deref())
    }

    pub fn is_reached(&self, sink: usize) -> bool {
        self.chain().any(|p| p.reached.iter().any(|&(s, _)| s == sink))
    }

    /// Chain nodes inside `bb`, usable as search sources.
    pub fn sources_in(&self, bb: &BoundingBox) -> Vec<RouteSource> {
        let mut out: Vec<RouteSource> = self
            .chain()
            .flat_map(|p| p.nodes.iter())
            .filter(|(c, _)| bb.contains(*c))
            .map(|&(coord, delay)| RouteSource { coord, delay })
            .collect();
        out.sort_by_key(|s| s.coord);
        out
    }

    fn touches(&self, bb: &BoundingBox) -> bool {
        self.chain()
            .flat_map(|p| p.nodes.iter())
            .any(|(c, _)| bb.contains(*c))
    }
}

/// One side of a split net, routed by a child partition node.
#[derive(Clone, Debug)]
pub struct VirtualNet {
    pub net: NetId,
    /// Parent box clipped to this side of the cutline.
    pub clipped_bb: BoundingBox,
    /// Sink indices of the parent net, ascending.
    pub sinks: Vec<usize>,
    pub depth: usize,
    pub slot: usize,
    pub prefix: Arc<PartialRoute>,
}

impl VirtualNet {
    /// Sinks not yet reached by the prefix chain.
    pub fn remaining_sinks(&self) -> Vec<usize> {
        self.sinks
            .iter()
            .copied()
            .filter(|&s| !self.prefix.is_reached(s))
            .collect()
    }
}

pub fn child_slots(slot: usize) -> (usize, usize) {
    (2 * slot + 1, 2 * slot + 2)
}

/// Splits `sinks` by the side of the cutline their location falls on.
pub fn split_sinks(net: &NetData, sinks: &[usize], axis: Axis, pos: u32) -> (Vec<usize>, Vec<usize>) {
    sinks
        .iter()
        .copied()
        .partition(|&s| Side::of(net.sinks[s].along(axis), pos) == Side::Left)
}

/// Whether the cutline separates at least one sink from another.
pub fn sinks_on_both_sides(net: &NetData, sinks: &[usize], axis: Axis, pos: u32) -> bool {
    let mut left = false;
    let mut right = false;
    for &s in sinks {
        match Side::of(net.sinks[s].along(axis), pos) {
            Side::Left => left = true,
            Side::Right => right = true,
        }
        if left && right {
            return true;
        }
    }
    false
}

/// Builds the left and right pieces of a piece that was split after its
/// sample routed successfully.
pub fn bisect(
    net: &NetData,
    id: NetId,
    bbox: &BoundingBox,
    sinks: &[usize],
    axis: Axis,
    pos: u32,
    depth: usize,
    prefix: Arc<PartialRoute>,
) -> Option<(VirtualNet, VirtualNet)> {
    let (ls, rs) = split_sinks(net, sinks, axis, pos);
    if ls.is_empty() || rs.is_empty() {
        return None;
    }
    let lb = bbox.clip_to_side(axis, pos, Side::Left)?;
    let rb = bbox.clip_to_side(axis, pos, Side::Right)?;
    let (lslot, rslot) = child_slots(prefix.slot);
    let make = |clipped_bb, sinks, slot| VirtualNet {
        net: id,
        clipped_bb,
        sinks,
        depth: depth + 1,
        slot,
        prefix: Arc::clone(&prefix),
    };
    Some((make(lb, ls, lslot), make(rb, rs, rslot)))
}

/// Sinks to route before a split at `pos`.
///
/// `unreached` are the candidate sinks (ascending), `known_hard` sinks that
/// failed in earlier splits. The sample holds known-hard sinks, sinks next to
/// the cutline, every sink of a side that is too small or too thin to be
/// routed on its own, and for each side the existing route does not reach
/// yet, the sink closest to the cutline.
pub fn select_sample(
    net: &NetData,
    bbox: &BoundingBox,
    unreached: &[usize],
    known_hard: &BTreeSet<usize>,
    axis: Axis,
    pos: u32,
    prefix: Option<&PartialRoute>,
    cfg: &DecompositionConfig,
) -> Vec<usize> {
    let mut sample: BTreeSet<usize> = unreached
        .iter()
        .copied()
        .filter(|s| known_hard.contains(s))
        .collect();

    let near_cut = |s: usize| {
        let v = net.sinks[s].along(axis);
        v + 1 >= pos && v <= pos + 1
    };
    sample.extend(unreached.iter().copied().filter(|&s| near_cut(s)));

    for side in [Side::Left, Side::Right] {
        let Some(side_bb) = bbox.clip_to_side(axis, pos, side) else {
            continue;
        };
        let on_side: Vec<usize> = unreached
            .iter()
            .copied()
            .filter(|&s| Side::of(net.sinks[s].along(axis), pos) == side)
            .collect();
        let far = on_side.iter().filter(|&&s| !near_cut(s)).count();
        let thin = side_bb.width() < cfg.min_side_width || side_bb.height() < cfg.min_side_width;
        if far <= cfg.reduction_min_sinks || thin {
            sample.extend(on_side.iter().copied());
        }

        let reached_by_route = match prefix {
            Some(p) => p.touches(&side_bb),
            None => side_bb.contains(net.driver),
        };
        let sampled = on_side.iter().any(|s| sample.contains(s));
        if !reached_by_route && !sampled {
            let anchor = on_side.iter().copied().min_by_key(|&s| {
                let v = net.sinks[s].along(axis);
                (v.abs_diff(pos), s)
            });
            sample.extend(anchor);
        }
    }
    sample.into_iter().collect()
}
