//! Recursive bisection of the device into regions whose nets can be routed
//! independently.
//!
//! Every node owns the nets whose routing boxes lie inside its region and
//! cross its cutline. Nets that fall entirely on one side live in the
//! corresponding subtree, so two sibling subtrees never touch the same grid
//! location.

use eda_common::db::indices::NetId;
use eda_common::define_index;
use eda_common::geom::bbox::{Axis, BoundingBox, Side};
use eda_common::util::config::PartitionConfig;

define_index!(NodeId);

/// Split position: left gets `[min, pos]`, right gets `[pos + 1, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cutline {
    pub axis: Axis,
    pub pos: u32,
}

#[derive(Clone, Debug)]
pub struct PartitionTreeNode {
    nets: Vec<NetId>,
    region: BoundingBox,
    cutline: Option<Cutline>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    depth: usize,
}

impl PartitionTreeNode {
    /// Ordered by sink count descending, then id.
    pub fn nets(&self) -> &[NetId] {
        &self.nets
    }
    pub fn region(&self) -> BoundingBox {
        self.region
    }
    pub fn cutline(&self) -> Option<Cutline> {
        self.cutline
    }
    pub fn left(&self) -> Option<NodeId> {
        self.left
    }
    pub fn right(&self) -> Option<NodeId> {
        self.right
    }
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        self.left.zip(self.right)
    }
    pub fn depth(&self) -> usize {
        self.depth
    }
    pub fn is_leaf(&self) -> bool {
        self.cutline.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct PartitionTree {
    nodes: Vec<PartitionTreeNode>,
    device: BoundingBox,
    cfg: PartitionConfig,
    // Node holding each net, None for nets that are not routed.
    home: Vec<Option<NodeId>>,
    weights: Vec<usize>,
}

impl PartitionTree {
    /// Builds the tree over `bboxes`, indexed by net id.
    ///
    /// `weights` is the sink count of every net; nets of weight 0 have
    /// nothing to route and are left out.
    pub fn build(
        device: BoundingBox,
        bboxes: &[BoundingBox],
        weights: &[usize],
        cfg: &PartitionConfig,
    ) -> Self {
        debug_assert_eq!(bboxes.len(), weights.len());
        let mut tree = Self {
            nodes: Vec::new(),
            device,
            cfg: cfg.clone(),
            home: vec![None; bboxes.len()],
            weights: weights.to_vec(),
        };
        let nets: Vec<NetId> = (0..bboxes.len())
            .filter(|&i| weights[i] > 0)
            .map(NetId::new)
            .collect();
        tree.build_node(device, nets, bboxes, 0);
        log::debug!(
            "Partition tree: {} nodes, depth {}, {} nets",
            tree.nodes.len(),
            tree.max_depth(),
            tree.num_nets()
        );
        tree
    }

    fn build_node(
        &mut self,
        region: BoundingBox,
        mut nets: Vec<NetId>,
        bboxes: &[BoundingBox],
        depth: usize,
    ) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(PartitionTreeNode {
            nets: Vec::new(),
            region,
            cutline: None,
            left: None,
            right: None,
            depth,
        });

        let cut = if nets.len() >= self.cfg.min_nets_to_split {
            self.choose_cutline(region, &nets, bboxes)
        } else {
            None
        };

        if let Some(cut) = cut {
            let mut own = Vec::new();
            let mut left = Vec::new();
            let mut right = Vec::new();
            for net in nets.drain(..) {
                match bboxes[net.index()].side_of_cutline(cut.axis, cut.pos) {
                    Some(Side::Left) => left.push(net),
                    Some(Side::Right) => right.push(net),
                    None => own.push(net),
                }
            }
            nets = own;
            // Both halves exist because the cutline lies strictly inside the region.
            let (Some(lr), Some(rr)) = (
                region.clip_to_side(cut.axis, cut.pos, Side::Left),
                region.clip_to_side(cut.axis, cut.pos, Side::Right),
            ) else {
                unreachable!("cutline outside its region")
            };
            let l = self.build_node(lr, left, bboxes, depth + 1);
            let r = self.build_node(rr, right, bboxes, depth + 1);
            let node = &mut self.nodes[id.index()];
            node.cutline = Some(cut);
            node.left = Some(l);
            node.right = Some(r);
        }

        self.sort_nets(&mut nets);
        for &net in &nets {
            self.home[net.index()] = Some(id);
        }
        self.nodes[id.index()].nets = nets;
        id
    }

    fn sort_nets(&self, nets: &mut [NetId]) {
        let weights = &self.weights;
        nets.sort_by(|a, b| {
            weights[b.index()]
                .cmp(&weights[a.index()])
                .then_with(|| a.cmp(b))
        });
    }

    /// Cutline minimizing `crossing + max(left, right)` weight. The larger
    /// extent is tried first. None if no position beats keeping every net here.
    fn choose_cutline(
        &self,
        region: BoundingBox,
        nets: &[NetId],
        bboxes: &[BoundingBox],
    ) -> Option<Cutline> {
        let total: usize = nets.iter().map(|n| self.weights[n.index()]).sum();
        let first = region.larger_axis();
        for axis in [first, first.other()] {
            if let Some((pos, cost)) = self.best_position(region, axis, nets, bboxes)
                && cost < total
            {
                return Some(Cutline { axis, pos });
            }
        }
        None
    }

    fn best_position(
        &self,
        region: BoundingBox,
        axis: Axis,
        nets: &[NetId],
        bboxes: &[BoundingBox],
    ) -> Option<(u32, usize)> {
        let extent = region.extent(axis) as usize;
        if extent < 2 {
            return None;
        }
        let base = region.min_along(axis);
        // Weight of nets ending at / starting at each offset.
        let mut ends = vec![0usize; extent];
        let mut starts = vec![0usize; extent];
        let mut total = 0;
        for net in nets {
            let bb = &bboxes[net.index()];
            let w = self.weights[net.index()];
            ends[(bb.max_along(axis) - base) as usize] += w;
            starts[(bb.min_along(axis) - base) as usize] += w;
            total += w;
        }

        let mut best: Option<(u32, usize)> = None;
        let mut left_w = 0;
        let mut started = 0;
        for off in 0..extent - 1 {
            left_w += ends[off];
            started += starts[off];
            let right_w = total - started;
            let crossing = total - left_w - right_w;
            let cost = crossing + left_w.max(right_w);
            if best.is_none_or(|(_, c)| cost < c) {
                best = Some((base + off as u32, cost));
            }
        }
        best
    }

    /// Refreshes the tree after the boxes of `changed` nets moved.
    ///
    /// Small change sets are reinserted from the root; above
    /// `rebuild_fraction` of all nets the tree is rebuilt.
    pub fn update(&mut self, changed: &[NetId], bboxes: &[BoundingBox], weights: &[usize]) {
        if changed.is_empty() {
            return;
        }
        let limit = self.cfg.rebuild_fraction * self.weights.len() as f64;
        if changed.len() as f64 > limit || weights.len() != self.weights.len() {
            log::debug!("Rebuilding partition tree for {} changed nets", changed.len());
            *self = Self::build(self.device, bboxes, weights, &self.cfg);
            return;
        }

        self.weights = weights.to_vec();
        for &net in changed {
            if let Some(old) = self.home[net.index()].take() {
                self.nodes[old.index()].nets.retain(|&n| n != net);
            }
            if self.weights[net.index()] == 0 {
                continue;
            }
            let target = self.descend(&bboxes[net.index()]);
            let mut nets = std::mem::take(&mut self.nodes[target.index()].nets);
            nets.push(net);
            self.sort_nets(&mut nets);
            self.nodes[target.index()].nets = nets;
            self.home[net.index()] = Some(target);
        }
    }

    fn descend(&self, bb: &BoundingBox) -> NodeId {
        let mut id = self.root();
        loop {
            let node = &self.nodes[id.index()];
            let next = match (node.cutline, node.children()) {
                (Some(cut), Some((l, r))) => match bb.side_of_cutline(cut.axis, cut.pos) {
                    Some(Side::Left) => Some(l),
                    Some(Side::Right) => Some(r),
                    None => None,
                },
                _ => None,
            };
            match next {
                Some(child) => id = child,
                None => return id,
            }
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &PartitionTreeNode {
        &self.nodes[id.index()]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_nets(&self) -> usize {
        self.nodes.iter().map(|n| n.nets.len()).sum()
    }

    pub fn home(&self, net: NetId) -> Option<NodeId> {
        self.home.get(net.index()).copied().flatten()
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Depth-first pre-order: every node before its descendants, left before right.
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some((l, r)) = self.node(id).children() {
                stack.push(r);
                stack.push(l);
            }
        }
        out
    }

    /// Nets of `id` and all of its descendants.
    pub fn subtree_nets(&self, id: NodeId) -> Vec<NetId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let node = self.node(n);
            out.extend_from_slice(&node.nets);
            if let Some((l, r)) = node.children() {
                stack.push(r);
                stack.push(l);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn tree_of(device: BoundingBox, boxes: &[BoundingBox]) -> PartitionTree {
        let weights = vec![1; boxes.len()];
        PartitionTree::build(device, boxes, &weights, &PartitionConfig::default())
    }

    fn assert_sound(tree: &PartitionTree, boxes: &[BoundingBox]) {
        for id in tree.pre_order() {
            let node = tree.node(id);
            for &net in node.nets() {
                let bb = boxes[net.index()];
                assert!(node.region().contains_box(&bb), "{} outside {}", bb, node.region());
                if let Some(cut) = node.cutline() {
                    assert!(bb.crosses_cutline(cut.axis, cut.pos));
                }
                assert_eq!(tree.home(net), Some(id));
            }
        }
    }

    #[test]
    fn disjoint_nets_end_up_in_sibling_leaves() {
        let device = BoundingBox::device(32, 32);
        let boxes = [
            BoundingBox::new(0, 31, 0, 31),
            BoundingBox::new(2, 10, 4, 12),
            BoundingBox::new(20, 28, 4, 12),
        ];
        let tree = tree_of(device, &boxes);
        let root = tree.node(tree.root());
        assert_eq!(root.nets(), &[NetId(0)]);
        let cut = root.cutline().unwrap();
        assert_eq!(cut.axis, Axis::X);
        assert!((10..20).contains(&cut.pos));

        let (l, r) = root.children().unwrap();
        assert_eq!(tree.subtree_nets(l), vec![NetId(1)]);
        assert_eq!(tree.subtree_nets(r), vec![NetId(2)]);
        assert_sound(&tree, &boxes);
    }

    #[test]
    fn single_net_is_a_leaf() {
        let device = BoundingBox::device(16, 16);
        let boxes = [BoundingBox::new(1, 3, 1, 3)];
        let tree = tree_of(device, &boxes);
        assert_eq!(tree.num_nodes(), 1);
        assert!(tree.node(tree.root()).is_leaf());
    }

    #[test]
    fn zero_weight_nets_are_skipped() {
        let device = BoundingBox::device(16, 16);
        let boxes = [BoundingBox::new(1, 3, 1, 3), BoundingBox::new(5, 6, 5, 6)];
        let tree = PartitionTree::build(device, &boxes, &[2, 0], &PartitionConfig::default());
        assert_eq!(tree.num_nets(), 1);
        assert_eq!(tree.home(NetId(1)), None);
    }

    #[test]
    fn node_nets_are_ordered_by_fanout() {
        let device = BoundingBox::device(16, 16);
        let boxes = vec![BoundingBox::new(0, 15, 0, 15); 4];
        let tree = PartitionTree::build(device, &boxes, &[1, 5, 3, 5], &PartitionConfig::default());
        assert_eq!(
            tree.node(tree.root()).nets(),
            &[NetId(1), NetId(3), NetId(2), NetId(0)]
        );
    }

    #[test]
    fn random_boxes_respect_region_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let device = BoundingBox::device(64, 48);
        let boxes: Vec<BoundingBox> = (0..300)
            .map(|_| {
                let x = rng.gen_range(0..64);
                let y = rng.gen_range(0..48);
                let w = rng.gen_range(0..12);
                let h = rng.gen_range(0..12);
                BoundingBox::new(x, (x + w).min(63), y, (y + h).min(47))
            })
            .collect();
        let tree = tree_of(device, &boxes);
        assert_eq!(tree.num_nets(), boxes.len());
        assert!(tree.max_depth() > 2);
        assert_sound(&tree, &boxes);
    }

    #[test]
    fn incremental_update_moves_grown_net_up() {
        let device = BoundingBox::device(32, 32);
        let mut boxes = vec![
            BoundingBox::new(0, 31, 0, 31),
            BoundingBox::new(2, 10, 4, 12),
            BoundingBox::new(20, 28, 4, 12),
            BoundingBox::new(2, 8, 20, 28),
            BoundingBox::new(22, 28, 20, 28),
        ];
        let weights = vec![1; boxes.len()];
        let cfg = PartitionConfig {
            rebuild_fraction: 0.5,
            ..PartitionConfig::default()
        };
        let mut tree = PartitionTree::build(device, &boxes, &weights, &cfg);
        let before = tree.num_nodes();
        assert_ne!(tree.home(NetId(1)), Some(tree.root()));

        boxes[1] = device;
        tree.update(&[NetId(1)], &boxes, &weights);
        assert_eq!(tree.num_nodes(), before);
        assert_eq!(tree.home(NetId(1)), Some(tree.root()));
        assert_eq!(tree.node(tree.root()).nets(), &[NetId(0), NetId(1)]);
        assert_sound(&tree, &boxes);
    }

    #[test]
    fn large_update_rebuilds() {
        let device = BoundingBox::device(32, 32);
        let mut boxes = vec![
            BoundingBox::new(2, 10, 4, 12),
            BoundingBox::new(20, 28, 4, 12),
        ];
        let weights = vec![1; boxes.len()];
        let mut tree = PartitionTree::build(device, &boxes, &weights, &PartitionConfig::default());
        assert!(tree.num_nodes() > 1);

        boxes[0] = device;
        boxes[1] = device;
        tree.update(&[NetId(0), NetId(1)], &boxes, &weights);
        assert_eq!(tree.num_nodes(), 1);
        assert_sound(&tree, &boxes);
    }

    #[test]
    fn pre_order_visits_parents_first() {
        let mut rng = StdRng::seed_from_u64(3);
        let device = BoundingBox::device(40, 40);
        let boxes: Vec<BoundingBox> = (0..80)
            .map(|_| {
                let x = rng.gen_range(0..36);
                let y = rng.gen_range(0..36);
                BoundingBox::new(x, x + 3, y, y + 3)
            })
            .collect();
        let tree = tree_of(device, &boxes);
        let order = tree.pre_order();
        assert_eq!(order.len(), tree.num_nodes());
        let mut seen = vec![false; tree.num_nodes()];
        for id in order {
            if id != tree.root() {
                let parent_seen = (0..tree.num_nodes()).any(|p| {
                    seen[p] && tree.node(NodeId::new(p)).children().is_some_and(|(l, r)| l == id || r == id)
                });
                assert!(parent_seen);
            }
            seen[id.index()] = true;
        }
    }
}
