use crate::partition_tree::PartitionTree;
use eda_common::db::core::NetRoute;
use eda_common::geom::bbox::BoundingBox;
use eda_common::geom::coord::GridCoord;
use eda_common::geom::rtree::SpatialIndex;
use std::collections::HashSet;

/// Checks the geometric independence the parallel strategies rely on.
///
/// Every net must sit inside its node's region and cross the node's cutline,
/// the boxes of two sibling subtrees must not overlap, and no grid location
/// may be claimed from both sides of any cutline.
pub fn verify_partition(
    tree: &PartitionTree,
    bboxes: &[BoundingBox],
    routes: &[NetRoute],
) -> Result<(), String> {
    for id in tree.pre_order() {
        let node = tree.node(id);
        for &net in node.nets() {
            let bb = bboxes[net.index()];
            if !node.region().contains_box(&bb) {
                return Err(format!("{} box {} leaves node region {}", net, bb, node.region()));
            }
            if let Some(cut) = node.cutline()
                && !bb.crosses_cutline(cut.axis, cut.pos)
            {
                return Err(format!("{} box {} does not cross the cutline of {:?}", net, bb, id));
            }
            if let Some(r) = routes.get(net.index())
                && let Some(c) = r.nodes.iter().find(|&&c| !bb.contains(c))
            {
                return Err(format!("{} claims {:?} outside its box {}", net, c, bb));
            }
        }

        let Some((l, r)) = node.children() else {
            continue;
        };
        let left = tree.subtree_nets(l);
        let right = tree.subtree_nets(r);

        let mut index = SpatialIndex::new();
        for &net in &left {
            index.insert(bboxes[net.index()], net.index());
        }
        for &net in &right {
            if let Some(&other) = index.query(bboxes[net.index()]).first() {
                return Err(format!(
                    "siblings under {:?} overlap: net {} and {}",
                    id,
                    other,
                    net.index()
                ));
            }
        }

        let claimed: HashSet<GridCoord> = left
            .iter()
            .filter_map(|n| routes.get(n.index()))
            .flat_map(|r| r.nodes.iter().copied())
            .collect();
        for &net in &right {
            if let Some(route) = routes.get(net.index())
                && let Some(c) = route.nodes.iter().find(|&&c| claimed.contains(&c))
            {
                return Err(format!("{:?} claimed on both sides of {:?}", c, id));
            }
        }
    }
    Ok(())
}
