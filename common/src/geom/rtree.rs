use super::bbox::BoundingBox;
use rstar::{AABB, RTree};

pub struct SpatialIndex {
    tree: RTree<IndexedBox>,
}

struct IndexedBox {
    bbox: BoundingBox,
    id: usize,
}

fn envelope_of(bb: &BoundingBox) -> AABB<[i64; 2]> {
    AABB::from_corners(
        [bb.xmin as i64, bb.ymin as i64],
        [bb.xmax as i64, bb.ymax as i64],
    )
}

impl rstar::RTreeObject for IndexedBox {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        envelope_of(&self.bbox)
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn insert(&mut self, bbox: BoundingBox, id: usize) {
        self.tree.insert(IndexedBox { bbox, id });
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids of every stored box sharing at least one grid cell with `bbox`.
    pub fn query(&self, bbox: BoundingBox) -> Vec<usize> {
        let mut ids: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope_of(&bbox))
            .map(|item| item.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_cells_count_as_intersecting() {
        let mut index = SpatialIndex::new();
        index.insert(BoundingBox::new(0, 5, 0, 5), 0);
        index.insert(BoundingBox::new(6, 9, 0, 5), 1);
        index.insert(BoundingBox::new(5, 7, 5, 9), 2);

        assert_eq!(index.query(BoundingBox::new(5, 5, 0, 0)), vec![0]);
        assert_eq!(index.query(BoundingBox::new(5, 6, 5, 5)), vec![0, 1, 2]);
        assert!(index.query(BoundingBox::new(10, 12, 10, 12)).is_empty());
        assert_eq!(index.len(), 3);
    }
}
