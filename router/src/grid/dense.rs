use super::RoutingGrid;
use super::region::RegionToken;
use eda_common::db::core::NetlistDB;
use eda_common::geom::coord::GridCoord;
use std::sync::atomic::{AtomicU16, Ordering};

// One history unit is worth this much base cost.
const HISTORY_SCALE: f64 = 0.1;

struct GridNode {
    occupancy: AtomicU16,
    history: u16, // Quantized accumulated congestion
}

impl Default for GridNode {
    fn default() -> Self {
        Self {
            occupancy: AtomicU16::new(0),
            history: 0,
        }
    }
}

/// Dense 3-D occupancy/congestion map.
///
/// Occupancy counters are atomics so that workers holding disjoint
/// [`RegionToken`]s can commit routes through a shared reference. Everything
/// else (history, capacities, obstacles) only changes through `&mut self`,
/// i.e. between routing iterations.
pub struct DenseGrid {
    width: u32,
    height: u32,
    layers: u8,
    nodes: Vec<GridNode>,
    obstacles: Vec<bool>,
    capacities: Vec<u32>,
    epoch: u64,
}

impl DenseGrid {
    pub fn new(width: u32, height: u32, layers: u8, default_capacity: u32) -> Self {
        let size = (width as usize) * (height as usize) * (layers as usize);

        if size > 2_000_000_000 {
            log::warn!(
                "Allocating large DenseGrid: {} elements. Ensure sufficient RAM.",
                size
            );
        }

        let mut nodes = Vec::with_capacity(size);
        nodes.resize_with(size, GridNode::default);

        Self {
            width,
            height,
            layers,
            nodes,
            obstacles: vec![false; size],
            capacities: vec![default_capacity; layers as usize],
            epoch: 0,
        }
    }

    pub fn from_netlist(db: &NetlistDB, default_capacity: u32) -> Self {
        let mut grid = Self::new(db.width, db.height, db.layers, default_capacity);
        for &c in &db.obstacles {
            grid.set_obstacle(c);
        }
        // Terminals must stay reachable.
        for net in &db.nets {
            grid.clear_obstacle(net.driver);
            for &s in &net.sinks {
                grid.clear_obstacle(s);
            }
        }
        grid
    }

    #[inline(always)]
    fn index(&self, coord: GridCoord) -> usize {
        (coord.z as usize) * (self.width as usize) * (self.height as usize)
            + (coord.y as usize) * (self.width as usize)
            + (coord.x as usize)
    }

    #[inline(always)]
    fn get_layer_from_index(&self, idx: usize) -> usize {
        idx / ((self.width as usize) * (self.height as usize))
    }

    #[inline(always)]
    fn coord_from_index(&self, idx: usize) -> GridCoord {
        let plane = (self.width as usize) * (self.height as usize);
        let rem = idx % plane;
        GridCoord::new(
            (rem % self.width as usize) as u32,
            (rem / self.width as usize) as u32,
            (idx / plane) as u8,
        )
    }

    pub fn set_obstacle(&mut self, coord: GridCoord) {
        let idx = self.index(coord);
        self.obstacles[idx] = true;
    }

    pub fn clear_obstacle(&mut self, coord: GridCoord) {
        let idx = self.index(coord);
        self.obstacles[idx] = false;
    }

    /// Starts a new write epoch and hands out the token for the whole device.
    ///
    /// Requires exclusive access, so no token of an earlier epoch can still
    /// be in use by another thread. Tokens of earlier epochs are rejected.
    pub fn begin_epoch(&mut self) -> RegionToken {
        self.epoch += 1;
        RegionToken::root(self.device_bbox(), self.epoch)
    }

    #[inline(always)]
    fn check_token(&self, token: &RegionToken, coord: GridCoord) {
        assert_eq!(
            token.epoch(),
            self.epoch,
            "stale region token used for {:?}",
            coord
        );
        assert!(
            token.covers(coord),
            "write to {:?} outside token region {}",
            coord,
            token.region()
        );
    }

    pub fn add_wire(&self, token: &RegionToken, coord: GridCoord) {
        self.check_token(token, coord);
        let idx = self.index(coord);
        let prev = self.nodes[idx].occupancy.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev < u16::MAX, "occupancy overflow at {:?}", coord);
    }

    pub fn remove_wire(&self, token: &RegionToken, coord: GridCoord) {
        self.check_token(token, coord);
        let idx = self.index(coord);
        let prev = self.nodes[idx]
            .occupancy
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
        debug_assert!(prev.is_ok(), "occupancy underflow at {:?}", coord);
    }

    pub fn history(&self, coord: GridCoord) -> u16 {
        self.nodes[self.index(coord)].history
    }

    /// Accumulates history cost on every overused node.
    pub fn update_history(&mut self, acc_fac: f64) {
        for i in 0..self.nodes.len() {
            let layer = self.get_layer_from_index(i);
            let cap = self.capacities[layer];
            let node = &mut self.nodes[i];
            let occ = *node.occupancy.get_mut() as u32;

            if occ > cap {
                let overflow = (occ - cap) as f64;
                let inc = (overflow * acc_fac / HISTORY_SCALE).round().max(1.0) as u16;
                node.history = node.history.saturating_add(inc);
            }
        }
    }

    pub fn decay_history(&mut self, decay_factor: f64) {
        let factor = (decay_factor * 1024.0) as u32;
        for node in &mut self.nodes {
            if node.history > 0 {
                let h = (node.history as u32 * factor) >> 10;
                node.history = h as u16;
            }
        }
    }

    /// Clears every occupancy counter. History is kept.
    pub fn reset_occupancy(&mut self) {
        for node in &mut self.nodes {
            *node.occupancy.get_mut() = 0;
        }
    }

    pub fn overused_nodes(&self) -> Vec<GridCoord> {
        (0..self.nodes.len())
            .filter(|&i| {
                let cap = self.capacities[self.get_layer_from_index(i)];
                self.nodes[i].occupancy.load(Ordering::Relaxed) as u32 > cap
            })
            .map(|i| self.coord_from_index(i))
            .collect()
    }
}

impl RoutingGrid for DenseGrid {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn layers(&self) -> u8 {
        self.layers
    }

    fn is_obstacle(&self, coord: GridCoord) -> bool {
        if coord.x >= self.width || coord.y >= self.height || coord.z >= self.layers {
            return true;
        }
        self.obstacles[self.index(coord)]
    }

    #[inline(always)]
    fn occupancy(&self, coord: GridCoord) -> u32 {
        self.nodes[self.index(coord)].occupancy.load(Ordering::Relaxed) as u32
    }

    fn capacity(&self, coord: GridCoord) -> u32 {
        self.capacities[coord.z as usize]
    }

    #[inline(always)]
    fn get_cost(&self, coord: GridCoord, pres_fac: f64) -> f64 {
        let node = &self.nodes[self.index(coord)];
        let cap = self.capacities[coord.z as usize];
        let occ = node.occupancy.load(Ordering::Relaxed) as u32;

        let base_cost = 1.0 + node.history as f64 * HISTORY_SCALE;
        let present_cost = if occ + 1 > cap {
            1.0 + pres_fac * (occ + 1 - cap) as f64
        } else {
            1.0
        };
        base_cost * present_cost
    }

    fn total_overuse(&self) -> usize {
        let mut conflicts = 0;
        for i in 0..self.nodes.len() {
            let layer = self.get_layer_from_index(i);
            if self.nodes[i].occupancy.load(Ordering::Relaxed) as u32 > self.capacities[layer] {
                conflicts += 1;
            }
        }
        conflicts
    }

    fn max_occupancy(&self) -> u32 {
        self.nodes
            .iter()
            .map(|n| n.occupancy.load(Ordering::Relaxed) as u32)
            .max()
            .unwrap_or(0)
    }
}
