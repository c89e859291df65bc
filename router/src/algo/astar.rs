use crate::connection_router::{
    ConnectionRouter, NetRouteOutcome, NetRouteRequest, RouteSource, SinkPath, SinkTarget,
};
use crate::grid::RoutingGrid;
use eda_common::geom::bbox::BoundingBox;
use eda_common::geom::coord::GridCoord;
use eda_common::util::config::RouterConfig;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

const SCALE: f64 = 100.0;

#[derive(Copy, Clone, Eq, PartialEq)]
struct State {
    f_score: i64,
    g_score: i64,
    index: u32,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy)]
struct RoutingWindow {
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
    width: u32,
    height: u32,
    layers: u8,
}

impl RoutingWindow {
    fn new(bbox: BoundingBox, grid_w: u32, grid_h: u32, layers: u8) -> Self {
        let min_x = bbox.xmin;
        let max_x = bbox.xmax.min(grid_w - 1);
        let min_y = bbox.ymin;
        let max_y = bbox.ymax.min(grid_h - 1);
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
            layers,
        }
    }
    #[inline(always)]
    fn contains(&self, c: GridCoord) -> bool {
        c.x >= self.min_x
            && c.x <= self.max_x
            && c.y >= self.min_y
            && c.y <= self.max_y
            && c.z < self.layers
    }
    #[inline(always)]
    fn get_local_idx(&self, c: GridCoord) -> usize {
        let lx = c.x - self.min_x;
        let ly = c.y - self.min_y;
        let lz = c.z as u32;
        (lz * self.width * self.height + ly * self.width + lx) as usize
    }
    #[inline(always)]
    fn get_coord(&self, idx: u32) -> GridCoord {
        let plane_size = self.width * self.height;
        let z = (idx / plane_size) as u8;
        let rem = idx % plane_size;
        let y = rem / self.width + self.min_y;
        let x = rem % self.width + self.min_x;
        GridCoord::new(x, y, z)
    }
    fn size(&self) -> usize {
        (self.width * self.height * self.layers as u32) as usize
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AStarParams {
    pub astar_fac: f64,
    pub via_cost: f64,
    pub rcv_penalty: f64,
}

impl Default for AStarParams {
    fn default() -> Self {
        Self {
            astar_fac: 1.0,
            via_cost: 2.0,
            rcv_penalty: 1.0,
        }
    }
}

impl From<&RouterConfig> for AStarParams {
    fn from(cfg: &RouterConfig) -> Self {
        Self {
            astar_fac: cfg.astar_fac,
            via_cost: cfg.via_cost,
            rcv_penalty: cfg.rcv_penalty,
        }
    }
}

/// Maze router confined to the request's bounding box.
///
/// Sinks are routed one after another from the growing route tree. Step
/// cost blends congestion and delay by the sink's criticality:
/// `(1 - crit) * congestion + crit * delay`.
#[derive(Clone)]
pub struct AStar {
    params: AStarParams,
    parents: Vec<u32>,
    g_score: Vec<i64>,
    delay: Vec<u32>,
    visited_tag: Vec<u32>,
    current_tag: u32,
    capacity: usize,
}

impl AStar {
    pub fn new(params: AStarParams) -> Self {
        let cap = 4096;
        Self {
            params,
            parents: vec![u32::MAX; cap],
            g_score: vec![i64::MAX; cap],
            delay: vec![0; cap],
            visited_tag: vec![0; cap],
            current_tag: 1,
            capacity: cap,
        }
    }
    fn ensure_capacity(&mut self, size: usize) {
        if size > self.capacity {
            self.capacity = size.max(self.capacity * 2);
            self.parents.resize(self.capacity, u32::MAX);
            self.g_score.resize(self.capacity, i64::MAX);
            self.delay.resize(self.capacity, 0);
            self.visited_tag.resize(self.capacity, 0);
        }
    }
    fn reset_window(&mut self) {
        self.current_tag = self.current_tag.wrapping_add(1);
        if self.current_tag == 0 {
            self.visited_tag.fill(0);
            self.current_tag = 1;
        }
    }

    /// Cheapest path from any node of `tree` to `target`. Returns the new
    /// nodes (excluding the start) and the sink delay.
    fn find_path(
        &mut self,
        grid: &dyn RoutingGrid,
        window: &RoutingWindow,
        tree: &[RouteSource],
        target: &SinkTarget,
        pres_fac: f64,
        rcv_enabled: bool,
        expansions: &mut u64,
    ) -> Option<(Vec<GridCoord>, u32)> {
        self.reset_window();

        let crit = target.criticality.clamp(0.0, 1.0);
        let min_delay = if rcv_enabled { target.min_delay } else { None };
        let end = target.coord;
        let mut heap = BinaryHeap::new();

        for src in tree {
            let local = window.get_local_idx(src.coord);
            self.g_score[local] = 0;
            self.delay[local] = src.delay;
            self.visited_tag[local] = self.current_tag;
            self.parents[local] = u32::MAX;
            heap.push(State {
                f_score: (self.heuristic(src.coord, end) * SCALE) as i64,
                g_score: 0,
                index: local as u32,
            });
        }

        while let Some(State { g_score, index, .. }) = heap.pop() {
            let curr_local = index as usize;
            if g_score > self.g_score[curr_local] {
                continue;
            }
            let position = window.get_coord(index);
            if position == end {
                let path = self.reconstruct_path(end, window);
                return Some((path, self.delay[curr_local]));
            }
            *expansions += 1;

            let current_g = self.g_score[curr_local];
            let current_delay = self.delay[curr_local];
            let mut neighbors = [GridCoord { x: 0, y: 0, z: 0 }; 6];
            let mut n_count = 0;
            if position.x > window.min_x {
                neighbors[n_count] = GridCoord::new(position.x - 1, position.y, position.z);
                n_count += 1;
            }
            if position.x < window.max_x {
                neighbors[n_count] = GridCoord::new(position.x + 1, position.y, position.z);
                n_count += 1;
            }
            if position.y > window.min_y {
                neighbors[n_count] = GridCoord::new(position.x, position.y - 1, position.z);
                n_count += 1;
            }
            if position.y < window.max_y {
                neighbors[n_count] = GridCoord::new(position.x, position.y + 1, position.z);
                n_count += 1;
            }
            if position.z > 0 {
                neighbors[n_count] = GridCoord::new(position.x, position.y, position.z - 1);
                n_count += 1;
            }
            if position.z + 1 < window.layers {
                neighbors[n_count] = GridCoord::new(position.x, position.y, position.z + 1);
                n_count += 1;
            }

            for &neighbor in &neighbors[..n_count] {
                if neighbor != end && grid.is_obstacle(neighbor) {
                    continue;
                }

                let congestion = grid.get_cost(neighbor, pres_fac);
                let wire = if position.z != neighbor.z {
                    self.params.via_cost
                } else {
                    1.0
                };
                let mut step = (1.0 - crit) * congestion * wire + crit;
                let arrival = current_delay + 1;
                if neighbor == end {
                    if let Some(budget) = min_delay {
                        // Hold fixing: arriving early costs extra.
                        step += self.params.rcv_penalty * budget.saturating_sub(arrival) as f64;
                    }
                }

                let tentative_g = current_g + (step * SCALE) as i64;
                let neighbor_local = window.get_local_idx(neighbor);

                if self.visited_tag[neighbor_local] != self.current_tag
                    || tentative_g < self.g_score[neighbor_local]
                {
                    self.parents[neighbor_local] = curr_local as u32;
                    self.g_score[neighbor_local] = tentative_g;
                    self.delay[neighbor_local] = arrival;
                    self.visited_tag[neighbor_local] = self.current_tag;
                    let h = self.heuristic(neighbor, end);
                    heap.push(State {
                        f_score: tentative_g + (h * SCALE) as i64,
                        g_score: tentative_g,
                        index: neighbor_local as u32,
                    });
                }
            }
        }
        None
    }

    #[inline(always)]
    fn heuristic(&self, a: GridCoord, end: GridCoord) -> f64 {
        a.manhattan(end) as f64 * self.params.astar_fac
    }

    /// Path from the first non-source node to `end`.
    fn reconstruct_path(&self, end: GridCoord, window: &RoutingWindow) -> Vec<GridCoord> {
        let mut path = Vec::new();
        let mut curr_local = window.get_local_idx(end);
        loop {
            let parent = self.parents[curr_local];
            if parent == u32::MAX {
                break;
            }
            path.push(window.get_coord(curr_local as u32));
            curr_local = parent as usize;
        }
        path.reverse();
        path
    }
}

impl Default for AStar {
    fn default() -> Self {
        Self::new(AStarParams::default())
    }
}

impl ConnectionRouter for AStar {
    fn route_net(&mut self, grid: &dyn RoutingGrid, req: &NetRouteRequest<'_>) -> NetRouteOutcome {
        let mut outcome = NetRouteOutcome::default();
        let window = RoutingWindow::new(req.bbox, grid.width(), grid.height(), grid.layers());
        self.ensure_capacity(window.size());

        let mut tree: Vec<RouteSource> = req
            .sources
            .iter()
            .copied()
            .filter(|s| window.contains(s.coord))
            .collect();
        let mut in_tree: HashMap<GridCoord, u32> =
            tree.iter().map(|s| (s.coord, s.delay)).collect();

        for target in req.sinks {
            if let Some(&delay) = in_tree.get(&target.coord) {
                outcome.paths.push(SinkPath {
                    sink: target.index,
                    nodes: Vec::new(),
                    delay,
                });
                continue;
            }
            if tree.is_empty() || !window.contains(target.coord) {
                outcome.failed_sink = Some(target.index);
                break;
            }

            match self.find_path(
                grid,
                &window,
                &tree,
                target,
                req.pres_fac,
                req.rcv_enabled,
                &mut outcome.expansions,
            ) {
                Some((nodes, delay)) => {
                    let path = SinkPath {
                        sink: target.index,
                        nodes,
                        delay,
                    };
                    for (coord, d) in path.nodes_with_delay() {
                        tree.push(RouteSource { coord, delay: d });
                        in_tree.insert(coord, d);
                    }
                    outcome.paths.push(path);
                }
                None => {
                    log::trace!(
                        "{:?}: sink {} at {:?} unreachable inside {}",
                        req.net,
                        target.index,
                        target.coord,
                        req.bbox
                    );
                    outcome.failed_sink = Some(target.index);
                    break;
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DenseGrid;
    use eda_common::db::indices::NetId;

    fn sink(index: usize, x: u32, y: u32) -> SinkTarget {
        SinkTarget {
            index,
            coord: GridCoord::new(x, y, 0),
            criticality: 0.0,
            min_delay: None,
        }
    }

    fn request<'a>(
        sources: &'a [RouteSource],
        sinks: &'a [SinkTarget],
        bbox: BoundingBox,
    ) -> NetRouteRequest<'a> {
        NetRouteRequest {
            net: NetId(0),
            sources,
            sinks,
            bbox,
            pres_fac: 1.0,
            rcv_enabled: false,
        }
    }

    #[test]
    fn straight_connection_has_manhattan_length() {
        let grid = DenseGrid::new(10, 10, 2, 1);
        let sources = [RouteSource {
            coord: GridCoord::new(1, 1, 0),
            delay: 0,
        }];
        let sinks = [sink(0, 6, 1)];
        let mut astar = AStar::default();
        let out = astar.route_net(&grid, &request(&sources, &sinks, grid.device_bbox()));
        assert!(out.is_success());
        assert_eq!(out.paths[0].nodes.len(), 5);
        assert_eq!(out.paths[0].delay, 5);
        assert_eq!(*out.paths[0].nodes.last().unwrap(), GridCoord::new(6, 1, 0));
    }

    #[test]
    fn second_sink_branches_from_tree() {
        let grid = DenseGrid::new(10, 10, 1, 1);
        let sources = [RouteSource {
            coord: GridCoord::new(0, 0, 0),
            delay: 0,
        }];
        let sinks = [sink(0, 5, 0), sink(1, 5, 2)];
        let mut astar = AStar::default();
        let out = astar.route_net(&grid, &request(&sources, &sinks, grid.device_bbox()));
        assert!(out.is_success());
        assert_eq!(out.paths[1].nodes.len(), 2);
        assert_eq!(out.paths[1].delay, 7);
    }

    #[test]
    fn blocked_sink_fails_and_reports_it() {
        let mut grid = DenseGrid::new(6, 6, 1, 1);
        for y in 0..6 {
            grid.set_obstacle(GridCoord::new(3, y, 0));
        }
        let sources = [RouteSource {
            coord: GridCoord::new(0, 0, 0),
            delay: 0,
        }];
        let sinks = [sink(0, 2, 5), sink(1, 5, 5)];
        let mut astar = AStar::default();
        let out = astar.route_net(&grid, &request(&sources, &sinks, grid.device_bbox()));
        assert_eq!(out.failed_sink, Some(1));
        assert_eq!(out.paths.len(), 1);
    }

    #[test]
    fn search_stays_inside_bbox() {
        let mut grid = DenseGrid::new(8, 8, 1, 1);
        // Wall with a gap at y = 7, outside the box.
        for y in 0..7 {
            grid.set_obstacle(GridCoord::new(4, y, 0));
        }
        let sources = [RouteSource {
            coord: GridCoord::new(1, 1, 0),
            delay: 0,
        }];
        let sinks = [sink(0, 6, 1)];
        let mut astar = AStar::default();
        let boxed = astar.route_net(&grid, &request(&sources, &sinks, BoundingBox::new(0, 7, 0, 5)));
        assert!(!boxed.is_success());
        let full = astar.route_net(&grid, &request(&sources, &sinks, grid.device_bbox()));
        assert!(full.is_success());
        assert!(full.paths[0].nodes.iter().any(|c| c.y == 7));
    }

    #[test]
    fn congestion_steers_around_occupied_nodes() {
        let mut grid = DenseGrid::new(8, 3, 1, 1);
        let token = grid.begin_epoch();
        for x in 2..6 {
            grid.add_wire(&token, GridCoord::new(x, 1, 0));
        }
        let sources = [RouteSource {
            coord: GridCoord::new(0, 1, 0),
            delay: 0,
        }];
        let sinks = [sink(0, 7, 1)];
        let mut astar = AStar::default();
        let mut req = request(&sources, &sinks, grid.device_bbox());
        req.pres_fac = 100.0;
        let out = astar.route_net(&grid, &req);
        assert!(out.is_success());
        assert!(out.paths[0].nodes.iter().all(|c| c.y != 1 || c.x < 2 || c.x > 5));
    }

    #[test]
    fn hold_fixing_lengthens_short_connection() {
        let grid = DenseGrid::new(12, 12, 1, 1);
        let sources = [RouteSource {
            coord: GridCoord::new(5, 5, 0),
            delay: 0,
        }];
        let mut target = sink(0, 7, 5);
        target.min_delay = Some(6);
        let sinks = [target];
        let mut astar = AStar::new(AStarParams {
            rcv_penalty: 10.0,
            ..AStarParams::default()
        });

        let mut req = request(&sources, &sinks, grid.device_bbox());
        let plain = astar.route_net(&grid, &req);
        assert_eq!(plain.paths[0].delay, 2);

        req.rcv_enabled = true;
        let fixed = astar.route_net(&grid, &req);
        assert!(fixed.is_success());
        assert!(fixed.paths[0].delay >= 6, "delay {}", fixed.paths[0].delay);
    }
}
