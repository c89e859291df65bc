use crate::db::core::{NetRoute, NetlistDB};
use crate::geom::coord::GridCoord;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Verifies that every routed net reaches all of its sinks through a
/// connected tree rooted at its driver, inside the device and off obstacles.
pub fn run(db: &NetlistDB, routes: &[NetRoute]) -> Result<(), String> {
    log::info!("Starting Routing Verification...");
    if routes.len() != db.num_nets() {
        return Err(format!(
            "{} routes for {} nets",
            routes.len(),
            db.num_nets()
        ));
    }

    let obstacles: HashSet<GridCoord> = db.obstacles.iter().copied().collect();
    let valid = AtomicBool::new(true);
    let first_error: Mutex<Option<String>> = Mutex::new(None);

    db.nets.par_iter().enumerate().for_each(|(i, net)| {
        if net.sinks.is_empty() {
            return;
        }
        if let Err(msg) = check_net(db, &obstacles, net.driver, &net.sinks, &routes[i]) {
            log::error!("FAIL: Net '{}': {}", net.name, msg);
            valid.store(false, Ordering::Relaxed);
            let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(format!("net '{}': {}", net.name, msg));
            }
        }
    });

    if valid.load(Ordering::Relaxed) {
        log::info!("Routing Verification Passed.");
        Ok(())
    } else {
        let msg = first_error
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_default();
        Err(msg)
    }
}

fn check_net(
    db: &NetlistDB,
    obstacles: &HashSet<GridCoord>,
    driver: GridCoord,
    sinks: &[GridCoord],
    route: &NetRoute,
) -> Result<(), String> {
    if route.nodes.first() != Some(&driver) {
        return Err("route does not start at the driver".to_string());
    }
    let mut nodes = HashSet::with_capacity(route.nodes.len());
    for &c in &route.nodes {
        if c.x >= db.width || c.y >= db.height || c.z >= db.layers {
            return Err(format!("node {:?} outside the device", c));
        }
        if obstacles.contains(&c) {
            return Err(format!("node {:?} is an obstacle", c));
        }
        if !nodes.insert(c) {
            return Err(format!("node {:?} claimed twice", c));
        }
    }
    for (k, s) in sinks.iter().enumerate() {
        if !nodes.contains(s) {
            return Err(format!("sink {} at {:?} not reached", k, s));
        }
        if route.sink_delays.get(k).copied().flatten().is_none() {
            return Err(format!("sink {} has no delay", k));
        }
    }

    let mut seen = HashSet::with_capacity(nodes.len());
    let mut queue = VecDeque::new();
    seen.insert(driver);
    queue.push_back(driver);
    while let Some(c) = queue.pop_front() {
        for n in neighbors(c) {
            if nodes.contains(&n) && seen.insert(n) {
                queue.push_back(n);
            }
        }
    }
    if seen.len() != nodes.len() {
        return Err(format!(
            "{} of {} nodes disconnected from the driver",
            nodes.len() - seen.len(),
            nodes.len()
        ));
    }
    Ok(())
}

fn neighbors(c: GridCoord) -> impl Iterator<Item = GridCoord> {
    let mut out = Vec::with_capacity(6);
    if c.x > 0 {
        out.push(GridCoord::new(c.x - 1, c.y, c.z));
    }
    out.push(GridCoord::new(c.x + 1, c.y, c.z));
    if c.y > 0 {
        out.push(GridCoord::new(c.x, c.y - 1, c.z));
    }
    out.push(GridCoord::new(c.x, c.y + 1, c.z));
    if c.z > 0 {
        out.push(GridCoord::new(c.x, c.y, c.z - 1));
    }
    if c.z < u8::MAX {
        out.push(GridCoord::new(c.x, c.y, c.z + 1));
    }
    out.into_iter()
}

/// Occupancy implied by the committed routes.
pub fn count_occupancy(routes: &[NetRoute]) -> HashMap<GridCoord, u32> {
    let mut occ = HashMap::new();
    for r in routes {
        for &c in &r.nodes {
            *occ.entry(c).or_insert(0) += 1;
        }
    }
    occ
}

/// Number of grid nodes claimed by more than `capacity` nets.
pub fn overused_nodes(routes: &[NetRoute], capacity: u32) -> usize {
    count_occupancy(routes)
        .values()
        .filter(|&&n| n > capacity)
        .count()
}
