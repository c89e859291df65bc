pub mod algo;
pub mod check;
pub mod connection_router;
pub mod error;
pub mod grid;
pub mod netlist_router;
pub mod partition_tree;
pub mod predictor;
pub mod thread_pool;
pub mod timing;
pub mod virtual_net;

pub use error::RouterError;
pub use netlist_router::{
    make_default_router, make_netlist_router, NetlistRouter, RouteIterResults, RouterStats,
};

use crate::grid::{DenseGrid, RoutingGrid};
use eda_common::db::core::{NetRoute, NetlistDB};
use eda_common::db::indices::NetId;
use eda_common::util::config::RouterConfig;
use std::sync::Arc;
use std::time::Instant;

// Below this much overuse, or this few iterations, the trend is too noisy to abort on.
const MIN_ABORT_OVERUSE: usize = 10;
const MIN_ABORT_ITERATIONS: usize = 5;

#[derive(Clone, Debug)]
pub struct RouteSummary {
    pub iterations: usize,
    pub converged: bool,
    /// Stopped early because the overuse trend predicted failure.
    pub aborted: bool,
    pub overused_nodes: usize,
    pub wirelength: usize,
    pub stats: RouterStats,
    pub predicted_success_iteration: Option<f64>,
    pub routes: Vec<NetRoute>,
}

/// Negotiated-congestion routing of `db` with the strategy chosen in `config`.
pub fn route(db: Arc<NetlistDB>, config: &RouterConfig) -> Result<RouteSummary, RouterError> {
    let mut router = make_default_router(Arc::clone(&db), config)?;
    route_with(router.as_mut(), &db, config)
}

/// Outer rip-up and reroute loop around an existing scheduler.
pub fn route_with(
    router: &mut dyn NetlistRouter,
    db: &NetlistDB,
    config: &RouterConfig,
) -> Result<RouteSummary, RouterError> {
    log::info!(
        "Routing {} nets ({} sinks) with the {} strategy",
        db.num_nets(),
        db.total_sinks(),
        router.algorithm()
    );
    let start = Instant::now();
    let mut pres_fac = config.initial_pres_fac;
    let mut total = RouterStats::default();
    let mut iterations = 0;
    let mut converged = false;
    let mut aborted = false;

    for itry in 0..config.max_iterations {
        let res = router.route_netlist(itry, pres_fac, 0.0)?;
        iterations = itry + 1;
        total += &res.stats;
        if !res.is_routable {
            return Err(RouterError::Unroutable {
                nets: res.unroutable_nets,
            });
        }

        let overuse = res.stats.overused_nodes;
        log::info!(
            "Iter {:>3}: rerouted {:>5} | overused {:>6} | retry {:>4} | split {:>4} | repaired {:>3} | pres_fac {:>8.2} | {:.1}s",
            itry,
            res.rerouted_nets.len(),
            overuse,
            res.nets_to_retry.len(),
            res.stats.nets_decomposed,
            res.stats.nets_repaired,
            pres_fac,
            start.elapsed().as_secs_f32()
        );
        if overuse == 0 && res.nets_to_retry.is_empty() {
            converged = true;
            break;
        }

        let estimate = router.predicted_success_iteration();
        if predicts_failure(config, iterations, overuse, estimate) {
            log::warn!(
                "Routing aborted, the predicted iteration for a successful route ({:.1}) is too high",
                estimate.unwrap_or(f64::INFINITY)
            );
            aborted = true;
            break;
        }

        advance_history(router.resources_mut()?, config);
        let grown = grow_congested_boxes(router, config.bb_factor);
        router.handle_bb_updated_nets(&grown);
        pres_fac = (pres_fac * config.pres_fac_mult).min(config.max_pres_fac);
    }

    if let Some(estimate) = router.predicted_success_iteration() {
        log::info!("Overuse trend predicts success at iteration {:.1}", estimate);
    }
    let overused_nodes = router.resources().total_overuse();
    if converged {
        log::info!("Routing converged after {} iterations", iterations);
    } else {
        log::warn!(
            "Routing stopped after {} iterations with {} overused nodes",
            iterations,
            overused_nodes
        );
    }

    let routes = router.routes().to_vec();
    Ok(RouteSummary {
        iterations,
        converged,
        aborted,
        overused_nodes,
        wirelength: routes.iter().map(|r| r.wirelength()).sum(),
        stats: total,
        predicted_success_iteration: router.predicted_success_iteration(),
        routes,
    })
}

/// Whether the overuse trend puts a successful route beyond the abort
/// threshold of `config.failure_predictor`.
fn predicts_failure(
    config: &RouterConfig,
    iterations: usize,
    overused: usize,
    estimate: Option<f64>,
) -> bool {
    let Some(factor) = config.failure_predictor.abort_factor() else {
        return false;
    };
    let threshold = factor * config.max_iterations as f64;
    iterations >= MIN_ABORT_ITERATIONS
        && overused > MIN_ABORT_OVERUSE
        && estimate.is_some_and(|e| e > threshold)
}

/// Ages the congestion history by `history_decay`, then adds this
/// iteration's overuse.
pub fn advance_history(grid: &mut DenseGrid, config: &RouterConfig) {
    if config.history_decay < 1.0 {
        grid.decay_history(config.history_decay);
    }
    grid.update_history(config.acc_fac);
}

/// Grows the box of every net that uses an overused node and runs along
/// its box edge.
fn grow_congested_boxes(router: &mut dyn NetlistRouter, margin: u32) -> Vec<NetId> {
    let device = router.resources().device_bbox();
    let grid = router.resources();
    let grown: Vec<(NetId, _)> = router
        .routes()
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let net = NetId::new(i);
            let bb = router.route_bb(net);
            if bb == device || !r.nodes.iter().any(|&c| grid.is_congested(c)) {
                return None;
            }
            r.nodes
                .iter()
                .any(|&c| bb.is_near_edge(c, 1))
                .then(|| (net, bb.expand(margin.max(1), &device)))
        })
        .collect();
    for &(net, bb) in &grown {
        router.set_route_bb(net, bb);
    }
    grown.into_iter().map(|(net, _)| net).collect()
}
