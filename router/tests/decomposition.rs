use eda_common::db::core::NetlistDB;
use eda_common::db::indices::NetId;
use eda_common::geom::bbox::BoundingBox;
use eda_common::geom::coord::GridCoord;
use eda_common::util::{check, logger};
use eda_common::util::config::{RouterAlgorithm, RouterConfig};
use eda_router::algo::astar::{AStar, AStarParams};
use eda_router::check::verify_partition;
use eda_router::grid::{DenseGrid, RoutingGrid};
use eda_router::netlist_router::DecompNetlistRouter;
use eda_router::{make_default_router, NetlistRouter, RouterError};
use std::sync::Arc;

const NET_A: NetId = NetId(0);
const NET_B: NetId = NetId(1);
const NET_C: NetId = NetId(2);

fn c(x: u32, y: u32) -> GridCoord {
    GridCoord::new(x, y, 0)
}

/// A 32x32 single-layer device. Net A spreads 20 sinks across both halves,
/// nets B and C are local to the left and right halves, so the only useful
/// cutline is x = 15.5 with B and C in sibling leaves.
fn three_net_design(last_right_sink: GridCoord, wall: bool) -> NetlistDB {
    let mut db = NetlistDB::new(32, 32, 1);
    let mut sinks = vec![
        c(4, 4),
        c(6, 8),
        c(8, 12),
        c(10, 20),
        c(12, 24),
        c(3, 22),
        c(5, 2),
        c(9, 6),
        c(11, 10),
        c(7, 26),
        c(18, 10),
        c(20, 6),
        c(22, 12),
        c(24, 18),
        c(26, 22),
        c(28, 8),
        c(30, 14),
        c(21, 24),
        c(27, 26),
    ];
    sinks.push(last_right_sink);
    db.add_net("a".to_string(), c(2, 16), sinks);
    db.add_net("b".to_string(), c(3, 28), vec![c(14, 28)]);
    db.add_net("c".to_string(), c(17, 28), vec![c(29, 28)]);
    if wall {
        // Cuts the bottom strip of the right half off from the rest of it.
        for x in 16..32 {
            db.add_obstacle(c(x, 4));
        }
    }
    db
}

/// Net A has five sinks in each quadrant of a 32x32 device and four local
/// nets sit one per quadrant, so the tree cuts at x = 13 and then at y = 13
/// on both sides. Each half of A holds ten sinks.
fn quadrant_design() -> NetlistDB {
    let mut db = NetlistDB::new(32, 32, 1);
    let sinks = vec![
        c(1, 1),
        c(6, 1),
        c(1, 8),
        c(10, 6),
        c(5, 10),
        c(20, 1),
        c(30, 2),
        c(25, 7),
        c(30, 11),
        c(16, 10),
        c(1, 20),
        c(6, 30),
        c(10, 24),
        c(1, 27),
        c(8, 16),
        c(20, 30),
        c(30, 30),
        c(25, 22),
        c(16, 20),
        c(30, 17),
    ];
    db.add_net("a".to_string(), c(2, 16), sinks);
    db.add_net("ll".to_string(), c(3, 3), vec![c(12, 12)]);
    db.add_net("ul".to_string(), c(3, 18), vec![c(12, 28)]);
    db.add_net("lr".to_string(), c(18, 3), vec![c(28, 12)]);
    db.add_net("ur".to_string(), c(18, 18), vec![c(28, 28)]);
    db
}

fn config(max_decomp_depth: usize) -> RouterConfig {
    let mut cfg = RouterConfig {
        algorithm: RouterAlgorithm::Decomposing,
        num_workers: 4,
        bb_factor: 1,
        ..RouterConfig::default()
    };
    cfg.decomposition.max_decomp_depth = max_decomp_depth;
    cfg
}

fn decomp_router(db: &Arc<NetlistDB>, cfg: &RouterConfig) -> DecompNetlistRouter<AStar> {
    DecompNetlistRouter::new(
        Arc::clone(db),
        DenseGrid::from_netlist(db, cfg.capacity),
        AStar::new(AStarParams::from(cfg)),
        cfg,
    )
    .unwrap()
}

fn boxes(router: &dyn NetlistRouter, db: &NetlistDB) -> Vec<BoundingBox> {
    db.net_ids().map(|n| router.route_bb(n)).collect()
}

#[test]
fn spread_net_is_split_once_at_the_root() {
    let db = Arc::new(three_net_design(c(25, 3), false));
    let cfg = config(1);
    let mut router = decomp_router(&db, &cfg);

    let tree = router.partition_tree();
    let root = tree.node(tree.root());
    assert_eq!(root.nets(), &[NET_A]);
    assert_eq!(root.cutline().map(|c| c.pos), Some(15));
    let (l, r) = root.children().unwrap();
    assert_eq!(tree.node(l).nets(), &[NET_B]);
    assert_eq!(tree.node(r).nets(), &[NET_C]);

    let res = router.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();
    assert!(res.is_routable);
    assert_eq!(res.rerouted_nets, vec![NET_A, NET_B, NET_C]);
    assert_eq!(res.stats.nets_decomposed, 1);
    assert_eq!(res.stats.virtual_nets_routed, 2);
    assert_eq!(res.stats.decomp_failures, 0);
    assert!(!router.is_decomposition_disabled(NET_A));

    let routes = router.routes();
    assert!(routes.iter().all(|r| r.is_complete()));
    check::run(&db, routes).unwrap();
    verify_partition(router.partition_tree(), &boxes(&router, &db), routes).unwrap();
}

#[test]
fn split_route_matches_claimed_occupancy() {
    let db = Arc::new(three_net_design(c(25, 3), false));
    let cfg = config(1);
    let mut router = decomp_router(&db, &cfg);
    router.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();

    let occ = check::count_occupancy(router.routes());
    let grid = router.resources();
    for (coord, n) in &occ {
        assert_eq!(grid.occupancy(*coord), *n);
    }
}

#[test]
fn failed_virtual_net_is_repaired_and_disabled() {
    logger::init_for_tests();
    let hard = c(24, 2);
    let db = Arc::new(three_net_design(hard, true));
    let hard_index = db.net(NET_A).sinks.iter().position(|&s| s == hard).unwrap();
    let cfg = config(2);
    let mut router = decomp_router(&db, &cfg);

    let res = router.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();
    assert!(res.is_routable);
    assert!(res.nets_to_retry.is_empty());
    assert_eq!(res.rerouted_nets, vec![NET_A, NET_B, NET_C]);
    assert_eq!(res.stats.nets_decomposed, 0);
    assert_eq!(res.stats.decomp_failures, 1);
    assert_eq!(res.stats.nets_repaired, 1);

    assert!(router.is_decomposition_disabled(NET_A));
    assert!(router.known_hard_sinks(NET_A).contains(&hard_index));
    let a = &router.routes()[NET_A.index()];
    assert!(a.is_complete());
    // Reaching the walled-off sink means passing under the wall from the left.
    assert!(a.nodes.iter().any(|n| n.x == 15 && n.y < 4));
    check::run(&db, router.routes()).unwrap();

    let next = router.route_netlist(1, cfg.initial_pres_fac * cfg.pres_fac_mult, 0.0).unwrap();
    assert!(next.is_routable);
    assert_eq!(next.stats.nets_decomposed, 0);
    assert_eq!(next.stats.virtual_nets_routed, 0);
    assert_eq!(next.stats.decomp_failures, 0);
    check::run(&db, router.routes()).unwrap();
}

#[test]
fn nets_below_the_sink_threshold_stay_whole() {
    let db = Arc::new(three_net_design(c(25, 3), false));
    let mut cfg = config(2);
    cfg.decomposition.min_net_sinks = 21;
    let mut router = decomp_router(&db, &cfg);
    let res = router.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();
    assert_eq!(res.stats.nets_decomposed, 0);
    assert_eq!(res.stats.virtual_nets_routed, 0);
    assert!(router.routes()[NET_A.index()].is_complete());
}

#[test]
fn late_iterations_do_not_split() {
    let db = Arc::new(three_net_design(c(25, 3), false));
    let cfg = config(2);
    let mut router = decomp_router(&db, &cfg);
    let res = router
        .route_netlist(cfg.decomposition.max_decomp_iter + 1, cfg.initial_pres_fac, 0.0)
        .unwrap();
    assert_eq!(res.stats.nets_decomposed, 0);
    assert!(res.is_routable);
}

#[test]
fn zero_depth_matches_the_serial_router() {
    let db = Arc::new(three_net_design(c(25, 3), false));
    let serial_cfg = RouterConfig {
        algorithm: RouterAlgorithm::Serial,
        bb_factor: 1,
        ..RouterConfig::default()
    };
    let mut serial = make_default_router(Arc::clone(&db), &serial_cfg).unwrap();
    let mut decomp = decomp_router(&db, &config(0));
    for itry in 0..2 {
        let a = serial.route_netlist(itry, 0.5, 0.0).unwrap();
        let b = decomp.route_netlist(itry, 0.5, 0.0).unwrap();
        assert_eq!(a.rerouted_nets, b.rerouted_nets);
        assert_eq!(b.stats.nets_decomposed, 0);
        assert_eq!(serial.routes(), decomp.routes());
    }
}

#[test]
fn decomposition_refuses_rcv() {
    let db = Arc::new(three_net_design(c(25, 3), false));
    let mut cfg = config(2);
    cfg.rcv_enabled = true;
    assert!(matches!(
        make_default_router(Arc::clone(&db), &cfg),
        Err(RouterError::Config(_))
    ));

    cfg.rcv_enabled = false;
    let mut router = decomp_router(&db, &cfg);
    assert!(router.set_rcv_enabled(true).is_err());
    assert!(router.set_rcv_enabled(false).is_ok());

    let mut nested = RouterConfig {
        algorithm: RouterAlgorithm::Nested,
        num_workers: 2,
        ..RouterConfig::default()
    };
    let mut plain = make_default_router(Arc::clone(&db), &nested).unwrap();
    assert!(plain.set_rcv_enabled(true).is_ok());

    nested.nested_decomposition = true;
    let mut splitting = make_default_router(Arc::clone(&db), &nested).unwrap();
    assert!(splitting.set_rcv_enabled(true).is_err());
}

#[test]
fn quadrant_tree_has_two_levels_of_cuts() {
    let db = Arc::new(quadrant_design());
    let router = decomp_router(&db, &config(2));
    let tree = router.partition_tree();
    let root = tree.node(tree.root());
    assert_eq!(root.nets(), &[NET_A]);
    assert_eq!(root.cutline().map(|c| c.pos), Some(13));
    let (l, r) = root.children().unwrap();
    for child in [l, r] {
        assert_eq!(tree.node(child).cutline().map(|c| c.pos), Some(13));
        assert!(tree.node(child).children().is_some());
    }
}

#[test]
fn attempt_budget_limits_splits_per_call() {
    let db = Arc::new(quadrant_design());
    // Root piece is slot 0, its halves are slots 1 and 2.
    for (budget, virtual_nets) in [(0, 0), (1, 2), (2, 4), (3, 6)] {
        let mut cfg = config(2);
        cfg.decomposition.max_attempts_per_iteration = budget;
        let mut router = decomp_router(&db, &cfg);
        let res = router.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();
        assert!(res.is_routable);
        assert_eq!(res.stats.nets_decomposed, usize::from(budget > 0), "budget {}", budget);
        assert_eq!(res.stats.virtual_nets_routed, virtual_nets, "budget {}", budget);
        assert_eq!(res.stats.decomp_failures, 0, "budget {}", budget);
        check::run(&db, router.routes()).unwrap();
        verify_partition(router.partition_tree(), &boxes(&router, &db), router.routes()).unwrap();
    }
}

#[test]
fn virtual_nets_below_the_sink_threshold_stay_whole() {
    let db = Arc::new(quadrant_design());
    for (min_vnet_sinks, virtual_nets) in [(10, 6), (11, 2)] {
        let mut cfg = config(2);
        cfg.decomposition.min_vnet_sinks = min_vnet_sinks;
        let mut router = decomp_router(&db, &cfg);
        let res = router.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();
        assert_eq!(res.stats.nets_decomposed, 1);
        assert_eq!(res.stats.virtual_nets_routed, virtual_nets, "threshold {}", min_vnet_sinks);
        assert!(router.routes()[NET_A.index()].is_complete());
        check::run(&db, router.routes()).unwrap();
    }
}

#[test]
fn costly_split_disables_decomposition_for_the_next_call() {
    let mut db = quadrant_design();
    // Shares a sink node with A so both stay congested and get rerouted.
    let d = db.add_net("d".to_string(), c(1, 3), vec![c(1, 1)]);
    let db = Arc::new(db);
    let mut cfg = config(1);
    cfg.decomposition.predictor_tolerance = 0.25;

    // Without a whole-net baseline the split is kept.
    let mut fresh = decomp_router(&db, &cfg);
    let res = fresh.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();
    assert_eq!(res.stats.nets_decomposed, 1);
    assert!(!fresh.is_decomposition_disabled(NET_A));

    let mut router = decomp_router(&db, &cfg);
    let late = cfg.decomposition.max_decomp_iter + 1;
    let whole = router.route_netlist(late, cfg.initial_pres_fac, 0.0).unwrap();
    assert_eq!(whole.stats.nets_decomposed, 0);
    assert!(router.resources().is_congested(c(1, 1)));

    let split = router.route_netlist(0, cfg.initial_pres_fac, 0.0).unwrap();
    assert!(split.rerouted_nets.contains(&NET_A));
    assert!(split.rerouted_nets.contains(&d));
    assert_eq!(split.stats.nets_decomposed, 1);
    assert!(router.is_decomposition_disabled(NET_A));
    assert!(router.routes()[NET_A.index()].is_complete());

    let next = router.route_netlist(1, cfg.initial_pres_fac, 0.0).unwrap();
    assert!(next.rerouted_nets.contains(&NET_A));
    assert_eq!(next.stats.nets_decomposed, 0);
    assert_eq!(next.stats.virtual_nets_routed, 0);
    check::run(&db, router.routes()).unwrap();
}
