use crate::db::core::NetlistDB;
use crate::geom::coord::GridCoord;
use crate::util::config::GeneratorConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const MAX_PLACEMENT_TRIES: usize = 64;

/// Builds a reproducible synthetic netlist.
///
/// Terminals sit on layer 0 and are never shared between nets. Most nets are
/// local (sinks within `locality` of the driver); `high_fanout_nets` of them
/// spread their sinks across the whole device.
pub fn generate_netlist(config: &GeneratorConfig) -> NetlistDB {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let width = config.width.max(2);
    let height = config.height.max(2);
    let layers = config.layers.max(1);
    let mut db = NetlistDB::new(width, height, layers);
    let mut used: HashSet<(u32, u32)> = HashSet::new();

    log::info!(
        "Generating netlist: {} nets on {}x{}x{} (seed {})",
        config.num_nets,
        width,
        height,
        layers,
        config.seed
    );

    for i in 0..config.num_nets {
        let Some(driver) = pick_free(&mut rng, &mut used, width, height, None) else {
            log::warn!("Device full after {} nets", i);
            break;
        };

        let high_fanout = i < config.high_fanout_nets;
        let fanout = if high_fanout {
            rng.gen_range(16..=32)
        } else {
            rng.gen_range(1..=config.max_fanout.max(1))
        };
        let window = if high_fanout {
            None
        } else {
            Some((driver, config.locality.max(1)))
        };

        let mut sinks = Vec::with_capacity(fanout);
        for _ in 0..fanout {
            if let Some(s) = pick_free(&mut rng, &mut used, width, height, window) {
                sinks.push(s);
            }
        }
        if sinks.is_empty() {
            continue;
        }

        let name = format!("net_{}", i);
        if high_fanout && i == 0 && config.high_fanout_nets > 1 {
            db.add_global_net(name, driver, sinks);
        } else {
            db.add_net(name, driver, sinks);
        }
    }

    if layers > 1 && config.obstacle_density > 0.0 {
        let density = config.obstacle_density.clamp(0.0, 0.5);
        for z in 1..layers {
            for y in 0..height {
                for x in 0..width {
                    if rng.gen_bool(density) {
                        db.add_obstacle(GridCoord::new(x, y, z));
                    }
                }
            }
        }
    }

    log::info!(
        "Generated {} nets with {} sinks, {} obstacles",
        db.num_nets(),
        db.total_sinks(),
        db.obstacles.len()
    );
    db
}

fn pick_free(
    rng: &mut StdRng,
    used: &mut HashSet<(u32, u32)>,
    width: u32,
    height: u32,
    window: Option<(GridCoord, u32)>,
) -> Option<GridCoord> {
    let (xlo, xhi, ylo, yhi) = match window {
        Some((c, r)) => (
            c.x.saturating_sub(r),
            (c.x + r).min(width - 1),
            c.y.saturating_sub(r),
            (c.y + r).min(height - 1),
        ),
        None => (0, width - 1, 0, height - 1),
    };
    for _ in 0..MAX_PLACEMENT_TRIES {
        let x = rng.gen_range(xlo..=xhi);
        let y = rng.gen_range(ylo..=yhi);
        if used.insert((x, y)) {
            return Some(GridCoord::new(x, y, 0));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_netlist() {
        let cfg = GeneratorConfig {
            num_nets: 40,
            ..GeneratorConfig::default()
        };
        let a = generate_netlist(&cfg);
        let b = generate_netlist(&cfg);
        assert_eq!(a.num_nets(), b.num_nets());
        for (na, nb) in a.nets.iter().zip(&b.nets) {
            assert_eq!(na.driver, nb.driver);
            assert_eq!(na.sinks, nb.sinks);
        }
    }

    #[test]
    fn terminals_are_unique() {
        let cfg = GeneratorConfig {
            width: 24,
            height: 24,
            num_nets: 60,
            ..GeneratorConfig::default()
        };
        let db = generate_netlist(&cfg);
        let mut seen = HashSet::new();
        for net in &db.nets {
            assert!(seen.insert(net.driver));
            for s in &net.sinks {
                assert!(seen.insert(*s));
                assert!(s.x < 24 && s.y < 24);
            }
        }
    }
}
