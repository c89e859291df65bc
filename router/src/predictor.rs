use eda_common::db::indices::NetId;
use std::collections::HashMap;

// Weight of the newest cost sample in the running baseline.
const BASELINE_ALPHA: f64 = 0.5;
const TREND_WINDOW: usize = 10;
const MIN_TREND_SAMPLES: usize = 3;

/// Judges decomposition results against a running per-net cost baseline and
/// tracks the overuse trend of the outer loop.
pub trait RoutingPredictor: Send {
    /// Cost of routing `net` whole; feeds the baseline.
    fn record_cost(&mut self, net: NetId, cost: f64);

    /// Whether a decomposed routing of `net` costing `cost` is acceptable.
    fn accept_decomposition(&self, net: NetId, cost: f64) -> bool;

    fn add_iteration_overuse(&mut self, iteration: usize, overused_nodes: usize);

    /// Iteration at which overuse is expected to reach zero, if it is falling.
    fn estimate_success_iteration(&self) -> Option<f64>;
}

pub struct CostHistoryPredictor {
    tolerance: f64,
    baseline: HashMap<NetId, f64>,
    overuse: Vec<(usize, usize)>,
}

impl CostHistoryPredictor {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            baseline: HashMap::new(),
            overuse: Vec::new(),
        }
    }

    pub fn baseline(&self, net: NetId) -> Option<f64> {
        self.baseline.get(&net).copied()
    }
}

impl RoutingPredictor for CostHistoryPredictor {
    fn record_cost(&mut self, net: NetId, cost: f64) {
        self.baseline
            .entry(net)
            .and_modify(|b| *b = BASELINE_ALPHA * cost + (1.0 - BASELINE_ALPHA) * *b)
            .or_insert(cost);
    }

    fn accept_decomposition(&self, net: NetId, cost: f64) -> bool {
        match self.baseline.get(&net) {
            Some(&b) => cost <= b * self.tolerance,
            None => true,
        }
    }

    fn add_iteration_overuse(&mut self, iteration: usize, overused_nodes: usize) {
        self.overuse.push((iteration, overused_nodes));
    }

    fn estimate_success_iteration(&self) -> Option<f64> {
        let &(last_iter, last_overuse) = self.overuse.last()?;
        if last_overuse == 0 {
            return Some(last_iter as f64);
        }
        let recent = &self.overuse[self.overuse.len().saturating_sub(TREND_WINDOW)..];
        if recent.len() < MIN_TREND_SAMPLES {
            return None;
        }

        // Least-squares line through (iteration, overuse).
        let n = recent.len() as f64;
        let mean_x = recent.iter().map(|&(x, _)| x as f64).sum::<f64>() / n;
        let mean_y = recent.iter().map(|&(_, y)| y as f64).sum::<f64>() / n;
        let mut sxy = 0.0;
        let mut sxx = 0.0;
        for &(x, y) in recent {
            let dx = x as f64 - mean_x;
            sxy += dx * (y as f64 - mean_y);
            sxx += dx * dx;
        }
        if sxx == 0.0 {
            return None;
        }
        let slope = sxy / sxx;
        if slope >= 0.0 {
            return None;
        }
        Some(mean_x - mean_y / slope)
    }
}
