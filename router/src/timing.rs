use eda_common::db::indices::NetId;
use std::collections::HashMap;

/// Per-connection timing view supplied by the caller between iterations.
pub trait TimingInfo: Send + Sync {
    /// Raw criticality in `[0, 1]` of the connection to `sink` of `net`.
    fn sink_criticality(&self, net: NetId, sink: usize) -> f64;

    /// Smallest acceptable hop delay to `sink`, used when hold fixing is on.
    fn min_delay_budget(&self, _net: NetId, _sink: usize) -> Option<u32> {
        None
    }
}

/// Same criticality for every connection.
pub struct ConstantTiming {
    criticality: f64,
}

impl ConstantTiming {
    pub fn new(criticality: f64) -> Self {
        Self { criticality }
    }
}

impl TimingInfo for ConstantTiming {
    fn sink_criticality(&self, _net: NetId, _sink: usize) -> f64 {
        self.criticality
    }
}

/// Explicit per-connection criticalities and hold budgets.
#[derive(Default)]
pub struct SinkTimingTable {
    default_criticality: f64,
    criticality: HashMap<(NetId, usize), f64>,
    min_delay: HashMap<(NetId, usize), u32>,
}

impl SinkTimingTable {
    pub fn new(default_criticality: f64) -> Self {
        Self {
            default_criticality,
            ..Self::default()
        }
    }

    pub fn set_criticality(&mut self, net: NetId, sink: usize, criticality: f64) {
        self.criticality.insert((net, sink), criticality);
    }

    pub fn set_min_delay(&mut self, net: NetId, sink: usize, delay: u32) {
        self.min_delay.insert((net, sink), delay);
    }
}

impl TimingInfo for SinkTimingTable {
    fn sink_criticality(&self, net: NetId, sink: usize) -> f64 {
        self.criticality
            .get(&(net, sink))
            .copied()
            .unwrap_or(self.default_criticality)
    }

    fn min_delay_budget(&self, net: NetId, sink: usize) -> Option<u32> {
        self.min_delay.get(&(net, sink)).copied()
    }
}

/// Criticality the router works with: 0 without timing, otherwise clamped to `max_criticality`.
pub fn effective_criticality(
    timing: Option<&dyn TimingInfo>,
    net: NetId,
    sink: usize,
    max_criticality: f64,
) -> f64 {
    match timing {
        Some(t) => t.sink_criticality(net, sink).clamp(0.0, max_criticality),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criticality_is_clamped() {
        let t = ConstantTiming::new(1.0);
        assert_eq!(effective_criticality(Some(&t), NetId(0), 0, 0.99), 0.99);
        assert_eq!(effective_criticality(None, NetId(0), 0, 0.99), 0.0);
    }

    #[test]
    fn table_falls_back_to_default() {
        let mut t = SinkTimingTable::new(0.25);
        t.set_criticality(NetId(2), 1, 0.8);
        t.set_min_delay(NetId(2), 1, 12);
        assert_eq!(t.sink_criticality(NetId(2), 1), 0.8);
        assert_eq!(t.sink_criticality(NetId(2), 0), 0.25);
        assert_eq!(t.min_delay_budget(NetId(2), 1), Some(12));
        assert_eq!(t.min_delay_budget(NetId(3), 1), None);
    }
}
