use crate::db::indices::*;
use crate::geom::bbox::BoundingBox;
use crate::geom::coord::GridCoord;
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct NetData {
    pub name: String,
    pub driver: GridCoord,
    pub sinks: Vec<GridCoord>,
    /// Clock-like nets. Never decomposed.
    pub is_global: bool,
}

impl NetData {
    pub fn num_sinks(&self) -> usize {
        self.sinks.len()
    }

    /// Smallest box holding the driver and every sink.
    pub fn terminal_bbox(&self) -> BoundingBox {
        let mut bb = BoundingBox::new(self.driver.x, self.driver.x, self.driver.y, self.driver.y);
        for s in &self.sinks {
            bb.xmin = bb.xmin.min(s.x);
            bb.xmax = bb.xmax.max(s.x);
            bb.ymin = bb.ymin.min(s.y);
            bb.ymax = bb.ymax.max(s.y);
        }
        bb
    }
}

/// Committed routing of one net: the claimed grid nodes and the hop delay to each sink.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetRoute {
    pub nodes: Vec<GridCoord>,
    pub sink_delays: Vec<Option<u32>>,
}

impl NetRoute {
    pub fn unrouted(num_sinks: usize) -> Self {
        Self {
            nodes: Vec::new(),
            sink_delays: vec![None; num_sinks],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.nodes.is_empty() && self.sink_delays.iter().all(|d| d.is_some())
    }

    pub fn wirelength(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }
}

pub struct NetlistDB {
    pub width: u32,
    pub height: u32,
    pub layers: u8,
    pub nets: Vec<NetData>,
    pub obstacles: Vec<GridCoord>,
    pub net_name_map: HashMap<String, NetId>,
}

impl NetlistDB {
    pub fn new(width: u32, height: u32, layers: u8) -> Self {
        Self {
            width,
            height,
            layers,
            nets: Vec::with_capacity(1000),
            obstacles: Vec::new(),
            net_name_map: HashMap::new(),
        }
    }

    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn net(&self, id: NetId) -> &NetData {
        &self.nets[id.index()]
    }

    pub fn net_ids(&self) -> impl Iterator<Item = NetId> + '_ {
        (0..self.nets.len()).map(NetId::new)
    }

    pub fn device_bbox(&self) -> BoundingBox {
        BoundingBox::device(self.width, self.height)
    }

    pub fn add_net(&mut self, name: String, driver: GridCoord, sinks: Vec<GridCoord>) -> NetId {
        self.add_net_with_kind(name, driver, sinks, false)
    }

    pub fn add_global_net(
        &mut self,
        name: String,
        driver: GridCoord,
        sinks: Vec<GridCoord>,
    ) -> NetId {
        self.add_net_with_kind(name, driver, sinks, true)
    }

    fn add_net_with_kind(
        &mut self,
        name: String,
        driver: GridCoord,
        sinks: Vec<GridCoord>,
        is_global: bool,
    ) -> NetId {
        if let Some(&id) = self.net_name_map.get(&name) {
            return id;
        }
        let id = NetId::new(self.nets.len());
        self.nets.push(NetData {
            name: name.clone(),
            driver,
            sinks,
            is_global,
        });
        self.net_name_map.insert(name, id);
        id
    }

    pub fn add_obstacle(&mut self, coord: GridCoord) {
        self.obstacles.push(coord);
    }

    /// Terminal box of `net` grown by `bb_factor` and clipped to the device.
    pub fn route_bbox(&self, net: NetId, bb_factor: u32) -> BoundingBox {
        self.net(net)
            .terminal_bbox()
            .expand(bb_factor, &self.device_bbox())
    }

    pub fn total_sinks(&self) -> usize {
        self.nets.iter().map(|n| n.sinks.len()).sum()
    }
}
