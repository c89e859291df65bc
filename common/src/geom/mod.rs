pub mod bbox;
pub mod coord;
pub mod rtree;
