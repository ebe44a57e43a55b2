//! Orientation math shared by the filters and the tracking pipeline

pub mod exp_map;

pub use exp_map::*;
