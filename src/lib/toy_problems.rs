//! Small problems used by tests and the demo binary.

pub mod graph;
pub mod queens;
