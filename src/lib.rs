//! Host side of the fast-axis planner: configuration, profile generation and
//! a simulator that runs the MCU planner against a virtual step timer.

pub mod config;
pub mod profile;
pub mod simulator;

pub use krusty_mcu;
