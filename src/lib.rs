pub mod checker;
pub mod cli;
pub mod cluster;
pub mod exporter;
pub mod metrics;
pub mod monitor;
