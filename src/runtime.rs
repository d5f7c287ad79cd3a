//! Runtime glue: configuration, telemetry, the worker facade, and the
//! channel-driven runner.

pub mod config;
pub mod facade;
pub mod runner;
pub mod telemetry;
