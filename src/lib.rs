//! portshift: moving-target port rotation and threat scoring.

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod firewall;
pub mod telemetry;
