//! A small container orchestrator: a manager schedules tasks onto workers,
//! workers drive them through a container runtime, and the manager
//! reconciles what the workers report.

pub mod config;
pub mod manager;
pub mod scheduler;
pub mod tasks;
pub mod worker;
