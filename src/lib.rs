//! pulsewatch: service and endpoint health monitoring engine.
//!
//! Probes targets on a schedule, tracks per-target health, and delivers
//! alerts on state edges to notification sinks.

pub mod alerting;
pub mod config;
pub mod db;
pub mod engine;
pub mod notify;
pub mod probe;
pub mod scheduler;
pub mod web;
