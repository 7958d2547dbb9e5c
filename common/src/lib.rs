// Common library for the scheduling façade and its capabilities

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod resolver;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
pub mod trigger_builder;

pub use orchestrator::{BlockoutUpdate, Capabilities, JobOrchestrator, PreparedJob};
