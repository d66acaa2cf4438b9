// Iterated prisoner's dilemma tournament backend: strategy sandbox,
// match simulator, round-robin orchestrator and the HTTP surface
// around them.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod replay;
pub mod scheduler;
pub mod tournament;
pub mod worker_pool;
