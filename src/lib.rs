pub mod config;
pub mod dashboard;
pub mod engine;
pub mod events;
pub mod metric_source;
pub mod participant_process;
pub mod participants;
pub mod poller;
pub mod progress;
pub mod prom_metrics;
pub mod reward;
pub mod session;
pub mod winner;
