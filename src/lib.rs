pub mod config;
pub mod dataset;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod replay;
pub mod report;
pub mod strategy;
pub mod sweep;
pub mod touch;
