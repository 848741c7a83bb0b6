pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod merge;
pub mod metrics;
pub mod optimizer;
pub mod report;
pub mod table;
pub mod util;
