pub mod address;
pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod raw_data;
pub mod retry;
pub mod tagpack;
pub mod types;

// Ports the scrapers drive, and their HTTP and in-memory adapters
pub mod app;
pub mod infra;
