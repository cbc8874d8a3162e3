pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod kafka;
pub mod lineage;
pub mod metrics_const;
pub mod pipeline;
pub mod processor;
pub mod server;
pub mod service;
pub mod state;
pub mod worker;

// Used in "mod tests" and tests/ directory (integration tests)
pub mod test_utils;
