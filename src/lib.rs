pub mod alert;
pub mod central;
pub mod clock;
pub mod config;
pub mod export;
pub mod ingest;
pub mod server;
pub mod store;
pub mod wire;
