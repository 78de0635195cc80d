pub mod config;
pub mod dedup;
pub mod error;
pub mod observability;
