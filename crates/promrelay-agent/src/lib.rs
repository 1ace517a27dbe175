//! The promrelay agent: scrapes configured queries from time-series backends,
//! accumulates the results and forwards them to the central ingestion API.

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod upstream;
