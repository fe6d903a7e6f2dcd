pub mod models;
pub mod errors;
pub mod config;
pub mod advisory;
pub mod executor;
pub mod report;
pub mod store;
pub mod notify;
pub mod dispatch;
pub mod cli;
