pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod server;
pub mod storage;
pub mod ws;
