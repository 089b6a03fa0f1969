pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod export;
pub mod logging;
pub mod persist;
pub mod routes;
pub mod rules;
pub mod session;
pub mod store;
pub mod ui;
