pub mod config;
pub mod db;
pub mod http;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod migrations;
pub mod record;
pub mod server;
