pub mod admin;
pub mod bootstrap;
pub mod bots;
pub mod config;
pub mod crowd;
pub mod dialog;
pub mod handler;
pub mod ping;
pub mod service;
pub mod telemetry;
pub mod transforms;
