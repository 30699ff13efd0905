// ABOUTME: Library root for the table purge engine
// ABOUTME: Exposes config resolution, target enumeration, strategies, commands and reporting

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod report;
pub mod runner;
pub mod strategy;
pub mod targets;

pub use error::PurgeError;
