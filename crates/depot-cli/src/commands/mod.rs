//! CLI commands

pub mod get;
pub mod deploy;
pub mod invalidate;
pub mod ls;

// Configuration inspection
pub mod repo;
pub mod config;
