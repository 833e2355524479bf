//! Account service with queue-backed PDF rendering.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
