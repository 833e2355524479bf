//! Application services layer scaffolding.

pub mod accounts;
pub mod cache;
pub mod credentials;
pub mod error;
pub mod jobs;
pub mod pdf;
pub mod profile;
pub mod repos;
pub mod signatures;
pub mod tokens;
