//! matfed: federated search across materials databases.
//!
//! The search engine itself lives in the `matfed-search` crate. This crate
//! adds what a host application needs around it:
//!
//! - **Configuration**: `config.toml` with engine and discovery sections
//! - **Directories**: platform config and cache locations
//! - **Bootstrap**: discovery, corrections, and user overrides merged into a
//!   registry, with provider health and cached results restored from disk

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod matfed_dirs;

pub use bootstrap::{EnginePaths, build_engine, build_registry};
pub use config::AppConfig;
pub use error::{AppError, Result};
