//! Kiln Coordinator
//!
//! Server side of the kiln runner protocol: runners poll for pending jobs,
//! stream their trace in offset-checked chunks and upload artifact bundles.
//!
//! - `gate`: runner and job credential checks
//! - `service`: dispatcher, trace channel and artifact gate
//! - `repository`: storage traits with Postgres, filesystem and in-memory backends
//! - `api`: axum HTTP surface

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod repository;
pub mod service;
pub mod state;

pub use api::create_router;
pub use config::Config;
pub use error::ProtocolError;
pub use state::{AppState, Stores};
