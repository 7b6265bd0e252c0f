//! Core domain types
//!
//! This module contains the core domain structures used across Kiln services.
//! These types are shared between the coordinator (which persists and guards
//! them) and runners (which receive and update them through the protocol).

pub mod artifact;
pub mod job;
pub mod marker;
pub mod runner;
pub mod token;
pub mod trace;
