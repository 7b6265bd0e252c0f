//! Kiln Core
//!
//! Core types and abstractions for the Kiln runner protocol.
//!
//! This crate contains:
//! - Domain types: Core protocol entities (Job, Runner, tokens, markers, artifacts)
//! - DTOs: Data transfer objects exchanged between the coordinator and runners

pub mod domain;
pub mod dto;
