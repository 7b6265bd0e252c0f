//! Data Transfer Objects for the runner protocol
//!
//! This module contains DTOs exchanged between the coordinator and runners,
//! plus the header names the protocol relies on.

pub mod artifact;
pub mod error;
pub mod job;
pub mod runner;
pub mod trace;

/// Header carrying the job-scoped token on trace and artifact calls
pub const JOB_TOKEN_HEADER: &str = "Job-Token";

/// Header carrying the poll marker on a no-work response
pub const LAST_UPDATE_HEADER: &str = "Last-Update";

/// Header surfacing the job state on trace responses
pub const JOB_STATUS_HEADER: &str = "Job-Status";
