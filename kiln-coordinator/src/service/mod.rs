//! Service Module
//!
//! Protocol core of the coordinator.
//! Services hold no mutable state of their own beyond per-job locks; all
//! durable state lives behind the repository traits.

pub mod artifact;
pub mod dispatcher;
pub mod locks;
pub mod trace;

// Re-export for convenience
pub use artifact::{ArtifactGate, ArtifactPolicy, Download, UploadFile};
pub use dispatcher::{Dispatcher, PollOutcome};
pub use locks::JobLocks;
pub use trace::{Accepted, TraceChannel};
