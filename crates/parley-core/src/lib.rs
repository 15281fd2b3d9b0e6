//! # parley-core
//!
//! Core types, traits, and abstractions for the parley AI-response worker.
//!
//! This crate provides the data model shared by every other parley crate
//! (jobs, conversation context, generation output, results), the error
//! taxonomy, the collaborator traits the worker is wired against, and the
//! shared default constants.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
