//! # parley-inference
//!
//! Model output handling for the parley worker.
//!
//! This crate provides:
//! - Thinking block extraction (inline reasoning tags)
//! - The retry ladder of per-attempt generation overrides
//! - Provider failure classification
//! - A scripted mock generation backend (feature `mock`)
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::MockGenerationBackend`] for downstream tests

pub mod classify;
pub mod retry_ladder;
pub mod thinking;

// Mock generation backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use parley_core::*;

pub use classify::{classify_failure, classify_provider_error};
pub use retry_ladder::{build_retry_config, build_retry_config_with_rng};
pub use thinking::{extract_thinking_blocks, has_thinking_blocks, ThinkingExtraction};
