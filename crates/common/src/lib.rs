//! Shared utilities for Livepub
//!
//! This crate provides common functionality used across the Livepub workspace:
//! - State machine error types
//! - Environment-driven configuration helpers

pub mod config;
pub mod state;

pub use state::StateError;
