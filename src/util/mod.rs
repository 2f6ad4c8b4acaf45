//! Utility functions and helpers
//!
//! ## Modules
//!
//! - [`retry`] - Retry logic for transient backend failures
//! - [`util`] - Timing and logging helpers

pub mod retry;
pub mod util;
