//! Types and errors shared by every geocluster component.
//!
//! - [`error`] - The [`Error`] enum and the crate [`Result`] alias.
//! - [`types`] - Records, shards and cluster results.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
