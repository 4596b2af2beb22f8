#![doc = include_str!("../README.md")]

pub mod aggregate;
mod common;
pub mod compute;
pub mod partition;
pub mod wire;

pub use common::*;
