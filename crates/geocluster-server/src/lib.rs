#![doc = include_str!("../README.md")]

pub mod config;
pub mod dispatch;
pub mod shutdown;
pub mod source;
pub mod telemetry;
pub mod worker;
