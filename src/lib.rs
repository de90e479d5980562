//! Per-mod configuration: schema-driven settings, commented settings files,
//! formula-driven JSON asset patching, and server-authoritative replication.

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod expr;
pub mod host;
pub mod patch;
pub mod path;
pub mod sync;

#[cfg(feature = "gui")]
pub mod gui;
