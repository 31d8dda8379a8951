//! Core domain + application logic for ctfbot.
//!
//! This crate is intentionally framework-agnostic. Discord and the hosted
//! completion API live behind ports (traits) implemented in adapter crates.

pub mod ask;
pub mod config;
pub mod domain;
pub mod errors;
pub mod exif;
pub mod formatting;
pub mod logging;
pub mod pipeline;
pub mod ports;
pub mod presence;
pub mod tools;
pub mod transient;

pub use errors::{Error, Result};
