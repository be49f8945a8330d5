//! # CodeCheck Common Library
//!
//! Shared code for the CodeCheck services:
//! - Error type used across database and configuration layers
//! - TOML configuration schema and loading
//! - Event types (`CodecheckEvent`) and the `EventBus` broadcast channel

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
