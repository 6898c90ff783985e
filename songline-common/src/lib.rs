//! # Songline Common Library
//!
//! Shared code for the songline services including:
//! - Error and result types
//! - Configuration loading (TOML bootstrap, root folder resolution)
//! - Pipeline event types and the broadcast EventBus
//! - The fixed analysis stage sequence
//! - Timestamp parsing

pub mod config;
pub mod error;
pub mod events;
pub mod stage;
pub mod time;

pub use error::{Error, Result};
pub use stage::StageKind;
