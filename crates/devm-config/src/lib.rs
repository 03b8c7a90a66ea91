//! Configuration parsing for devm
//!
//! This crate handles parsing of:
//! - Global configuration (`~/.config/devm/config.toml`)
//! - Machine definitions (`machine.json`) and server declarations

mod error;
mod global;
mod machine;

pub use error::*;
pub use global::*;
pub use machine::*;
