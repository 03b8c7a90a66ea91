//! Core machine runtime for devm
//!
//! This crate provides:
//! - Server configuration merging and exposed server resolution
//! - Saving machines to snapshot images, optionally pushed to a registry
//! - Tracking of processes started inside a machine
//! - Detection of machines whose container stopped

mod error;
mod machine;
pub mod process;
mod registry;
pub mod servers;
mod snapshot;
mod stop_detector;
mod strategy;

pub use error::*;
pub use machine::*;
pub use process::{Command, DockerProcess, DockerProcessFactory, InstanceProcess, ProcessFactory};
pub use registry::*;
pub use servers::{ExposedServer, ServerConfigTable};
pub use snapshot::*;
pub use stop_detector::*;
pub use strategy::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
