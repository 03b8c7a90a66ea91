//! Error types for devm-core

use devm_provider::ProviderError;
use thiserror::Error;

/// Failure while saving a machine to a snapshot.
///
/// `Commit` and `NoRegistry` mean nothing was produced. `Push` and `Interrupted` happen after
/// the commit succeeded, so the committed local image is left behind; see
/// [`SnapshotError::orphaned_image`].
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to commit container {container}: {source}")]
    Commit {
        container: String,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to push snapshot {image}: {source}")]
    Push {
        image: String,
        #[source]
        source: ProviderError,
    },

    #[error("Snapshot of {image} interrupted")]
    Interrupted { image: String },

    #[error("Cannot push snapshot of {container}: no registry configured")]
    NoRegistry { container: String },
}

impl SnapshotError {
    /// Local image left behind by a snapshot that failed after committing
    pub fn orphaned_image(&self) -> Option<&str> {
        match self {
            Self::Commit { .. } | Self::NoRegistry { .. } => None,
            Self::Push { image, .. } | Self::Interrupted { image } => Some(image),
        }
    }

    /// Whether the snapshot failed after side effects on the engine
    pub fn is_partial(&self) -> bool {
        self.orphaned_image().is_some()
    }
}

/// Failure to start tracking a process inside a machine
#[derive(Error, Debug)]
pub enum ProcessCreationError {
    #[error("Failed to create process {pid} ({command}): {source}")]
    Provider {
        pid: u64,
        command: String,
        #[source]
        source: ProviderError,
    },

    #[error("Machine {0} has been destroyed")]
    Destroyed(String),
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] devm_config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Process(#[from] ProcessCreationError),

    #[error("Process not found: {0}")]
    ProcessNotFound(u64),
}

pub type Result<T> = std::result::Result<T, CoreError>;
