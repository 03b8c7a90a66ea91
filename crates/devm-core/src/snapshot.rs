//! Saving machines to snapshots
//!
//! A snapshot is the container's filesystem committed as an image and,
//! when a registry is configured for snapshots, pushed there.

use crate::{MachineIdentity, SnapshotError};
use devm_config::SnapshotConfig;
use devm_provider::{ContainerEngine, PushProgress, PushTarget};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Tag used for snapshot images
pub const LATEST_TAG: &str = "latest";

/// Prefix of snapshot repository names
pub const SNAPSHOT_REPOSITORY_PREFIX: &str = "machine_snapshot_";

/// Image a machine was saved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSource {
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub tag: String,
}

impl MachineSource {
    /// Reference a container engine can pull or run the snapshot by
    pub fn image_ref(&self) -> String {
        let repo = match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        };
        match &self.digest {
            Some(digest) => format!("{}@{}", repo, digest),
            None => format!("{}:{}", repo, self.tag),
        }
    }
}

/// Format an engine progress message as a single output line
pub fn format_progress_line(progress: &PushProgress) -> String {
    let mut line = String::from("[DOCKER] ");

    if let Some(error) = &progress.error {
        line.push_str("[ERROR] ");
        line.push_str(error);
        return line;
    }

    if let Some(id) = &progress.id {
        line.push_str(id);
        line.push_str(": ");
    }
    if let Some(status) = &progress.status {
        line.push_str(status);
    }
    match (&progress.progress, progress.current, progress.total) {
        (Some(bar), _, _) if !bar.is_empty() => {
            line.push(' ');
            line.push_str(bar);
        }
        (_, Some(current), Some(total)) if total > 0 => {
            line.push_str(&format!(" {}%", current.saturating_mul(100) / total));
        }
        _ => {}
    }

    line.trim_end().to_string()
}

/// Commits containers and optionally publishes them to a registry
pub struct SnapshotPublisher {
    engine: Arc<dyn ContainerEngine>,
    use_registry: bool,
    push_grace_period: Duration,
    tag: String,
    output: Option<mpsc::UnboundedSender<String>>,
}

impl SnapshotPublisher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: &SnapshotConfig,
        output: Option<mpsc::UnboundedSender<String>>,
    ) -> Self {
        Self {
            engine,
            use_registry: config.use_registry,
            push_grace_period: config.push_grace_period(),
            tag: LATEST_TAG.to_string(),
            output,
        }
    }

    /// Override the snapshot tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn pushes_to_registry(&self) -> bool {
        self.use_registry
    }

    /// Commit the machine's container and, when enabled, push it.
    ///
    /// The commit itself is never interrupted. `cancel` is observed while
    /// waiting for the pushed image to become visible and during the push;
    /// once it fires the call returns [`SnapshotError::Interrupted`] and the
    /// committed local image is left in place.
    pub async fn publish(
        &self,
        identity: &MachineIdentity,
        cancel: &CancellationToken,
    ) -> Result<MachineSource, SnapshotError> {
        let repository = identity.snapshot_repository();

        if !self.use_registry {
            self.commit(identity, &repository).await?;
            tracing::info!(
                "Saved machine {} to local image {}:{}",
                identity.container.short(),
                repository,
                self.tag
            );
            return Ok(MachineSource {
                repository,
                registry: None,
                digest: None,
                tag: self.tag.clone(),
            });
        }

        let Some(registry) = identity.registry.as_deref() else {
            return Err(SnapshotError::NoRegistry {
                container: identity.container.to_string(),
            });
        };

        let target = PushTarget::new(repository.clone(), self.tag.clone()).with_registry(registry);
        let image = target.image_ref();
        self.commit(identity, &target.full_repo()).await?;

        // A just committed image is not always visible to the push right away
        // (docker swarm), so give the engine a moment.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Snapshot of {} cancelled before push", image);
                return Err(SnapshotError::Interrupted { image });
            }
            _ = tokio::time::sleep(self.push_grace_period) => {}
        }

        let digest = self.push(&target, cancel).await?;

        if let Err(e) = self.engine.remove_image(&image, false).await {
            tracing::warn!("Failed to remove local snapshot image {}: {}", image, e);
        }

        tracing::info!(
            "Pushed snapshot of machine {} as {}",
            identity.container.short(),
            image
        );
        Ok(MachineSource {
            repository,
            registry: Some(registry.to_string()),
            digest,
            tag: self.tag.clone(),
        })
    }

    async fn commit(&self, identity: &MachineIdentity, repo: &str) -> Result<(), SnapshotError> {
        tracing::debug!(
            "Committing container {} as {}:{}",
            identity.container.short(),
            repo,
            self.tag
        );
        self.engine
            .commit(&identity.container, repo, &self.tag)
            .await
            .map(|_| ())
            .map_err(|source| SnapshotError::Commit {
                container: identity.container.to_string(),
                source,
            })
    }

    async fn push(
        &self,
        target: &PushTarget,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, SnapshotError> {
        let image = target.image_ref();
        let (tx, mut rx) = mpsc::unbounded_channel::<PushProgress>();

        let output = self.output.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if let Some(output) = &output {
                    let _ = output.send(format_progress_line(&progress));
                }
            }
        });

        let pushed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.engine.push(target, tx) => Some(result),
        };

        // the sender is gone once the push future is, so this drains and ends
        let _ = forwarder.await;

        match pushed {
            None => {
                tracing::warn!("Push of {} cancelled", image);
                Err(SnapshotError::Interrupted { image })
            }
            Some(Err(source)) => Err(SnapshotError::Push { image, source }),
            Some(Ok(digest)) => Ok(digest),
        }
    }
}
