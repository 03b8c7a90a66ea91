//! Background detection of machines whose container stopped

use devm_provider::{ContainerEngine, ContainerId, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle events reported for a machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    /// The container is no longer running, or no longer exists
    Stopped {
        container: ContainerId,
        exit_code: Option<i64>,
    },
}

/// Polls a container until it stops, then reports it once
pub struct StopDetector {
    task: JoinHandle<()>,
}

impl StopDetector {
    pub fn spawn(
        engine: Arc<dyn ContainerEngine>,
        container: ContainerId,
        interval: Duration,
        events: mpsc::UnboundedSender<MachineEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                let exit_code = match engine.inspect(&container).await {
                    Ok(details) if details.status.is_live() => None,
                    Ok(details) => Some(details.exit_code),
                    Err(ProviderError::ContainerNotFound(_)) => Some(None),
                    Err(e) => {
                        // engine hiccup, try again next round
                        tracing::debug!("Stop detection for {} failed: {}", container.short(), e);
                        None
                    }
                };

                if let Some(exit_code) = exit_code {
                    tracing::info!("Machine container {} stopped", container.short());
                    let _ = events.send(MachineEvent::Stopped {
                        container: container.clone(),
                        exit_code,
                    });
                    break;
                }

                if events.is_closed() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }

            tracing::debug!("Stop detector exiting for container {}", container.short());
        });

        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for StopDetector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_container_details, MockEngine};
    use devm_provider::ContainerStatus;

    #[tokio::test]
    async fn test_reports_stopped_container() {
        let engine = Arc::new(MockEngine::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _detector = StopDetector::spawn(
            engine.clone(),
            ContainerId::new("c0ffee"),
            Duration::from_millis(10),
            tx,
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut stopped = mock_container_details("c0ffee", ContainerStatus::Exited);
        stopped.exit_code = Some(137);
        *engine.inspect_result.lock().unwrap() = Ok(stopped);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(MachineEvent::Stopped {
                container: ContainerId::new("c0ffee"),
                exit_code: Some(137),
            })
        );
        // reported once, then the sender is gone
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reports_removed_container() {
        let engine = Arc::new(MockEngine::new());
        *engine.inspect_result.lock().unwrap() =
            Err(ProviderError::ContainerNotFound("c0ffee".to_string()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _detector =
            StopDetector::spawn(engine, ContainerId::new("c0ffee"), Duration::from_millis(10), tx);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(MachineEvent::Stopped { exit_code: None, .. })));
    }

    #[tokio::test]
    async fn test_abort_stops_polling() {
        let engine = Arc::new(MockEngine::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let detector =
            StopDetector::spawn(engine, ContainerId::new("c0ffee"), Duration::from_millis(10), tx);

        detector.abort();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(event.is_none());
    }
}
