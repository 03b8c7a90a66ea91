//! Per-machine process registry

use crate::process::{pid_file_path, Command, InstanceProcess, ProcessFactory};
use crate::ProcessCreationError;
use devm_provider::ContainerId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Tracks the processes started in one machine.
///
/// Ids start at 1 and are never handed out twice, even when creating the
/// process fails. Once closed the registry tracks nothing new.
pub struct ProcessRegistry {
    container: ContainerId,
    factory: Arc<dyn ProcessFactory>,
    next_pid: AtomicU64,
    processes: Mutex<HashMap<u64, Arc<dyn InstanceProcess>>>,
    // only written with `processes` locked
    closed: AtomicBool,
}

impl ProcessRegistry {
    pub fn new(container: ContainerId, factory: Arc<dyn ProcessFactory>) -> Self {
        Self {
            container,
            factory,
            next_pid: AtomicU64::new(1),
            processes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<dyn InstanceProcess>>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve an id and create a process for `command` under it
    pub async fn create(
        &self,
        command: &Command,
        output_channel: Option<&str>,
    ) -> Result<Arc<dyn InstanceProcess>, ProcessCreationError> {
        if self.is_closed() {
            return Err(ProcessCreationError::Destroyed(self.container.to_string()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let pid_file = pid_file_path(pid);

        let process = self
            .factory
            .create(command, &self.container, output_channel, &pid_file, pid)
            .await
            .map_err(|source| ProcessCreationError::Provider {
                pid,
                command: command.command_line.clone(),
                source,
            })?;

        {
            let mut processes = self.lock();
            if self.is_closed() {
                drop(processes);
                tracing::debug!("Dropping process {}, registry closed during creation", pid);
                return Err(ProcessCreationError::Destroyed(self.container.to_string()));
            }
            processes.insert(pid, Arc::clone(&process));
        }

        tracing::debug!("Registered process {} ({})", pid, command.name);
        Ok(process)
    }

    pub fn get(&self, pid: u64) -> Option<Arc<dyn InstanceProcess>> {
        self.lock().get(&pid).cloned()
    }

    /// All tracked processes ordered by id
    pub fn list(&self) -> Vec<Arc<dyn InstanceProcess>> {
        let mut processes: Vec<_> = self.lock().values().cloned().collect();
        processes.sort_by_key(|p| p.pid());
        processes
    }

    pub fn remove(&self, pid: u64) -> Option<Arc<dyn InstanceProcess>> {
        self.lock().remove(&pid)
    }

    /// Drop handles of processes that are no longer running.
    /// Returns the ids that were removed.
    pub async fn cleanup_dead(&self) -> Vec<u64> {
        let mut dead = Vec::new();
        for process in self.list() {
            if !process.is_alive().await {
                dead.push(process.pid());
            }
        }

        let mut processes = self.lock();
        for pid in &dead {
            processes.remove(pid);
        }
        if !dead.is_empty() {
            tracing::debug!("Removed {} dead process(es)", dead.len());
        }
        dead
    }

    /// Forget every tracked process and refuse new ones
    pub fn close(&self) {
        let mut processes = self.lock();
        self.closed.store(true, Ordering::SeqCst);
        processes.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
