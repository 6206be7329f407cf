//! Tracks the long-running async tasks (main loop, liveness server) and
//! awaits them at shutdown.
use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Handles = Vec<(&'static str, JoinHandle<()>)>;

/// A centralized manager for spawned tasks.
///
/// Every task is expected to watch the shared shutdown receiver and return
/// once it flips to `true`.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Handles>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns `future` on the runtime and records its handle under `name`.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.lock().push((name, handle));
    }

    /// Returns a clone of the shutdown receiver.
    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks spawned and not yet awaited.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for all managed tasks to complete.
    pub async fn shutdown(self) {
        let handles: Handles = self.lock().drain(..).collect();
        info!(
            "TaskManager shutting down. Waiting for {} tasks to complete...",
            handles.len()
        );

        let (task_names, handles): (Vec<&'static str>, Vec<JoinHandle<()>>) =
            handles.into_iter().unzip();
        debug!(tasks = ?task_names, "Awaiting all tasks.");

        let results = join_all(handles).await;

        let mut panicked = Vec::new();
        for (task_name, result) in task_names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name, error = %e, "Task panicked during shutdown.");
                    panicked.push(task_name);
                }
            }
        }

        if panicked.is_empty() {
            info!("All tasks shut down gracefully.");
        } else {
            error!(tasks = ?panicked, "{} tasks panicked during shutdown", panicked.len());
        }
    }

    fn lock(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
