//! Hand-off from feed threads onto the main loop.
//!
//! Feed callbacks run on plain OS threads and must not block or touch the
//! network. They submit work through a [`MainLoopHandle`], which only pushes
//! onto an unbounded channel. The [`MainLoop`] runs on the async scheduler and
//! executes submitted tasks one at a time, in submission order.

use crate::error::SchedulerUnavailable;
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument};

type Task = BoxFuture<'static, ()>;

/// Submits tasks to the main loop from any thread.
#[derive(Clone, Debug)]
pub struct MainLoopHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl MainLoopHandle {
    /// Enqueues `task` without blocking.
    ///
    /// Fails once the main loop has stopped.
    pub fn schedule<F>(&self, task: F) -> Result<(), SchedulerUnavailable>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(task))
            .map_err(|_| SchedulerUnavailable)
    }

    /// Returns `false` once the main loop has stopped accepting tasks.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// The consumer side of the hand-off queue.
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl MainLoop {
    /// Creates the loop and the handle used to feed it.
    pub fn new() -> (Self, MainLoopHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, MainLoopHandle { tx })
    }

    /// Runs queued tasks until shutdown is signalled or every handle is gone.
    ///
    /// A task still running when shutdown arrives is abandoned. Tasks left in
    /// the queue are dropped and further submissions are refused.
    #[instrument(skip_all, name = "main_loop")]
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Main loop started.");
        loop {
            let task = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Main loop received shutdown signal.");
                    break;
                }
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => {
                        info!("All main loop handles dropped.");
                        break;
                    }
                },
            };

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Main loop received shutdown signal while a task was running, abandoning it.");
                    break;
                }
                _ = task => {}
            }
        }

        self.rx.close();
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Dropped queued tasks at shutdown.");
        }
        info!("Main loop finished.");
    }
}
