//! The main application logic, decoupled from the entry point.

use crate::{
    bridge::watch_collection,
    config::Config,
    core::{DocumentStore, Messenger},
    feed::{FirestoreStore, SubscriptionHandle},
    liveness::LivenessServer,
    notification::{Dispatcher, TelegramClient},
    scheduler::MainLoop,
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    subscription: SubscriptionHandle,
    liveness_addr: Option<SocketAddr>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the liveness server actually bound to, if it runs.
    pub fn liveness_addr(&self) -> Option<SocketAddr> {
        self.liveness_addr
    }

    /// Waits for the shutdown signal, stops the change feed, then waits for
    /// the async tasks to finish.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        let already_signalled = *shutdown_rx.borrow_and_update();
        if !already_signalled {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Releasing change feed...");

        // Joining the feed thread blocks until an in-flight poll finishes.
        let subscription = self.subscription;
        tokio::task::spawn_blocking(move || subscription.release())
            .await
            .context("change feed release task failed")?;

        self.task_manager.shutdown().await;

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Every external dependency can be overridden so tests run without
/// Firestore or Telegram.
pub struct AppBuilder {
    config: Config,
    store_override: Option<Arc<dyn DocumentStore>>,
    messenger_override: Option<Arc<dyn Messenger>>,
    prometheus_handle: Option<PrometheusHandle>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store_override: None,
            messenger_override: None,
            prometheus_handle: None,
        }
    }

    /// Overrides the document store for testing.
    pub fn store_override(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Overrides the messenger for testing.
    pub fn messenger_override(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger_override = Some(messenger);
        self
    }

    /// Serves this handle on `/metrics` when metrics are enabled.
    pub fn prometheus_handle(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.prometheus_handle = handle;
        self
    }

    /// Builds and starts all components, returning a runnable `App`.
    ///
    /// Fails if the liveness port cannot be bound or the change feed cannot
    /// be opened.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Liveness endpoint
        // =========================================================================
        let liveness_addr = if config.liveness.enabled {
            let listener = TcpListener::bind(config.liveness.listen_address)
                .await
                .with_context(|| {
                    format!(
                        "failed to bind liveness server to {}",
                        config.liveness.listen_address
                    )
                })?;
            let addr = listener.local_addr()?;
            let prom_handle = self.prometheus_handle.filter(|_| config.metrics.enabled);
            let server = LivenessServer::new(listener, prom_handle, task_manager.get_shutdown_rx());
            task_manager.spawn("LivenessServer", server.run());
            info!(address = %addr, "Liveness server listening");
            Some(addr)
        } else {
            if config.metrics.enabled {
                warn!("Metrics are enabled but the liveness server is disabled; /metrics will not be served.");
            }
            None
        };

        // =========================================================================
        // 2. Messenger and dispatcher
        // =========================================================================
        let messenger: Arc<dyn Messenger> = match self.messenger_override {
            Some(messenger) => messenger,
            None => Arc::new(TelegramClient::new(&config.telegram)?),
        };
        let dispatcher = Arc::new(Dispatcher::new(messenger, config.telegram.chat_id.clone()));

        // =========================================================================
        // 3. Main loop
        // =========================================================================
        let (main_loop, main_loop_handle) = MainLoop::new();
        task_manager.spawn("MainLoop", main_loop.run(task_manager.get_shutdown_rx()));

        // =========================================================================
        // 4. Change feed
        // =========================================================================
        let store: Arc<dyn DocumentStore> = match self.store_override {
            Some(store) => store,
            None => {
                let key = config.service_account()?;
                info!(project_id = %key.project_id, "Loaded service-account credentials");
                Arc::new(FirestoreStore::new(&config.firestore, key))
            }
        };

        // Opening the feed waits for the first snapshot on a plain thread.
        let collection = config.firestore.collection.clone();
        let subscription = tokio::task::spawn_blocking(move || {
            watch_collection(store.as_ref(), &collection, main_loop_handle, dispatcher)
        })
        .await
        .context("change feed subscribe task failed")?
        .with_context(|| {
            format!(
                "failed to subscribe to collection `{}`",
                config.firestore.collection
            )
        })?;

        info!(
            collection = %config.firestore.collection,
            "Listening for new student registrations"
        );

        Ok(App {
            task_manager,
            subscription,
            liveness_addr,
        })
    }
}
