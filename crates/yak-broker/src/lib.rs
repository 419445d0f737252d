//! YAK broker library.
//!
//! One broker process wires together: lease-based leader election over
//! the coordination store, per-topic append-only storage, leader-driven
//! replication with follower catch-up, heartbeat reporting, and the
//! HTTP surface for producers, consumers, and peers. `Broker::start`
//! assembles all of it; the binary and the integration tests are both
//! built on top of it.

pub mod cluster;
pub mod config;
pub mod heartbeat;
pub mod http;
pub mod lease;
pub mod replication;

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use yak_common::coord::CoordStore;
use yak_storage::LogStore;

use cluster::ClusterState;
use config::BrokerConfig;
use heartbeat::HeartbeatReporter;
use http::AppState;
use lease::LeaseManager;
use replication::{ReplicationCoordinator, ReplicationWorker};

/// A running broker: background tasks plus the HTTP server.
pub struct Broker {
    pub config: Arc<BrokerConfig>,
    pub storage: Arc<LogStore>,
    pub cluster: Arc<ClusterState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Broker {
    /// Recover storage, start every background loop, and serve HTTP on
    /// `listener`. Returns once everything is running.
    pub async fn start(
        config: BrokerConfig,
        coord: Arc<dyn CoordStore>,
        listener: TcpListener,
    ) -> yak_common::Result<Self> {
        let config = Arc::new(config);
        let storage = Arc::new(LogStore::open(&config.data_dir, config.broker_id)?);
        let cluster = Arc::new(ClusterState::new());
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| yak_common::Error::Network(e.to_string()))?;

        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::new();

        let lease = LeaseManager::new(config.clone(), coord.clone(), cluster.clone());
        tasks.push(tokio::spawn(lease.run(shutdown_tx.subscribe())));

        let heartbeat = HeartbeatReporter::new(config.clone(), coord.clone(), cluster.clone());
        tasks.push(tokio::spawn(heartbeat.run(shutdown_tx.subscribe())));

        let coordinator = ReplicationCoordinator::new(
            config.clone(),
            storage.clone(),
            cluster.clone(),
            coord.clone(),
            client.clone(),
        );
        tasks.push(tokio::spawn(coordinator.run(shutdown_tx.subscribe())));

        let worker =
            ReplicationWorker::new(config.clone(), storage.clone(), cluster.clone(), client);
        tasks.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));

        let state = AppState {
            config: config.clone(),
            storage: storage.clone(),
            cluster: cluster.clone(),
            coord,
        };
        let app = http::create_router(state);
        let mut http_shutdown = shutdown_tx.subscribe();
        let local_addr = listener.local_addr()?;
        tasks.push(tokio::spawn(async move {
            let shutdown = async move {
                let _ = http_shutdown.changed().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "HTTP server terminated");
            }
        }));

        info!(
            broker_id = config.broker_id,
            listen = %local_addr,
            advertised = %config.broker_info().addr(),
            "broker started"
        );

        Ok(Self {
            config,
            storage,
            cluster,
            shutdown_tx,
            tasks,
        })
    }

    /// Stop every task, releasing the lease and registry entry on the
    /// way out, and wait for them to drain.
    pub async fn shutdown(mut self) {
        info!(broker_id = self.config.broker_id, "broker shutting down");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}
