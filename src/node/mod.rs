//! Aggregation node core: context, background tasks, and the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::utils::WeathersetError;

use serde::Deserialize;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

mod api;
mod backup;
mod clock;
mod eviction;
mod store;

pub mod payload;

pub use backup::BackupFile;
pub use clock::LamportClock;
pub use store::{RecordStore, WeatherRecord};

/// Aggregation node tunables.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Record time-to-live in millisecs; older records are reaped.
    pub ttl_ms: u64,

    /// Maximum number of records kept; the lowest-stamped records are
    /// evicted once exceeded.
    pub capacity: usize,

    /// Interval of the two background eviction loops in millisecs.
    pub tick_interval_ms: u64,

    /// Path to the backup file.
    pub backup_path: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            ttl_ms: 30_000,
            capacity: 20,
            tick_interval_ms: 1_000,
            backup_path: "backup.txt".into(),
        }
    }
}

impl AggregationConfig {
    /// Background loop tick interval as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Shared state of the aggregation node, owned once and handed by `Arc` to
/// every connection worker and background task.
#[derive(Debug)]
pub struct AggregationContext {
    /// Node logical clock. The mutex is the process-wide critical section
    /// for all clock-affecting protocol steps; the store deliberately is
    /// not guarded by it.
    pub clock: Mutex<LamportClock>,

    /// Concurrent per-station record store.
    pub store: RecordStore,

    /// Backup target, rewritten after every mutating event.
    pub backup: BackupFile,

    /// Tunables this node was started with.
    pub config: AggregationConfig,
}

impl AggregationContext {
    /// Creates a fresh context from the given tunables.
    pub fn new(config: AggregationConfig) -> Self {
        AggregationContext {
            clock: Mutex::new(LamportClock::new()),
            store: RecordStore::new(),
            backup: BackupFile::new(&config.backup_path),
            config,
        }
    }
}

/// The aggregation node: backup recovery, background eviction tasks, and
/// the client-facing accept loop.
pub struct AggregationNode {
    /// Shared node state.
    ctx: Arc<AggregationContext>,

    /// TCP listener for producer/reader connections.
    listener: Option<TcpListener>,

    /// Join handle of the retention reaper task.
    reaper_handle: Option<JoinHandle<()>>,

    /// Join handle of the capacity evictor task.
    evictor_handle: Option<JoinHandle<()>>,

    /// Sender side of the shutdown signal watched by background tasks and
    /// the accept loop.
    tx_shutdown: Arc<watch::Sender<bool>>,
}

impl AggregationNode {
    /// Creates a new aggregation node with validated tunables.
    pub fn new(config: AggregationConfig) -> Result<Self, WeathersetError> {
        if config.ttl_ms == 0 {
            return logged_err!("invalid config.ttl_ms {}", config.ttl_ms);
        }
        if config.capacity == 0 {
            return logged_err!("invalid config.capacity {}", config.capacity);
        }
        if config.tick_interval_ms == 0 {
            return logged_err!(
                "invalid config.tick_interval_ms {}",
                config.tick_interval_ms
            );
        }
        if config.backup_path.is_empty() {
            return logged_err!("config.backup_path is empty");
        }

        let (tx_shutdown, _) = watch::channel(false);
        Ok(AggregationNode {
            ctx: Arc::new(AggregationContext::new(config)),
            listener: None,
            reaper_handle: None,
            evictor_handle: None,
            tx_shutdown: Arc::new(tx_shutdown),
        })
    }

    /// Recovers warm records from the backup, binds the listening socket,
    /// and spawns the two background eviction tasks.
    pub async fn setup(
        &mut self,
        addr: SocketAddr,
    ) -> Result<(), WeathersetError> {
        if self.listener.is_some() {
            return logged_err!("setup already done");
        }

        let recovered = self.ctx.backup.load_into(&self.ctx.store).await;
        pf_info!("recovered {} stations from backup", recovered);

        let listener = TcpListener::bind(addr).await?;
        pf_info!("accepting requests on '{}'", listener.local_addr()?);
        self.listener = Some(listener);

        self.reaper_handle = Some(tokio::spawn(eviction::retention_reaper_task(
            self.ctx.clone(),
            self.tx_shutdown.subscribe(),
        )));
        self.evictor_handle = Some(tokio::spawn(eviction::capacity_evictor_task(
            self.ctx.clone(),
            self.tx_shutdown.subscribe(),
        )));

        Ok(())
    }

    /// Accept loop: one spawned coordinator task per connection, each
    /// serving exactly one request. Runs until the shutdown signal fires or
    /// an interrupt is received.
    pub async fn run(&mut self) -> Result<(), WeathersetError> {
        let Some(listener) = self.listener.as_ref() else {
            return logged_err!("run called before setup");
        };
        let mut shutdown = self.tx_shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        pf_debug!("accepted connection from '{}'", peer);
                        tokio::spawn(api::serve_connection(
                            self.ctx.clone(),
                            stream,
                            peer,
                        ));
                    }
                    Err(e) => {
                        pf_warn!("error accepting connection: {}", e);
                    }
                },

                _ = shutdown.changed() => break,

                _ = signal::ctrl_c() => {
                    pf_info!("received interrupt, shutting down");
                    let _ = self.tx_shutdown.send(true);
                    break;
                },
            }
        }

        // background tasks watch the same signal; wait for their clean exit
        let _ = self.tx_shutdown.send(true);
        if let Some(handle) = self.reaper_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.evictor_handle.take() {
            let _ = handle.await;
        }
        pf_info!("aggregation node stopped");

        Ok(())
    }

    /// Actual bound listening address; useful when binding to port 0.
    pub fn listen_addr(&self) -> Result<SocketAddr, WeathersetError> {
        match self.listener.as_ref() {
            Some(listener) => Ok(listener.local_addr()?),
            None => logged_err!("listen_addr called before setup"),
        }
    }

    /// Handle for signalling the node (and its background tasks) to stop.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        self.tx_shutdown.clone()
    }

    /// Shared context handle, mainly for inspection in tests.
    pub fn context(&self) -> Arc<AggregationContext> {
        self.ctx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str) -> AggregationConfig {
        AggregationConfig {
            backup_path: format!(
                "/tmp/weatherset-test-node-{}-{}.bak",
                name,
                std::process::id()
            ),
            ..Default::default()
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = AggregationConfig {
            capacity: 0,
            ..temp_config("invalid")
        };
        assert!(AggregationNode::new(config).is_err());
        let config = AggregationConfig {
            tick_interval_ms: 0,
            ..temp_config("invalid")
        };
        assert!(AggregationNode::new(config).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn setup_binds_and_spawns() -> Result<(), WeathersetError> {
        let mut node = AggregationNode::new(temp_config("setup"))?;
        assert!(node.listen_addr().is_err());
        node.setup("127.0.0.1:0".parse()?).await?;
        assert!(node.listen_addr().is_ok());
        assert!(node.reaper_handle.is_some());
        assert!(node.evictor_handle.is_some());
        // double setup is refused
        assert!(node.setup("127.0.0.1:0".parse()?).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn startup_recovers_backup() -> Result<(), WeathersetError> {
        let config = temp_config("recover");
        let seeded = AggregationContext::new(config.clone());
        seeded.store.put(
            "IDS60901".into(),
            WeatherRecord {
                payload: payload::render(&[("id".into(), "IDS60901".into())]),
                lamport: 3,
                last_update: 1_700_000_000_000,
            },
        );
        seeded.backup.save(&seeded.store).await;

        let mut node = AggregationNode::new(config)?;
        node.setup("127.0.0.1:0".parse()?).await?;
        assert_eq!(node.context().store.len(), 1);
        assert!(node.context().store.contains("IDS60901"));
        Ok(())
    }
}
