use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pf_adapters::{AdapterRegistry, CommentRecord};
use pf_core::clock::{SharedClock, SystemClock};
use pf_core::config::Config;
use pf_core::store::Store;
use pf_metrics::{CheckbackScheduler, CheckbackWorker, CommentSink, MetricsService};
use pf_people::{LensComputer, PeopleService};
use pf_queue::{Dispatcher, PublishListener, QueueService, Reaper};
use pf_scheduler::SchedulerService;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::event_bus::{EventBus, PostEvent};
use crate::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// Glue: comments -> people graph, publishes -> event bus
// ---------------------------------------------------------------------------

/// Routes comments pulled by the checkback worker into the people graph.
pub struct CommentBridge {
    people: Arc<PeopleService>,
}

impl CommentBridge {
    pub fn new(people: Arc<PeopleService>) -> Self {
        Self { people }
    }
}

#[async_trait]
impl CommentSink for CommentBridge {
    async fn ingest_comment(&self, channel: &str, platform_post_id: &str, comment: &CommentRecord) {
        if let Err(e) = self
            .people
            .ingest_comment(
                channel,
                &comment.author_handle,
                platform_post_id,
                &comment.text,
                &comment.comment_id,
                comment.author_name.clone(),
            )
            .await
        {
            warn!(channel, handle = %comment.author_handle, error = %e, "comment ingest failed");
        }
    }
}

struct BusListener {
    bus: EventBus,
}

#[async_trait]
impl PublishListener for BusListener {
    async fn on_published(&self, variant_id: Uuid, platform: &str, published_at: DateTime<Utc>) {
        self.bus.publish(PostEvent::Published {
            variant_id,
            platform: platform.to_string(),
            published_at,
        });
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// The postflow background daemon.
///
/// Owns the store, adapter registry, and all services, and runs the worker
/// loops (dispatchers, lease reaper, checkback worker, lens refresh) until
/// shutdown. Everything is constructed here and threaded explicitly; there
/// is no global state to reach for.
pub struct Daemon {
    config: Config,
    store: Arc<Store>,
    registry: Arc<AdapterRegistry>,
    clock: SharedClock,
    shutdown: ShutdownSignal,
    event_bus: EventBus,
    scheduler: Arc<SchedulerService>,
    queue: Arc<QueueService>,
    metrics: Arc<MetricsService>,
    people: Arc<PeopleService>,
    lens: Arc<LensComputer>,
    checkbacks: Arc<CheckbackScheduler>,
}

impl Daemon {
    /// Open (or create) the store from config and assemble the container.
    pub async fn new(config: Config, registry: Arc<AdapterRegistry>) -> Result<Self> {
        let store = Store::new(&config.store.path)
            .await
            .context("failed to open store database")?;
        Ok(Self::with_store(config, Arc::new(store), registry))
    }

    /// Assemble the container around an existing store (tests use the
    /// in-memory one).
    pub fn with_store(config: Config, store: Arc<Store>, registry: Arc<AdapterRegistry>) -> Self {
        let clock: SharedClock = Arc::new(SystemClock);
        Self::with_parts(config, store, registry, clock)
    }

    /// Full-control constructor: tests inject a manual clock here.
    pub fn with_parts(
        config: Config,
        store: Arc<Store>,
        registry: Arc<AdapterRegistry>,
        clock: SharedClock,
    ) -> Self {
        let event_bus = EventBus::new();
        let scheduler = Arc::new(SchedulerService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.scheduler.clone(),
        ));
        let queue = Arc::new(QueueService::new(Arc::clone(&store), Arc::clone(&clock)));
        let metrics = Arc::new(MetricsService::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&clock),
            config.queue.fetch_metrics_timeout_secs,
        ));
        let people = Arc::new(PeopleService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.general.workspace.clone(),
        ));
        let lens = Arc::new(LensComputer::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.people.lens_window_days,
        ));
        let checkbacks = Arc::new(CheckbackScheduler::new(Arc::clone(&store)));

        Self {
            config,
            store,
            registry,
            clock,
            shutdown: ShutdownSignal::new(),
            event_bus,
            scheduler,
            queue,
            metrics,
            people,
            lens,
            checkbacks,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors — the wire-agnostic API surface
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<SchedulerService> {
        &self.scheduler
    }

    pub fn queue(&self) -> &Arc<QueueService> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.metrics
    }

    pub fn people(&self) -> &Arc<PeopleService> {
        &self.people
    }

    pub fn lens(&self) -> &Arc<LensComputer> {
        &self.lens
    }

    pub fn checkbacks(&self) -> &Arc<CheckbackScheduler> {
        &self.checkbacks
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /// A fresh dispatcher worker wired to checkback scheduling and the
    /// event bus. Each worker keeps its own rate-limit buckets.
    pub fn build_dispatcher(&self) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.config.queue.clone(),
        );
        dispatcher.add_listener(Arc::clone(&self.checkbacks) as Arc<dyn PublishListener>);
        dispatcher.add_listener(Arc::new(BusListener {
            bus: self.event_bus.clone(),
        }));
        dispatcher
    }

    /// A checkback worker wired to the people graph via the comment bridge.
    pub fn build_checkback_worker(&self) -> CheckbackWorker {
        CheckbackWorker::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.config.checkback.clone(),
            self.config.queue.fetch_metrics_timeout_secs,
            Arc::clone(&self.metrics),
        )
        .with_comment_sink(Arc::new(CommentBridge::new(Arc::clone(&self.people))))
    }

    /// Run all worker loops until shutdown, then join them.
    pub async fn run(&self) -> Result<()> {
        info!(
            workers = self.config.daemon.workers,
            platforms = ?self.registry.platforms(),
            "postflow daemon starting"
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        for worker_id in 0..self.config.daemon.workers.max(1) {
            let dispatcher = self.build_dispatcher();
            let period = Duration::from_secs(self.config.daemon.dispatch_interval_secs.max(1));
            let mut rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = dispatcher.run_batch().await {
                                error!(worker_id, error = %e, "dispatch batch failed");
                            }
                        }
                    }
                }
                info!(worker_id, "dispatcher stopped");
            }));
        }

        {
            let reaper = Reaper::new(Arc::clone(&self.store), Arc::clone(&self.clock));
            let period = Duration::from_secs(self.config.daemon.reaper_interval_secs.max(1));
            let mut rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = reaper.run_sweep().await {
                                error!(error = %e, "reaper sweep failed");
                            }
                        }
                    }
                }
                info!("reaper stopped");
            }));
        }

        {
            let worker = self.build_checkback_worker();
            let bus = self.event_bus.clone();
            let period = Duration::from_secs(self.config.checkback.poll_interval_secs.max(1));
            let mut rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = ticker.tick() => {
                            match worker.run_batch().await {
                                Ok(report) if report.claimed > 0 => {
                                    bus.publish(PostEvent::CheckbacksProcessed {
                                        succeeded: report.succeeded,
                                        failed: report.failed,
                                        skipped: report.skipped,
                                    });
                                }
                                Ok(_) => {}
                                Err(e) => error!(error = %e, "checkback batch failed"),
                            }
                        }
                    }
                }
                info!("checkback worker stopped");
            }));
        }

        {
            let lens = Arc::clone(&self.lens);
            let bus = self.event_bus.clone();
            let period =
                Duration::from_secs(self.config.daemon.lens_refresh_interval_secs.max(1));
            let mut rx = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = ticker.tick() => {
                            match lens.recompute_all_active().await {
                                Ok(updated) => {
                                    bus.publish(PostEvent::LensesRecomputed { updated });
                                }
                                Err(e) => error!(error = %e, "lens refresh failed"),
                            }
                        }
                    }
                }
                info!("lens refresher stopped");
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked");
            }
        }
        info!("postflow daemon stopped");
        Ok(())
    }
}
