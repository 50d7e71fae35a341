//! Scheduler: repeating per-mint price jobs with ban propagation

pub mod queue;

pub use queue::{job_id_for, mint_of, JobQueue, RepeatSpec};

use crate::cache::{keys, RedisCache};
use crate::config::SchedulerConfig;
use crate::core::{PulseError, PulseResult};
use crate::pricing::PricingEngine;
use crate::store::PostgresStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Idle sleep between queue polls when nothing is due.
const IDLE_POLL: Duration = Duration::from_millis(100);

pub struct Scheduler {
    queue: Arc<JobQueue>,
    engine: Arc<PricingEngine>,
    cache: Arc<RedisCache>,
    store: Arc<PostgresStore>,
    config: SchedulerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<JobQueue>,
        engine: Arc<PricingEngine>,
        cache: Arc<RedisCache>,
        store: Arc<PostgresStore>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            engine,
            cache,
            store,
            config,
            shutdown_tx,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub async fn is_banned(&self, mint: &str) -> bool {
        self.cache
            .exists(&keys::invalid_token(mint))
            .await
            .unwrap_or(false)
    }

    async fn refresh_job_gauge(&self) {
        if let Ok(count) = self.queue.count_repeating().await {
            crate::metrics::global().active_jobs.set(count);
        }
    }

    /// Register the repeating price job for a mint.
    ///
    /// Always obliterates first, so duplicate enrolments and degraded queue
    /// state both collapse to exactly one registration.
    pub async fn enrol(&self, mint: &str) -> PulseResult<()> {
        if self.is_banned(mint).await {
            return Err(PulseError::invalid_mint("mint is banned"));
        }
        self.engine.validator().validate(mint).await?;

        let job_id = job_id_for(mint);
        self.queue.obliterate(&job_id).await;
        self.queue
            .add_repeating(
                &job_id,
                &RepeatSpec {
                    mint: mint.to_string(),
                    period_ms: self.config.poll_ms,
                },
                Utc::now().timestamp_millis(),
            )
            .await?;

        info!(mint, period_ms = self.config.poll_ms, "mint enrolled");
        self.refresh_job_gauge().await;
        Ok(())
    }

    /// Remove all queue traces of a mint's job
    pub async fn obliterate(&self, mint: &str) {
        self.queue.obliterate(&job_id_for(mint)).await;
        self.refresh_job_gauge().await;
    }

    /// Ban a mint, cancel its job, and purge its persisted state.
    ///
    /// The ban key expires after the configured TTL, after which the mint
    /// may be readmitted through ordinary validation.
    pub async fn ban_and_remove(&self, mint: &str) {
        if let Err(e) = self
            .cache
            .set_with_ttl(&keys::invalid_token(mint), "1", self.config.ban_ttl_secs)
            .await
        {
            error!(mint, error = %e, "failed to set ban key");
        }

        self.obliterate(mint).await;

        if let Err(e) = self.store.purge_mint(mint).await {
            error!(mint, error = %e, "failed to purge banned mint");
        }

        warn!(mint, ttl_secs = self.config.ban_ttl_secs, "mint banned and removed");
    }

    /// Reconcile persisted state with the queue on startup, then keep a
    /// periodic sweep running ban-driven purges.
    pub async fn bootstrap(self: Arc<Self>) -> PulseResult<()> {
        let mints = self.store.latest_mints().await?;
        info!(count = mints.len(), "bootstrapping repeating jobs");

        for mint in mints {
            if self.is_banned(&mint).await {
                debug!(mint = %mint, "skipping banned mint at bootstrap");
                continue;
            }
            match self.enrol(&mint).await {
                Ok(()) => {}
                Err(PulseError::InvalidMint { reason }) => {
                    warn!(mint = %mint, reason = %reason, "bootstrap dropped invalid mint");
                    self.ban_and_remove(&mint).await;
                }
                Err(e) => warn!(mint = %mint, error = %e, "bootstrap enrol failed, will retry on sweep"),
            }
        }

        let sweeper = self.clone();
        tokio::spawn(async move {
            let mut shutdown = sweeper.shutdown_tx.subscribe();
            let mut ticker =
                tokio::time::interval(Duration::from_secs(sweeper.config.sweep_interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweeper.sweep().await,
                    _ = shutdown.changed() => break,
                }
            }
            debug!("sweep task stopped");
        });

        Ok(())
    }

    /// Re-run ban-driven purges against the persistent store
    async fn sweep(&self) {
        let mints = match self.store.latest_mints().await {
            Ok(mints) => mints,
            Err(e) => {
                warn!(error = %e, "sweep could not list mints");
                return;
            }
        };

        for mint in mints {
            if self.is_banned(&mint).await {
                info!(mint = %mint, "sweep purging banned mint");
                self.obliterate(&mint).await;
                if let Err(e) = self.store.purge_mint(&mint).await {
                    warn!(mint = %mint, error = %e, "sweep purge failed");
                }
            }
        }
    }

    /// Spawn the worker pool
    pub fn start_workers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker| {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.worker_loop(worker).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize) {
        debug!(worker, "worker started");
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let claim = self.queue.claim_due(Utc::now().timestamp_millis()).await;
            match claim {
                Ok(Some((job_id, spec))) => self.run_tick(&job_id, &spec.mint).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Err(e) => {
                    warn!(worker, error = %e, "queue claim failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        debug!(worker, "worker stopped");
    }

    /// One invocation of a claimed price job
    async fn run_tick(&self, job_id: &str, mint: &str) {
        let metrics = crate::metrics::global();
        metrics.ticks_total.inc();
        let timer = metrics.tick_duration.start_timer();

        // A ban that landed after scheduling wins over the pending tick.
        if self.is_banned(mint).await {
            self.obliterate(mint).await;
            timer.observe_duration();
            return;
        }

        match self.engine.update_mint(mint).await {
            Ok(snapshot) => {
                debug!(mint, price_usd = snapshot.price_usd, "tick committed");
                if let Err(e) = self
                    .queue
                    .complete(job_id, true, Utc::now().timestamp_millis())
                    .await
                {
                    warn!(job_id, error = %e, "failed to reschedule job");
                }
            }
            Err(PulseError::InvalidMint { reason }) => {
                metrics.ticks_invalid.inc();
                warn!(mint, reason = %reason, "tick found invalid mint");
                // No retry and no reschedule: the ban removes the job.
                self.ban_and_remove(mint).await;
            }
            Err(e) => {
                metrics.ticks_failed.inc();
                debug!(mint, error = %e, "tick failed, continuing on next occurrence");
                if let Err(e) = self
                    .queue
                    .complete(job_id, false, Utc::now().timestamp_millis())
                    .await
                {
                    warn!(job_id, error = %e, "failed to reschedule job");
                }
            }
        }

        timer.observe_duration();
    }

    /// Signal every worker and the sweep task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
