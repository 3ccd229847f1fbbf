//! Shard coordinator
//!
//! Owns every session of a bot, starts them in identify-sized batches, and
//! funnels their events onto one channel tagged with the shard id.

use super::events::ShardEvent;
use crate::dispatcher::HandlerRegistry;
use crate::error::{GatewayError, GatewayResult};
use crate::session::{GatewaySession, IdentifyLimiter, SessionConfig, SessionState};
use chat_common::ClientConfig;
use chat_core::Snowflake;
use chat_rest::RestDispatcher;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub session: SessionConfig,
    /// Overrides the recommended shard count
    pub shard_count: Option<u32>,
    /// Run only these shards; all shards when `None`
    pub shard_ids: Option<Vec<u32>>,
    /// Overrides the reported identify concurrency
    pub max_concurrency: Option<u32>,
    /// How long one batch may take to become ready
    pub ready_timeout: Duration,
    pub identify_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            shard_count: None,
            shard_ids: None,
            max_concurrency: None,
            ready_timeout: Duration::from_secs(60),
            identify_interval: crate::session::DEFAULT_IDENTIFY_INTERVAL,
        }
    }
}

impl From<&ClientConfig> for CoordinatorConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            session: SessionConfig::from(config),
            shard_count: config.shards.shard_count,
            shard_ids: config.shards.shard_ids.clone(),
            max_concurrency: config.shards.max_concurrency,
            ready_timeout: Duration::from_secs(config.shards.ready_timeout_secs),
            identify_interval: Duration::from_millis(config.shards.identify_interval_ms),
        }
    }
}

/// A shard that did not become ready during startup
#[derive(Debug)]
pub struct ShardStartError {
    pub shard_id: u32,
    pub error: GatewayError,
}

impl std::fmt::Display for ShardStartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard {}: {}", self.shard_id, self.error)
    }
}

/// Outcome of starting a set of shards
#[derive(Debug, Default)]
pub struct StartReport {
    pub ready: Vec<u32>,
    pub failed: Vec<ShardStartError>,
}

impl StartReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Whether any shard failed with an error retrying cannot fix
    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.failed.iter().any(|failure| failure.error.is_fatal())
    }
}

/// Supervises the sessions of one bot
pub struct ShardCoordinator {
    config: CoordinatorConfig,
    rest: RestDispatcher,
    registry: Arc<HandlerRegistry>,
    sessions: BTreeMap<u32, Arc<GatewaySession>>,
    shard_count: u32,
    events_tx: mpsc::UnboundedSender<ShardEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ShardEvent>>,
}

impl ShardCoordinator {
    #[must_use]
    pub fn new(config: CoordinatorConfig, rest: RestDispatcher, registry: HandlerRegistry) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            rest,
            registry: Arc::new(registry),
            sessions: BTreeMap::new(),
            shard_count: 0,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Take the receiver of all shard events; `None` after the first call
    ///
    /// Must be called before starting shards for their events to be forwarded.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ShardEvent>> {
        self.events_rx.take()
    }

    /// Resolve the gateway through REST and start the configured shards
    pub async fn connect(&mut self) -> GatewayResult<StartReport> {
        if !self.sessions.is_empty() {
            return Err(GatewayError::AlreadyRunning);
        }

        let info = self.rest.get_gateway_bot().await?;

        let total = self.config.shard_count.unwrap_or(info.shards).max(1);
        let max_concurrency = self
            .config
            .max_concurrency
            .unwrap_or(info.session_start_limit.max_concurrency)
            .max(1);
        let shard_ids = self.selected_shards(total);
        let required = shard_ids.len() as u32;

        let limit = info.session_start_limit;
        if limit.remaining < required {
            return Err(GatewayError::SessionStartLimit {
                remaining: limit.remaining,
                required,
                reset_after: limit.reset_after,
            });
        }

        if self.config.session.gateway_url.is_none() {
            self.config.session.gateway_url = Some(info.url);
        }

        tracing::info!(
            shards = total,
            running = required,
            max_concurrency,
            remaining_starts = limit.remaining,
            "Starting shards"
        );
        self.start_shards(total, max_concurrency, shard_ids).await
    }

    /// Create the configured sessions out of `total` and start them in
    /// batches of `max_concurrency`
    ///
    /// Each batch must become ready (or fail) before the next one starts. A
    /// failed shard is reported and does not hold up the others.
    pub async fn start(&mut self, total: u32, max_concurrency: u32) -> GatewayResult<StartReport> {
        let total = total.max(1);
        let shard_ids = self.selected_shards(total);
        self.start_shards(total, max_concurrency, shard_ids).await
    }

    /// Configured shard ids below `total`, sorted and deduplicated
    fn selected_shards(&self, total: u32) -> Vec<u32> {
        match &self.config.shard_ids {
            Some(ids) => {
                let mut ids: Vec<u32> = ids.iter().copied().filter(|id| *id < total).collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            }
            None => (0..total).collect(),
        }
    }

    async fn start_shards(
        &mut self,
        total: u32,
        max_concurrency: u32,
        shard_ids: Vec<u32>,
    ) -> GatewayResult<StartReport> {
        if !self.sessions.is_empty() {
            return Err(GatewayError::AlreadyRunning);
        }

        let total = total.max(1);
        let max_concurrency = max_concurrency.max(1);
        self.shard_count = total;

        let identify = Arc::new(IdentifyLimiter::new(
            max_concurrency,
            self.config.identify_interval,
        ));

        // Events are only forwarded once someone holds the receiver
        let forward_events = self.events_rx.is_none();
        for &shard_id in &shard_ids {
            let mut builder = GatewaySession::builder(shard_id, total, self.config.session.clone())
                .handlers(Arc::clone(&self.registry))
                .rest(self.rest.clone())
                .identify_limiter(Arc::clone(&identify));
            if forward_events {
                builder = builder.events(self.events_tx.clone());
            }
            self.sessions.insert(shard_id, Arc::new(builder.build()));
        }

        let mut report = StartReport::default();
        let ready_timeout = self.config.ready_timeout;

        for batch in shard_ids.chunks(max_concurrency as usize) {
            tracing::debug!(shards = ?batch, "Starting shard batch");

            let starts = batch.iter().filter_map(|shard_id| {
                let session = Arc::clone(self.sessions.get(shard_id)?);
                Some(async move {
                    let result = tokio::time::timeout(ready_timeout, session.connect())
                        .await
                        .unwrap_or_else(|_| Err(GatewayError::ReadyTimeout(ready_timeout.as_secs())));
                    (session.shard_id(), result)
                })
            });

            for (shard_id, result) in join_all(starts).await {
                match result {
                    Ok(()) => {
                        tracing::info!(shard_id, "Shard ready");
                        report.ready.push(shard_id);
                    }
                    Err(error) => {
                        tracing::error!(shard_id, error = %error, "Shard failed to start");
                        report.failed.push(ShardStartError { shard_id, error });
                    }
                }
            }
        }

        tracing::info!(
            ready = report.ready.len(),
            failed = report.failed.len(),
            "Shard startup finished"
        );
        Ok(report)
    }

    /// Disconnect and drop every session; `connect` may be called again afterwards
    pub async fn disconnect(&mut self) {
        join_all(self.sessions.values().map(|session| session.disconnect())).await;
        tracing::info!(shards = self.sessions.len(), "All shards disconnected");
        self.sessions.clear();
        self.shard_count = 0;
    }

    /// Shard that receives events for `guild_id`
    #[must_use]
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> u32 {
        guild_id.shard_id(self.shard_count.max(1))
    }

    #[must_use]
    pub fn session(&self, shard_id: u32) -> Option<&Arc<GatewaySession>> {
        self.sessions.get(&shard_id)
    }

    /// Session handling `guild_id`, if that shard runs in this process
    #[must_use]
    pub fn session_for_guild(&self, guild_id: Snowflake) -> Option<&Arc<GatewaySession>> {
        self.session(self.shard_for_guild(guild_id))
    }

    #[must_use]
    pub fn states(&self) -> BTreeMap<u32, SessionState> {
        self.sessions
            .iter()
            .map(|(id, session)| (*id, session.state()))
            .collect()
    }

    #[must_use]
    pub fn latencies(&self) -> BTreeMap<u32, Option<Duration>> {
        self.sessions
            .iter()
            .map(|(id, session)| (*id, session.latency()))
            .collect()
    }

    /// Total shard count used for Identify
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for ShardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCoordinator")
            .field("shard_count", &self.shard_count)
            .field("sessions", &self.states())
            .finish_non_exhaustive()
    }
}
