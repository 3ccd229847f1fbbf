//! Gateway session
//!
//! A [`GatewaySession`] is the handle to one shard's connection. The
//! connection itself is driven by a background task (see `driver`) that
//! owns the socket, the heartbeat monitor, and every state transition.
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──Hello──> Identifying ──READY──> Connected
//!                                  │                Resuming ───RESUMED─┘     │
//!                                  └──────────── Reconnecting <───────────────┘
//! ```

mod backoff;
mod config;
mod driver;
mod identify;
mod state;

pub use backoff::ExponentialBackoff;
pub use config::{normalize_gateway_url, SessionConfig, GATEWAY_VERSION};
pub use identify::{IdentifyLimiter, DEFAULT_IDENTIFY_INTERVAL};
pub use state::SessionState;

use crate::dispatcher::{EventDispatcher, HandlerRegistry};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{
    GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload, VoiceStateUpdatePayload,
};
use crate::shard::{ShardEvent, ShardEventKind};
use chat_rest::{RestConfig, RestDispatcher};
use driver::{Command, Driver};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Commands an application may send per minute on one connection
///
/// The gateway allows 120; the rest is left for heartbeats.
const COMMANDS_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(115) {
    Some(limit) => limit,
    None => unreachable!(),
};

#[derive(Debug, Default)]
struct ResumeInfo {
    session_id: Option<String>,
    resume_url: Option<String>,
}

/// State shared between the session handle and its driver task
pub(crate) struct SessionShared {
    shard_id: u32,
    shard_count: u32,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    resume: Mutex<ResumeInfo>,
    dispatcher: EventDispatcher,
    latency: Mutex<Option<Duration>>,
    identify: Arc<IdentifyLimiter>,
    events: Option<mpsc::UnboundedSender<ShardEvent>>,
    fatal: Mutex<Option<(u16, String)>>,
}

impl SessionShared {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(
                shard_id = self.shard_id,
                from = %previous,
                to = %state,
                "Session state changed"
            );
        }
    }

    fn emit(&self, kind: ShardEventKind) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is listening; the session keeps running
            let _ = events.send(ShardEvent::new(self.shard_id, kind));
        }
    }

    fn can_resume(&self) -> bool {
        self.resume.lock().session_id.is_some() && self.dispatcher.sequence().is_some()
    }

    fn session_id(&self) -> Option<String> {
        self.resume.lock().session_id.clone()
    }

    fn resume_url(&self) -> Option<String> {
        self.resume.lock().resume_url.clone()
    }

    fn store_session(&self, session_id: String, resume_url: Option<String>) {
        let mut resume = self.resume.lock();
        resume.session_id = Some(session_id);
        resume.resume_url = resume_url;
    }

    fn clear_session(&self) {
        *self.resume.lock() = ResumeInfo::default();
        self.dispatcher.reset();
    }
}

#[derive(Default)]
struct Control {
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl Control {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Handle to one shard's gateway connection
pub struct GatewaySession {
    shared: Arc<SessionShared>,
    rest: Option<RestDispatcher>,
    control: Mutex<Control>,
    command_limiter: DefaultDirectRateLimiter,
}

impl GatewaySession {
    #[must_use]
    pub fn builder(shard_id: u32, shard_count: u32, config: SessionConfig) -> GatewaySessionBuilder {
        GatewaySessionBuilder {
            shard_id,
            shard_count: shard_count.max(1),
            config,
            registry: None,
            rest: None,
            identify: None,
            events: None,
        }
    }

    /// Connect and wait for READY or RESUMED
    ///
    /// Transient failures are retried in the background; the returned error
    /// is the reason the session stopped before becoming ready.
    pub async fn connect(&self) -> GatewayResult<()> {
        if let Some((code, reason)) = self.shared.fatal.lock().clone() {
            return Err(GatewayError::FatallyClosed { code, reason });
        }
        if self.control.lock().is_running() {
            return Err(GatewayError::AlreadyRunning);
        }

        let url = self.resolve_url().await?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mut control = self.control.lock();
            if control.is_running() {
                return Err(GatewayError::AlreadyRunning);
            }
            let driver = Driver::new(Arc::clone(&self.shared), url, commands_rx, ready_tx);
            control.commands = Some(commands_tx);
            control.task = Some(tokio::spawn(driver.run()));
        }

        ready_rx
            .await
            .unwrap_or(Err(GatewayError::CommandChannelClosed))
    }

    async fn resolve_url(&self) -> GatewayResult<String> {
        let raw = match &self.shared.config.gateway_url {
            Some(url) => url.clone(),
            None => {
                let rest = match &self.rest {
                    Some(rest) => rest.clone(),
                    None => RestDispatcher::anonymous(RestConfig::default())?,
                };
                rest.get_gateway().await?.url
            }
        };
        normalize_gateway_url(&raw, self.shared.config.version)
    }

    /// Close with 1000 and stop; the session is discarded server side
    ///
    /// Ends in [`SessionState::Disconnected`] whatever the driver was doing,
    /// unless the session had already closed fatally.
    pub async fn disconnect(&self) {
        let (commands, task) = {
            let mut control = self.control.lock();
            (control.commands.take(), control.task.take())
        };

        if let Some(commands) = commands {
            let _ = commands.send(Command::Disconnect);
        }
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(shard_id = self.shared.shard_id, error = %error, "Session task failed");
            }
        }

        if self.state() != SessionState::FatallyClosed {
            self.shared.clear_session();
            self.shared.set_state(SessionState::Disconnected);
        }
        tracing::info!(shard_id = self.shared.shard_id, "Session disconnected");
    }

    /// Send an application command, waiting for the per-connection send budget
    pub async fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        if self.state() != SessionState::Connected {
            return Err(GatewayError::NotConnected);
        }
        self.command_limiter.until_ready().await;

        let commands = self
            .control
            .lock()
            .commands
            .clone()
            .ok_or(GatewayError::NotConnected)?;
        commands
            .send(Command::Send(message))
            .map_err(|_| GatewayError::CommandChannelClosed)
    }

    pub async fn update_presence(&self, presence: &PresenceUpdatePayload) -> GatewayResult<()> {
        self.send(GatewayMessage::presence_update(presence)?).await
    }

    pub async fn request_guild_members(
        &self,
        request: &RequestGuildMembersPayload,
    ) -> GatewayResult<()> {
        self.send(GatewayMessage::request_guild_members(request)?)
            .await
    }

    pub async fn update_voice_state(&self, update: &VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.send(GatewayMessage::voice_state_update(update)?).await
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shared.shard_id
    }

    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shared.shard_count
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.shared.dispatcher.sequence()
    }

    #[must_use]
    pub fn resume_gateway_url(&self) -> Option<String> {
        self.shared.resume_url()
    }

    /// Round trip of the last acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        *self.shared.latency.lock()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.control.lock().is_running()
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("shard", &[self.shared.shard_id, self.shared.shard_count])
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish_non_exhaustive()
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Builder for [`GatewaySession`]
pub struct GatewaySessionBuilder {
    shard_id: u32,
    shard_count: u32,
    config: SessionConfig,
    registry: Option<Arc<HandlerRegistry>>,
    rest: Option<RestDispatcher>,
    identify: Option<Arc<IdentifyLimiter>>,
    events: Option<mpsc::UnboundedSender<ShardEvent>>,
}

impl GatewaySessionBuilder {
    #[must_use]
    pub fn handlers(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Dispatcher used to resolve the gateway URL
    #[must_use]
    pub fn rest(mut self, rest: RestDispatcher) -> Self {
        self.rest = Some(rest);
        self
    }

    /// Share identify pacing with other sessions of the same bot
    #[must_use]
    pub fn identify_limiter(mut self, limiter: Arc<IdentifyLimiter>) -> Self {
        self.identify = Some(limiter);
        self
    }

    /// Re-emit lifecycle and dispatch events on this channel
    #[must_use]
    pub fn events(mut self, events: mpsc::UnboundedSender<ShardEvent>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn build(self) -> GatewaySession {
        let registry = self.registry.unwrap_or_default();
        let (state, _) = watch::channel(SessionState::Disconnected);

        let shared = SessionShared {
            shard_id: self.shard_id,
            shard_count: self.shard_count,
            config: self.config,
            state,
            resume: Mutex::new(ResumeInfo::default()),
            dispatcher: EventDispatcher::new(self.shard_id, registry),
            latency: Mutex::new(None),
            identify: self.identify.unwrap_or_default(),
            events: self.events,
            fatal: Mutex::new(None),
        };

        GatewaySession {
            shared: Arc::new(shared),
            rest: self.rest,
            control: Mutex::new(Control::default()),
            command_limiter: RateLimiter::direct(Quota::per_minute(COMMANDS_PER_MINUTE)),
        }
    }
}
