//! Event dispatcher
//!
//! Decodes dispatch frames into typed events, tracks the sequence number,
//! and fans each event out to the handlers registered for its name.
//! Handlers run on their own tasks so a slow handler never stalls the
//! socket read loop.

use crate::events::{DispatchEvent, GatewayEventType};
use crate::protocol::GatewayMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    pub shard_id: u32,
    pub sequence: u64,
}

/// Handler for dispatch events
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: EventContext, event: Arc<DispatchEvent>);
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(EventContext, Arc<DispatchEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, ctx: EventContext, event: Arc<DispatchEvent>) {
        (self)(ctx, event).await;
    }
}

/// Handlers keyed by event name, fixed at construction
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    by_name: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    any: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Registry with no handlers
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Handlers that receive an event named `name`
    pub fn handlers_for<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Arc<dyn EventHandler>> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .chain(self.any.iter())
    }

    #[must_use]
    pub fn has_handlers(&self, name: &str) -> bool {
        !self.any.is_empty() || self.by_name.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum::<usize>() + self.any.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("events", &names)
            .field("any", &self.any.len())
            .finish()
    }
}

/// Builder for [`HandlerRegistry`]
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Handle events named `name`, including names this client has no typed model for
    #[must_use]
    pub fn on(mut self, name: impl Into<String>, handler: impl EventHandler) -> Self {
        self.registry
            .by_name
            .entry(name.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_event(self, event: GatewayEventType, handler: impl EventHandler) -> Self {
        self.on(event.as_str(), handler)
    }

    /// Handle every dispatch event
    #[must_use]
    pub fn on_any(mut self, handler: impl EventHandler) -> Self {
        self.registry.any.push(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        self.registry
    }
}

/// Per-session dispatcher
#[derive(Debug)]
pub struct EventDispatcher {
    shard_id: u32,
    registry: Arc<HandlerRegistry>,
    /// Last sequence seen; 0 means none (the server starts at 1)
    sequence: AtomicU64,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(shard_id: u32, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            shard_id,
            registry,
            sequence: AtomicU64::new(0),
        }
    }

    /// Decode a raw text frame into an envelope
    pub fn decode(raw: &str) -> Result<GatewayMessage, serde_json::Error> {
        GatewayMessage::from_json(raw)
    }

    /// Handle a Dispatch frame
    ///
    /// Updates the sequence before anything else, so a payload that fails
    /// to decode still advances it. Returns the decoded event for the
    /// session to inspect.
    pub fn dispatch(&self, message: GatewayMessage) -> Result<Arc<DispatchEvent>, serde_json::Error> {
        if let Some(seq) = message.s {
            self.observe_sequence(seq);
        }

        let name = message.t.unwrap_or_default();
        let event = Arc::new(DispatchEvent::decode(&name, message.d)?);
        let ctx = EventContext {
            shard_id: self.shard_id,
            sequence: self.sequence.load(Ordering::Acquire),
        };

        if !self.registry.has_handlers(&name) {
            tracing::trace!(shard_id = self.shard_id, event = %name, "No handlers registered");
            return Ok(event);
        }

        for handler in self.registry.handlers_for(&name) {
            let handler = Arc::clone(handler);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                handler.handle(ctx, event).await;
            });
        }

        Ok(event)
    }

    /// Record a sequence number; never moves backwards
    pub fn observe_sequence(&self, seq: u64) {
        let previous = self.sequence.fetch_max(seq, Ordering::AcqRel);
        if seq < previous {
            tracing::debug!(
                shard_id = self.shard_id,
                seq,
                current = previous,
                "Ignoring out-of-order sequence"
            );
        }
    }

    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self.sequence.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    /// Forget the sequence; used when the session is invalidated
    pub fn reset(&self) {
        self.sequence.store(0, Ordering::Release);
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }
}
