//! Heartbeat monitor
//!
//! A dedicated task ticks at the interval announced in Hello and asks the
//! session driver to send a heartbeat. If the previous beat was never
//! acknowledged when the next tick fires, the connection is considered
//! zombied and the task reports that instead and exits.
//!
//! ```text
//! jitter in [0, interval) ──> Beat ──> interval ──> Beat ──> ... ──> Zombie
//! ```

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest cadence the monitor will tick at
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Signal from the heartbeat task to the session driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a heartbeat now
    Beat,
    /// The previous heartbeat was never acknowledged
    Zombie,
}

#[derive(Debug, Default)]
struct Timing {
    last_sent_at: Option<Instant>,
    last_ack_at: Option<Instant>,
    pending_ack: bool,
}

/// Tracks heartbeat cadence and acknowledgements for one connection
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    timing: Arc<Mutex<Timing>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `interval`, after a random delay in `[0, interval)`
    pub fn start(&mut self, interval: Duration, events: mpsc::UnboundedSender<HeartbeatEvent>) {
        let jitter = jitter_for(interval);
        self.start_with_jitter(interval, jitter, events);
    }

    /// Start ticking with an explicit first delay
    pub fn start_with_jitter(
        &mut self,
        interval: Duration,
        jitter: Duration,
        events: mpsc::UnboundedSender<HeartbeatEvent>,
    ) {
        self.stop();
        *self.timing.lock() = Timing::default();
        let interval = interval.max(MIN_INTERVAL);

        let timing = Arc::clone(&self.timing);
        tracing::debug!(
            interval_ms = interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "Heartbeat started"
        );

        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(jitter).await;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let event = {
                    let mut timing = timing.lock();
                    if timing.pending_ack {
                        HeartbeatEvent::Zombie
                    } else {
                        timing.pending_ack = true;
                        timing.last_sent_at = Some(Instant::now());
                        HeartbeatEvent::Beat
                    }
                };

                if events.send(event).is_err() || event == HeartbeatEvent::Zombie {
                    break;
                }
            }
        }));
    }

    /// Record a heartbeat sent outside the regular cadence
    ///
    /// Does not arm `pending_ack`; only scheduled beats can zombie the connection.
    pub fn record_sent(&self) {
        self.timing.lock().last_sent_at = Some(Instant::now());
    }

    /// Record a heartbeat ACK (op 11)
    pub fn acknowledge(&self) {
        let mut timing = self.timing.lock();
        timing.pending_ack = false;
        timing.last_ack_at = Some(Instant::now());
    }

    /// Stop the heartbeat task; safe to call when not started
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Heartbeat stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    #[must_use]
    pub fn pending_ack(&self) -> bool {
        self.timing.lock().pending_ack
    }

    #[must_use]
    pub fn last_sent_at(&self) -> Option<Instant> {
        self.timing.lock().last_sent_at
    }

    #[must_use]
    pub fn last_ack_at(&self) -> Option<Instant> {
        self.timing.lock().last_ack_at
    }

    /// Round trip of the most recent acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        let timing = self.timing.lock();
        match (timing.last_sent_at, timing.last_ack_at) {
            (Some(sent), Some(ack)) if ack >= sent => Some(ack - sent),
            _ => None,
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn jitter_for(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}
