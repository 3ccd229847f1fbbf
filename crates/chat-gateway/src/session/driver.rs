//! Session driver
//!
//! One task per running session. It owns the socket and the heartbeat
//! monitor and is the only code that changes the session state, so the
//! state machine is never re-entered concurrently. The task suspends only
//! while awaiting a frame, a heartbeat tick, an identify slot, a reconnect
//! delay, or a command from the session handle.

use super::backoff::ExponentialBackoff;
use super::config::normalize_gateway_url;
use super::state::SessionState;
use super::SessionShared;
use crate::error::{GatewayError, GatewayResult};
use crate::events::DispatchEvent;
use crate::heartbeat::{HeartbeatEvent, HeartbeatMonitor};
use crate::protocol::{
    classify, CloseAction, CloseCode, GatewayMessage, HelloPayload, IdentifyPayload, OpCode,
    ResumePayload, CLOSE_NORMAL, CLOSE_RESUMABLE,
};
use crate::shard::ShardEventKind;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Request from the session handle to its driver
#[derive(Debug)]
pub(super) enum Command {
    Send(GatewayMessage),
    Disconnect,
}

/// How one connection attempt ended
#[derive(Debug)]
enum ConnectionEnd {
    /// The caller asked to stop
    Shutdown,
    /// Open a new socket; `resume` keeps the session for a Resume
    Reconnect { resume: bool },
    /// Stop and report; the session is gone
    Invalidated(GatewayError),
    /// Stop for good
    Fatal { code: u16, reason: String },
}

pub(super) struct Driver {
    shared: Arc<SessionShared>,
    url: String,
    commands: mpsc::UnboundedReceiver<Command>,
    heartbeat: HeartbeatMonitor,
    backoff: ExponentialBackoff,
    ready_tx: Option<oneshot::Sender<GatewayResult<()>>>,
    attempt: u32,
}

impl Driver {
    pub(super) fn new(
        shared: Arc<SessionShared>,
        url: String,
        commands: mpsc::UnboundedReceiver<Command>,
        ready_tx: oneshot::Sender<GatewayResult<()>>,
    ) -> Self {
        let backoff = ExponentialBackoff::new(
            shared.config.reconnect_base,
            shared.config.reconnect_max,
        );
        Self {
            shared,
            url,
            commands,
            heartbeat: HeartbeatMonitor::new(),
            backoff,
            ready_tx: Some(ready_tx),
            attempt: 0,
        }
    }

    fn shard_id(&self) -> u32 {
        self.shared.shard_id
    }

    pub(super) async fn run(mut self) {
        loop {
            let resume = self.shared.can_resume();
            let url = if resume {
                self.shared
                    .resume_url()
                    .unwrap_or_else(|| self.url.clone())
            } else {
                self.url.clone()
            };

            self.shared.set_state(SessionState::Connecting);
            self.shared.emit(ShardEventKind::Connecting);

            let end = self.connect_once(&url, resume).await;
            self.heartbeat.stop();

            match end {
                ConnectionEnd::Shutdown => {
                    self.shared.clear_session();
                    self.shared.set_state(SessionState::Disconnected);
                    self.shared.emit(ShardEventKind::Disconnected { reason: None });
                    self.notify_ready(Err(GatewayError::Shutdown));
                    return;
                }
                ConnectionEnd::Reconnect { resume } => {
                    if !resume {
                        self.shared.clear_session();
                    }
                    self.shared.set_state(SessionState::Reconnecting);
                    self.shared.emit(ShardEventKind::Reconnecting { resume });

                    let delay = self.backoff.delay(self.attempt);
                    self.attempt = self.attempt.saturating_add(1);
                    tracing::info!(
                        shard_id = self.shard_id(),
                        attempt = self.attempt,
                        delay_ms = delay.as_millis() as u64,
                        resume,
                        "Reconnecting"
                    );

                    if self.until_shutdown(tokio::time::sleep(delay)).await.is_none() {
                        self.shared.clear_session();
                        self.shared.set_state(SessionState::Disconnected);
                        self.shared.emit(ShardEventKind::Disconnected { reason: None });
                        self.notify_ready(Err(GatewayError::Shutdown));
                        return;
                    }
                }
                ConnectionEnd::Invalidated(error) => {
                    tracing::error!(shard_id = self.shard_id(), error = %error, "Session invalidated");
                    self.shared.clear_session();
                    self.shared.set_state(SessionState::Disconnected);
                    self.shared.emit(ShardEventKind::Disconnected {
                        reason: Some(error.to_string()),
                    });
                    self.notify_ready(Err(error));
                    return;
                }
                ConnectionEnd::Fatal { code, reason } => {
                    tracing::error!(
                        shard_id = self.shard_id(),
                        close_code = code,
                        reason = %reason,
                        "Gateway closed fatally"
                    );
                    self.shared.clear_session();
                    *self.shared.fatal.lock() = Some((code, reason.clone()));
                    self.shared.set_state(SessionState::FatallyClosed);
                    self.shared.emit(ShardEventKind::FatallyClosed {
                        code,
                        reason: reason.clone(),
                    });
                    self.notify_ready(Err(GatewayError::FatallyClosed { code, reason }));
                    return;
                }
            }
        }
    }

    /// Run one socket from open to close
    async fn connect_once(&mut self, url: &str, resume: bool) -> ConnectionEnd {
        tracing::debug!(shard_id = self.shard_id(), url, resume, "Opening gateway socket");

        let Some(connected) = self.until_shutdown(connect_async(url)).await else {
            return ConnectionEnd::Shutdown;
        };
        let stream = match connected {
            Ok((stream, _response)) => stream,
            Err(error) => {
                tracing::warn!(shard_id = self.shard_id(), error = %error, "Gateway connect failed");
                return ConnectionEnd::Reconnect { resume };
            }
        };
        let (mut sink, mut source) = stream.split();

        let hello_timeout = self.shared.config.hello_timeout;
        let shard_id = self.shard_id();
        let hello = self
            .until_shutdown(tokio::time::timeout(
                hello_timeout,
                read_hello(&mut source, shard_id, resume),
            ))
            .await;
        let hello = match hello {
            None => {
                close(&mut sink, CLOSE_NORMAL).await;
                return ConnectionEnd::Shutdown;
            }
            Some(Err(_elapsed)) => {
                let error = GatewayError::HelloTimeout(hello_timeout.as_millis() as u64);
                tracing::warn!(shard_id = self.shard_id(), error = %error, "No Hello from gateway");
                close(&mut sink, CLOSE_RESUMABLE).await;
                return ConnectionEnd::Reconnect { resume };
            }
            Some(Ok(Err(end))) => return end,
            Some(Ok(Ok(hello))) => hello,
        };
        if hello.heartbeat_interval == 0 {
            tracing::warn!(shard_id = self.shard_id(), "Hello announced a zero heartbeat interval");
            close(&mut sink, CLOSE_RESUMABLE).await;
            return ConnectionEnd::Reconnect { resume };
        }

        tracing::debug!(
            shard_id = self.shard_id(),
            heartbeat_interval = hello.heartbeat_interval,
            "Hello received"
        );
        self.shared.emit(ShardEventKind::Connected);

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::unbounded_channel();
        self.heartbeat
            .start(Duration::from_millis(hello.heartbeat_interval), heartbeat_tx);

        let mut identify_at = None;
        if resume {
            if let Err(end) = self.send_resume(&mut sink).await {
                return end;
            }
        } else {
            identify_at = Some(self.shared.identify.reserve(self.shard_id()));
            self.shared.set_state(SessionState::Identifying);
        }

        loop {
            let identify_deadline = identify_at;
            let identify_due = async move {
                match identify_deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                frame = source.next() => {
                    if let Some(end) = self.handle_frame(frame, &mut sink, &mut identify_at).await {
                        return end;
                    }
                }
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::Beat => {
                        let beat = GatewayMessage::heartbeat(self.shared.dispatcher.sequence());
                        tracing::trace!(shard_id = self.shard_id(), seq = ?beat.d.as_u64(), "Heartbeat");
                        if let Err(end) = self.send(&mut sink, &beat).await {
                            return end;
                        }
                    }
                    HeartbeatEvent::Zombie => {
                        tracing::warn!(shard_id = self.shard_id(), "Heartbeat not acknowledged, connection zombied");
                        close(&mut sink, CLOSE_RESUMABLE).await;
                        return ConnectionEnd::Reconnect { resume: true };
                    }
                },
                () = identify_due => {
                    identify_at = None;
                    if let Err(end) = self.send_identify(&mut sink).await {
                        return end;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        tracing::debug!(shard_id = self.shard_id(), op = %message.op, "Sending command");
                        if let Err(end) = self.send(&mut sink, &message).await {
                            return end;
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        close(&mut sink, CLOSE_NORMAL).await;
                        return ConnectionEnd::Shutdown;
                    }
                },
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tungstenite::Error>>,
        sink: &mut WsSink,
        identify_at: &mut Option<Instant>,
    ) -> Option<ConnectionEnd> {
        let message = match frame {
            None => {
                tracing::warn!(shard_id = self.shard_id(), "Gateway stream ended");
                return Some(ConnectionEnd::Reconnect { resume: true });
            }
            Some(Err(error)) => {
                tracing::warn!(shard_id = self.shard_id(), error = %error, "Gateway socket error");
                return Some(ConnectionEnd::Reconnect { resume: true });
            }
            Some(Ok(message)) => message,
        };

        match message {
            Message::Text(text) => match GatewayMessage::from_json(&text) {
                Ok(message) => self.handle_message(message, sink, identify_at).await,
                Err(error) => {
                    tracing::warn!(shard_id = self.shard_id(), error = %error, "Undecodable gateway frame");
                    None
                }
            },
            Message::Close(frame) => Some(on_close(self.shard_id(), frame)),
            _ => None,
        }
    }

    async fn handle_message(
        &mut self,
        message: GatewayMessage,
        sink: &mut WsSink,
        identify_at: &mut Option<Instant>,
    ) -> Option<ConnectionEnd> {
        match message.op {
            OpCode::Dispatch => {
                match self.shared.dispatcher.dispatch(message) {
                    Ok(event) => {
                        self.on_dispatch(&event);
                        self.shared.emit(ShardEventKind::Dispatch(event));
                    }
                    Err(error) => {
                        tracing::warn!(shard_id = self.shard_id(), error = %error, "Failed to decode dispatch payload");
                    }
                }
                None
            }
            OpCode::Heartbeat => {
                // Server asked for a beat out of cadence
                let beat = GatewayMessage::heartbeat(self.shared.dispatcher.sequence());
                if let Err(end) = self.send(sink, &beat).await {
                    return Some(end);
                }
                self.heartbeat.record_sent();
                None
            }
            OpCode::HeartbeatAck => {
                self.heartbeat.acknowledge();
                let latency = self.heartbeat.latency();
                *self.shared.latency.lock() = latency;
                tracing::trace!(
                    shard_id = self.shard_id(),
                    latency_ms = latency.map(|l| l.as_millis() as u64),
                    "Heartbeat acknowledged"
                );
                None
            }
            OpCode::Reconnect => {
                tracing::info!(shard_id = self.shard_id(), "Gateway requested reconnect");
                close(sink, CLOSE_RESUMABLE).await;
                Some(ConnectionEnd::Reconnect { resume: true })
            }
            OpCode::InvalidSession => {
                if message.as_invalid_session().unwrap_or(false) {
                    let delay = Duration::from_millis(rand::thread_rng().gen_range(1_000..=5_000));
                    tracing::warn!(
                        shard_id = self.shard_id(),
                        delay_ms = delay.as_millis() as u64,
                        "Session invalidated, identifying again"
                    );
                    self.shared.clear_session();
                    *identify_at = Some(
                        self.shared
                            .identify
                            .reserve_after(self.shard_id(), Instant::now() + delay),
                    );
                    self.shared.set_state(SessionState::Identifying);
                    None
                } else {
                    close(sink, CLOSE_NORMAL).await;
                    Some(ConnectionEnd::Invalidated(GatewayError::SessionInvalidated))
                }
            }
            op => {
                tracing::debug!(shard_id = self.shard_id(), op = %op, "Ignoring unexpected op");
                None
            }
        }
    }

    fn on_dispatch(&mut self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Ready(ready) => {
                let resume_url = ready.resume_gateway_url.as_deref().and_then(|url| {
                    normalize_gateway_url(url, self.shared.config.version)
                        .map_err(|error| {
                            tracing::warn!(shard_id = self.shard_id(), error = %error, "Ignoring invalid resume URL");
                        })
                        .ok()
                });
                self.shared
                    .store_session(ready.session_id.clone(), resume_url);
                self.attempt = 0;
                self.shared.set_state(SessionState::Connected);
                tracing::info!(
                    shard_id = self.shard_id(),
                    session_id = %ready.session_id,
                    guilds = ready.guilds.len(),
                    "Ready"
                );
                self.shared.emit(ShardEventKind::Ready {
                    session_id: ready.session_id.clone(),
                });
                self.notify_ready(Ok(()));
            }
            DispatchEvent::Resumed(_) => {
                self.attempt = 0;
                self.shared.set_state(SessionState::Connected);
                tracing::info!(
                    shard_id = self.shard_id(),
                    seq = ?self.shared.dispatcher.sequence(),
                    "Resumed"
                );
                self.shared.emit(ShardEventKind::Resumed);
                self.notify_ready(Ok(()));
            }
            _ => {}
        }
    }

    async fn send_identify(&mut self, sink: &mut WsSink) -> Result<(), ConnectionEnd> {
        let config = &self.shared.config;
        let payload = IdentifyPayload {
            token: config.token.clone(),
            intents: config.intents,
            properties: config.properties.clone(),
            large_threshold: config.large_threshold,
            shard: [self.shared.shard_id, self.shared.shard_count],
            presence: config.presence.clone(),
        };
        let message = GatewayMessage::identify(&payload).map_err(|error| {
            tracing::error!(shard_id = self.shard_id(), error = %error, "Failed to encode Identify");
            ConnectionEnd::Invalidated(error.into())
        })?;

        tracing::info!(
            shard_id = self.shard_id(),
            shard_count = self.shared.shard_count,
            intents = config.intents.bits(),
            "Identifying"
        );
        self.send(sink, &message).await
    }

    async fn send_resume(&mut self, sink: &mut WsSink) -> Result<(), ConnectionEnd> {
        let (Some(session_id), Some(seq)) =
            (self.shared.session_id(), self.shared.dispatcher.sequence())
        else {
            return Err(ConnectionEnd::Reconnect { resume: false });
        };
        let payload = ResumePayload {
            token: self.shared.config.token.clone(),
            session_id,
            seq,
        };
        let message = GatewayMessage::resume(&payload)
            .map_err(|error| ConnectionEnd::Invalidated(error.into()))?;

        tracing::info!(shard_id = self.shard_id(), seq, "Resuming");
        self.shared.set_state(SessionState::Resuming);
        self.send(sink, &message).await
    }

    async fn send(&self, sink: &mut WsSink, message: &GatewayMessage) -> Result<(), ConnectionEnd> {
        let text = message
            .to_json()
            .map_err(|error| ConnectionEnd::Invalidated(error.into()))?;
        sink.send(Message::Text(text)).await.map_err(|error| {
            tracing::warn!(shard_id = self.shard_id(), op = %message.op, error = %error, "Gateway send failed");
            ConnectionEnd::Reconnect { resume: true }
        })
    }

    /// Drive `future` while serving commands; `None` if a disconnect arrived first
    async fn until_shutdown<F: Future>(&mut self, future: F) -> Option<F::Output> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                output = &mut future => return Some(output),
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        tracing::warn!(
                            shard_id = self.shared.shard_id,
                            op = %message.op,
                            "Dropping command, gateway not connected"
                        );
                    }
                    Some(Command::Disconnect) | None => return None,
                },
            }
        }
    }

    fn notify_ready(&mut self, result: GatewayResult<()>) {
        if let Some(ready_tx) = self.ready_tx.take() {
            let _ = ready_tx.send(result);
        }
    }
}

/// Read frames until Hello arrives
async fn read_hello(
    source: &mut WsSource,
    shard_id: u32,
    resume: bool,
) -> Result<HelloPayload, ConnectionEnd> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                match GatewayMessage::from_json(&text) {
                    Ok(message) => {
                        if let Some(hello) = message.as_hello() {
                            return Ok(hello);
                        }
                        tracing::debug!(shard_id, op = %message.op, "Ignoring frame before Hello");
                    }
                    Err(error) => {
                        tracing::warn!(shard_id, error = %error, "Undecodable frame before Hello");
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(match on_close(shard_id, frame) {
                    ConnectionEnd::Reconnect { resume: keep } => {
                        ConnectionEnd::Reconnect { resume: resume && keep }
                    }
                    end => end,
                });
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return Err(ConnectionEnd::Reconnect { resume }),
        }
    }
}

/// Classify a close frame from the server
fn on_close(shard_id: u32, frame: Option<CloseFrame<'_>>) -> ConnectionEnd {
    let Some(frame) = frame else {
        tracing::warn!(shard_id, "Gateway closed without a code");
        return ConnectionEnd::Reconnect { resume: true };
    };

    let code = u16::from(frame.code);
    let reason = if frame.reason.is_empty() {
        CloseCode::from_u16(code).map_or_else(String::new, |known| known.description().to_string())
    } else {
        frame.reason.to_string()
    };

    match classify(code) {
        CloseAction::Resume => {
            tracing::warn!(shard_id, close_code = code, reason = %reason, "Gateway closed, resuming");
            ConnectionEnd::Reconnect { resume: true }
        }
        CloseAction::Reidentify => {
            tracing::warn!(shard_id, close_code = code, reason = %reason, "Gateway closed, session lost");
            ConnectionEnd::Reconnect { resume: false }
        }
        CloseAction::Invalidate => {
            ConnectionEnd::Invalidated(GatewayError::ClosedByServer { code, reason })
        }
        CloseAction::Fatal => ConnectionEnd::Fatal { code, reason },
    }
}

async fn close(sink: &mut WsSink, code: u16) {
    let frame = CloseFrame {
        code: WsCloseCode::from(code),
        reason: "".into(),
    };
    if let Err(error) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(close_code = code, error = %error, "Close frame not sent");
    }
}
