//! Gateway sessions and shard startup against mock servers
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_gateway::protocol::OpCode;
use chat_gateway::{
    CoordinatorConfig, DispatchEvent, EventContext, GatewayError, GatewayMessage,
    GatewaySession, HandlerRegistry, SessionState, ShardCoordinator, ShardEvent, ShardEventKind,
};
use integration_tests::{
    custom_event, fast_identify, gateway_bot_body, ready, rest_client, resumed, session_config,
    wait_for_event, wait_for_state, GatewayStep, MockGateway, MockResponse, MockRest, TEST_TOKEN,
    WAIT,
};
use tokio::sync::mpsc;

fn session_for(gateway: &MockGateway) -> (GatewaySession, mpsc::UnboundedReceiver<ShardEvent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = GatewaySession::builder(0, 1, session_config(&gateway.url()))
        .identify_limiter(fast_identify())
        .events(events_tx)
        .build();
    (session, events_rx)
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_identify_and_ready() {
    let gateway = MockGateway::start(|_, _| vec![GatewayStep::Send(ready(1, "session-1", "", [0, 1]))])
        .await
        .unwrap();
    let (session, mut events) = session_for(&gateway);

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.session_id().as_deref(), Some("session-1"));
    assert_eq!(session.sequence(), Some(1));

    let handshakes = gateway.handshakes();
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].op, OpCode::Identify);
    assert_eq!(handshakes[0].d["token"], TEST_TOKEN);
    assert_eq!(handshakes[0].d["shard"], serde_json::json!([0, 1]));
    assert_eq!(handshakes[0].d["large_threshold"], 50);

    let event = wait_for_event(&mut events, |e| e.is_ready()).await.unwrap();
    assert!(matches!(event.kind, ShardEventKind::Ready { ref session_id } if session_id == "session-1"));

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.session_id(), None);
}

#[tokio::test]
async fn test_handlers_receive_dispatches() {
    let gateway = MockGateway::start(|_, _| {
        vec![
            GatewayStep::Send(ready(1, "session-1", "ws://127.0.0.1:1", [0, 1])),
            GatewayStep::Send(custom_event(2)),
        ]
    })
    .await
    .unwrap();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let registry = HandlerRegistry::builder()
        .on(
            "TEST_EVENT",
            move |ctx: EventContext, event: Arc<DispatchEvent>| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send((ctx.sequence, event.name().to_string()));
                }
            },
        )
        .build();

    let session = GatewaySession::builder(0, 1, session_config(&gateway.url()))
        .handlers(Arc::new(registry))
        .identify_limiter(fast_identify())
        .build();
    session.connect().await.unwrap();

    let (sequence, name) = tokio::time::timeout(WAIT, seen_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sequence, 2);
    assert_eq!(name, "TEST_EVENT");

    session.disconnect().await;
}

// ============================================================================
// Resume and re-identify
// ============================================================================

#[tokio::test]
async fn test_resumable_close_resumes() {
    let gateway = MockGateway::start(|index, handshake| match (index, handshake.op) {
        (0, OpCode::Identify) => vec![
            GatewayStep::Send(ready(1, "session-1", "", [0, 1])),
            GatewayStep::Send(custom_event(2)),
            GatewayStep::Close(4000),
        ],
        (_, OpCode::Resume) => vec![GatewayStep::Send(resumed(3))],
        _ => vec![GatewayStep::Close(4004)],
    })
    .await
    .unwrap();
    let (session, mut events) = session_for(&gateway);

    session.connect().await.unwrap();
    wait_for_event(&mut events, |e| matches!(e.kind, ShardEventKind::Resumed))
        .await
        .unwrap();

    let handshakes = gateway.handshakes();
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[1].op, OpCode::Resume);
    assert_eq!(handshakes[1].d["session_id"], "session-1");
    assert_eq!(handshakes[1].d["seq"], 2);
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.sequence(), Some(3));

    session.disconnect().await;
}

#[tokio::test]
async fn test_reconnect_request_resumes_on_resume_url() {
    // READY points resumes back at the same mock
    let resume_target = Arc::new(parking_lot::Mutex::new(String::new()));
    let target = Arc::clone(&resume_target);
    let gateway = MockGateway::start(move |index, handshake| match (index, handshake.op) {
        (0, OpCode::Identify) => vec![
            GatewayStep::Send(ready(1, "session-1", &target.lock(), [0, 1])),
            GatewayStep::Send(GatewayMessage::reconnect()),
        ],
        (_, OpCode::Resume) => vec![GatewayStep::Send(resumed(2))],
        _ => vec![GatewayStep::Close(4004)],
    })
    .await
    .unwrap();
    *resume_target.lock() = gateway.url();
    let (session, mut events) = session_for(&gateway);

    session.connect().await.unwrap();
    wait_for_event(&mut events, |e| matches!(e.kind, ShardEventKind::Resumed))
        .await
        .unwrap();

    assert_eq!(gateway.connections(), 2);
    assert!(session
        .resume_gateway_url()
        .is_some_and(|url| url.starts_with(&gateway.url()) && url.ends_with("v=10&encoding=json")));
    session.disconnect().await;
}

#[tokio::test]
async fn test_invalid_session_not_resumable_disconnects() {
    let gateway = MockGateway::start(|index, _| match index {
        0 => vec![
            GatewayStep::Send(ready(1, "session-1", "", [0, 1])),
            GatewayStep::Send(GatewayMessage::invalid_session(false)),
        ],
        _ => vec![GatewayStep::Send(ready(1, "session-2", "", [0, 1]))],
    })
    .await
    .unwrap();
    let (session, mut events) = session_for(&gateway);

    session.connect().await.unwrap();
    let event = wait_for_event(&mut events, |e| e.is_terminal()).await.unwrap();
    assert!(matches!(event.kind, ShardEventKind::Disconnected { reason: Some(_) }));
    wait_for_state(&session, SessionState::Disconnected).await.unwrap();
    assert_eq!(session.session_id(), None);
    assert_eq!(session.sequence(), None);
    tokio::time::timeout(WAIT, async {
        while session.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // A new connect identifies from scratch
    session.connect().await.unwrap();
    let handshakes = gateway.handshakes();
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[1].op, OpCode::Identify);
    assert_eq!(session.session_id().as_deref(), Some("session-2"));

    session.disconnect().await;
}

#[tokio::test]
async fn test_session_invalid_close_reidentifies() {
    let gateway = MockGateway::start(|index, _| match index {
        0 => vec![
            GatewayStep::Send(ready(1, "session-1", "", [0, 1])),
            GatewayStep::Close(4009),
        ],
        _ => vec![GatewayStep::Send(ready(1, "session-2", "", [0, 1]))],
    })
    .await
    .unwrap();
    let (session, mut events) = session_for(&gateway);

    session.connect().await.unwrap();
    wait_for_event(&mut events, |e| {
        matches!(&e.kind, ShardEventKind::Ready { session_id } if session_id == "session-2")
    })
    .await
    .unwrap();

    let handshakes = gateway.handshakes();
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[1].op, OpCode::Identify);
    session.disconnect().await;
}

// ============================================================================
// Fatal closes
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let gateway = MockGateway::start(|_, _| vec![GatewayStep::Close(4004)])
        .await
        .unwrap();
    let (session, mut events) = session_for(&gateway);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, GatewayError::FatallyClosed { code: 4004, .. }));
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::FatallyClosed);

    let event = wait_for_event(&mut events, |e| e.is_terminal()).await.unwrap();
    assert!(matches!(event.kind, ShardEventKind::FatallyClosed { code: 4004, .. }));

    // No new socket is opened for a fatally closed session
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, GatewayError::FatallyClosed { code: 4004, .. }));
    assert_eq!(gateway.connections(), 1);

    session.disconnect().await;
    assert_eq!(session.state(), SessionState::FatallyClosed);
}

// ============================================================================
// Heartbeats
// ============================================================================

#[tokio::test]
async fn test_heartbeat_ack_sets_latency() {
    let gateway = MockGateway::builder()
        .heartbeat_interval(100)
        .start(|_, _| vec![GatewayStep::Send(ready(1, "session-1", "", [0, 1]))])
        .await
        .unwrap();
    let (session, _events) = session_for(&gateway);
    session.connect().await.unwrap();

    tokio::time::timeout(WAIT, async {
        while session.latency().is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_missing_ack_reconnects_and_resumes() {
    let gateway = MockGateway::builder()
        .heartbeat_interval(100)
        .ack_heartbeats(false)
        .start(|index, handshake| match (index, handshake.op) {
            (0, OpCode::Identify) => vec![GatewayStep::Send(ready(1, "session-1", "", [0, 1]))],
            (_, OpCode::Resume) => vec![GatewayStep::Send(resumed(2))],
            _ => vec![GatewayStep::Close(4004)],
        })
        .await
        .unwrap();
    let (session, mut events) = session_for(&gateway);
    session.connect().await.unwrap();

    wait_for_event(&mut events, |e| {
        matches!(e.kind, ShardEventKind::Reconnecting { resume: true })
    })
    .await
    .unwrap();
    wait_for_event(&mut events, |e| matches!(e.kind, ShardEventKind::Resumed))
        .await
        .unwrap();
    assert_eq!(gateway.handshakes()[1].op, OpCode::Resume);

    session.disconnect().await;
}

#[tokio::test]
async fn test_invalid_session_resumable_reidentifies_on_same_socket() {
    let handshake_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handshake_count);
    let gateway = MockGateway::start(move |_, _| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => vec![
                GatewayStep::Send(ready(1, "session-1", "", [0, 1])),
                GatewayStep::Send(GatewayMessage::invalid_session(true)),
            ],
            _ => vec![GatewayStep::Send(ready(1, "session-2", "", [0, 1]))],
        }
    })
    .await
    .unwrap();
    let (session, mut events) = session_for(&gateway);

    session.connect().await.unwrap();

    // Re-identify waits a random 1-5 s before going out
    let seen = tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let done = matches!(event.kind, ShardEventKind::Ready { ref session_id } if session_id == "session-2");
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    })
    .await
    .unwrap();

    assert!(!seen.iter().any(|e| e.is_terminal()));
    assert!(!seen
        .iter()
        .any(|e| matches!(e.kind, ShardEventKind::Reconnecting { .. })));
    assert_eq!(gateway.connections(), 1);

    let handshakes = gateway.handshakes();
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[1].op, OpCode::Identify);
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.session_id().as_deref(), Some("session-2"));

    session.disconnect().await;
}

// ============================================================================
// Hello
// ============================================================================

#[tokio::test]
async fn test_hello_timeout_reconnects_with_backoff() {
    let gateway = MockGateway::builder()
        .withhold_hello(2)
        .start(|_, _| vec![GatewayStep::Send(ready(1, "session-1", "", [0, 1]))])
        .await
        .unwrap();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut config = session_config(&gateway.url());
    config.hello_timeout = Duration::from_millis(200);
    let session = GatewaySession::builder(0, 1, config)
        .identify_limiter(fast_identify())
        .events(events_tx)
        .build();

    let started = std::time::Instant::now();
    session.connect().await.unwrap();
    // Two Hello timeouts, an immediate retry, then one base backoff delay
    assert!(started.elapsed() >= Duration::from_millis(450));
    assert_eq!(gateway.connections(), 3);

    let handshakes = gateway.handshakes();
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].op, OpCode::Identify);

    let mut reconnects = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event.kind, ShardEventKind::Reconnecting { resume: false }) {
            reconnects += 1;
        }
    }
    assert_eq!(reconnects, 2);
    assert_eq!(session.state(), SessionState::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn test_zero_heartbeat_interval_reconnects() {
    let gateway = MockGateway::builder()
        .heartbeat_interval(0)
        .start(|_, _| vec![GatewayStep::Send(ready(1, "session-1", "", [0, 1]))])
        .await
        .unwrap();
    let (session, mut events) = session_for(&gateway);

    // Never becomes ready; every socket is dropped right after Hello
    let connect = tokio::time::timeout(Duration::from_millis(500), session.connect()).await;
    assert!(connect.is_err());

    assert!(gateway.connections() >= 2);
    assert!(gateway.handshakes().is_empty());
    wait_for_event(&mut events, |e| matches!(e.kind, ShardEventKind::Reconnecting { .. }))
        .await
        .unwrap();

    session.disconnect().await;
    wait_for_state(&session, SessionState::Disconnected).await.unwrap();
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_send_requires_connection() {
    let gateway = MockGateway::start(|_, _| vec![]).await.unwrap();
    let (session, _events) = session_for(&gateway);

    let err = session
        .send(GatewayMessage::heartbeat(None))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotConnected));
}

// ============================================================================
// Shard coordinator
// ============================================================================

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        session: session_config("ws://unused.invalid"),
        ready_timeout: WAIT,
        identify_interval: Duration::from_millis(20),
        ..CoordinatorConfig::default()
    }
}

#[tokio::test]
async fn test_coordinator_reports_failed_shard() {
    let gateway = MockGateway::start(|_, handshake| {
        let shard_id = handshake.d["shard"][0].as_u64().unwrap_or_default() as u32;
        if shard_id == 1 {
            vec![GatewayStep::Close(4004)]
        } else {
            vec![GatewayStep::Send(ready(1, &format!("session-{shard_id}"), "", [shard_id, 2]))]
        }
    })
    .await
    .unwrap();

    let api = MockRest::start().await.unwrap();
    api.respond(
        "/gateway/bot",
        MockResponse::ok(gateway_bot_body(&gateway.url(), 2, 1000, 1)),
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let mut config = coordinator_config();
    config.session.gateway_url = None;
    let mut coordinator = ShardCoordinator::new(config, rest, HandlerRegistry::empty());
    let mut events = coordinator.take_events().unwrap();

    let report = coordinator.connect().await.unwrap();
    assert_eq!(report.ready, vec![0]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].shard_id, 1);
    assert!(report.has_fatal());
    assert_eq!(coordinator.shard_count(), 2);

    let states = coordinator.states();
    assert_eq!(states[&0], SessionState::Connected);
    assert_eq!(states[&1], SessionState::FatallyClosed);

    let event = wait_for_event(&mut events, |e| e.is_ready()).await.unwrap();
    assert_eq!(event.shard_id, 0);

    let shard_zero = Arc::clone(coordinator.session(0).unwrap());
    coordinator.disconnect().await;
    assert_eq!(shard_zero.state(), SessionState::Disconnected);
    assert!(coordinator.is_empty());
}

#[tokio::test]
async fn test_coordinator_checks_session_start_limit() {
    let api = MockRest::start().await.unwrap();
    api.respond(
        "/gateway/bot",
        MockResponse::ok(gateway_bot_body("ws://127.0.0.1:1", 4, 2, 1)),
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let mut coordinator = ShardCoordinator::new(coordinator_config(), rest, HandlerRegistry::empty());
    let err = coordinator.connect().await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::SessionStartLimit {
            remaining: 2,
            required: 4,
            ..
        }
    ));
    assert!(coordinator.is_empty());
}

#[tokio::test]
async fn test_coordinator_runs_selected_shards() {
    let gateway = MockGateway::start(|_, handshake| {
        let shard = [
            handshake.d["shard"][0].as_u64().unwrap_or_default() as u32,
            handshake.d["shard"][1].as_u64().unwrap_or_default() as u32,
        ];
        vec![GatewayStep::Send(ready(1, "session", "", shard))]
    })
    .await
    .unwrap();

    let api = MockRest::start().await.unwrap();
    api.respond(
        "/gateway/bot",
        MockResponse::ok(gateway_bot_body(&gateway.url(), 1, 1000, 1)),
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let mut config = coordinator_config();
    config.session.gateway_url = Some(gateway.url());
    config.shard_count = Some(4);
    config.shard_ids = Some(vec![1, 3]);
    let mut coordinator = ShardCoordinator::new(config, rest, HandlerRegistry::empty());

    let report = coordinator.connect().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.ready, vec![1, 3]);

    let shards: Vec<_> = gateway
        .handshakes()
        .iter()
        .map(|h| h.d["shard"].clone())
        .collect();
    assert!(shards.contains(&serde_json::json!([1, 4])));
    assert!(shards.contains(&serde_json::json!([3, 4])));

    coordinator.disconnect().await;
}

#[tokio::test]
async fn test_coordinator_start_limit_counts_running_shards() {
    let gateway = MockGateway::start(|_, handshake| {
        let shard = [
            handshake.d["shard"][0].as_u64().unwrap_or_default() as u32,
            handshake.d["shard"][1].as_u64().unwrap_or_default() as u32,
        ];
        vec![GatewayStep::Send(ready(1, "session", "", shard))]
    })
    .await
    .unwrap();

    let api = MockRest::start().await.unwrap();
    api.respond(
        "/gateway/bot",
        MockResponse::ok(gateway_bot_body(&gateway.url(), 2, 1, 1)),
    );
    let rest = rest_client(&api.base_url()).unwrap();

    // Only shard 1 exists out of 2; the others never start
    let mut config = coordinator_config();
    config.session.gateway_url = Some(gateway.url());
    config.shard_ids = Some(vec![1, 1, 5, 7]);
    let mut coordinator = ShardCoordinator::new(config, rest, HandlerRegistry::empty());

    let report = coordinator.connect().await.unwrap();
    assert_eq!(report.ready, vec![1]);
    assert_eq!(coordinator.len(), 1);
    assert_eq!(gateway.handshakes().len(), 1);

    coordinator.disconnect().await;
}

#[tokio::test]
async fn test_coordinator_reconnects_after_disconnect() {
    let gateway = MockGateway::start(|index, _| {
        vec![GatewayStep::Send(ready(1, &format!("session-{index}"), "", [0, 1]))]
    })
    .await
    .unwrap();

    let api = MockRest::start().await.unwrap();
    api.respond(
        "/gateway/bot",
        MockResponse::ok(gateway_bot_body(&gateway.url(), 1, 1000, 1)),
    );
    let rest = rest_client(&api.base_url()).unwrap();

    let mut config = coordinator_config();
    config.session.gateway_url = None;
    let mut coordinator = ShardCoordinator::new(config, rest, HandlerRegistry::empty());

    let first = coordinator.connect().await.unwrap();
    assert_eq!(first.ready, vec![0]);
    assert_eq!(coordinator.session(0).unwrap().session_id().as_deref(), Some("session-0"));

    coordinator.disconnect().await;
    assert!(coordinator.is_empty());
    assert_eq!(coordinator.shard_count(), 0);

    let second = coordinator.connect().await.unwrap();
    assert_eq!(second.ready, vec![0]);
    assert_eq!(coordinator.states()[&0], SessionState::Connected);

    let handshakes = gateway.handshakes();
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[1].op, OpCode::Identify);
    assert_eq!(api.requests_to("/gateway/bot").len(), 2);

    // A running coordinator refuses a second start without asking REST
    let err = coordinator.connect().await.unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyRunning));
    assert_eq!(api.requests_to("/gateway/bot").len(), 2);

    coordinator.disconnect().await;
}
