use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backhaul_collector::{CollectError, Collector, CollectorOptions, Metrics, Registry};
use backhaul_wire::{Command, Decoded, Frame, FrameCodec, FrameKind, Response, Status, Verb};
use bytes::BytesMut;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use test_case::test_case;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{
    BackoffConfig, BackoffPolicy, BrokerEndpoint, BrokerTarget, ClientAuth, ConnState, Dialer, ReverseConnection,
    ReverseError, ReverseEvent, ReverseResult, ReverseSettings, TimeoutKind, TrustSource,
};

// ============================================================================
// Fixtures
// ============================================================================

struct TestPki {
    ca_pem: String,
    leaf_pem: String,
    leaf_key_pem: String,
    leaf_der: CertificateDer<'static>,
    leaf_key_der: PrivateKeyDer<'static>,
}

/// A CA and a `localhost` certificate it signed.
fn test_pki() -> TestPki {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "backhaul test CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let leaf = CertificateParams::new(vec!["localhost".to_string()])
        .unwrap()
        .signed_by(&leaf_key, &ca, &ca_key)
        .unwrap();

    TestPki {
        ca_pem: ca.pem(),
        leaf_pem: leaf.pem(),
        leaf_key_pem: leaf_key.serialize_pem(),
        leaf_der: leaf.der().clone(),
        leaf_key_der: PrivatePkcs8KeyDer::from(leaf_key.serialize_der()).into(),
    }
}

fn settings(ca_pem: &str) -> ReverseSettings {
    ReverseSettings {
        enabled: true,
        check_id: "check-42".to_string(),
        broker_url: "https://broker.example.com:43191/check/42".to_string(),
        trust: Some(TrustSource::CaPem(ca_pem.to_string())),
        backoff: BackoffConfig {
            jitter_factor: 0.0,
            ..BackoffConfig::default()
        },
        ..ReverseSettings::default()
    }
}

struct StaticCollector;

impl Collector for StaticCollector {
    fn id(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Metrics, CollectError> {
        let mut metrics = Metrics::new();
        metrics.add_double("used_pct", 12.5);
        metrics.add_double("idle_pct", 87.5);
        Ok(metrics)
    }
}

fn registry() -> Arc<Registry> {
    let registry = Registry::new();
    registry
        .register(Box::new(StaticCollector), CollectorOptions::default())
        .unwrap();
    registry.collect();
    Arc::new(registry)
}

#[derive(Debug, Clone, Copy)]
enum Step {
    /// TCP accepted, TLS handshake never completes.
    HangHandshake,
    Refuse,
    Accept,
}

/// Plays back a fixed sequence of dial outcomes, then accepts forever.
/// Accepted connections are in-memory pipes; the broker ends are handed
/// to the test.
struct ScriptedDialer {
    script: Mutex<VecDeque<Step>>,
    dials: AtomicUsize,
    targets: Mutex<Vec<String>>,
    brokers: mpsc::UnboundedSender<DuplexStream>,
}

impl Dialer for ScriptedDialer {
    type Stream = DuplexStream;

    fn dial(
        &self,
        target: &BrokerTarget,
        timeout: Duration,
    ) -> impl Future<Output = ReverseResult<DuplexStream>> + Send {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.targets
            .lock()
            .unwrap()
            .push(target.endpoint().to_string());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Accept);
        let brokers = self.brokers.clone();

        async move {
            match step {
                Step::HangHandshake => {
                    tokio::time::sleep(timeout).await;
                    Err(ReverseError::Timeout(TimeoutKind::Dial))
                }
                Step::Refuse => Err(ReverseError::Dial {
                    addr: "broker.example.com:43191".to_string(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                }),
                Step::Accept => {
                    let (agent, broker) = duplex(64 * 1024);
                    brokers.send(broker).unwrap();
                    Ok(agent)
                }
            }
        }
    }
}

/// The broker end of an accepted connection.
struct Broker {
    stream: DuplexStream,
    codec: FrameCodec,
    buf: BytesMut,
}

impl Broker {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            codec: FrameCodec::default(),
            buf: BytesMut::new(),
        }
    }

    async fn send(&mut self, commands: &[Command]) {
        let mut out = BytesMut::new();
        for command in commands {
            command.to_frame().unwrap().encode(&mut out);
        }
        self.send_raw(&out).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Response {
        loop {
            if let Some(Decoded::Frame(frame)) = self.codec.decode(&mut self.buf).unwrap() {
                return Response::from_frame(&frame).unwrap();
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "agent closed the connection");
        }
    }

    /// True once the agent has dropped its end.
    async fn is_closed(&mut self) -> bool {
        matches!(self.stream.read_buf(&mut self.buf).await, Ok(0) | Err(_))
    }
}

struct Harness {
    conn: Arc<ReverseConnection<ScriptedDialer>>,
    events: broadcast::Receiver<ReverseEvent>,
    brokers: mpsc::UnboundedReceiver<DuplexStream>,
    task: JoinHandle<ReverseResult<()>>,
}

impl Harness {
    fn start(script: &[Step], tweak: impl FnOnce(&mut ReverseSettings)) -> Self {
        Self::start_with(script, tweak, |conn| conn)
    }

    /// Like [`Harness::start`], with a hook to adjust the connection before
    /// it starts.
    fn start_with(
        script: &[Step],
        tweak: impl FnOnce(&mut ReverseSettings),
        build: impl FnOnce(ReverseConnection<ScriptedDialer>) -> ReverseConnection<ScriptedDialer>,
    ) -> Self {
        let pki = test_pki();
        let mut settings = settings(&pki.ca_pem);
        tweak(&mut settings);

        let (tx, brokers) = mpsc::unbounded_channel();
        let dialer = ScriptedDialer {
            script: Mutex::new(script.iter().copied().collect()),
            dials: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
            brokers: tx,
        };
        let conn = build(ReverseConnection::with_dialer(&settings, registry(), dialer).unwrap());
        let conn = Arc::new(conn);
        let events = conn.subscribe();
        let task = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.start().await }
        });

        Self {
            conn,
            events,
            brokers,
            task,
        }
    }

    async fn broker(&mut self) -> Broker {
        Broker::new(self.brokers.recv().await.unwrap())
    }

    async fn wait_for(&mut self, wanted: impl Fn(&ReverseEvent) -> bool) -> ReverseEvent {
        loop {
            let event = self.events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    }

    async fn connected(&mut self) -> Broker {
        self.wait_for(|e| matches!(e, ReverseEvent::Connected { .. }))
            .await;
        self.broker().await
    }

    async fn generation_ended(&mut self) -> Arc<ReverseError> {
        match self
            .wait_for(|e| matches!(e, ReverseEvent::GenerationEnded { .. }))
            .await
        {
            ReverseEvent::GenerationEnded { cause, .. } => cause,
            _ => unreachable!(),
        }
    }

    async fn stop(self) {
        self.conn.stop();
        self.task.await.unwrap().unwrap();
        assert_eq!(self.conn.state(), ConnState::Stopped);
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn three_handshake_timeouts_then_connect() {
    let mut h = Harness::start(
        &[Step::HangHandshake, Step::HangHandshake, Step::HangHandshake],
        |_| {},
    );

    let mut delays = Vec::new();
    let mut dial_timeouts = 0;
    loop {
        match h.events.recv().await.unwrap() {
            ReverseEvent::DialFailed { cause, .. } => {
                assert_eq!(cause.timeout_kind(), Some(TimeoutKind::Dial));
                dial_timeouts += 1;
            }
            ReverseEvent::Backoff { delay, .. } => delays.push(delay),
            ReverseEvent::Connected { generation } => {
                assert_eq!(generation, 1);
                break;
            }
            _ => {}
        }
    }
    let connected_at = Instant::now();

    assert_eq!(dial_timeouts, 3);
    assert_eq!(
        delays,
        [1, 2, 4].map(Duration::from_secs).to_vec(),
        "backoff must escalate"
    );
    assert_eq!(h.conn.state(), ConnState::Connected);
    assert_eq!(h.conn.attempt(), 3, "attempt resets only after the grace interval");

    let _broker = h.broker().await;
    h.wait_for(|e| matches!(e, ReverseEvent::AttemptReset { .. }))
        .await;
    assert!(connected_at.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.conn.attempt(), 0);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn quick_drop_still_escalates_backoff() {
    let mut h = Harness::start(&[], |_| {});

    for expected in [1, 2, 4] {
        let broker = h.connected().await;
        drop(broker);
        let delay = match h
            .wait_for(|e| matches!(e, ReverseEvent::Backoff { .. }))
            .await
        {
            ReverseEvent::Backoff { delay, .. } => delay,
            _ => unreachable!(),
        };
        assert_eq!(delay, Duration::from_secs(expected));
    }

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn seeded_jitter_is_reproducible() {
    const SEED: u64 = 0x5eed;
    let backoff = BackoffConfig {
        jitter_factor: 0.2,
        ..BackoffConfig::default()
    };
    let mut h = Harness::start_with(
        &[Step::Refuse; 4],
        |s| s.backoff = backoff,
        |conn| conn.with_backoff(BackoffPolicy::with_seed(backoff, SEED)),
    );

    let mut delays = Vec::new();
    while delays.len() < 4 {
        if let ReverseEvent::Backoff { delay, .. } = h
            .wait_for(|e| matches!(e, ReverseEvent::Backoff { .. }))
            .await
        {
            delays.push(delay);
        }
    }

    let mut replay = BackoffPolicy::with_seed(backoff, SEED);
    for (failures, delay) in (0u32..).zip(&delays) {
        let base = backoff.base_delay(failures).as_secs_f64();
        let secs = delay.as_secs_f64();
        assert!(
            (base * 0.8 - 1e-6..=base * 1.2 + 1e-6).contains(&secs),
            "delay {secs}s outside jitter band around {base}s"
        );
        assert_eq!(*delay, replay.next_delay(failures));
    }

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn state_watch_follows_lifecycle() {
    let h = Harness::start(&[Step::Refuse], |s| {
        s.backoff.initial_delay_ms = 30_000;
    });
    let mut states = h.conn.watch_state();

    states
        .wait_for(|s| *s == ConnState::Backoff)
        .await
        .unwrap();
    h.conn.stop();
    states
        .wait_for(|s| *s == ConnState::Stopped)
        .await
        .unwrap();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_returns_promptly() {
    let Harness {
        conn,
        mut events,
        task,
        ..
    } = Harness::start(&[Step::Refuse], |s| {
        s.backoff.initial_delay_ms = 30_000;
    });

    loop {
        if let ReverseEvent::Backoff { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    assert_eq!(conn.state(), ConnState::Backoff);

    conn.stop();
    tokio::time::timeout(Duration::from_millis(100), task)
        .await
        .expect("start() must return without waiting out the backoff")
        .unwrap()
        .unwrap();

    assert_eq!(conn.state(), ConnState::Stopped);
    let mut rest = Vec::new();
    while let Ok(event) = events.try_recv() {
        rest.push(event);
    }
    assert!(
        !rest
            .iter()
            .any(|e| matches!(e, ReverseEvent::Connecting { .. })),
        "no redial after stop: {rest:?}"
    );
    assert!(matches!(rest.last(), Some(ReverseEvent::Stopped)));
}

#[tokio::test(start_paused = true)]
async fn stop_during_dial() {
    let mut h = Harness::start(&[Step::HangHandshake], |_| {});
    h.wait_for(|e| matches!(e, ReverseEvent::Connecting { .. }))
        .await;
    tokio::task::yield_now().await;
    assert_eq!(h.conn.state(), ConnState::Connecting);
    h.stop().await;
}

#[tokio::test]
async fn stop_while_connected_closes_transport() {
    let mut h = Harness::start(&[], |_| {});
    let mut broker = h.connected().await;

    h.conn.stop();
    assert!(broker.is_closed().await);
    h.task.await.unwrap().unwrap();
    assert_eq!(h.conn.state(), ConnState::Stopped);
}

#[tokio::test]
async fn stop_before_start() {
    let pki = test_pki();
    let (tx, _brokers) = mpsc::unbounded_channel();
    let dialer = ScriptedDialer {
        script: Mutex::new(VecDeque::new()),
        dials: AtomicUsize::new(0),
        targets: Mutex::new(Vec::new()),
        brokers: tx,
    };
    let conn = ReverseConnection::with_dialer(&settings(&pki.ca_pem), registry(), dialer).unwrap();
    assert_eq!(conn.state(), ConnState::Idle);

    conn.stop();
    conn.stop();
    conn.start().await.unwrap();
    assert_eq!(conn.state(), ConnState::Stopped);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let mut h = Harness::start(&[], |_| {});
    let _broker = h.connected().await;
    assert!(matches!(
        h.conn.start().await,
        Err(ReverseError::AlreadyStarted)
    ));
    h.stop().await;
}

#[tokio::test]
async fn disabled_connection_never_dials() {
    let settings = ReverseSettings {
        enabled: false,
        broker_url: "not a url".to_string(),
        ..ReverseSettings::default()
    };
    let conn = ReverseConnection::new(&settings, registry()).unwrap();
    assert_eq!(conn.state(), ConnState::Disabled);
    conn.start().await.unwrap();
    assert_eq!(conn.state(), ConnState::Disabled);
}

#[test_case(|s: &mut ReverseSettings| s.check_id.clear() ; "missing check id")]
#[test_case(|s: &mut ReverseSettings| s.broker_url = "broker:43191".into() ; "url without scheme")]
#[test_case(|s: &mut ReverseSettings| s.trust = None ; "missing ca")]
#[test_case(|s: &mut ReverseSettings| s.trust = Some(TrustSource::CaPem("junk".into())) ; "unparseable ca")]
#[test_case(|s: &mut ReverseSettings| s.server_name = Some("bad name!".into()) ; "invalid server name")]
#[test_case(|s: &mut ReverseSettings| s.queue_capacity = 0 ; "zero queue")]
#[test_case(|s: &mut ReverseSettings| s.timeouts.dial = Duration::ZERO ; "zero dial timeout")]
#[test_case(|s: &mut ReverseSettings| s.backoff.multiplier = 0.0 ; "shrinking backoff")]
fn invalid_settings_rejected_before_io(tweak: fn(&mut ReverseSettings)) {
    let pki = test_pki();
    let mut settings = settings(&pki.ca_pem);
    tweak(&mut settings);
    assert!(matches!(
        ReverseConnection::new(&settings, registry()),
        Err(ReverseError::Config(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn reconfigure_applies_to_next_dial() {
    let mut h = Harness::start(&[Step::Refuse], |_| {});
    h.wait_for(|e| matches!(e, ReverseEvent::DialFailed { .. }))
        .await;

    let pki = test_pki();
    let target = BrokerTarget::new(
        BrokerEndpoint::parse("https://broker2.example.com:43191/check/42").unwrap(),
        None,
        &TrustSource::CaPem(pki.ca_pem),
        None,
    )
    .unwrap();
    h.conn.reconfigure(target);

    let _broker = h.connected().await;
    let conn = Arc::clone(&h.conn);
    h.stop().await;

    let targets = conn.dialer().targets.lock().unwrap().clone();
    assert_eq!(targets.len(), 2);
    assert!(targets[0].contains("broker.example.com"));
    assert!(targets[1].contains("broker2.example.com"));
}

// ============================================================================
// Command handling
// ============================================================================

#[tokio::test]
async fn connect_answers_with_check_id() {
    let mut h = Harness::start(&[], |_| {});
    let mut broker = h.connected().await;

    broker.send(&[Command::new(1, Verb::Connect, "")]).await;
    let response = broker.recv().await;
    assert_eq!(response.id, 1);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.body_text(), Some("check-42"));

    h.stop().await;
}

#[tokio::test]
async fn pipelined_requests_answered_in_order() {
    let mut h = Harness::start(&[], |_| {});
    let mut broker = h.connected().await;

    broker
        .send(&[
            Command::new(1, Verb::Request, ""),
            Command::new(2, Verb::Request, "cpu/used_pct"),
            Command::new(3, Verb::Request, "disk"),
            Command::new(4, Verb::Noop, ""),
        ])
        .await;

    let mut responses = Vec::new();
    for _ in 0..4 {
        responses.push(broker.recv().await);
    }
    let ids: Vec<_> = responses.iter().map(|r| r.id).collect();
    assert_eq!(ids, [1, 2, 3, 4]);

    let all: serde_json::Value = serde_json::from_slice(&responses[0].body).unwrap();
    assert_eq!(all.as_object().unwrap().len(), 2);
    let one: serde_json::Value = serde_json::from_slice(&responses[1].body).unwrap();
    assert_eq!(
        one,
        serde_json::json!({ "cpu`used_pct": { "_type": "n", "_value": 12.5 } })
    );
    assert_eq!(responses[2].status, Status::NotFound);
    assert_eq!(responses[3], Response::ack(4));

    h.stop().await;
}

#[tokio::test]
async fn malformed_command_keeps_connection_up() {
    let mut h = Harness::start(&[], |_| {});
    let mut broker = h.connected().await;

    // verb 0x7f does not exist
    let bogus = Frame::new(FrameKind::Command, 5, vec![0x7f, 0, 0]).unwrap();
    broker.send_raw(&bogus.to_bytes()).await;
    let response = broker.recv().await;
    assert_eq!(response.id, 5);
    assert_eq!(response.status, Status::ProtocolError);

    broker.send(&[Command::new(6, Verb::Noop, "")]).await;
    assert_eq!(broker.recv().await, Response::ack(6));

    h.stop().await;
}

#[tokio::test]
async fn oversized_command_is_skipped() {
    let mut h = Harness::start(&[], |s| s.max_payload = 128);
    let mut broker = h.connected().await;

    broker
        .send(&[
            Command::new(7, Verb::Request, "cpu").with_payload(vec![0u8; 4096]),
            Command::new(8, Verb::Noop, ""),
        ])
        .await;

    let rejected = broker.recv().await;
    assert_eq!(rejected.id, 7);
    assert_eq!(rejected.status, Status::ProtocolError);
    assert_eq!(broker.recv().await, Response::ack(8));

    h.stop().await;
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn broker_drop_tears_down_generation_then_redials() {
    let mut h = Harness::start(&[], |_| {});
    let broker = h.connected().await;
    drop(broker);

    let cause = h.generation_ended().await;
    assert!(matches!(*cause, ReverseError::ConnectionClosed), "{cause}");

    // The manager only backs off after the generation is fully joined.
    let next = h.events.recv().await.unwrap();
    assert!(matches!(next, ReverseEvent::Backoff { attempt: 1, .. }), "{next:?}");

    h.wait_for(|e| matches!(e, ReverseEvent::Connected { generation: 2 }))
        .await;
    let _broker = h.broker().await;
    h.stop().await;
}

#[tokio::test]
async fn desynchronized_stream_tears_down() {
    let mut h = Harness::start(&[], |_| {});
    let mut broker = h.connected().await;

    broker.send_raw(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;

    let cause = h.generation_ended().await;
    assert!(matches!(*cause, ReverseError::Protocol(_)), "{cause}");
    assert!(broker.is_closed().await);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silent_broker_trips_idle_watchdog() {
    let mut h = Harness::start(&[], |_| {});
    let _broker = h.connected().await;
    let connected_at = Instant::now();

    let cause = h.generation_ended().await;
    assert_eq!(cause.timeout_kind(), Some(TimeoutKind::Idle));
    assert!(connected_at.elapsed() >= Duration::from_secs(65));
    h.stop().await;
}

// ============================================================================
// TLS
// ============================================================================

async fn tls_broker(pki: &TestPki) -> (tokio::net::TcpListener, tokio_rustls::TlsAcceptor) {
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![pki.leaf_der.clone()], pki.leaf_key_der.clone_key())
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    (listener, tokio_rustls::TlsAcceptor::from(Arc::new(config)))
}

fn tls_settings(ca_pem: &str, port: u16) -> ReverseSettings {
    ReverseSettings {
        broker_url: format!("https://127.0.0.1:{port}/check/42"),
        server_name: Some("localhost".to_string()),
        ..settings(ca_pem)
    }
}

#[tokio::test]
async fn tls_round_trip() {
    let pki = test_pki();
    let (listener, acceptor) = tls_broker(&pki).await;
    let port = listener.local_addr().unwrap().port();

    let conn = Arc::new(ReverseConnection::new(&tls_settings(&pki.ca_pem, port), registry()).unwrap());
    let task = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.start().await }
    });

    let (tcp, _) = listener.accept().await.unwrap();
    let tls = acceptor.accept(tcp).await.unwrap();
    let (read, mut write) = tokio::io::split(tls);

    let frame = Command::new(1, Verb::Connect, "").to_frame().unwrap();
    write.write_all(&frame.to_bytes()).await.unwrap();
    write.flush().await.unwrap();

    let mut read = crate::FrameReader::new(read, 64 * 1024);
    let Decoded::Frame(frame) = read.next(Duration::from_secs(5)).await.unwrap() else {
        panic!("expected a frame");
    };
    let response = Response::from_frame(&frame).unwrap();
    assert_eq!(response.body_text(), Some("check-42"));

    conn.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn untrusted_broker_fails_handshake() {
    let broker_pki = test_pki();
    let other_ca = test_pki();
    let (listener, acceptor) = tls_broker(&broker_pki).await;
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let _ = acceptor.accept(tcp).await;
        }
    });

    let conn = Arc::new(ReverseConnection::new(&tls_settings(&other_ca.ca_pem, port), registry()).unwrap());
    let mut events = conn.subscribe();
    let task = tokio::spawn({
        let conn = Arc::clone(&conn);
        async move { conn.start().await }
    });

    let cause = loop {
        if let ReverseEvent::DialFailed { cause, .. } = events.recv().await.unwrap() {
            break cause;
        }
    };
    assert!(matches!(*cause, ReverseError::Handshake(_)), "{cause}");

    conn.stop();
    task.await.unwrap().unwrap();
}

#[test]
fn client_auth_loads_credentials() {
    let pki = test_pki();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("agent.crt");
    let key_path = dir.path().join("agent.key");
    std::fs::write(&cert_path, &pki.leaf_pem).unwrap();
    std::fs::write(&key_path, &pki.leaf_key_pem).unwrap();

    let mut settings = settings(&pki.ca_pem);
    settings.client_auth = Some(ClientAuth {
        cert_path: cert_path.clone(),
        key_path: key_path.clone(),
    });
    let target = BrokerTarget::from_settings(&settings).unwrap();
    assert!(target.client_config().client_auth_cert_resolver.has_certs());

    // A certificate where the key should be.
    settings.client_auth = Some(ClientAuth {
        cert_path: cert_path.clone(),
        key_path: cert_path,
    });
    assert!(matches!(
        BrokerTarget::from_settings(&settings),
        Err(ReverseError::Config(_))
    ));
}
