//! The reverse connection manager.
//!
//! One manager loop per connection:
//!
//! ```text
//!   ┌──────────────► Connecting ── dial ok ──► Connected ── generation ends ──┐
//!   │                    │                                                    │
//!   │                    └── dial error / timeout ──┐                         │
//!   │                                               ▼                         │
//!   └────────────── delay elapsed ───────────── Backoff ◄─────────────────────┘
//! ```
//!
//! A *generation* is one live transport plus its reader and processor
//! tasks. A generation is joined completely before the manager backs off,
//! so two generations never overlap. `stop()` cancels the root token, which
//! every wait in the loop selects on.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use backhaul_collector::Registry;
use backhaul_wire::{Command, Decoded, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::error::{ReverseError, ReverseResult};
use crate::group::TaskGroup;
use crate::processor::{CommandProcessor, Inbound};
use crate::settings::{ReverseSettings, Timeouts};
use crate::state::{ConnState, StateCell};
use crate::tls::{BrokerTarget, TlsDialer};
use crate::transport::{self, Dialer, FrameReader, FrameWriter};

const EVENT_CAPACITY: usize = 64;

/// Structured diagnostics published by the manager loop.
///
/// Every event is also logged.
#[derive(Debug, Clone)]
pub enum ReverseEvent {
    Connecting { attempt: u32 },
    Connected { generation: u64 },
    /// The connection survived the grace interval; `attempt` is back to 0.
    AttemptReset { generation: u64 },
    DialFailed { attempt: u32, cause: Arc<ReverseError> },
    GenerationEnded { generation: u64, cause: Arc<ReverseError> },
    Backoff { attempt: u32, delay: Duration },
    Reconfigured,
    Stopped,
}

/// Dials out to the broker and serves its commands, reconnecting with
/// backoff until stopped.
pub struct ReverseConnection<D: Dialer = TlsDialer> {
    check_id: String,
    agent_address: String,
    timeouts: Timeouts,
    queue_capacity: usize,
    max_payload: usize,
    target: RwLock<Option<BrokerTarget>>,
    registry: Arc<Registry>,
    dialer: D,
    backoff: Mutex<BackoffPolicy>,
    state: StateCell,
    attempt: AtomicU32,
    started: AtomicBool,
    shutdown: CancellationToken,
    events: broadcast::Sender<ReverseEvent>,
}

impl ReverseConnection<TlsDialer> {
    /// Validates `settings` and builds a connection that dials over TLS.
    ///
    /// No network I/O happens here. A disabled connection skips validation
    /// entirely.
    pub fn new(settings: &ReverseSettings, registry: Arc<Registry>) -> ReverseResult<Self> {
        Self::with_dialer(settings, registry, TlsDialer)
    }
}

impl<D: Dialer> ReverseConnection<D> {
    pub fn with_dialer(
        settings: &ReverseSettings,
        registry: Arc<Registry>,
        dialer: D,
    ) -> ReverseResult<Self> {
        let (target, initial) = if settings.enabled {
            validate(settings)?;
            (Some(BrokerTarget::from_settings(settings)?), ConnState::Idle)
        } else {
            (None, ConnState::Disabled)
        };

        Ok(Self {
            check_id: settings.check_id.clone(),
            agent_address: settings.loopback_agent_address(),
            timeouts: settings.timeouts,
            queue_capacity: settings.queue_capacity,
            max_payload: settings.max_payload,
            target: RwLock::new(target),
            registry,
            dialer,
            backoff: Mutex::new(BackoffPolicy::new(settings.backoff)),
            state: StateCell::new(initial),
            attempt: AtomicU32::new(0),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            events: broadcast::channel(EVENT_CAPACITY).0,
        })
    }

    /// Replaces the backoff policy, e.g. with a seeded one.
    #[must_use]
    pub fn with_backoff(self, policy: BackoffPolicy) -> Self {
        *self.backoff.lock().unwrap_or_else(PoisonError::into_inner) = policy;
        self
    }

    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    /// Receives every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnState> {
        self.state.watch()
    }

    /// Consecutive failures since the last connection that outlived the
    /// grace interval.
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReverseEvent> {
        self.events.subscribe()
    }

    pub fn check_id(&self) -> &str {
        &self.check_id
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Points the next dial at a different broker. The live connection, if
    /// any, is left alone.
    pub fn reconfigure(&self, target: BrokerTarget) {
        if self.state() == ConnState::Disabled {
            tracing::warn!("reverse connection disabled, ignoring new broker target");
            return;
        }
        tracing::info!(check_id = %self.check_id, broker = %target.endpoint(), "broker target updated");
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = Some(target);
        self.emit(ReverseEvent::Reconfigured);
    }

    /// Requests shutdown. Returns immediately; `start` returns once the
    /// active generation is torn down.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(check_id = %self.check_id, "stopping reverse connection");
        }
        self.shutdown.cancel();
    }

    /// Runs the connect loop until [`stop`](Self::stop) is called.
    ///
    /// Returns `Ok(())` straight away when the connection is disabled.
    /// Connection failures never surface here; they are retried.
    pub async fn start(&self) -> ReverseResult<()> {
        if self.state() == ConnState::Disabled {
            tracing::info!("reverse connection disabled");
            return Ok(());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ReverseError::AlreadyStarted);
        }

        if let Some(target) = self.current_target() {
            tracing::info!(
                check_id = %self.check_id,
                broker = %target.endpoint(),
                agent = %self.agent_address,
                "reverse connection configured"
            );
        }

        self.run().await;
        self.state.advance(ConnState::Stopped);
        self.emit(ReverseEvent::Stopped);
        tracing::info!(check_id = %self.check_id, "reverse connection stopped");
        Ok(())
    }

    async fn run(&self) {
        let mut generation = 0u64;

        while !self.shutdown.is_cancelled() {
            let Some(target) = self.current_target() else {
                return;
            };

            self.state.advance(ConnState::Connecting);
            let attempt = self.attempt();
            self.emit(ReverseEvent::Connecting { attempt });
            tracing::debug!(attempt, broker = %target.endpoint(), "dialing broker");

            let dialed = tokio::select! {
                () = self.shutdown.cancelled() => return,
                dialed = self.dialer.dial(&target, self.timeouts.dial) => dialed,
            };

            match dialed {
                Ok(stream) => {
                    generation += 1;
                    self.state.advance(ConnState::Connected);
                    self.emit(ReverseEvent::Connected { generation });
                    tracing::info!(generation, broker = %target.endpoint(), "connected to broker");

                    let ended = self.run_generation(stream, generation).await;
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                    let cause = Arc::new(ended.err().unwrap_or(ReverseError::ConnectionClosed));
                    tracing::warn!(generation, error = %cause, "broker connection lost");
                    self.emit(ReverseEvent::GenerationEnded { generation, cause });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "failed to reach broker");
                    self.emit(ReverseEvent::DialFailed {
                        attempt,
                        cause: Arc::new(e),
                    });
                }
            }

            if !self.back_off().await {
                return;
            }
        }
    }

    /// Sleeps for the next backoff delay. Returns false if stopped meanwhile.
    async fn back_off(&self) -> bool {
        let failures = self.attempt.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_delay(failures);
        let attempt = failures.saturating_add(1);

        self.state.advance(ConnState::Backoff);
        self.emit(ReverseEvent::Backoff { attempt, delay });
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect");

        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Serves one live connection until either task exits.
    async fn run_generation(&self, stream: D::Stream, generation: u64) -> ReverseResult<()> {
        let token = self.shutdown.child_token();
        let (reader, writer) = transport::split(stream, self.max_payload);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let processor = CommandProcessor::new(self.check_id.clone(), Arc::clone(&self.registry));

        let mut group = TaskGroup::new(token.clone());
        group.spawn(
            "reader",
            read_commands(reader, tx, self.timeouts.comm, token.clone()),
        );
        group.spawn(
            "processor",
            process_commands(processor, rx, writer, self.timeouts.command, token),
        );

        let joined = group.join(self.timeouts.shutdown_grace);
        tokio::pin!(joined);
        let grace = tokio::time::sleep(self.timeouts.grace);
        tokio::pin!(grace);
        let mut grace_pending = true;

        loop {
            tokio::select! {
                result = &mut joined => return result,
                () = &mut grace, if grace_pending => {
                    grace_pending = false;
                    if self.attempt.swap(0, Ordering::SeqCst) != 0 {
                        tracing::info!(generation, "connection stable, attempt counter reset");
                    }
                    self.emit(ReverseEvent::AttemptReset { generation });
                }
            }
        }
    }

    fn current_target(&self) -> Option<BrokerTarget> {
        self.target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn emit(&self, event: ReverseEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn validate(settings: &ReverseSettings) -> ReverseResult<()> {
    if settings.check_id.trim().is_empty() {
        return Err(ReverseError::config("check id is required"));
    }
    if settings.queue_capacity == 0 {
        return Err(ReverseError::config("command queue capacity must be positive"));
    }
    if settings.max_payload == 0 {
        return Err(ReverseError::config("max payload must be positive"));
    }
    let t = &settings.timeouts;
    if [t.dial, t.comm, t.command].contains(&Duration::ZERO) {
        return Err(ReverseError::config("dial, comm and command timeouts must be positive"));
    }
    settings.backoff.validate()
}

/// Reader task: frames in, commands onto the queue.
async fn read_commands<R>(
    mut reader: FrameReader<R>,
    queue: mpsc::Sender<Inbound>,
    idle: Duration,
    cancel: CancellationToken,
) -> ReverseResult<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let decoded = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            decoded = reader.next(idle) => decoded?,
        };

        let inbound = match decoded {
            Decoded::Frame(frame) => match Command::from_frame(&frame) {
                Ok(command) => Inbound::Command(command),
                Err(error) => Inbound::Rejected {
                    id: frame.id(),
                    error,
                },
            },
            Decoded::Oversized { id, len, .. } => Inbound::Rejected {
                id,
                error: WireError::PayloadTooLarge { len: len as usize },
            },
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            sent = queue.send(inbound) => {
                if sent.is_err() {
                    // Processor is gone; its exit carries the cause.
                    return Ok(());
                }
            }
        }
    }
}

/// Processor task: one command at a time, in receipt order.
async fn process_commands<W>(
    mut processor: CommandProcessor,
    mut queue: mpsc::Receiver<Inbound>,
    mut writer: FrameWriter<W>,
    deadline: Duration,
    cancel: CancellationToken,
) -> ReverseResult<()>
where
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let inbound = tokio::select! {
            biased;
            () = cancel.cancelled() => break Ok(()),
            inbound = queue.recv() => match inbound {
                Some(inbound) => inbound,
                None => break Ok(()),
            },
        };

        let response = processor.process(inbound);
        let frame = match response.to_frame() {
            Ok(frame) => frame,
            Err(e) => break Err(e.into()),
        };

        let sent = tokio::select! {
            biased;
            // An in-flight response is abandoned on teardown.
            () = cancel.cancelled() => break Ok(()),
            sent = writer.send(&frame, deadline) => sent,
        };
        if let Err(e) = sent {
            break Err(e);
        }
    };

    writer.close().await;
    result
}
