//! The public engine handle.
//!
//! [`Engine::spawn`] starts the IO task that owns the transport and
//! returns the handle used by everything else: command submission with
//! per-command cancellation, filtered subscriptions, diagnostic events,
//! and counters. One engine per radio; the handle is the only way in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ramses_codec::{Command, Packet};
use ramses_core::error::{Error, Result};
use ramses_core::{Address, EngineEvent, FrameTransport, Priority};

use crate::dispatcher::{Dispatcher, PacketFilter};
use crate::fsm::{io_loop, IoShared, SendRequest};

/// Environment variable that forces listen-only mode when set to `1`.
pub const DISABLE_SENDING_ENV: &str = "RAMSES_DISABLE_SENDING";

/// Bound of each priority send queue; overflow fails with `Busy`.
pub const SEND_QUEUE_BOUND: usize = 64;

/// Engine configuration.
///
/// The defaults are the protocol's: a serial gateway echoes within half a
/// second, devices answer within three, and a failed send is retried
/// after a 200 ms backoff.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The gateway's own device id, injected as the source of commands
    /// built without one.
    pub gateway_id: Address,
    /// How long to wait for our own echo.
    pub echo_timeout: Duration,
    /// How long to wait for an expected reply.
    pub reply_timeout: Duration,
    /// Pause before a retry that follows a reply timeout.
    pub retry_backoff: Duration,
    /// Listen-only mode: submissions fail with `ReadOnly`.
    ///
    /// Defaults to the `RAMSES_DISABLE_SENDING` environment variable.
    pub disable_sending: bool,
    /// Capacity of the diagnostic event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            gateway_id: Address::hgi(),
            echo_timeout: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(3),
            retry_backoff: Duration::from_millis(200),
            disable_sending: std::env::var(DISABLE_SENDING_ENV).as_deref() == Ok("1"),
            event_capacity: 64,
        }
    }
}

/// The subset of the configuration the IO loop needs at runtime.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub gateway_id: Address,
    pub echo_timeout: Duration,
    pub reply_timeout: Duration,
    pub retry_backoff: Duration,
}

/// Monotonic engine counters.
///
/// Snapshot with [`Engine::stats`]; the engine only ever increments.
#[derive(Debug, Default)]
pub struct EngineStats {
    frames_rx: AtomicU64,
    frames_tx: AtomicU64,
    codec_errors: AtomicU64,
    retries: AtomicU64,
    transactions_failed: AtomicU64,
}

impl EngineStats {
    pub(crate) fn bump_rx(&self) {
        self.frames_rx.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn bump_tx(&self) {
        self.frames_tx.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn bump_codec_errors(&self) {
        self.codec_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn bump_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn bump_failed(&self) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    /// Frames decoded from the transport.
    pub frames_rx: u64,
    /// Frames transmitted (retries included).
    pub frames_tx: u64,
    /// Lines dropped by the codec.
    pub codec_errors: u64,
    /// Retransmissions performed.
    pub retries: u64,
    /// Transactions that ended in failure (cancellations excluded).
    pub transactions_failed: u64,
}

/// A submitted command that has not resolved yet.
///
/// Dropping the handle does not cancel the command; call
/// [`cancel`](PendingCommand::cancel) for that. Cancellation is
/// cooperative: the engine observes it at its next suspension point and
/// resolves the slot with `Cancelled`. Radio bytes already sent are not
/// recalled, and a reply arriving after cancellation is published as
/// spontaneous traffic.
#[derive(Debug)]
pub struct PendingCommand {
    rx: oneshot::Receiver<Result<Packet>>,
    cancel: CancellationToken,
}

impl PendingCommand {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the cancellation token, for tying this command to a
    /// broader cancel scope.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the transaction to resolve.
    pub async fn wait(self) -> Result<Packet> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::NotConnected),
        }
    }
}

/// Handle to a running protocol engine.
pub struct Engine {
    bind_tx: mpsc::Sender<SendRequest>,
    cmd_tx: mpsc::Sender<SendRequest>,
    probe_tx: mpsc::Sender<SendRequest>,
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<EngineEvent>,
    stats: Arc<EngineStats>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    transport_return: oneshot::Receiver<Box<dyn FrameTransport>>,
    gateway_id: Address,
    disable_sending: bool,
}

impl Engine {
    /// Spawn the IO task over a transport and return the handle.
    pub fn spawn(transport: Box<dyn FrameTransport>, config: EngineConfig) -> Engine {
        let (bind_tx, bind_rx) = mpsc::channel(SEND_QUEUE_BOUND);
        let (cmd_tx, cmd_rx) = mpsc::channel(SEND_QUEUE_BOUND);
        let (probe_tx, probe_rx) = mpsc::channel(SEND_QUEUE_BOUND);
        let (events, _) = broadcast::channel(config.event_capacity);
        let (transport_tx, transport_rx) = oneshot::channel();

        let dispatcher = Arc::new(Dispatcher::new());
        let stats = Arc::new(EngineStats::default());
        let cancel = CancellationToken::new();

        let shared = IoShared {
            config: ResolvedConfig {
                gateway_id: config.gateway_id.clone(),
                echo_timeout: config.echo_timeout,
                reply_timeout: config.reply_timeout,
                retry_backoff: config.retry_backoff,
            },
            dispatcher: Arc::clone(&dispatcher),
            events: events.clone(),
            stats: Arc::clone(&stats),
        };

        let task = tokio::spawn(io_loop(
            transport,
            shared,
            bind_rx,
            cmd_rx,
            probe_rx,
            cancel.clone(),
            transport_tx,
        ));

        Engine {
            bind_tx,
            cmd_tx,
            probe_tx,
            dispatcher,
            events,
            stats,
            cancel,
            task,
            transport_return: transport_rx,
            gateway_id: config.gateway_id,
            disable_sending: config.disable_sending,
        }
    }

    /// The gateway's own device id.
    pub fn gateway_id(&self) -> &Address {
        &self.gateway_id
    }

    /// Whether the engine refuses submissions.
    pub fn is_read_only(&self) -> bool {
        self.disable_sending
    }

    /// Submit a command; returns a handle to await or cancel it.
    ///
    /// Fails immediately with `ReadOnly` in listen-only mode and with
    /// `Busy` when the priority class's queue is full.
    pub fn submit(&self, cmd: Command) -> Result<PendingCommand> {
        self.submit_with_cancel(cmd, self.cancel.child_token())
    }

    /// Submit with a caller-supplied cancellation token, so a broader
    /// scope (a binding attempt, a shutdown) can cancel the command.
    pub fn submit_with_cancel(
        &self,
        cmd: Command,
        cancel: CancellationToken,
    ) -> Result<PendingCommand> {
        if self.disable_sending {
            return Err(Error::ReadOnly);
        }
        let queue = match cmd.qos.priority {
            Priority::Binding => &self.bind_tx,
            Priority::Command => &self.cmd_tx,
            Priority::Probe => &self.probe_tx,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = SendRequest {
            cmd,
            reply: reply_tx,
            cancel: cancel.clone(),
        };
        queue.try_send(request).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => Error::Busy,
            mpsc::error::TrySendError::Closed(_) => Error::NotConnected,
        })?;
        Ok(PendingCommand {
            rx: reply_rx,
            cancel,
        })
    }

    /// Submit a command and wait for its result: the reply packet for
    /// RQ/W, or the echo for a fire-and-forget `I`.
    pub async fn send_command(&self, cmd: Command) -> Result<Packet> {
        self.submit(cmd)?.wait().await
    }

    /// Subscribe to inbound packets matching `filter`.
    ///
    /// Subscribers see spontaneous traffic as it arrives and each
    /// transaction's reply after the transaction resolves; they never see
    /// echoes of the engine's own transmissions.
    pub fn subscribe(&self, filter: PacketFilter) -> mpsc::UnboundedReceiver<Packet> {
        self.dispatcher.subscribe(filter)
    }

    /// Subscribe for exactly one matching packet.
    pub fn subscribe_once(&self, filter: PacketFilter) -> mpsc::UnboundedReceiver<Packet> {
        self.dispatcher.subscribe_once(filter)
    }

    /// Subscribe to diagnostic events.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Snapshot the engine counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            frames_rx: self.stats.frames_rx.load(Ordering::Relaxed),
            frames_tx: self.stats.frames_tx.load(Ordering::Relaxed),
            codec_errors: self.stats.codec_errors.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            transactions_failed: self.stats.transactions_failed.load(Ordering::Relaxed),
        }
    }

    /// Stop the IO task and recover the transport.
    ///
    /// In-flight and queued commands resolve with `Cancelled`.
    pub async fn shutdown(self) -> Result<Box<dyn FrameTransport>> {
        debug!("engine shutdown requested");
        self.cancel.cancel();
        let _ = self.task.await;
        self.transport_return.await.map_err(|_| Error::NotConnected)
    }
}
