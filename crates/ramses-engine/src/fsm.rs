//! The transaction state machine and its IO loop.
//!
//! One tokio task owns the transport exclusively and serializes all bus
//! access: at most one transaction is in flight at any time. A
//! transaction walks
//!
//! ```text
//! Queued -> Sending -> AwaitingEcho -> AwaitingReply -> Done
//!                 \________ timeout/retry _______/      |
//!                          retries exhausted -----> Failed
//! ```
//!
//! The half-duplex radio echoes every transmission back on the read
//! stream; the echo is matched byte-for-byte against the sent frame,
//! consumed exactly once, and never republished to subscribers. A command
//! expecting a reply (`RQ`/`W`, or a self-addressed binding offer) then
//! waits for a packet carrying the expected header, addressed back to the
//! command's source. Everything else received while waiting is spontaneous
//! traffic and goes straight to the dispatcher.
//!
//! Retry policy: an echo timeout re-sends immediately; a reply timeout
//! backs off briefly first. Total sends never exceed `retries + 1`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use ramses_codec::{Command, ExpectedReply, Frame, Packet, ReplyFrom};
use ramses_core::error::{Error, Result};
use ramses_core::{EngineEvent, FrameTransport};

use crate::dispatcher::Dispatcher;
use crate::engine::{EngineStats, ResolvedConfig};

/// How long one idle read waits before the loop re-checks its channels.
const IDLE_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A queued send: the command, its completion slot, and its cancel token.
pub(crate) struct SendRequest {
    pub cmd: Command,
    pub reply: oneshot::Sender<Result<Packet>>,
    pub cancel: CancellationToken,
}

/// Everything the IO loop shares with the engine handle.
pub(crate) struct IoShared {
    pub config: ResolvedConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub events: broadcast::Sender<EngineEvent>,
    pub stats: Arc<EngineStats>,
}

enum LoopOutcome {
    Continue,
    Stop,
    Fault(String),
}

/// The main IO loop. Runs as a spawned tokio task; owns the transport.
///
/// Uses `tokio::select! { biased; }` to enforce the send-priority order:
/// cancellation, then binding traffic, then commands, then probes, then
/// idle reading of spontaneous frames.
pub(crate) async fn io_loop(
    mut transport: Box<dyn FrameTransport>,
    shared: IoShared,
    mut bind_rx: mpsc::Receiver<SendRequest>,
    mut cmd_rx: mpsc::Receiver<SendRequest>,
    mut probe_rx: mpsc::Receiver<SendRequest>,
    cancel: CancellationToken,
    transport_return: oneshot::Sender<Box<dyn FrameTransport>>,
) {
    let _ = shared.events.send(EngineEvent::Connected);

    loop {
        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => LoopOutcome::Stop,

            req = bind_rx.recv() => match req {
                Some(req) => handle_request(&mut *transport, &shared, req).await,
                None => LoopOutcome::Stop,
            },

            req = cmd_rx.recv() => match req {
                Some(req) => handle_request(&mut *transport, &shared, req).await,
                None => LoopOutcome::Stop,
            },

            req = probe_rx.recv() => match req {
                Some(req) => handle_request(&mut *transport, &shared, req).await,
                None => LoopOutcome::Stop,
            },

            res = read_one(&mut *transport, &shared) => match res {
                Ok(()) => LoopOutcome::Continue,
                Err(err) => LoopOutcome::Fault(err.to_string()),
            },
        };

        match outcome {
            LoopOutcome::Continue => {}
            LoopOutcome::Stop => break,
            LoopOutcome::Fault(msg) => {
                warn!(%msg, "transport fault, engine stopping");
                fail_pending(&mut bind_rx, &mut cmd_rx, &mut probe_rx, Some(&msg));
                break;
            }
        }
    }

    // A plain stop (shutdown) cancels whatever was still queued.
    fail_pending(&mut bind_rx, &mut cmd_rx, &mut probe_rx, None);
    let _ = shared.events.send(EngineEvent::Disconnected);
    let _ = transport_return.send(transport);
}

/// Drive one transaction to completion and resolve its caller.
async fn handle_request(
    transport: &mut dyn FrameTransport,
    shared: &IoShared,
    req: SendRequest,
) -> LoopOutcome {
    let SendRequest { cmd, reply, cancel } = req;

    if cancel.is_cancelled() {
        let _ = reply.send(Err(Error::Cancelled));
        return LoopOutcome::Continue;
    }

    let wants_reply = cmd.expected_reply.is_some();
    let result = run_transaction(transport, shared, &cmd, &cancel).await;

    match result {
        Ok(pkt) => {
            let _ = reply.send(Ok(pkt.clone()));
            // The echo of a no-reply command stays de-duplicated; an
            // actual reply reaches subscribers after its transaction, so
            // ordering is: completion first, then delivery.
            if wants_reply {
                shared.dispatcher.dispatch(&pkt);
            }
            LoopOutcome::Continue
        }
        Err(err @ (Error::Transport(_) | Error::Io(_) | Error::NotConnected)) => {
            let msg = err.to_string();
            let _ = reply.send(Err(err));
            LoopOutcome::Fault(msg)
        }
        Err(err) => {
            if !matches!(err, Error::Cancelled) {
                shared.stats.bump_failed();
            }
            let _ = reply.send(Err(err));
            LoopOutcome::Continue
        }
    }
}

/// Execute the send/echo/reply cycle with retries.
async fn run_transaction(
    transport: &mut dyn FrameTransport,
    shared: &IoShared,
    cmd: &Command,
    cancel: &CancellationToken,
) -> Result<Packet> {
    let frame = cmd.to_frame(&shared.config.gateway_id, Utc::now());
    let line = frame.encode_for_tx();
    let echo_timeout = cmd.qos.echo_timeout.unwrap_or(shared.config.echo_timeout);
    let reply_timeout = cmd.qos.reply_timeout.unwrap_or(shared.config.reply_timeout);
    let tx_limit = cmd.qos.retries + 1;

    let mut backoff_first = false;
    for attempt in 1..=tx_limit {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if attempt > 1 {
            shared.stats.bump_retries();
            debug!(attempt, hdr = %cmd.tx_hdr(), "retrying transmission");
            // Immediate after a missed echo; brief backoff after a
            // missed reply.
            if backoff_first {
                sleep_or_cancel(shared.config.retry_backoff, cancel).await?;
            }
        }

        transport.send_line(&line).await.map_err(as_fault)?;
        shared.stats.bump_tx();
        trace!(%line, attempt, "transmitted");

        // AwaitingEcho.
        let deadline = Instant::now() + echo_timeout;
        let mut echo: Option<Packet> = None;
        while echo.is_none() {
            match next_packet(transport, shared, deadline, cancel).await? {
                None => break,
                Some(pkt) if pkt.frame().body() == frame.body() => {
                    trace!(hdr = %pkt.hdr(), "echo matched");
                    echo = Some(pkt);
                }
                Some(pkt) => shared.dispatcher.dispatch(&pkt),
            }
        }
        let Some(echo_pkt) = echo else {
            debug!(attempt, hdr = %cmd.tx_hdr(), "echo timeout");
            backoff_first = false;
            continue;
        };

        // AwaitingReply -- skipped entirely for fire-and-forget sends.
        let Some(expected) = &cmd.expected_reply else {
            return Ok(echo_pkt);
        };

        let deadline = Instant::now() + reply_timeout;
        loop {
            match next_packet(transport, shared, deadline, cancel).await? {
                None => break,
                Some(pkt) if reply_matches(expected, &frame, &pkt) => {
                    debug!(hdr = %pkt.hdr(), src = %pkt.src, "reply matched");
                    return Ok(pkt);
                }
                // Includes late echo copies and lookalike replies from
                // the wrong source: spontaneous, transaction unaffected.
                Some(pkt) => shared.dispatcher.dispatch(&pkt),
            }
        }
        debug!(attempt, hdr = %expected.hdr, "reply timeout");
        backoff_first = true;
    }

    Err(Error::RetriesExhausted { attempts: tx_limit })
}

/// Whether a packet is the reply a command is waiting for.
fn reply_matches(expected: &ExpectedReply, sent: &Frame, pkt: &Packet) -> bool {
    if pkt.hdr() != expected.hdr {
        return false;
    }
    // The reply must come back to whoever sent the command.
    if *pkt.effective_dst() != sent.src {
        return false;
    }
    match &expected.from {
        ReplyFrom::Addr(addr) => pkt.src == *addr,
        ReplyFrom::Any => pkt.src != sent.src,
    }
}

/// Read lines until a packet decodes or the deadline passes.
///
/// Comment/OOB lines are skipped; codec rejections are counted and
/// surfaced as [`EngineEvent::CodecError`] without stopping anything.
async fn next_packet(
    transport: &mut dyn FrameTransport,
    shared: &IoShared,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<Option<Packet>> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        let line = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = transport.recv_line(deadline - now) => match res.map_err(as_fault)? {
                Some(line) => line,
                None => return Ok(None),
            },
        };
        if let Some(pkt) = decode_line(shared, &line) {
            return Ok(Some(pkt));
        }
    }
}

/// One idle read outside any transaction; spontaneous frames dispatch.
async fn read_one(transport: &mut dyn FrameTransport, shared: &IoShared) -> Result<()> {
    match transport.recv_line(IDLE_READ_TIMEOUT).await.map_err(as_fault)? {
        Some(line) => {
            if let Some(pkt) = decode_line(shared, &line) {
                shared.dispatcher.dispatch(&pkt);
            }
            Ok(())
        }
        None => Ok(()),
    }
}

/// Decode a received line into a packet, filtering OOB noise and
/// accounting for codec rejections.
fn decode_line(shared: &IoShared, line: &str) -> Option<Packet> {
    if Frame::is_out_of_band(line) {
        trace!(%line, "out-of-band line");
        return None;
    }
    match Frame::decode(Utc::now(), line) {
        Ok(frame) => {
            shared.stats.bump_rx();
            Some(Packet::from_frame(frame))
        }
        Err(err) => {
            shared.stats.bump_codec_errors();
            debug!(%line, %err, "dropped invalid frame");
            let _ = shared.events.send(EngineEvent::CodecError {
                line: line.to_string(),
                error: err.to_string(),
            });
            None
        }
    }
}

/// Sleep, returning early with `Cancelled` if the token fires.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Promote transport-layer failures to the fatal `Transport` kind.
fn as_fault(err: Error) -> Error {
    match err {
        Error::Io(e) => Error::Transport(e.to_string()),
        Error::NotConnected => Error::Transport("not connected".to_string()),
        other => other,
    }
}

/// Fail every request still sitting in the queues: with a transport
/// fault when one occurred, as cancelled on a plain shutdown.
fn fail_pending(
    bind_rx: &mut mpsc::Receiver<SendRequest>,
    cmd_rx: &mut mpsc::Receiver<SendRequest>,
    probe_rx: &mut mpsc::Receiver<SendRequest>,
    fault: Option<&str>,
) {
    for rx in [bind_rx, cmd_rx, probe_rx] {
        while let Ok(req) = rx.try_recv() {
            let err = match fault {
                Some(msg) => Error::Transport(msg.to_string()),
                None => Error::Cancelled,
            };
            let _ = req.reply.send(Err(err));
        }
    }
}
