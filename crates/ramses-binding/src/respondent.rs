//! The respondent side of the binding handshake.
//!
//! A respondent listens for a TENDER offering any of the codes it wants
//! to consume, answers with an ACCEPT echoing the tender's domain id,
//! waits for the supplicant's AFFIRM, and optionally for its RATIFY
//! identity broadcast. Tenders arrive through a dispatcher subscription;
//! the affirm rides the accept transaction as its expected reply.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ramses_codec::{parse_bind_triplets, BindTriplet, Command, Packet, Qos};
use ramses_core::error::{Error, Result, TimeoutKind};
use ramses_core::{Address, Code, Priority, Verb};
use ramses_engine::{Engine, PacketFilter};

use crate::context::{BindContext, BindState, RETRY_LIMIT, T_CONFIRM, T_WAIT};

/// What a respondent is willing to bind.
#[derive(Debug, Clone)]
pub struct BindAccept {
    /// Codes listed in the ACCEPT triplets (what this device will
    /// publish back to the supplicant, e.g. `31D9`/`31DA` for a fan).
    pub accept_codes: Vec<Code>,
    /// Codes to look for among the tender's offers (what this device
    /// consumes, e.g. `22F1`). Defaults to `accept_codes` when empty.
    pub match_codes: Vec<Code>,
    /// Domain id used when no tender dictates one. On the wire the
    /// tender's own idx is echoed verbatim.
    pub idx: u8,
    /// Whether the handshake only completes after the supplicant's
    /// `10E0` RATIFY broadcast.
    pub require_ratify: bool,
    /// How long to wait for a tender; `None` listens until cancelled.
    pub offer_timeout: Option<Duration>,
}

impl BindAccept {
    /// Accept `codes` at domain `00`, no ratify requirement, waiting
    /// indefinitely, matching tenders that offer any of the same codes.
    pub fn new(accept_codes: Vec<Code>) -> BindAccept {
        BindAccept {
            accept_codes,
            match_codes: Vec::new(),
            idx: 0x00,
            require_ratify: false,
            offer_timeout: None,
        }
    }

    /// Match tenders on `codes` instead of on `accept_codes`.
    pub fn matching(mut self, codes: Vec<Code>) -> BindAccept {
        self.match_codes = codes;
        self
    }

    fn effective_match_codes(&self) -> &[Code] {
        if self.match_codes.is_empty() {
            &self.accept_codes
        } else {
            &self.match_codes
        }
    }
}

/// Drives one respondent-side binding attempt.
pub struct RespondentBinding<'a> {
    engine: &'a Engine,
    accept: BindAccept,
    ctx: BindContext,
    cancel: CancellationToken,
}

impl<'a> RespondentBinding<'a> {
    /// Prepare an attempt for `device` (the emulated fan's address).
    pub fn new(engine: &'a Engine, device: Address, accept: BindAccept) -> RespondentBinding<'a> {
        let ctx = BindContext::respondent(device, accept.accept_codes.clone(), accept.idx);
        RespondentBinding {
            engine,
            accept,
            ctx,
            cancel: CancellationToken::new(),
        }
    }

    /// The attempt's record so far (and its outcome once finished).
    pub fn context(&self) -> &BindContext {
        &self.ctx
    }

    /// A token that cancels the attempt and any in-flight transmission.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Listen for a matching tender and run the handshake to a terminal
    /// state.
    pub async fn listen(&mut self) -> Result<()> {
        if self.ctx.state() != BindState::Idle {
            return Err(Error::BindingFailed("attempt already ran".into()));
        }
        match self.run().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.ctx.fail(err.to_string());
                Err(err)
            }
        }
    }

    async fn run(&mut self) -> Result<()> {
        let device = self.ctx.device.clone();

        // Tenders are spontaneous; subscribe before waiting.
        let mut tenders = self
            .engine
            .subscribe(PacketFilter::code(Code::BIND).with_verb(Verb::I));

        self.ctx.transition(BindState::RespAwaitOffer);
        let (tender, matched) = self.await_tender(&mut tenders).await?;
        let supplicant = tender.src.clone();
        let idx = matched.idx;
        let advertised_oem = tender_oem(&tender);

        info!(
            device = %device,
            supplicant = %supplicant,
            idx,
            oem = ?advertised_oem,
            "tender matched"
        );
        self.ctx.peer = Some(supplicant.clone());
        self.ctx.idx = idx;
        self.ctx.oem_code = advertised_oem;
        self.ctx.tender = Some(tender);

        // The ratify can cross the affirm on the air; watch for it from
        // this point on.
        let mut ratifies = self.engine.subscribe_once(
            PacketFilter::code(Code::DEV_INFO)
                .with_verb(Verb::I)
                .from(supplicant.clone()),
        );

        // ACCEPT, with the affirm as its expected reply.
        let mut accept = Command::accept(
            device.clone(),
            supplicant.clone(),
            idx,
            &self.accept.accept_codes,
        )?;
        accept.qos = Qos {
            priority: Priority::Binding,
            retries: RETRY_LIMIT - 1,
            echo_timeout: None,
            reply_timeout: Some(T_CONFIRM),
        };

        self.ctx.transition(BindState::RespAcceptSent);
        let affirm = self
            .engine
            .submit_with_cancel(accept, self.cancel.child_token())?
            .wait()
            .await
            .map_err(|err| match err {
                Error::RetriesExhausted { .. } => {
                    Error::BindingFailed("no affirm within the confirm window".into())
                }
                other => other,
            })?;
        debug!(device = %device, hdr = %affirm.hdr(), "affirm received");
        self.ctx.affirm = Some(affirm);

        if self.accept.require_ratify {
            self.ctx.transition(BindState::RespAwaitRatify);
            let ratify = self.recv_within(&mut ratifies, T_WAIT, TimeoutKind::Wait).await?;
            debug!(device = %device, "ratify received: {}", ratify.hdr());
        }

        self.ctx.transition(BindState::RespBound);
        info!(device = %device, supplicant = %supplicant, "respondent bound");

        // A tender with no identity advertisement leaves us blind on the
        // vendor; real units probe the supplicant's identity afterwards.
        if advertised_oem.is_none() {
            warn!(supplicant = %supplicant, "tender carried no 10E0 advert, probing identity");
            let mut probe = Command::get_device_info(supplicant.clone())?.with_src(device.clone());
            probe.qos.priority = Priority::Probe;
            match self
                .engine
                .submit_with_cancel(probe, self.cancel.child_token())
            {
                Ok(pending) => match pending.wait().await {
                    Ok(reply) => {
                        if let Ok(fp) =
                            ramses_codec::DeviceFingerprint::from_payload(&reply.payload)
                        {
                            self.ctx.oem_code = Some(fp.oem_code);
                        }
                    }
                    Err(err) => debug!(%err, "identity probe went unanswered"),
                },
                Err(err) => debug!(%err, "identity probe not submitted"),
            }
        }

        Ok(())
    }

    /// Wait for a tender offering any of our accept codes.
    async fn await_tender(
        &self,
        tenders: &mut mpsc::UnboundedReceiver<Packet>,
    ) -> Result<(Packet, BindTriplet)> {
        let deadline = self
            .accept
            .offer_timeout
            .map(|t| tokio::time::Instant::now() + t);
        loop {
            let pkt = match deadline {
                Some(deadline) => tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(Error::Timeout(TimeoutKind::Wait));
                    }
                    pkt = tenders.recv() => pkt,
                },
                None => tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    pkt = tenders.recv() => pkt,
                },
            };
            let Some(pkt) = pkt else {
                return Err(Error::NotConnected);
            };

            // Affirm-shaped 1FC9 frames and tenders from other domains
            // pass through without ending the wait.
            let Ok(triplets) = parse_bind_triplets(&pkt.payload) else {
                continue;
            };
            if triplets.iter().any(|t| t.addr != pkt.src) {
                debug!(src = %pkt.src, "ignoring tender with foreign triplets");
                continue;
            }
            let matched = triplets
                .iter()
                .find(|t| self.accept.effective_match_codes().contains(&t.code));
            if let Some(matched) = matched {
                return Ok((pkt.clone(), matched.clone()));
            }
        }
    }

    /// Receive from a subscription within a deadline.
    async fn recv_within(
        &self,
        rx: &mut mpsc::UnboundedReceiver<Packet>,
        timeout: Duration,
        kind: TimeoutKind,
    ) -> Result<Packet> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout(kind)),
            pkt = rx.recv() => pkt.ok_or(Error::NotConnected),
        }
    }
}

/// The oem code a tender advertises via its `10E0` triplet, if any.
fn tender_oem(tender: &Packet) -> Option<u8> {
    let triplets = parse_bind_triplets(&tender.payload).ok()?;
    triplets
        .iter()
        .find(|t| t.code == Code::DEV_INFO)
        .map(|t| t.idx)
}
