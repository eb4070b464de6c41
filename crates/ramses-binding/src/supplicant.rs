//! The supplicant side of the binding handshake.
//!
//! A supplicant broadcasts a TENDER offering the codes it will publish,
//! waits for a respondent's ACCEPT, confirms with an AFFIRM, and
//! optionally publishes its identity (RATIFY). Each outbound step rides
//! the protocol engine's binding-priority queue; the accept arrives as
//! the tender's expected reply, so the engine's retry machinery drives
//! the offer step.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ramses_codec::{parse_bind_triplets, Command, Packet, Qos};
use ramses_core::error::{Error, Result};
use ramses_core::{Address, Code, Priority};
use ramses_engine::Engine;

use crate::context::{BindContext, BindState, RETRY_LIMIT, T_WAIT};

/// What a supplicant puts on offer.
#[derive(Debug, Clone)]
pub struct BindOffer {
    /// Codes the device will publish once bound (e.g. `22F1`, `22F3`).
    pub offer_codes: Vec<Code>,
    /// Domain id for the offer triplets (`00` Vasco/ClimaRad, `21`
    /// Nuaire).
    pub idx: u8,
    /// Oem vendor code; when set the tender advertises identity with an
    /// `<oem> 10E0 <src>` triplet. Respondents probe `RQ 10E0` after the
    /// handshake when it is missing.
    pub oem_code: Option<u8>,
    /// The code the affirm confirms; must be one of `offer_codes`.
    /// The wire shape of the affirm is the one-byte domain id either way.
    pub confirm_code: Option<Code>,
    /// Identity broadcast to publish after the affirm (`I 10E0` to the
    /// broadcast address).
    pub ratify: Option<Command>,
}

impl BindOffer {
    /// An offer of `codes` at domain `00` with no identity advert.
    pub fn new(offer_codes: Vec<Code>) -> BindOffer {
        BindOffer {
            offer_codes,
            idx: 0x00,
            oem_code: None,
            confirm_code: None,
            ratify: None,
        }
    }
}

/// Drives one supplicant-side binding attempt.
pub struct SupplicantBinding<'a> {
    engine: &'a Engine,
    offer: BindOffer,
    ctx: BindContext,
    cancel: CancellationToken,
}

impl<'a> SupplicantBinding<'a> {
    /// Prepare an attempt for `device` (the emulated remote's address).
    pub fn new(engine: &'a Engine, device: Address, offer: BindOffer) -> SupplicantBinding<'a> {
        let ctx = BindContext::supplicant(
            device,
            offer.offer_codes.clone(),
            offer.idx,
            offer.oem_code,
        );
        SupplicantBinding {
            engine,
            offer,
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

    /// Run the handshake to a terminal state.
    ///
    /// On failure the context is left in `Failed` with the reason and the
    /// error is returned; cancellations surface as `Cancelled`.
    pub async fn bind(&mut self) -> Result<()> {
        if self.ctx.state() != BindState::Idle {
            return Err(Error::BindingFailed("attempt already ran".into()));
        }
        if let Some(code) = self.offer.confirm_code {
            if !self.offer.offer_codes.contains(&code) {
                return Err(Error::InvalidParameter(format!(
                    "confirm code {code} not among the offered codes"
                )));
            }
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

        // TENDER, with the accept as its expected reply.
        let mut tender = Command::tender(
            device.clone(),
            self.offer.idx,
            &self.offer.offer_codes,
            self.offer.oem_code,
        )?;
        tender.qos = Qos {
            priority: Priority::Binding,
            retries: RETRY_LIMIT - 1,
            echo_timeout: None,
            reply_timeout: Some(T_WAIT),
        };

        self.ctx.transition(BindState::SuppOfferSent);
        info!(device = %device, idx = self.offer.idx, "tender transmitted");
        let accept = self
            .engine
            .submit_with_cancel(tender, self.cancel.child_token())?
            .wait()
            .await
            .map_err(|err| match err {
                Error::RetriesExhausted { .. } => {
                    Error::BindingFailed("no accept within the offer window".into())
                }
                other => other,
            })?;

        let respondent = self.check_accept(&accept)?;
        self.ctx.peer = Some(respondent.clone());
        self.ctx.accept = Some(accept);
        self.ctx.transition(BindState::SuppReadyConfirm);

        // AFFIRM: the one-byte domain id, directed at the respondent.
        let affirm = Command::affirm(device.clone(), respondent.clone(), self.offer.idx)?;
        self.engine
            .submit_with_cancel(affirm, self.cancel.child_token())?
            .wait()
            .await?;
        self.ctx.transition(BindState::SuppReadyRatify);
        debug!(device = %device, respondent = %respondent, "affirm transmitted");

        // RATIFY, when the caller supplied an identity to publish.
        if let Some(ratify) = self.offer.ratify.take() {
            let mut ratify = ratify.with_src(device.clone());
            ratify.qos.priority = Priority::Binding;
            self.engine
                .submit_with_cancel(ratify, self.cancel.child_token())?
                .wait()
                .await?;
            info!(device = %device, "identity ratified");
        } else if self.offer.oem_code.is_none() {
            // Observed with fully-faked remotes: without the 10E0 advert
            // or a ratify, some vendors probe RQ 10E0 afterwards and may
            // not functionally bind.
            warn!(
                device = %device,
                "bound without identity advert or ratify; respondent may probe 10E0"
            );
        }

        self.ctx.transition(BindState::SuppBound);
        info!(device = %device, respondent = %respondent, "supplicant bound");
        Ok(())
    }

    /// Validate an accept and extract the respondent's address.
    fn check_accept(&self, accept: &Packet) -> Result<Address> {
        let triplets = parse_bind_triplets(&accept.payload)
            .map_err(|err| Error::BindingFailed(format!("unparseable accept: {err}")))?;
        let first = triplets.first().expect("triplet payloads are non-empty");
        if triplets.iter().any(|t| t.addr != first.addr) {
            return Err(Error::BindingFailed(
                "accept triplets with mixed addresses".into(),
            ));
        }
        if first.addr != accept.src {
            return Err(Error::BindingFailed(format!(
                "accept triplets name {} but came from {}",
                first.addr, accept.src
            )));
        }
        if triplets.iter().any(|t| t.idx != self.offer.idx) {
            return Err(Error::BindingFailed(format!(
                "accept did not echo idx {:02X}",
                self.offer.idx
            )));
        }
        Ok(accept.src.clone())
    }
}
