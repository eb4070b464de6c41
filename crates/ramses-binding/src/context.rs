//! Binding attempt state.
//!
//! A [`BindContext`] records one pairing attempt: the role played, where
//! in the handshake it stands, the packets observed, and the outcome. The
//! state graph is monotonic and its terminal states are absorbing -- once
//! an attempt is bound or failed it stays that way, and a fresh attempt
//! needs a fresh context.

use std::time::Duration;

use tracing::warn;

use ramses_codec::Packet;
use ramses_core::{Address, Code};

/// How long a sent offer waits for its accept.
pub const T_WAIT: Duration = Duration::from_secs(5);

/// How long a sent accept waits for its confirm.
pub const T_CONFIRM: Duration = Duration::from_secs(3);

/// Attempts permitted at each sending step.
pub const RETRY_LIMIT: u32 = 3;

/// Which side of the handshake this context plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindRole {
    /// No binding attempted yet.
    None,
    /// The device asking to be bound (typically a remote).
    Supplicant,
    /// The device accepting the binding (typically a fan).
    Respondent,
}

/// Position in the handshake state graph.
///
/// Only a subset is reachable per role; both roles share `Idle` and
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindState {
    /// Nothing sent or awaited yet.
    Idle,
    /// Tender transmitted, waiting for an accept.
    SuppOfferSent,
    /// Accept received, affirm not yet sent.
    SuppReadyConfirm,
    /// Affirm sent; ratify optional.
    SuppReadyRatify,
    /// Terminal: supplicant bound.
    SuppBound,
    /// Passively waiting for a tender.
    RespAwaitOffer,
    /// Accept transmitted, waiting for the affirm.
    RespAcceptSent,
    /// Affirm received, ratify required and awaited.
    RespAwaitRatify,
    /// Terminal: respondent bound.
    RespBound,
    /// Terminal: the attempt failed.
    Failed,
}

impl BindState {
    /// Whether this state is absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BindState::SuppBound | BindState::RespBound | BindState::Failed)
    }

    /// Whether this state is a successful terminal.
    pub fn is_bound(&self) -> bool {
        matches!(self, BindState::SuppBound | BindState::RespBound)
    }
}

/// One binding attempt, kept as the device record's last outcome.
#[derive(Debug, Clone)]
pub struct BindContext {
    /// The role this context plays.
    pub role: BindRole,
    /// Current state; terminal states are absorbing.
    state: BindState,
    /// The local (or emulated) device.
    pub device: Address,
    /// The counterparty, once learned.
    pub peer: Option<Address>,
    /// The observed offer packet.
    pub tender: Option<Packet>,
    /// The observed accept packet.
    pub accept: Option<Packet>,
    /// The observed affirm packet.
    pub affirm: Option<Packet>,
    /// Codes offered (supplicant) or accepted (respondent).
    pub codes: Vec<Code>,
    /// The domain id in play.
    pub idx: u8,
    /// Oem vendor code advertised or learned, if any.
    pub oem_code: Option<u8>,
    /// Sends performed at the current sending step.
    pub attempts: u32,
    /// Failure description for a `Failed` terminal.
    pub failure: Option<String>,
}

impl BindContext {
    /// A fresh supplicant-side context.
    pub fn supplicant(device: Address, codes: Vec<Code>, idx: u8, oem_code: Option<u8>) -> Self {
        BindContext {
            role: BindRole::Supplicant,
            state: BindState::Idle,
            device,
            peer: None,
            tender: None,
            accept: None,
            affirm: None,
            codes,
            idx,
            oem_code,
            attempts: 0,
            failure: None,
        }
    }

    /// A fresh respondent-side context.
    pub fn respondent(device: Address, codes: Vec<Code>, idx: u8) -> Self {
        BindContext {
            role: BindRole::Respondent,
            state: BindState::Idle,
            device,
            peer: None,
            tender: None,
            accept: None,
            affirm: None,
            codes,
            idx,
            oem_code: None,
            attempts: 0,
            failure: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> BindState {
        self.state
    }

    /// Advance the state graph.
    ///
    /// Terminal states absorb: a transition out of one is refused (and
    /// logged), so a finished attempt cannot be revived in place.
    pub fn transition(&mut self, next: BindState) {
        if self.state.is_terminal() {
            warn!(
                from = ?self.state,
                to = ?next,
                device = %self.device,
                "refusing transition out of terminal binding state"
            );
            return;
        }
        self.state = next;
    }

    /// Mark the attempt failed with a reason. Absorbing like any other
    /// terminal transition.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.failure = Some(reason.into());
        self.state = BindState::Failed;
    }
}
