//! Inbound packet dispatch.
//!
//! The engine pushes every received packet through its transaction state
//! machine first (echo and reply matching); whatever is left over --
//! spontaneous traffic, plus each resolved reply after its transaction
//! completes -- lands here and is delivered to subscribers in
//! registration order.
//!
//! Subscriptions are filtered channels. A one-shot subscription fires for
//! a single matching packet and then unregisters itself; that is the hook
//! lazy feature-detection builds on (subscribe once for the first
//! `I 10E0` from a device, fingerprint it, move on).

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use ramses_codec::Packet;
use ramses_core::{Address, Code, Verb};

/// A predicate over packets, in disjunctive-field form: every populated
/// field must match.
#[derive(Debug, Clone, Default)]
pub struct PacketFilter {
    /// Match any of these codes; empty matches every code.
    pub codes: Vec<Code>,
    /// Match this verb exactly.
    pub verb: Option<Verb>,
    /// Match this exact source.
    pub src: Option<Address>,
    /// Match packets touching this device (as source or addressee).
    pub device: Option<Address>,
}

impl PacketFilter {
    /// A filter matching every packet.
    pub fn any() -> PacketFilter {
        PacketFilter::default()
    }

    /// A filter matching a single code.
    pub fn code(code: Code) -> PacketFilter {
        PacketFilter {
            codes: vec![code],
            ..PacketFilter::default()
        }
    }

    /// A filter matching any of `codes`.
    pub fn codes(codes: &[Code]) -> PacketFilter {
        PacketFilter {
            codes: codes.to_vec(),
            ..PacketFilter::default()
        }
    }

    /// Require this verb.
    pub fn with_verb(mut self, verb: Verb) -> Self {
        self.verb = Some(verb);
        self
    }

    /// Require this exact source address.
    pub fn from(mut self, src: Address) -> Self {
        self.src = Some(src);
        self
    }

    /// Require the packet to touch this device, as source or addressee.
    pub fn touching(mut self, device: Address) -> Self {
        self.device = Some(device);
        self
    }

    /// Whether a packet passes the filter.
    pub fn matches(&self, pkt: &Packet) -> bool {
        if !self.codes.is_empty() && !self.codes.contains(&pkt.code) {
            return false;
        }
        if self.verb.is_some_and(|v| v != pkt.verb) {
            return false;
        }
        if self.src.as_ref().is_some_and(|src| *src != pkt.src) {
            return false;
        }
        if self
            .device
            .as_ref()
            .is_some_and(|dev| *dev != pkt.src && dev != pkt.effective_dst())
        {
            return false;
        }
        true
    }
}

struct Subscription {
    filter: PacketFilter,
    tx: mpsc::UnboundedSender<Packet>,
    once: bool,
}

/// The ordered subscriber registry.
///
/// Delivery happens on the engine's IO task; subscribers receive packets
/// through unbounded channels and never block the engine. A subscription
/// whose receiver was dropped is pruned on the next delivery attempt.
#[derive(Default)]
pub struct Dispatcher {
    subs: Mutex<Vec<Subscription>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Dispatcher {
        Dispatcher::default()
    }

    /// Register a subscription; matching packets arrive on the returned
    /// channel in arrival order.
    pub fn subscribe(&self, filter: PacketFilter) -> mpsc::UnboundedReceiver<Packet> {
        self.register(filter, false)
    }

    /// Register a one-shot subscription: the first matching packet is
    /// delivered and the subscription removed.
    pub fn subscribe_once(&self, filter: PacketFilter) -> mpsc::UnboundedReceiver<Packet> {
        self.register(filter, true)
    }

    fn register(&self, filter: PacketFilter, once: bool) -> mpsc::UnboundedReceiver<Packet> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs
            .lock()
            .expect("dispatcher registry")
            .push(Subscription { filter, tx, once });
        rx
    }

    /// Deliver a packet to every matching subscriber, in registration
    /// order.
    pub fn dispatch(&self, pkt: &Packet) {
        let mut subs = self.subs.lock().expect("dispatcher registry");
        subs.retain(|sub| {
            if !sub.filter.matches(pkt) {
                return !sub.tx.is_closed();
            }
            match sub.tx.send(pkt.clone()) {
                Ok(()) => !sub.once,
                Err(_) => false,
            }
        });
        trace!(hdr = %pkt.hdr(), subscribers = subs.len(), "dispatched");
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subs.lock().expect("dispatcher registry").len()
    }

    /// Whether no subscriptions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ramses_codec::Frame;

    fn packet(line: &str) -> Packet {
        Packet::from_frame(Frame::decode(Utc::now(), line).unwrap())
    }

    fn bind_pkt() -> Packet {
        packet(" I --- 29:091138 32:022222 --:------ 1FC9 001 00")
    }

    fn fan_pkt() -> Packet {
        packet(" I --- 32:022222 --:------ 32:022222 31D9 003 000064")
    }

    #[test]
    fn filter_any_matches_everything() {
        assert!(PacketFilter::any().matches(&bind_pkt()));
        assert!(PacketFilter::any().matches(&fan_pkt()));
    }

    #[test]
    fn filter_by_code() {
        let f = PacketFilter::code(Code::BIND);
        assert!(f.matches(&bind_pkt()));
        assert!(!f.matches(&fan_pkt()));

        let f = PacketFilter::codes(&[Code::BIND, Code::FAN_STATE]);
        assert!(f.matches(&bind_pkt()));
        assert!(f.matches(&fan_pkt()));
    }

    #[test]
    fn filter_by_verb_and_src() {
        let f = PacketFilter::any().with_verb(Verb::I);
        assert!(f.matches(&bind_pkt()));

        let f = PacketFilter::any().with_verb(Verb::W);
        assert!(!f.matches(&bind_pkt()));

        let src: Address = "29:091138".parse().unwrap();
        let f = PacketFilter::any().from(src);
        assert!(f.matches(&bind_pkt()));
        assert!(!f.matches(&fan_pkt()));
    }

    #[test]
    fn filter_touching_matches_either_end() {
        let fan: Address = "32:022222".parse().unwrap();
        let f = PacketFilter::any().touching(fan);
        // The fan is the destination of one and the source of the other.
        assert!(f.matches(&bind_pkt()));
        assert!(f.matches(&fan_pkt()));

        let stranger: Address = "01:145038".parse().unwrap();
        let f = PacketFilter::any().touching(stranger);
        assert!(!f.matches(&bind_pkt()));
    }

    #[test]
    fn dispatch_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let mut first = dispatcher.subscribe(PacketFilter::any());
        let mut second = dispatcher.subscribe(PacketFilter::any());

        dispatcher.dispatch(&bind_pkt());

        // Both see the packet; a shared sequence number would be needed to
        // observe ordering across channels, so check both got exactly one.
        assert_eq!(first.try_recv().unwrap().hdr(), "1FC9|I|00");
        assert_eq!(second.try_recv().unwrap().hdr(), "1FC9|I|00");
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn filtered_subscription_sees_only_matches() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe(PacketFilter::code(Code::FAN_STATE));

        dispatcher.dispatch(&bind_pkt());
        dispatcher.dispatch(&fan_pkt());

        assert_eq!(rx.try_recv().unwrap().code, Code::FAN_STATE);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn once_subscription_fires_once() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe_once(PacketFilter::code(Code::BIND));
        assert_eq!(dispatcher.len(), 1);

        dispatcher.dispatch(&bind_pkt());
        dispatcher.dispatch(&bind_pkt());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.len(), 0);
    }

    #[test]
    fn once_subscription_survives_non_matches() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe_once(PacketFilter::code(Code::BIND));

        dispatcher.dispatch(&fan_pkt());
        assert_eq!(dispatcher.len(), 1);
        assert!(rx.try_recv().is_err());

        dispatcher.dispatch(&bind_pkt());
        assert!(rx.try_recv().is_ok());
        assert_eq!(dispatcher.len(), 0);
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.subscribe(PacketFilter::any());
        drop(rx);

        dispatcher.dispatch(&bind_pkt());
        assert_eq!(dispatcher.len(), 0);
    }
}
