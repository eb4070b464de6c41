//! The mock [`FrameTransport`] implementation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ramses_core::error::{Error, Result};
use ramses_core::FrameTransport;

/// A pre-loaded request/response expectation.
#[derive(Debug, Clone)]
struct Expectation {
    /// The body of the line we expect to be sent (checksum stripped).
    request: String,
    /// Lines to feed back after the echo when the request matches.
    responses: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    /// Log of every line sent through the transport, verbatim.
    sent: Vec<String>,
    /// How many upcoming echoes to swallow (simulates RF loss).
    drop_echoes: u32,
    /// Whether sent lines are echoed back at all.
    auto_echo: bool,
}

/// Strip a trailing ` *HH` checksum token.
///
/// The engine always synthesizes checksums on transmit; expectations are
/// written without them so tests stay readable.
fn strip_checksum(line: &str) -> &str {
    match line.rfind(" *") {
        Some(pos) if line.len() - pos == 4 => &line[..pos],
        _ => line,
    }
}

/// A scripted [`FrameTransport`] for engine and binding tests.
///
/// Sent lines are matched (checksum-insensitively) against the expectation
/// queue in order; a match feeds the scripted responses to the read side
/// after the synthesized echo. Unmatched sends still echo, so spontaneous
/// transmissions do not need expectations.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

/// Control handle paired with a [`MockTransport`].
///
/// The transport itself is consumed by the engine; the handle stays with
/// the test to script expectations, inject spontaneous lines, and inspect
/// the sent log.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a connected mock transport with auto-echo on.
    pub fn new() -> (MockTransport, MockHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockState {
            auto_echo: true,
            ..MockState::default()
        }));
        let connected = Arc::new(AtomicBool::new(true));
        let transport = MockTransport {
            state: Arc::clone(&state),
            rx,
            tx: tx.clone(),
            connected: Arc::clone(&connected),
        };
        let handle = MockHandle {
            state,
            tx,
            connected,
        };
        (transport, handle)
    }
}

impl MockHandle {
    /// Add an expected request (checksum-free body) and the lines to feed
    /// back when it is sent.
    pub fn expect(&self, request: &str, responses: &[&str]) {
        self.state
            .lock()
            .expect("mock state")
            .expectations
            .push_back(Expectation {
                request: request.trim().to_string(),
                responses: responses.iter().map(|s| s.trim().to_string()).collect(),
            });
    }

    /// Inject a spontaneous line on the read side.
    pub fn inject(&self, line: &str) {
        let _ = self.tx.send(line.trim().to_string());
    }

    /// Swallow the next `n` echoes (the RF lost our transmission).
    pub fn drop_next_echoes(&self, n: u32) {
        self.state.lock().expect("mock state").drop_echoes = n;
    }

    /// Turn echo synthesis on or off entirely.
    pub fn set_auto_echo(&self, on: bool) {
        self.state.lock().expect("mock state").auto_echo = on;
    }

    /// Flip the connected state; a disconnected transport fails all calls.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every line sent through the transport so far, verbatim.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().expect("mock state").sent.clone()
    }

    /// Count of sent lines whose checksum-free body equals `body`.
    ///
    /// Comparison trims the verb padding's leading space.
    pub fn sent_count_of(&self, body: &str) -> usize {
        self.state
            .lock()
            .expect("mock state")
            .sent
            .iter()
            .filter(|line| strip_checksum(line).trim() == body.trim())
            .count()
    }

    /// Expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.state.lock().expect("mock state").expectations.len()
    }
}

#[async_trait]
impl FrameTransport for MockTransport {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }

        let mut state = self.state.lock().expect("mock state");
        state.sent.push(line.to_string());

        if state.drop_echoes > 0 {
            state.drop_echoes -= 1;
        } else if state.auto_echo {
            let _ = self.tx.send(line.to_string());
        }

        // Consume the front expectation only when it matches; unmatched
        // sends (retries, spontaneous frames) leave the script alone.
        let body = strip_checksum(line).trim();
        let matches = state
            .expectations
            .front()
            .is_some_and(|e| e.request == body);
        if matches {
            let expectation = state.expectations.pop_front().expect("front checked");
            for response in expectation.responses {
                let _ = self.tx.send(response);
            }
        }

        Ok(())
    }

    async fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => Err(Error::NotConnected),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RQ: &str = "RQ --- 18:000730 32:022222 --:------ 31D9 001 00";
    const RP: &str = "059 RP --- 32:022222 18:000730 --:------ 31D9 003 000064";

    #[tokio::test]
    async fn echoes_sent_lines() {
        let (mut mock, _handle) = MockTransport::new();
        mock.send_line(RQ).await.unwrap();

        let echo = mock.recv_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(echo.as_deref(), Some(RQ));
    }

    #[tokio::test]
    async fn expectation_feeds_responses_after_echo() {
        let (mut mock, handle) = MockTransport::new();
        handle.expect(RQ, &[RP]);

        mock.send_line(RQ).await.unwrap();

        let first = mock.recv_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.as_deref(), Some(RQ));
        let second = mock.recv_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.as_deref(), Some(RP));
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn checksum_is_ignored_when_matching() {
        let (mut mock, handle) = MockTransport::new();
        handle.expect(RQ, &[RP]);

        mock.send_line(&format!("{RQ} *7F")).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
        assert_eq!(handle.sent_count_of(RQ), 1);
    }

    #[tokio::test]
    async fn unmatched_send_keeps_script() {
        let (mut mock, handle) = MockTransport::new();
        handle.expect(RQ, &[RP]);

        mock.send_line(" I --- 18:000730 63:262142 --:------ 0008 002 00C8")
            .await
            .unwrap();
        assert_eq!(handle.remaining_expectations(), 1);
    }

    #[tokio::test]
    async fn dropped_echo_is_swallowed_once() {
        let (mut mock, handle) = MockTransport::new();
        handle.drop_next_echoes(1);

        mock.send_line(RQ).await.unwrap();
        let nothing = mock.recv_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(nothing, None);

        mock.send_line(RQ).await.unwrap();
        let echo = mock.recv_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(echo.as_deref(), Some(RQ));
    }

    #[tokio::test]
    async fn injection_reaches_the_read_side() {
        let (mut mock, handle) = MockTransport::new();
        handle.inject(RP);

        let line = mock.recv_line(Duration::from_millis(10)).await.unwrap();
        assert_eq!(line.as_deref(), Some(RP));
    }

    #[tokio::test]
    async fn recv_times_out_quietly() {
        let (mut mock, _handle) = MockTransport::new();
        let nothing = mock.recv_line(Duration::from_millis(5)).await.unwrap();
        assert_eq!(nothing, None);
    }

    #[tokio::test]
    async fn disconnect_fails_operations() {
        let (mut mock, handle) = MockTransport::new();
        handle.set_connected(false);
        assert!(!mock.is_connected());

        assert!(matches!(mock.send_line(RQ).await, Err(Error::NotConnected)));
        assert!(matches!(
            mock.recv_line(Duration::from_millis(5)).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn sent_log_records_everything() {
        let (mut mock, handle) = MockTransport::new();
        mock.send_line(RQ).await.unwrap();
        mock.send_line(RQ).await.unwrap();
        assert_eq!(handle.sent().len(), 2);
        assert_eq!(handle.sent_count_of(RQ), 2);
    }
}
