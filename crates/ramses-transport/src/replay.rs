//! Packet-log replay transport.
//!
//! A packet log is an append-only file of frame lines prefixed with ISO
//! timestamps -- exactly what [`Frame::encode_logline`] writes.
//! [`ReplayTransport`] plays such a log back through the normal engine
//! path, with each frame delivered when its recorded offset from the
//! start of the log has elapsed on the wall clock.
//!
//! Replay is inherently listen-only: writes fail with `ReadOnly`, the
//! same error the engine surfaces in `RAMSES_DISABLE_SENDING` mode.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use ramses_core::error::{Error, Result};
use ramses_core::FrameTransport;

/// One scheduled line: its recorded time and the raw frame text.
#[derive(Debug, Clone)]
struct ReplayLine {
    recorded: DateTime<Utc>,
    frame: String,
}

/// Replays a packet log with its recorded pacing.
pub struct ReplayTransport {
    lines: VecDeque<ReplayLine>,
    /// Set on the first read: the wall-clock instant standing in for the
    /// first recorded timestamp.
    anchor: Option<(Instant, DateTime<Utc>)>,
    connected: bool,
}

impl ReplayTransport {
    /// Parse a packet log.
    ///
    /// Blank lines and `#` comment lines are skipped; a line that fails
    /// timestamp validation is skipped with a note (the frame body is
    /// left to the engine's codec to judge).
    pub fn from_log(contents: &str) -> ReplayTransport {
        let mut lines = VecDeque::new();
        for raw in contents.lines() {
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let Some((ts, frame)) = raw.split_once(' ') else {
                debug!(line = %raw, "skipping unpartitionable log line");
                continue;
            };
            let recorded = match parse_log_ts(ts) {
                Some(dtm) => dtm,
                None => {
                    debug!(line = %raw, "skipping log line with bad timestamp");
                    continue;
                }
            };
            lines.push_back(ReplayLine {
                recorded,
                frame: frame.to_string(),
            });
        }
        ReplayTransport {
            lines,
            anchor: None,
            connected: true,
        }
    }

    /// Frames still scheduled.
    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

fn parse_log_ts(ts: &str) -> Option<DateTime<Utc>> {
    ts.parse::<DateTime<Utc>>().ok().or_else(|| {
        chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .ok()
    })
}

#[async_trait]
impl FrameTransport for ReplayTransport {
    async fn send_line(&mut self, _line: &str) -> Result<()> {
        Err(Error::ReadOnly)
    }

    async fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let deadline = Instant::now() + timeout;

        let Some(next) = self.lines.front() else {
            // Log exhausted; behave like a quiet radio.
            tokio::time::sleep_until(deadline).await;
            return Ok(None);
        };

        let (anchor_instant, anchor_recorded) = *self
            .anchor
            .get_or_insert_with(|| (Instant::now(), next.recorded));

        let offset = (next.recorded - anchor_recorded)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let due = anchor_instant + offset;

        if due > deadline {
            tokio::time::sleep_until(deadline).await;
            return Ok(None);
        }
        tokio::time::sleep_until(due).await;

        let line = self.lines.pop_front().expect("front checked").frame;
        Ok(Some(line))
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ramses_codec::Frame;

    fn sample_log() -> String {
        let base = Utc.with_ymd_and_hms(2023, 9, 2, 12, 0, 0).unwrap();
        let f1 = Frame::decode(base, " I --- 29:091138 --:------ 29:091138 22F1 003 000204")
            .unwrap();
        let f2 = Frame::decode(
            base + chrono::Duration::milliseconds(500),
            " I --- 32:022222 --:------ 32:022222 31D9 003 000064",
        )
        .unwrap();
        format!(
            "# packet log test fixture\n{}\n\n{}\n",
            f1.encode_logline(),
            f2.encode_logline()
        )
    }

    #[tokio::test(start_paused = true)]
    async fn replays_in_recorded_order_with_pacing() {
        let mut replay = ReplayTransport::from_log(&sample_log());
        assert_eq!(replay.remaining(), 2);

        let started = Instant::now();
        let first = replay.recv_line(Duration::from_secs(5)).await.unwrap();
        assert!(first.unwrap().contains("22F1"));
        assert!(started.elapsed() < Duration::from_millis(50));

        let second = replay.recv_line(Duration::from_secs(5)).await.unwrap();
        assert!(second.unwrap().contains("31D9"));
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(500),
            "second frame arrived early: {elapsed:?}"
        );
        assert_eq!(replay.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_timeout_yields_none_without_skipping() {
        let mut replay = ReplayTransport::from_log(&sample_log());

        let first = replay.recv_line(Duration::from_secs(1)).await.unwrap();
        assert!(first.is_some());

        // The second frame is due at +500 ms; a 100 ms poll misses it.
        let nothing = replay.recv_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(nothing, None);
        assert_eq!(replay.remaining(), 1);

        let second = replay.recv_line(Duration::from_secs(1)).await.unwrap();
        assert!(second.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_log_stays_quiet() {
        let mut replay = ReplayTransport::from_log("");
        let nothing = replay.recv_line(Duration::from_millis(20)).await.unwrap();
        assert_eq!(nothing, None);
    }

    #[tokio::test]
    async fn writes_are_read_only() {
        let mut replay = ReplayTransport::from_log(&sample_log());
        let err = replay
            .send_line(" I --- 18:000730 63:262142 --:------ 0008 002 00C8")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnly));
    }

    #[test]
    fn comments_and_garbage_are_skipped() {
        let log = "# header\nnot-a-log-line\n2023-09-02T12:00:00.000000Z \
                   045  I --- 29:091138 --:------ 29:091138 22F1 003 000204\n";
        let replay = ReplayTransport::from_log(log);
        assert_eq!(replay.remaining(), 1);
    }

    #[test]
    fn decoded_replay_lines_round_trip_through_the_codec() {
        let replay = ReplayTransport::from_log(&sample_log());
        for line in &replay.lines {
            assert!(Frame::decode(Utc::now(), &line.frame).is_ok());
        }
    }
}
