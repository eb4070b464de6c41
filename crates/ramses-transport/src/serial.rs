//! Serial port transport for RAMSES gateways.
//!
//! HGI80 sticks and evofw3-flashed radios present as USB virtual COM
//! ports speaking the textual line protocol at 115 200 baud, 8N1, no
//! flow control. This module provides [`SerialTransport`], the
//! [`FrameTransport`] implementation over such a port.
//!
//! The gateway firmware echoes every transmitted frame back on the read
//! side; the protocol engine's echo matching depends on that.
//!
//! # Example
//!
//! ```no_run
//! use ramses_transport::SerialTransport;
//! use ramses_core::FrameTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> ramses_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0").await?;
//! if let Some(line) = transport.recv_line(Duration::from_secs(1)).await? {
//!     println!("rx: {line}");
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use ramses_core::error::{Error, Result};
use ramses_core::FrameTransport;

/// The baud rate HGI80 and evofw3 gateways run at.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Reset threshold for the receive buffer; a healthy gateway emits lines
/// of at most a few hundred bytes.
const MAX_BUF: usize = 16_384;

/// Serial [`FrameTransport`] for a RAMSES gateway.
pub struct SerialTransport {
    port: Option<SerialStream>,
    port_name: String,
    rx_buf: BytesMut,
}

impl SerialTransport {
    /// Open a gateway port at the standard 115 200 baud.
    pub async fn open(port: &str) -> Result<Self> {
        Self::open_with_baud(port, DEFAULT_BAUD).await
    }

    /// Open a gateway port at an explicit baud rate (8N1, no flow
    /// control -- the only framing RAMSES gateways use).
    pub async fn open_with_baud(port: &str, baud_rate: u32) -> Result<Self> {
        tracing::debug!(port = %port, baud_rate, "opening serial port");

        let mut stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "failed to open serial port");
                Error::Transport(format!("failed to open serial port {port}: {e}"))
            })?;

        // De-assert DTR and RTS after opening. Some radio sticks wire
        // these lines to reset, and the OS asserting them on open would
        // bounce the firmware mid-session.
        if let Err(e) = stream.write_data_terminal_ready(false) {
            tracing::warn!(port = %port, error = %e, "failed to de-assert DTR");
        }
        if let Err(e) = stream.write_request_to_send(false) {
            tracing::warn!(port = %port, error = %e, "failed to de-assert RTS");
        }

        tracing::info!(port = %port, baud_rate, "serial port opened");

        Ok(SerialTransport {
            port: Some(stream),
            port_name: port.to_string(),
            rx_buf: BytesMut::with_capacity(1024),
        })
    }

    /// The name of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl FrameTransport for SerialTransport {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        tracing::trace!(port = %self.port_name, %line, "tx");

        port.write_all(line.as_bytes()).await.map_err(io_to_err)?;
        port.write_all(b"\r\n").await.map_err(io_to_err)?;
        port.flush().await.map_err(io_to_err)?;
        Ok(())
    }

    async fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(line) = take_line(&mut self.rx_buf) {
                tracing::trace!(port = %self.port_name, %line, "rx");
                return Ok(Some(line));
            }
            if self.rx_buf.len() > MAX_BUF {
                tracing::warn!(
                    port = %self.port_name,
                    len = self.rx_buf.len(),
                    "receive buffer overflow, resetting"
                );
                self.rx_buf.clear();
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let mut chunk = [0u8; 256];
            match tokio::time::timeout(deadline - now, port.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(Error::Transport(format!(
                        "serial port {} closed",
                        self.port_name
                    )));
                }
                Ok(Ok(n)) => self.rx_buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(io_to_err(e)),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "closing serial port");
            if let Err(e) = port.flush().await {
                tracing::warn!(port = %self.port_name, error = %e, "flush on close failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "serial transport dropped, closing port");
        }
    }
}

fn io_to_err(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::BrokenPipe || e.kind() == std::io::ErrorKind::NotConnected {
        Error::Transport(format!("connection lost: {e}"))
    } else {
        Error::Io(e)
    }
}

/// Pop one complete line off the buffer.
///
/// Lines end in `\n`; trailing `\r` is stripped, as are the NUL bytes
/// HGI80 firmware pads lines with. Non-UTF-8 garbage is replaced and
/// left to the codec to reject.
fn take_line(buf: &mut BytesMut) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let raw = buf.split_to(pos + 1);
    buf.reserve(256);
    let trimmed: Vec<u8> = raw[..pos]
        .iter()
        .copied()
        .filter(|&b| b != b'\r' && b != 0x00)
        .collect();
    Some(String::from_utf8_lossy(&trimmed).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(bytes: &[u8]) -> BytesMut {
        let mut b = BytesMut::new();
        b.extend_from_slice(bytes);
        b
    }

    #[test]
    fn take_line_crlf() {
        let mut b = buf(b"045 RQ --- 18:000730 01:145038 --:------ 10E0 001 00\r\nrest");
        let line = take_line(&mut b).unwrap();
        assert_eq!(line, "045 RQ --- 18:000730 01:145038 --:------ 10E0 001 00");
        assert_eq!(&b[..], b"rest");
    }

    #[test]
    fn take_line_bare_lf() {
        let mut b = buf(b"# evofw3 0.7.1\n");
        assert_eq!(take_line(&mut b).unwrap(), "# evofw3 0.7.1");
        assert!(b.is_empty());
    }

    #[test]
    fn take_line_strips_nul_padding() {
        let mut b = buf(b"\x00\x00045  I --- 29:091138\x00\r\n");
        assert_eq!(take_line(&mut b).unwrap(), "045  I --- 29:091138");
    }

    #[test]
    fn take_line_incomplete_waits() {
        let mut b = buf(b"045 RQ --- 18:0007");
        assert_eq!(take_line(&mut b), None);
        assert_eq!(b.len(), 18);
    }

    #[test]
    fn take_line_multiple() {
        let mut b = buf(b"one\r\ntwo\r\n");
        assert_eq!(take_line(&mut b).unwrap(), "one");
        assert_eq!(take_line(&mut b).unwrap(), "two");
        assert_eq!(take_line(&mut b), None);
    }

    #[test]
    fn take_line_lossy_on_garbage() {
        let mut b = buf(b"\xFF\xFEok\r\n");
        let line = take_line(&mut b).unwrap();
        assert!(line.ends_with("ok"));
    }
}
