//! # Device Link
//!
//! Owns one serial port for the length of a session.
//!
//! The read half runs on a dedicated thread: blocking reads with a short
//! timeout feed a [`LineAssembler`], and complete lines are forwarded into
//! tokio as [`LinkItem`]s. The write half is a cloned handle used for the
//! values the sequencer sends back to the device.

use chrono::Utc;
use flashcheck_core::{FlashcheckError, LineAssembler, LogLine};
use serde::Serialize;
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tokio::sync::mpsc;

/// Read timeout; also the granularity of the stale-line flush.
const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Bounded line channel between the reader thread and the runner.
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// How long EN is held low by the DTR/RTS reset pulse.
const RESET_PULSE: Duration = Duration::from_millis(100);

/// What the reader thread reports.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkItem {
    Line(LogLine),
    /// The link is gone; no more lines follow.
    Disconnected(String),
}

// =============================================================================
// WRITER
// =============================================================================

/// Sends newline-terminated values to the device.
pub trait DeviceWriter: Send {
    fn send_line(&mut self, value: &str) -> std::io::Result<()>;
}

impl DeviceWriter for Box<dyn SerialPort> {
    fn send_line(&mut self, value: &str) -> std::io::Result<()> {
        self.write_all(value.as_bytes())?;
        self.write_all(b"\n")?;
        self.flush()
    }
}

/// A writer that records what was sent, for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
    pub sent: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl DeviceWriter for RecordingWriter {
    fn send_line(&mut self, value: &str) -> std::io::Result<()> {
        self.sent
            .lock()
            .map_err(|_| std::io::Error::other("recording writer poisoned"))?
            .push(value.to_string());
        Ok(())
    }
}

// =============================================================================
// READER
// =============================================================================

/// Pump bytes from `reader` into `tx` until the link or the receiver goes away.
///
/// A read of zero bytes or any error other than a timeout ends the link;
/// buffered partial data is flushed before the `Disconnected` item.
pub fn pump<R: Read>(mut reader: R, mut assembler: LineAssembler, tx: mpsc::Sender<LinkItem>) {
    let mut buf = [0u8; 1024];
    loop {
        let reason = match reader.read(&mut buf) {
            Ok(0) => "port closed".to_string(),
            Ok(n) => {
                for line in assembler.push(&buf[..n], Utc::now()) {
                    if tx.blocking_send(LinkItem::Line(line)).is_err() {
                        return;
                    }
                }
                continue;
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                if tx.is_closed() {
                    return;
                }
                if let Some(line) = assembler.flush_if_stale(Utc::now())
                    && tx.blocking_send(LinkItem::Line(line)).is_err()
                {
                    return;
                }
                continue;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => e.to_string(),
        };

        if let Some(line) = assembler.finish(Utc::now()) {
            let _ = tx.blocking_send(LinkItem::Line(line));
        }
        let _ = tx.blocking_send(LinkItem::Disconnected(reason));
        return;
    }
}

// =============================================================================
// OPENING A PORT
// =============================================================================

/// An open device link: the write half plus the line stream.
pub struct DeviceLink {
    pub port: String,
    pub writer: Box<dyn SerialPort>,
    pub lines: mpsc::Receiver<LinkItem>,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Open `port` at `baud` and start its reader thread.
pub fn open(port: &str, baud: u32, flush_after: Duration) -> Result<DeviceLink, FlashcheckError> {
    let reader = serialport::new(port, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| FlashcheckError::Disconnected(format!("cannot open {}: {}", port, e)))?;
    let writer = reader
        .try_clone()
        .map_err(|e| FlashcheckError::Io(format!("cannot clone {}: {}", port, e)))?;

    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let assembler = LineAssembler::new(flush_after);
    std::thread::Builder::new()
        .name(format!("flashcheck-read-{}", port))
        .spawn(move || pump(reader, assembler, tx))
        .map_err(|e| FlashcheckError::Io(format!("cannot start reader: {}", e)))?;

    tracing::info!(port, baud, "device link open");
    Ok(DeviceLink {
        port: port.to_string(),
        writer,
        lines: rx,
    })
}

/// Reset the device through the USB-UART's DTR/RTS lines.
///
/// RTS drives EN and DTR drives IO0 on the usual auto-reset circuit; IO0 is
/// left high so the chip boots the flashed application.
pub fn pulse_reset(port: &mut dyn SerialPort) -> Result<(), FlashcheckError> {
    let io = |e: serialport::Error| FlashcheckError::Io(format!("reset pulse failed: {}", e));
    port.write_data_terminal_ready(false).map_err(io)?;
    port.write_request_to_send(true).map_err(io)?;
    std::thread::sleep(RESET_PULSE);
    port.write_request_to_send(false).map_err(io)?;
    tracing::info!("reset pulse sent");
    Ok(())
}

// =============================================================================
// PORT LISTING
// =============================================================================

/// One serial port visible to the station.
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
}

/// Enumerate serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>, FlashcheckError> {
    let ports = serialport::available_ports()
        .map_err(|e| FlashcheckError::Io(format!("cannot list ports: {}", e)))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (kind, description) = match p.port_type {
                SerialPortType::UsbPort(usb) => (
                    "usb".to_string(),
                    Some(format!(
                        "{:04x}:{:04x} {}",
                        usb.vid,
                        usb.pid,
                        usb.product.unwrap_or_default()
                    )),
                ),
                SerialPortType::PciPort => ("pci".to_string(), None),
                SerialPortType::BluetoothPort => ("bluetooth".to_string(), None),
                SerialPortType::Unknown => ("unknown".to_string(), None),
            };
            PortInfo {
                name: p.port_name,
                kind,
                description,
            }
        })
        .collect())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Yields its chunks, then a timeout, then EOF.
    struct Scripted {
        chunks: Vec<Vec<u8>>,
        timed_out: bool,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.chunks.is_empty() {
                let chunk = self.chunks.remove(0);
                buf[..chunk.len()].copy_from_slice(&chunk);
                return Ok(chunk.len());
            }
            if !self.timed_out {
                self.timed_out = true;
                std::thread::sleep(Duration::from_millis(5));
                return Err(std::io::Error::new(ErrorKind::TimedOut, "timeout"));
            }
            Ok(0)
        }
    }

    fn drain(mut rx: mpsc::Receiver<LinkItem>) -> Vec<LinkItem> {
        let mut items = Vec::new();
        while let Some(item) = rx.blocking_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn eof_flushes_partial_line_then_disconnects() {
        let (tx, rx) = mpsc::channel(16);
        let input = Cursor::new(b"rst:0x1 (POWERON_RESET)\r\nRTC Time now: 12:00".to_vec());
        pump(input, LineAssembler::default(), tx);

        let items = drain(rx);
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], LinkItem::Line(l) if l.text == "rst:0x1 (POWERON_RESET)"));
        assert!(matches!(&items[1], LinkItem::Line(l) if l.text == "RTC Time now: 12:00"));
        assert_eq!(items[2], LinkItem::Disconnected("port closed".to_string()));
    }

    #[test]
    fn stale_partial_line_flushed_on_timeout() {
        let (tx, rx) = mpsc::channel(16);
        let reader = Scripted {
            chunks: vec![b"Enter Serial Number: ".to_vec()],
            timed_out: false,
        };
        pump(reader, LineAssembler::new(Duration::from_millis(1)), tx);

        let items = drain(rx);
        assert!(matches!(&items[0], LinkItem::Line(l) if l.text == "Enter Serial Number:"));
        assert!(matches!(items.last(), Some(LinkItem::Disconnected(_))));
    }

    #[test]
    fn recording_writer_keeps_values() {
        let mut writer = RecordingWriter::default();
        writer.send_line("HW1.0").expect("send");
        writer.send_line("26101901").expect("send");
        let sent = writer.sent.lock().expect("lock").clone();
        assert_eq!(sent, vec!["HW1.0".to_string(), "26101901".to_string()]);
    }
}
