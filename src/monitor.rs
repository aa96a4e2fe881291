//! Watches the device console and turns the lines the modem prints during
//! boot into [`DeviceEvent`]s for the update session.
//!
//! The monitor owns the only reading half of the serial connection and runs
//! on its own thread for the whole life of the process. Every console line
//! is echoed to the terminal; two of them additionally carry protocol
//! meaning:
//!
//!  * a line containing `Modem FW UUID` announces the identity of the
//!    firmware the modem is currently running,
//!  * a line containing `DFU start` signals that the modem has entered its
//!    download mode and will accept records.
//!
//! Marker detection works on raw bytes, so boot noise around a marker does
//! not hide it. Only the identity line needs decoding, and only after its
//! marker matched; a line that fails to decode is logged and skipped, the
//! announcement is then expected on a retransmission. Each event is reported
//! at most once per session.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::str;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use log::{log_enabled, warn, Level::Debug};
use serialport::SerialPort;

use crate::error::{Error, Result};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Byte sequence announcing that the modem entered download mode.
const DFU_READY_MARKER: &[u8] = b"DFU start";
/// Byte sequence announcing the identity of the running firmware.
const IDENTITY_MARKER: &[u8] = b"Modem FW UUID";

/// What the device console told us about the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeviceEvent {
    /// The identity token from the firmware announcement line.
    BootIdentity(String),
    /// The modem is in download mode and accepts records.
    DfuReady,
}

/// Spawn the console monitor on its own thread.
///
/// The thread keeps reading and echoing until the connection dies, well past
/// the point where the session stops listening for events.
pub(crate) fn spawn(
    port: Box<dyn SerialPort>,
    events: Sender<DeviceEvent>,
) -> io::Result<JoinHandle<Result<()>>> {
    thread::Builder::new()
        .name("console-monitor".into())
        .spawn(move || ConsoleMonitor::new(port, events).run())
}

/// Line-by-line reader of the device console.
///
/// Generic over the byte source so the line handling can be exercised
/// without a serial port on the other end.
pub(crate) struct ConsoleMonitor<R: Read> {
    reader: BufReader<R>,
    events: Sender<DeviceEvent>,
    identity_reported: bool,
    ready_reported: bool,
}

impl<R: Read> ConsoleMonitor<R> {
    pub(crate) fn new(source: R, events: Sender<DeviceEvent>) -> ConsoleMonitor<R> {
        ConsoleMonitor {
            reader: BufReader::new(source),
            events,
            identity_reported: false,
            ready_reported: false,
        }
    }

    /// Read console lines until the source goes away.
    ///
    /// A serial port read times out periodically; that is not an error, the
    /// partial line stays buffered and the read continues. End of input and
    /// every other read failure terminate the monitor with a connection
    /// error.
    pub(crate) fn run(mut self) -> Result<()> {
        let mut line = Vec::new();
        loop {
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    return Err(Error::Connection(serialport::Error {
                        kind: serialport::ErrorKind::Io(io::ErrorKind::UnexpectedEof),
                        description: "the device console went away".into(),
                    }));
                }
                Ok(_) => {
                    self.process_line(&line);
                    line.clear();
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    return Err(Error::Connection(serialport::Error {
                        kind: serialport::ErrorKind::Io(e.kind()),
                        description: e.to_string(),
                    }));
                }
            }
        }
    }

    /// Echo one console line and report the marker it carries, if any.
    fn process_line(&mut self, line: &[u8]) {
        echo(line);

        if !self.ready_reported && contains(line, DFU_READY_MARKER) {
            self.ready_reported = true;
            // The session may be long gone; nobody listening is fine.
            let _ = self.events.send(DeviceEvent::DfuReady);
        }

        if !self.identity_reported && contains(line, IDENTITY_MARKER) {
            match str::from_utf8(line) {
                Ok(text) => {
                    // The identity is the last whitespace-delimited token of
                    // the announcement line.
                    if let Some(identity) = text.split_whitespace().last() {
                        self.identity_reported = true;
                        let _ = self
                            .events
                            .send(DeviceEvent::BootIdentity(identity.to_string()));
                    }
                }
                Err(e) => warn!("skipping undecodable console line: {}", Error::Decode(e)),
            }
        }
    }
}

/// Print a console line to the terminal, exactly as received.
fn echo(line: &[u8]) {
    io::stdout().write_all(line).unwrap();

    // Dump the received data in a hex table for debugging
    if log_enabled!(Debug) {
        use hexplay::HexViewBuilder;

        let view = HexViewBuilder::new(line)
            .address_offset(0)
            .row_width(16)
            .finish();
        println!("{}", view);
    }
}

/// Byte-level substring search; console lines are not reliably UTF-8.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn reports_identity_once() {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut monitor = ConsoleMonitor::new(io::empty(), tx);

    monitor.process_line(b"Modem FW UUID ABCD1234\r\n");
    monitor.process_line(b"Modem FW UUID ABCD1234\r\n");

    assert_eq!(
        rx.try_recv(),
        Ok(DeviceEvent::BootIdentity("ABCD1234".to_string()))
    );
    assert!(rx.try_recv().is_err());
}

#[test]
fn reports_ready_once() {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut monitor = ConsoleMonitor::new(io::empty(), tx);

    monitor.process_line(b"DFU start\n");
    monitor.process_line(b"DFU start\n");

    assert_eq!(rx.try_recv(), Ok(DeviceEvent::DfuReady));
    assert!(rx.try_recv().is_err());
}

#[test]
fn ready_detection_survives_binary_noise() {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut monitor = ConsoleMonitor::new(io::empty(), tx);

    monitor.process_line(b"\xff\xfeDFU start\xff\n");

    assert_eq!(rx.try_recv(), Ok(DeviceEvent::DfuReady));
}

#[test]
fn undecodable_identity_line_is_skipped() {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut monitor = ConsoleMonitor::new(io::empty(), tx);

    monitor.process_line(b"Modem FW UUID \xff\xff\n");
    assert!(rx.try_recv().is_err());

    // A later clean announcement still gets through.
    monitor.process_line(b"Modem FW UUID 0042\n");
    assert_eq!(
        rx.try_recv(),
        Ok(DeviceEvent::BootIdentity("0042".to_string()))
    );
}

#[test]
fn plain_lines_report_nothing() {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut monitor = ConsoleMonitor::new(io::empty(), tx);

    monitor.process_line(b"U-Boot 2021.01 (Jan 11 2021)\n");
    monitor.process_line(b"DRAM:  128 MiB\n");

    assert!(rx.try_recv().is_err());
}

#[test]
fn run_collects_events_and_ends_with_connection_error() {
    let stream = b"boot: bank A\nModem FW UUID FEED01\nDFU start\n".to_vec();
    let (tx, rx) = std::sync::mpsc::channel();
    let monitor = ConsoleMonitor::new(io::Cursor::new(stream), tx);

    let result = monitor.run();

    assert!(matches!(result, Err(Error::Connection(_))));
    assert_eq!(
        rx.try_recv(),
        Ok(DeviceEvent::BootIdentity("FEED01".to_string()))
    );
    assert_eq!(rx.try_recv(), Ok(DeviceEvent::DfuReady));
    assert!(rx.try_recv().is_err());
}
