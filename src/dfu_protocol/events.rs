//! Events for the `dfucom` update session state machine.
//!
//! Everything here stays within the [`dfu_protocol`](crate::dfu_protocol)
//! scope. The [`state_machine`](super::state_machine) module holds the map of
//! states, events and transitions.
//!
//! Most events move the serial connection and the console monitor handle
//! along to the next state, so they own their payload and implement [`Debug`]
//! by hand where a boxed port is involved.

use std::fmt;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;
use std::time::Instant;

use serialport::SerialPort;

use crate::error::Result;
use crate::firmware::ImageBundle;
use crate::monitor::DeviceEvent;
use crate::Settings;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// SwitchToHandshakeEvent ======================================================

/// Asks for the [`HandshakeState`](super::states::HandshakeState).
///
/// Raised from `Init` once the serial port is open and configured and the
/// console monitor thread is running on the reading half of the connection.
pub(crate) struct SwitchToHandshakeEvent {
    pub settings: Settings,
    /// The writing half of the serial connection. Consumed and moved to the
    /// next state.
    pub port: Box<dyn SerialPort>,
    /// Receiving end of the device event channel fed by the console monitor.
    pub events: Receiver<DeviceEvent>,
    /// Join handle of the console monitor thread.
    pub console: JoinHandle<Result<()>>,
}
impl fmt::Debug for SwitchToHandshakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = &self.port;
        debug_fmt_port!(port, f).finish()
    }
}

// StartUploadEvent ============================================================

/// Asks for the [`SendBootloaderState`](super::states::SendBootloaderState),
/// opening the streaming sequence.
///
/// Raised from `Handshake` once an image is staged for the reported firmware
/// identity and the modem announced it is ready for the download. The device
/// event channel is dropped with the handshake; from here on the session only
/// writes.
pub(crate) struct StartUploadEvent {
    pub settings: Settings,
    /// The writing half of the serial connection. Consumed and moved to the
    /// next state.
    pub port: Box<dyn SerialPort>,
    /// Join handle of the console monitor thread.
    pub console: JoinHandle<Result<()>>,
    /// The staged resources of the selected image.
    pub images: ImageBundle,
}
impl fmt::Debug for StartUploadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = &self.port;
        debug_fmt_port!(port, f).field(&self.images).finish()
    }
}

// SwitchToCertificateEvent ====================================================

/// Asks for the [`SendCertificateState`](super::states::SendCertificateState)
/// after the bootloader segment went out in full.
pub(crate) struct SwitchToCertificateEvent {
    pub settings: Settings,
    /// The writing half of the serial connection. Consumed and moved to the
    /// next state.
    pub port: Box<dyn SerialPort>,
    /// Join handle of the console monitor thread.
    pub console: JoinHandle<Result<()>>,
    /// The staged resources of the selected image.
    pub images: ImageBundle,
    /// When the streaming sequence was entered, for the final report.
    pub started: Instant,
}
impl fmt::Debug for SwitchToCertificateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = &self.port;
        debug_fmt_port!(port, f).field(&self.images).finish()
    }
}

// SwitchToFirmwareEvent =======================================================

/// Asks for the [`SendFirmwareState`](super::states::SendFirmwareState) after
/// the certificate segment went out in full.
pub(crate) struct SwitchToFirmwareEvent {
    pub settings: Settings,
    /// The writing half of the serial connection. Consumed and moved to the
    /// next state.
    pub port: Box<dyn SerialPort>,
    /// Join handle of the console monitor thread.
    pub console: JoinHandle<Result<()>>,
    /// The staged resources of the selected image.
    pub images: ImageBundle,
    /// When the streaming sequence was entered, for the final report.
    pub started: Instant,
}
impl fmt::Debug for SwitchToFirmwareEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = &self.port;
        debug_fmt_port!(port, f).field(&self.images).finish()
    }
}

// DoneEvent ===================================================================

/// Asks for the `Done` state. Any state may raise it, cleanly at the end of
/// the streaming sequence or on an unrecoverable error.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub settings: Settings,
    /// When `true`, indicates an abnormal completion caused by an error.
    pub with_errors: bool,
    /// Join handle of the console monitor thread, when the session still
    /// owns it. After a successful update the `Done` state joins it so the
    /// device console stays on screen.
    pub console: Option<JoinHandle<Result<()>>>,
}

// ExitEvent ===================================================================

/// The last event of a session's life. It stops the event loop, whose exit
/// status tells the update server whether the push completed.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub settings: Settings,
    pub with_error: bool,
}

// Events enum =================================================================

/// The transitions a session state may ask for.
///
/// Each variant wraps the event payload, which carries whatever the origin
/// state wants to hand to its successor.
#[derive(Debug)]
pub(crate) enum Event {
    SwitchToHandshake(SwitchToHandshakeEvent),
    StartUpload(StartUploadEvent),
    SwitchToCertificate(SwitchToCertificateEvent),
    SwitchToFirmware(SwitchToFirmwareEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}
