//! States for the `dfucom` update session state machine.
//!
//! Everything here stays within the [`dfu_protocol`](crate::dfu_protocol)
//! scope; the session's public face is the machine itself. The
//! [`state_machine`](super::state_machine) module holds the map of states,
//! events and transitions.

use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Instant;

use console::style;
use log::{error, info};
use serialport::SerialPort;

use super::events::*;

use crate::error::{Error, Result};
use crate::firmware::{self, ImageBundle};
use crate::monitor::{self, DeviceEvent};
use crate::record::SegmentKind;
use crate::settings::Settings;
use crate::utils::{open_port, upload_stage};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Gives a state a `run` body that executes right after the machine
/// transitions into it.
pub(crate) trait Runnable {
    /// Do the work of the state and ask for the next transition.
    ///
    /// The returned [`Event`] carries everything the successor state needs;
    /// the machine consumes both and builds the successor through the
    /// matching [`From`] implementation.
    fn run(&mut self, settings: &Settings) -> Event;
}

// Init State ==================================================================

/// The initial state of the update session state machine.
///
/// From the `InitState`, the state machine can evolve via the following
/// transitions:
///
///  * **[`SwitchToHandshakeEvent`] => [`HandshakeState`]** which happens after
///    the serial port is initialized and the console monitor thread watches
///    its reading half,
///  * **[`DoneEvent`] => [`DoneState`]** when the port cannot be opened or the
///    monitor thread cannot be started.
#[derive(Debug)]
pub(crate) struct InitState {}
impl Runnable for InitState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Init");
        assert_ne!(settings.path, None);

        match start_monitor(settings) {
            Ok((port, events, console)) => Event::SwitchToHandshake(SwitchToHandshakeEvent {
                settings: settings.clone(),
                port,
                events,
                console,
            }),
            Err(e) => {
                error!("{}", e);
                println!(
                    "{}",
                    style("[DC] 💥 Could not start watching the device console!").red()
                );
                Event::Done(DoneEvent {
                    settings: settings.clone(),
                    with_errors: true,
                    console: None,
                })
            }
        }
    }
}

// Handshake State =============================================================

/// A `state` of the update session where `dfucom` waits for the modem to tell
/// it everything the update needs: the identity of the running firmware,
/// which picks the image to flash, and the download-mode announcement, which
/// tells us the modem accepts records.
///
/// The two announcements arrive on the device event channel in whatever order
/// the modem prints them. The state only moves on once the chosen image is
/// staged **and** the modem is ready.
///
/// This state can transition to another state as following:
///
///  * **[`StartUploadEvent`] => [`SendBootloaderState`]** once an image is
///    staged and the modem announced download mode,
///  * **[`DoneEvent`] => [`DoneState`]** when staging fails, an announcement
///    does not arrive in time or the console monitor dies.
pub(crate) struct HandshakeState {
    /// The writing half of the serial connection. Consumed and moved upon the
    /// transition to [`SendBootloaderState`].
    pub port: Option<Box<dyn SerialPort>>,
    /// Receiving end of the device event channel. Dropped with this state;
    /// after the handshake the session never listens again.
    pub events: Option<Receiver<DeviceEvent>>,
    /// Join handle of the console monitor thread. Consumed and moved along
    /// the transitions.
    pub console: Option<JoinHandle<Result<()>>>,
}
impl Runnable for HandshakeState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Handshake");

        match (self.port.take(), self.events.take(), self.console.take()) {
            (Some(port), Some(events), Some(console)) => {
                handshake(settings, port, events, console)
            }
            // `run` consumes the payload; states are never entered twice.
            _ => unreachable!("HandshakeState was re-run"),
        }
    }
}
impl fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => debug_fmt_port!(port, f).finish(),
            None => f.debug_tuple("HandshakeState").finish(),
        }
    }
}

// SendBootloader State ========================================================

/// A `state` of the update session where `dfucom` parses the staged
/// bootloader resource and streams it to the modem, record by record.
///
///  * **[`SwitchToCertificateEvent`] => [`SendCertificateState`]** after the
///    bootloader segment went out in full,
///  * **[`DoneEvent`] => [`DoneState`]** when parsing or writing fails.
pub(crate) struct SendBootloaderState {
    /// The writing half of the serial connection. Consumed and moved upon the
    /// transition to [`SendCertificateState`].
    pub port: Option<Box<dyn SerialPort>>,
    /// Join handle of the console monitor thread.
    pub console: Option<JoinHandle<Result<()>>>,
    /// The staged resources of the selected image.
    pub images: Option<ImageBundle>,
    /// When the streaming sequence was entered.
    pub started: Instant,
}
impl Runnable for SendBootloaderState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Send Bootloader");

        let (mut port, console, images) =
            match (self.port.take(), self.console.take(), self.images.take()) {
                (Some(port), Some(console), Some(images)) => (port, console, images),
                // `run` consumes the payload; states are never entered twice.
                _ => unreachable!("SendBootloaderState was re-run"),
            };

        let kind = SegmentKind::Bootloader;
        match upload_stage(&mut port, images.resource(kind), kind) {
            Ok(()) => Event::SwitchToCertificate(SwitchToCertificateEvent {
                settings: settings.clone(),
                port,
                console,
                images,
                started: self.started,
            }),
            Err(e) => abort_upload(settings, e, kind, self.started),
        }
    }
}
impl fmt::Debug for SendBootloaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => debug_fmt_port!(port, f).finish(),
            None => f.debug_tuple("SendBootloaderState").finish(),
        }
    }
}

// SendCertificate State =======================================================

/// A `state` of the update session where `dfucom` parses the staged
/// certificate resource and streams it to the modem, record by record.
///
///  * **[`SwitchToFirmwareEvent`] => [`SendFirmwareState`]** after the
///    certificate segment went out in full,
///  * **[`DoneEvent`] => [`DoneState`]** when parsing or writing fails.
pub(crate) struct SendCertificateState {
    /// The writing half of the serial connection. Consumed and moved upon the
    /// transition to [`SendFirmwareState`].
    pub port: Option<Box<dyn SerialPort>>,
    /// Join handle of the console monitor thread.
    pub console: Option<JoinHandle<Result<()>>>,
    /// The staged resources of the selected image.
    pub images: Option<ImageBundle>,
    /// When the streaming sequence was entered.
    pub started: Instant,
}
impl Runnable for SendCertificateState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Send Certificate");

        let (mut port, console, images) =
            match (self.port.take(), self.console.take(), self.images.take()) {
                (Some(port), Some(console), Some(images)) => (port, console, images),
                _ => unreachable!("SendCertificateState was re-run"),
            };

        let kind = SegmentKind::Certificate;
        match upload_stage(&mut port, images.resource(kind), kind) {
            Ok(()) => Event::SwitchToFirmware(SwitchToFirmwareEvent {
                settings: settings.clone(),
                port,
                console,
                images,
                started: self.started,
            }),
            Err(e) => abort_upload(settings, e, kind, self.started),
        }
    }
}
impl fmt::Debug for SendCertificateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => debug_fmt_port!(port, f).finish(),
            None => f.debug_tuple("SendCertificateState").finish(),
        }
    }
}

// SendFirmware State ==========================================================

/// A `state` of the update session where `dfucom` parses the staged firmware
/// resource and streams it to the modem, record by record. This is the last
/// segment; on success the total streaming time is reported.
///
///  * **[`DoneEvent`] => [`DoneState`]** always, with or without errors.
pub(crate) struct SendFirmwareState {
    /// The writing half of the serial connection. Dropped with this state;
    /// there is nothing left to send after the firmware segment.
    pub port: Option<Box<dyn SerialPort>>,
    /// Join handle of the console monitor thread. Handed over to the `Done`
    /// state on success so the device console stays on screen.
    pub console: Option<JoinHandle<Result<()>>>,
    /// The staged resources of the selected image.
    pub images: Option<ImageBundle>,
    /// When the streaming sequence was entered.
    pub started: Instant,
}
impl Runnable for SendFirmwareState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Send Firmware");

        let (mut port, console, images) =
            match (self.port.take(), self.console.take(), self.images.take()) {
                (Some(port), Some(console), Some(images)) => (port, console, images),
                _ => unreachable!("SendFirmwareState was re-run"),
            };

        let kind = SegmentKind::Firmware;
        match upload_stage(&mut port, images.resource(kind), kind) {
            Ok(()) => {
                let elapsed = self.started.elapsed();
                info!("all segments pushed in {:.2?}", elapsed);
                println!(
                    "[DC] 🎉 All three segments pushed in {}",
                    style(format!("{:.2?}", elapsed)).green()
                );
                Event::Done(DoneEvent {
                    settings: settings.clone(),
                    with_errors: false,
                    console: Some(console),
                })
            }
            Err(e) => abort_upload(settings, e, kind, self.started),
        }
    }
}
impl fmt::Debug for SendFirmwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => debug_fmt_port!(port, f).finish(),
            None => f.debug_tuple("SendFirmwareState").finish(),
        }
    }
}

// Done State ==================================================================

/// Reached when the update session finishes, cleanly or not.
///
/// The state runs once to report the outcome. After a clean update there is
/// nothing left to send, but the device console is still worth watching
/// while the modem flashes itself and reboots, so that single run joins the
/// console monitor thread and keeps the console on screen until the user
/// quits or the connection dies. The run ends with [`ExitEvent`]; the
/// rebuilt `Done` state carries `should_exit` so the event loop stops before
/// calling `run` again.
///
/// `with_error` feeds the exit status of the session's event loop.
#[derive(Debug)]
pub(crate) struct DoneState {
    /// When `true`, indicates an abnormal completion caused by an error.
    pub with_error: bool,
    /// When `true` instructs the update session state machine to exit its
    /// event loop.
    pub should_exit: bool,
    /// Join handle of the console monitor thread, joined after a successful
    /// update.
    pub console: Option<JoinHandle<Result<()>>>,
}
impl Runnable for DoneState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!(
            "=> Done with{}errors",
            if self.with_error { " " } else { " no " }
        );
        // Report errors
        if self.with_error {
            println!("{}", style("[DC] 💥 The update did not complete!").red());
            println!("[DC] 🔌 Power-cycle the device before trying again!");
        } else if let Some(console) = self.console.take() {
            println!(
                "[DC] 🖥  Update done, still echoing the device console ({} to quit)",
                style("Ctrl+C").cyan()
            );
            match console.join() {
                Ok(Err(e)) => {
                    error!("{}", e);
                    println!("{}", style("[DC] 💥 Lost the device console!").red());
                    self.with_error = true;
                }
                Ok(Ok(())) => {}
                Err(_) => {
                    error!("the console monitor thread panicked");
                    self.with_error = true;
                }
            }
        }

        Event::Exit(ExitEvent {
            settings: settings.clone(),
            with_error: self.with_error,
        })
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Open the configured port and split the connection: the console monitor
/// thread takes the reading half, the session keeps the writing half.
fn start_monitor(
    settings: &Settings,
) -> Result<(
    Box<dyn SerialPort>,
    Receiver<DeviceEvent>,
    JoinHandle<Result<()>>,
)> {
    let port = open_port(settings)?;
    let reading_half = port.try_clone()?;

    let (events_tx, events_rx) = mpsc::channel();
    let console = monitor::spawn(reading_half, events_tx)?;

    Ok((port, events_rx, console))
}

/// Wait for the modem's boot announcements, then attach the session
/// resources to the outcome.
///
/// Returns [`StartUploadEvent`] only when both the staged image and the
/// download-mode announcement are in, in either arrival order.
fn handshake(
    settings: &Settings,
    port: Box<dyn SerialPort>,
    events: Receiver<DeviceEvent>,
    console: JoinHandle<Result<()>>,
) -> Event {
    match wait_for_announcements(settings, &events) {
        Ok(images) => Event::StartUpload(StartUploadEvent {
            settings: settings.clone(),
            port,
            console,
            images,
        }),
        Err(HandshakeFault::NoImage(e)) => {
            error!("{}", e);
            println!("{}", style("[DC] 💥 No usable firmware image!").red());
            Event::Done(DoneEvent {
                settings: settings.clone(),
                with_errors: true,
                console: Some(console),
            })
        }
        Err(HandshakeFault::Expired(e)) => {
            error!("{}", e);
            println!("{}", style(format!("[DC] 💥 {}", e)).red());
            Event::Done(DoneEvent {
                settings: settings.clone(),
                with_errors: true,
                console: Some(console),
            })
        }
        Err(HandshakeFault::ConsoleGone) => {
            // The monitor hung up on us; it only does that when it died.
            // Join it for the cause.
            let cause = match console.join() {
                Ok(Err(e)) => e.to_string(),
                Ok(Ok(())) => "the console monitor stopped".to_string(),
                Err(_) => "the console monitor thread panicked".to_string(),
            };
            error!("lost the device console during the handshake: {}", cause);
            println!("{}", style("[DC] 💥 Lost the device console!").red());
            Event::Done(DoneEvent {
                settings: settings.clone(),
                with_errors: true,
                console: None,
            })
        }
    }
}

/// Why [`wait_for_announcements`] gave up.
#[derive(Debug)]
enum HandshakeFault {
    /// No image in the store fits the reported identity, or unpacking the
    /// chosen one failed.
    NoImage(Error),
    /// An announcement did not arrive within the configured window.
    Expired(Error),
    /// The device event channel hung up: the console monitor died.
    ConsoleGone,
}

/// Collect the two boot announcements, staging the matching image as soon
/// as the identity is known.
///
/// The modem prints the announcements in no guaranteed order, so readiness
/// and the staged image are tracked separately; the wait ends only once
/// both are in. Owns nothing but the receiving end of the device event
/// channel; the session resources stay with the caller.
fn wait_for_announcements(
    settings: &Settings,
    events: &Receiver<DeviceEvent>,
) -> std::result::Result<ImageBundle, HandshakeFault> {
    let mut images: Option<ImageBundle> = None;
    let mut ready = false;

    loop {
        if ready {
            if let Some(staged) = images.take() {
                return Ok(staged);
            }
        }

        let waiting_for = if images.is_none() {
            "the firmware identity announcement"
        } else {
            "the DFU start signal"
        };

        match events.recv_timeout(settings.handshake_timeout) {
            Ok(DeviceEvent::BootIdentity(identity)) => {
                println!(
                    "[DC] 🆔 Device is running firmware {}",
                    style(&identity).cyan()
                );
                images = Some(stage_image(&identity, settings).map_err(HandshakeFault::NoImage)?);
            }
            Ok(DeviceEvent::DfuReady) => {
                println!("[DC] 🚀 Device is ready for the update");
                ready = true;
            }
            Err(RecvTimeoutError::Timeout) => {
                return Err(HandshakeFault::Expired(Error::Timeout {
                    waited: settings.handshake_timeout,
                    waiting_for,
                }));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(HandshakeFault::ConsoleGone),
        }
    }
}

/// Pick and unpack the firmware image matching the reported identity.
fn stage_image(identity: &str, settings: &Settings) -> Result<ImageBundle> {
    let candidates = firmware::list_images(Path::new(&settings.firmware_dir))?;
    let image = firmware::select_image(identity, &candidates)?;

    println!("[DC] 📦 Flashing image {}", style(image.display()).green());
    firmware::extract_image(&image, Path::new(&settings.staging_dir))
}

/// Report a failed segment and terminate the session.
fn abort_upload(settings: &Settings, e: Error, kind: SegmentKind, started: Instant) -> Event {
    error!("{}", e);
    println!(
        "{}",
        style(format!(
            "[DC] 💥 The {} segment failed after {:.2?}!",
            kind,
            started.elapsed()
        ))
        .red()
    );
    Event::Done(DoneEvent {
        settings: settings.clone(),
        with_errors: true,
        console: None,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

// A store with two images, `fw_ABCD_v1.zip` and `fw_EFGH_v2.zip`, each
// holding all three resources.
#[cfg(test)]
fn image_store(tag: &str, timeout: std::time::Duration) -> (Settings, std::path::PathBuf) {
    use std::io::Write as _;
    use zip::write::FileOptions;

    let dir = std::env::temp_dir().join(format!("dfucom-states-{}-{}", tag, std::process::id()));
    let store = dir.join("fw");
    std::fs::create_dir_all(&store).unwrap();

    for &name in &["fw_ABCD_v1.zip", "fw_EFGH_v2.zip"] {
        let file = std::fs::File::create(store.join(name)).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for &entry in &["image_signed.ihex", "image_segments.0", "image_segments.1"] {
            zip.start_file(entry, FileOptions::default()).unwrap();
            zip.write_all(b":00000001FF\n").unwrap();
        }
        zip.finish().unwrap();
    }

    let settings = crate::settings::SettingsBuilder::new()
        .firmware_dir(store.to_string_lossy())
        .staging_dir(dir.join("staging").to_string_lossy())
        .handshake_timeout(timeout)
        .finalize();
    (settings, dir)
}

#[test]
fn identity_then_ready_releases_the_upload() {
    let (settings, dir) = image_store("in-order", std::time::Duration::from_secs(5));
    let (tx, rx) = std::sync::mpsc::channel();

    tx.send(DeviceEvent::BootIdentity("ABCD".to_string()))
        .unwrap();
    tx.send(DeviceEvent::DfuReady).unwrap();

    let images = wait_for_announcements(&settings, &rx).unwrap();
    assert!(images.bootloader.is_file());
    assert!(images.resource(SegmentKind::Firmware).is_file());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn ready_before_identity_waits_for_the_image() {
    let (settings, dir) = image_store("reversed", std::time::Duration::from_secs(5));
    let (tx, rx) = std::sync::mpsc::channel();

    // The modem went into download mode before telling us what it runs.
    tx.send(DeviceEvent::DfuReady).unwrap();
    tx.send(DeviceEvent::BootIdentity("ABCD".to_string()))
        .unwrap();

    let images = wait_for_announcements(&settings, &rx).unwrap();
    assert!(images.bootloader.is_file());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn the_wait_times_out_naming_the_missing_identity() {
    let settings = crate::settings::SettingsBuilder::new()
        .handshake_timeout(std::time::Duration::from_millis(25))
        .finalize();
    let (_tx, rx) = std::sync::mpsc::channel::<DeviceEvent>();

    match wait_for_announcements(&settings, &rx).unwrap_err() {
        HandshakeFault::Expired(Error::Timeout {
            waited,
            waiting_for,
        }) => {
            assert_eq!(waited, std::time::Duration::from_millis(25));
            assert_eq!(waiting_for, "the firmware identity announcement");
        }
        other => panic!("unexpected fault: {:?}", other),
    }
}

#[test]
fn the_wait_times_out_naming_the_missing_start_signal() {
    let (settings, dir) = image_store("silent", std::time::Duration::from_millis(25));
    let (tx, rx) = std::sync::mpsc::channel();

    tx.send(DeviceEvent::BootIdentity("ABCD".to_string()))
        .unwrap();

    match wait_for_announcements(&settings, &rx).unwrap_err() {
        HandshakeFault::Expired(Error::Timeout { waiting_for, .. }) => {
            assert_eq!(waiting_for, "the DFU start signal");
        }
        other => panic!("unexpected fault: {:?}", other),
    }

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn a_dead_monitor_ends_the_wait() {
    let settings = crate::settings::SettingsBuilder::new().finalize();
    let (tx, rx) = std::sync::mpsc::channel::<DeviceEvent>();
    drop(tx);

    let fault = wait_for_announcements(&settings, &rx).unwrap_err();
    assert!(matches!(fault, HandshakeFault::ConsoleGone));
}

#[test]
fn an_unusable_store_fails_the_wait() {
    let settings = crate::settings::SettingsBuilder::new()
        .firmware_dir(
            std::env::temp_dir()
                .join("dfucom-states-absent")
                .to_string_lossy(),
        )
        .finalize();
    let (tx, rx) = std::sync::mpsc::channel();

    tx.send(DeviceEvent::BootIdentity("ABCD".to_string()))
        .unwrap();

    let fault = wait_for_announcements(&settings, &rx).unwrap_err();
    assert!(matches!(
        fault,
        HandshakeFault::NoImage(Error::Configuration(_))
    ));
}
