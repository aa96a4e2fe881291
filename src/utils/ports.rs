//! Serial device discovery, selection and configuration.

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serialport::{available_ports, SerialPort, SerialPortType};

use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use crate::{utils::poll_escape, Settings};

//==============================================================================
// Public Interface
//==============================================================================

/// Enumerate connected serial devices until at least one shows up, then let
/// the user pick one interactively.
///
/// Returns `None` when the pick was cancelled, which sends the update server
/// around its wait-select loop for a fresh enumeration. Plugging the device in
/// and hitting `ESC` is enough to see it listed.
pub(crate) fn select_port() -> Option<String> {
    let spinner = status_spinner();

    // The cursor is hidden while the spinner redraws the line.
    Term::stdout().hide_cursor().unwrap();
    let mut waited = 0usize;
    let ports = loop {
        let ports = detected_ports();
        if !ports.is_empty() {
            spinner.finish_with_message("Select a port to be used:");
            break ports;
        }
        spinner.set_message(format!(
            "[{:03}s] ⌛ Waiting for a USB serial controller to be connected...",
            style(waited).dim()
        ));
        thread::sleep(Duration::from_secs(1));
        waited += 1;
    };
    Term::stdout().show_cursor().unwrap();

    let picked = pick_port(&ports);
    match &picked {
        Some(path) => {
            spinner.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()))
        }
        None => spinner.finish_with_message("❌ Selection canceled -> refreshing..."),
    }
    picked
}

/// Block until the device at `path` shows up in the enumeration, checking
/// every couple of seconds.
///
/// `ESC` aborts the wait. Returns `true` when the user cancelled and `false`
/// when the device appeared.
pub(crate) fn wait_for_port(path: &str) -> bool {
    let spinner = status_spinner();

    // Cancellation needs its own thread: `poll_escape` owns the terminal
    // while it polls, and the enumeration loop must keep running regardless.
    // A pair of channels closes the loop in both directions. `esc_rx` tells
    // the enumeration loop that the user gave up, `ready_rx` tells the key
    // poller that the device arrived and its thread can end.
    let (esc_tx, esc_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel();

    let key_poller = thread::spawn(move || loop {
        if ready_rx.try_recv().is_ok() {
            break;
        }
        if let Ok(true) = poll_escape() {
            esc_tx.send(()).expect("cancellation channel closed early");
            break;
        }
    });

    let poll_period = 2u64;
    let mut waited = 0u64;
    let cancelled = loop {
        if port_is_listed(&detected_ports(), path) {
            ready_tx.send(()).expect("readiness channel closed early");
            spinner.finish_with_message(format!(
                "👍 Serial port {} is ready",
                style(path).green()
            ));
            break false;
        }

        spinner.set_message(format!(
            "[{:03}s] ⏳ Waiting for {} to be ready (ESC to cancel)...",
            style(waited).dim(),
            style(path).cyan()
        ));

        // Sleep on the cancellation channel so a keypress cuts the wait
        // short instead of running out the full period.
        match esc_rx.recv_timeout(Duration::from_secs(poll_period)) {
            Ok(()) => {
                spinner.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                break true;
            }
            Err(RecvTimeoutError::Timeout) => waited += poll_period,
            Err(RecvTimeoutError::Disconnected) => break true,
        }
    };

    key_poller
        .join()
        .expect("the key polling thread panicked");

    cancelled
}

/// Open the device named in `settings` and bring the line to the configured
/// parameters, retrying the open a few times to ride out slow device nodes.
pub(crate) fn open_port(settings: &Settings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    use retry::{delay, retry_with_index};

    let path = settings.path.clone().unwrap();
    let result = retry_with_index(delay::Fixed::from_millis(1000).take(4), |attempt| {
        debug!("opening {}, attempt {}", path, attempt);
        serialport::new(&path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .flow_control(settings.flow_control)
            // The console monitor sits in a blocking `read` most of the
            // time; a bounded timeout lets it keep accumulating lines that
            // arrive in pieces. Writes never take anywhere near this long.
            .timeout(Duration::from_millis(500))
            .open()
    });

    let mut port = result.map_err(|err| match err {
        retry::Error::Operation {
            error,
            total_delay,
            tries,
        } => {
            info!(
                "gave up opening {} after {} tries ({:?}): {}",
                path, tries, total_delay, error
            );
            error
        }
        retry::Error::Internal(description) => serialport::Error {
            kind: serialport::ErrorKind::Unknown,
            description,
        },
    })?;

    // `open` is not guaranteed to apply every builder value on all
    // platforms. Set the line parameters again on the open handle and read
    // them back.
    port.set_baud_rate(settings.baud_rate)?;
    port.set_data_bits(settings.data_bits)?;
    port.set_stop_bits(settings.stop_bits)?;
    port.set_parity(settings.parity)?;
    port.set_flow_control(settings.flow_control)?;

    info!(
        "Connected to {} at {} baud",
        port.name().unwrap_or_else(|| path.clone()),
        port.baud_rate()?
    );
    debug!("data_bits    : {:#?}", port.data_bits()?);
    debug!("stop_bits    : {:#?}", port.stop_bits()?);
    debug!("parity       : {:#?}", port.parity()?);
    debug!("flow control : {:#?}", port.flow_control()?);

    assert_eq!(
        settings.baud_rate,
        port.baud_rate()?,
        "\n\n\
         --> The device did not accept {} baud.\n    \
         Pick a standard rate in the command line arguments, or leave the\n    \
         default in place.\n\
         \n",
        settings.baud_rate
    );
    assert_eq!(settings.data_bits, port.data_bits()?);
    assert_eq!(settings.stop_bits, port.stop_bits()?);
    assert_eq!(settings.parity, port.parity()?);

    Ok(port)
}

//==============================================================================
// Private stuff
//==============================================================================

fn status_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(120);
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[DC] {spinner:.blue} {msg}"),
    );
    spinner
}

/// A detected entry may carry a `: (manufacturer / product)` suffix, so the
/// requested path matches on prefix.
fn port_is_listed(ports: &[String], path: &str) -> bool {
    ports.iter().any(|p| p.starts_with(path))
}

/// List the serial devices on the system, one display entry per device.
fn detected_ports() -> Vec<String> {
    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            info!("serial port enumeration failed: {}", e);
            return vec![];
        }
    };

    ports
        .into_iter()
        .map(|p| match p.port_type {
            // USB controllers carry a description worth showing next to the
            // device path.
            SerialPortType::UsbPort(usb) => format!(
                "{}: ({} / {})",
                p.port_name,
                usb.manufacturer.as_deref().unwrap_or(""),
                usb.product.as_deref().unwrap_or("")
            ),
            // Anything else, PCI UARTs or the pseudo terminals used in
            // testing, is listed by path alone.
            _ => p.port_name,
        })
        .collect()
}

fn pick_port(ports: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let choice = Select::with_theme(&ColorfulTheme::default())
        .items(ports)
        .default(0)
        .interact_on_opt(&Term::buffered_stderr())
        .unwrap();

    // Hand back the device path without the description suffix.
    choice.map(|i| ports[i].split(':').next().unwrap().to_string())
}

//==============================================================================
// Unit Tests
//==============================================================================

#[test]
fn listed_port_matches_on_the_path_prefix() {
    let ports = vec![
        "/dev/ttyACM0: (Quectel / LTE Modem)".to_string(),
        "/dev/ttyUSB3".to_string(),
    ];
    assert!(port_is_listed(&ports, "/dev/ttyACM0"));
    assert!(port_is_listed(&ports, "/dev/ttyUSB3"));
    assert!(!port_is_listed(&ports, "/dev/ttyUSB0"));
}

#[test]
fn listed_port_ignores_the_description_suffix() {
    let ports = vec!["/dev/ttyACM1: (FTDI / FT232R)".to_string()];
    assert!(port_is_listed(&ports, "/dev/ttyACM1"));
    assert!(!port_is_listed(&ports, "/dev/ttyACM2"));
}
