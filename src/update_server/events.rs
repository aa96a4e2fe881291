//! Events for the `dfucom` update server state machine.
//!
//! Everything here stays within the [`update_server`](crate::update_server)
//! scope. The [`state_machine`](super::state_machine) module holds the map of
//! states, events and transitions.

use crate::settings::Settings;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// WaitForPortEvent ============================================================

/// Asks for the `WaitForPort` state.
///
/// Raised from `Init` when a device path was given on the command line. No
/// selection is needed then; the server just holds on until the device node
/// exists, which usually means the cable was plugged in.
#[derive(Debug)]
pub(crate) struct WaitForPortEvent {
    pub settings: Settings,
}

// SelectPortEvent =============================================================

/// Asks for the `SelectPort` state.
///
/// Raised from `Init` when no device path was given, from `WaitForPort` when
/// the user cancels the wait with `ESC`, and from `SelectPort` itself when
/// the pick was cancelled and the enumeration should be refreshed.
#[derive(Debug)]
pub(crate) struct SelectPortEvent {
    pub settings: Settings,
}

// PortReadyEvent ==============================================================

/// Asks for the `Service` state; the settings now name a device path that
/// exists on the system.
///
/// Raised from `WaitForPort` when the requested device showed up and from
/// `SelectPort` when the user picked one.
#[derive(Debug)]
pub(crate) struct PortReadyEvent {
    pub settings: Settings,
}

// DoneEvent ===================================================================

/// Asks for the `Done` state once the update session running in `Service`
/// returned its verdict.
///
/// A failed session leaves the modem in an unknown download state; recovery
/// requires a power cycle, so the server terminates instead of going back to
/// watch for the port.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub settings: Settings,
    pub with_errors: bool,
}

// ExitEvent ===================================================================

/// The last event of a server's life. It stops the event loop, whose exit
/// status lands with the original caller.
///
/// **Example**
/// ```no_run
/// use dfucom::{self as dc, UpdateServer};
///
/// let settings = dc::SettingsBuilder::new().finalize();
/// let mut server = dc::singleton(settings);
/// let status = server.run(); // returns after the `Exit` event
/// println!("status: {}", status);
/// std::process::exit(status.into());
/// ```
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub settings: Settings,
    pub with_error: bool,
}

// Events enum ==================================================================

/// The transitions a server state may ask for.
///
/// Each variant wraps the event payload, which carries whatever the origin
/// state wants to hand to its successor.
#[derive(Debug)]
pub(crate) enum Event {
    WaitForPort(WaitForPortEvent),
    SelectPort(SelectPortEvent),
    PortReady(PortReadyEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}
