//! States for the `dfucom` update server state machine.
//!
//! Everything here stays within the [`update_server`](crate::update_server)
//! scope; the server's public face is the singleton handle. The
//! [`state_machine`](super::state_machine) module holds the map of states,
//! events and transitions.

use log::info;

use crate::dfu_protocol as dpsm;
use crate::settings::Settings;
use crate::utils;

use super::events::*;

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

/// The entry state of the update server.
///
/// It only looks at the settings and never blocks:
///
///  * **[`WaitForPortEvent`] => [`WaitForPortState`]** when a device path was
///    given on the command line,
///  * **[`SelectPortEvent`] => [`SelectPortState`]** when no path was given
///    and the user should pick one.
#[derive(Debug)]
pub(crate) struct InitState {}
impl Runnable for InitState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Init");
        if settings.path.is_some() {
            Event::WaitForPort(WaitForPortEvent {
                settings: settings.clone(),
            })
        } else {
            Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            })
        }
    }
}

// WaitForPortState ============================================================

/// Waits for the requested device to show up in the enumeration.
#[derive(Debug)]
pub(crate) struct WaitForPortState {}
impl Runnable for WaitForPortState {
    fn run(&mut self, settings: &Settings) -> Event {
        let path = settings.path.as_ref().unwrap();
        info!("=> WaitForPort");
        if utils::wait_for_port(path) {
            // Cancelled with `ESC`; fall back to the interactive pick.
            Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            })
        } else {
            Event::PortReady(PortReadyEvent {
                settings: settings.clone(),
            })
        }
    }
}

// SelectPortState =============================================================

/// Lets the user pick a device out of the live enumeration.
#[derive(Debug)]
pub(crate) struct SelectPortState {}
impl Runnable for SelectPortState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> SelectPort");
        match utils::select_port() {
            // The pick lands in the settings every later state reads.
            Some(path) => {
                let mut selected = settings.clone();
                selected.path = Some(path);
                Event::PortReady(PortReadyEvent { settings: selected })
            }
            // A cancelled pick re-enters this state with a fresh enumeration.
            None => Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            }),
        }
    }
}

// ServiceState ================================================================

/// Hands the resolved port over to an update session and waits for its
/// verdict.
#[derive(Debug)]
pub(crate) struct ServiceState {}
impl Runnable for ServiceState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Service");

        let mut session = dpsm::factory(settings.clone());
        match session.run() {
            0 => Event::Done(DoneEvent {
                settings: settings.clone(),
                with_errors: false,
            }),
            // The session failed and already reported why. The modem may be
            // stuck halfway through a DFU and must be power-cycled before
            // another attempt, so the server terminates instead of retrying.
            _ => Event::Done(DoneEvent {
                settings: settings.clone(),
                with_errors: true,
            }),
        }
    }
}

// Done State ==================================================================

/// Terminal state; its second pass carries `should_exit` for the event loop.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DoneState {
    pub with_error: bool,
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!(
            "=> Done with{}errors",
            if self.with_error { " " } else { " no " }
        );
        Event::Exit(ExitEvent {
            settings: settings.clone(),
            with_error: self.with_error,
        })
    }
}
