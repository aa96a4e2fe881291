//! `dfucom` update server state machine.
//!
//! The server owns everything that happens around one update session: it
//! resolves which serial device to use and only then hands over to the
//! session machine. Serial devices come and go as cables are plugged, so a
//! requested port that is not there yet is waited for, and when no port was
//! requested at all the user picks one from the live enumeration. A session
//! that fails may leave the modem halfway through a DFU, and continuing
//! requires a power cycle, so the server terminates with an error instead of
//! going back to watch for the port.
//!
//! The following state diagram summarizes the different states and transitions
//! `dfucom` device management goes through:
//!
//! ```text
//!                            START
//!                              |
//!                              v
//!                          .-------.
//!                          | Init  |
//!                          '-------'
//!                              |
//!                              v
//!                    no  .----------.  yes
//!                  .----( port_name? )----.
//!      .-----.     |     '----------'     |
//!      |     |     v                      v
//!      |    .------------.         .-------------.
//!      '--->| SelectPort |<--------| WaitForPort |
//!           '------------'  cancel '-------------'
//!              |                          |
//!              |                         port
//!             port                       ready
//!             ready                       v
//!              |               ******************
//!              |               *    Service     *
//!              '-------------->* Update Session *
//!                              * State Machine  *
//!                              ******************
//!                                       |
//!                                       v
//!                                      END
//! ```

use std::sync::{Arc, Mutex, Once};

use super::events::*;
use super::states::*;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

// -----------------------------------------------------------------------------
// Update Server Singleton
// -----------------------------------------------------------------------------

/// Runs an update server to completion.
pub trait UpdateServer {
    fn run(&mut self) -> i8;
}

/// Handle on the one update server of the process.
///
/// Clones are cheap and all point at the same machine; [`singleton`] hands
/// them out.
#[derive(Clone)]
pub struct SingletonServer {
    // The machine is stepped under this lock, so handles may live on any
    // thread.
    inner: Arc<Mutex<UpdateServerStates>>,
}
impl UpdateServer for SingletonServer {
    /// Step the server until the `Done` state raises its `should_exit` flag.
    ///
    /// Returns **`0`** for a clean finish and a non-zero code when the update
    /// failed; `main` can pass it straight to `process::exit`.
    fn run(&mut self) -> i8 {
        loop {
            let mut data = self.inner.lock().unwrap();
            *data = data.step();
            if let UpdateServerStates::Done(sm) = &*data {
                if sm.state.should_exit {
                    return if sm.state.with_error { 1 } else { 0 };
                }
            }
        }
    }
}

/// Hand out the process-wide update server, creating it on first call.
///
/// The `settings` of the first caller win; later calls return a handle on
/// the existing instance.
///
/// ```ignore
///     let settings = SettingsBuilder::new().finalize();
///     let mut server = singleton(settings);
///     server.run();
/// ```
pub fn singleton(settings: Settings) -> SingletonServer {
    static mut US_SINGLETON: *const SingletonServer = 0 as *const SingletonServer;
    static US_ONCE: Once = Once::new();

    unsafe {
        US_ONCE.call_once(|| {
            let server = SingletonServer {
                inner: Arc::new(Mutex::new(UpdateServerStates::Init(
                    UpdateServerStateMachine::new(settings),
                ))),
            };

            // Leak the instance to the heap; it lives for the rest of the
            // process.
            US_SINGLETON = std::mem::transmute(Box::new(server));
        });

        // Every caller gets its own clone backed by the shared `Arc`.
        (*US_SINGLETON).clone()
    }
}

// =============================================================================
// Private stuff
// =============================================================================

// -----------------------------------------------------------------------------
// The State Machine
// -----------------------------------------------------------------------------

/// The typed core of the update server: the settings shared by every state
/// plus the data of the current one. The state lives in the type parameter,
/// so transitions only exist where a `From<event>` implementation was
/// written.
#[derive(Debug)]
struct UpdateServerStateMachine<S: Runnable> {
    settings: Settings,
    state: S,
}
impl<S: Runnable> UpdateServerStateMachine<S> {
    fn run(&mut self) -> Event {
        self.state.run(&self.settings)
    }
}

/// The update server state machine starts in the `InitState`.
impl UpdateServerStateMachine<InitState> {
    fn new(settings: Settings) -> Self {
        UpdateServerStateMachine {
            settings,
            state: InitState {},
        }
    }
}

/// All states the server can hold, behind one value the event loop can step.
enum UpdateServerStates {
    Init(UpdateServerStateMachine<InitState>),
    WaitForPort(UpdateServerStateMachine<WaitForPortState>),
    SelectPort(UpdateServerStateMachine<SelectPortState>),
    Service(UpdateServerStateMachine<ServiceState>),
    Done(UpdateServerStateMachine<DoneState>),
}
impl UpdateServerStates {
    fn step(&mut self) -> Self {
        match self {
            UpdateServerStates::Init(sm) => {
                let event = sm.run();
                match event {
                    Event::WaitForPort(ev) => UpdateServerStates::WaitForPort(ev.into()),
                    Event::SelectPort(ev) => UpdateServerStates::SelectPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            UpdateServerStates::WaitForPort(sm) => {
                let event = sm.run();
                match event {
                    Event::PortReady(ev) => UpdateServerStates::Service(ev.into()),
                    Event::SelectPort(ev) => UpdateServerStates::SelectPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            UpdateServerStates::SelectPort(sm) => {
                let event = sm.run();
                match event {
                    Event::SelectPort(ev) => UpdateServerStates::SelectPort(ev.into()),
                    Event::PortReady(ev) => UpdateServerStates::Service(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            UpdateServerStates::Service(sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => UpdateServerStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            UpdateServerStates::Done(sm) => {
                let event = sm.run();
                match event {
                    Event::Exit(ev) => UpdateServerStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<WaitForPortEvent> for UpdateServerStateMachine<WaitForPortState> {
    fn from(event: WaitForPortEvent) -> UpdateServerStateMachine<WaitForPortState> {
        UpdateServerStateMachine {
            settings: event.settings,
            state: WaitForPortState {},
        }
    }
}

impl From<SelectPortEvent> for UpdateServerStateMachine<SelectPortState> {
    fn from(event: SelectPortEvent) -> UpdateServerStateMachine<SelectPortState> {
        UpdateServerStateMachine {
            settings: event.settings,
            state: SelectPortState {},
        }
    }
}

impl From<PortReadyEvent> for UpdateServerStateMachine<ServiceState> {
    fn from(event: PortReadyEvent) -> UpdateServerStateMachine<ServiceState> {
        UpdateServerStateMachine {
            settings: event.settings,
            state: ServiceState {},
        }
    }
}

impl From<DoneEvent> for UpdateServerStateMachine<DoneState> {
    fn from(event: DoneEvent) -> UpdateServerStateMachine<DoneState> {
        UpdateServerStateMachine {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_errors,
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for UpdateServerStateMachine<DoneState> {
    fn from(event: ExitEvent) -> UpdateServerStateMachine<DoneState> {
        UpdateServerStateMachine {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_error,
                should_exit: true,
            },
        }
    }
}
