//! `dfucom` update session state machine.
//!
//! An update session drives one complete firmware push over an already opened
//! serial connection. The modem announces its running firmware and its switch
//! into download mode on the console; once both announcements are in and the
//! matching image is staged, the session streams the three segments of the
//! image in their fixed order and reports the outcome.
//!
//! The following state diagram summarizes the different states and transitions
//! an update session goes through:
//!
//! ```text
//!          START
//!            |
//!            v
//!        .------.
//!        | Init |---------------------.
//!        '------'                     |
//!            |                        |
//!     console monitor                 |
//!         running                     |
//!            v                        |
//!      .-----------.                  |
//!      | Handshake |----------------->|
//!      '-----------'                  |
//!            |                        |
//!    image staged and            any error
//!    device in download mode          |
//!            v                        |
//!    .----------------.               |
//!    | SendBootloader |-------------->|
//!    '----------------'               |
//!            |                        |
//!       segment sent                  |
//!            v                        |
//!    .-----------------.              |
//!    | SendCertificate |------------->|
//!    '-----------------'              |
//!            |                        |
//!       segment sent                  v
//!            v                    .------.
//!     .--------------.            |      |
//!     | SendFirmware |----------->| Done |
//!     '--------------'  all sent  |      |
//!                       or error  '------'
//!                                     |
//!                                     v
//!                                    END
//! ```

use std::time::Instant;

use super::events::*;
use super::states::*;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// The `dfucom` update session state machine. Build one with [`factory`] and
/// drive it to completion with [`run`](SerialDfuSession::run).
pub struct SerialDfuSession {
    sm: SessionStates,
}
impl SerialDfuSession {
    /// Step the machine until the `Done` state raises its `should_exit`
    /// flag.
    ///
    /// Returns **`0`** for a clean finish and a non-zero code when the
    /// session ended on an error.
    pub fn run(&mut self) -> i8 {
        loop {
            self.sm = self.sm.step();
            if let SessionStates::Done(sm) = &self.sm {
                if sm.state.should_exit {
                    return if sm.state.with_error { 1 } else { 0 };
                }
            }
        }
    }
}

/// Create an update session for one firmware push over the configured port.
pub fn factory(settings: Settings) -> SerialDfuSession {
    SerialDfuSession {
        sm: SessionStates::Init(SessionSM::new(settings)),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The typed core of the update session: the settings shared by every state
/// plus the data of the current one.
///
/// Keeping the current state as a type parameter means a transition can only
/// be written where a matching `From<event>` implementation exists, and the
/// debug output always shows which state the machine holds.
#[derive(Debug)]
struct SessionSM<S: Runnable> {
    settings: Settings,
    state: S,
}
impl<S: Runnable> SessionSM<S> {
    fn run(&mut self) -> Event {
        self.state.run(&self.settings)
    }
}

/// The state machine starts in the `InitState`.
impl SessionSM<InitState> {
    fn new(settings: Settings) -> Self {
        SessionSM {
            settings,
            state: InitState {},
        }
    }
}

/// The closed set of states a session can be in. The wrapper gives the event
/// loop a single value to hold and step, whichever state is current.
enum SessionStates {
    Init(SessionSM<InitState>),
    Handshake(SessionSM<HandshakeState>),
    SendBootloader(SessionSM<SendBootloaderState>),
    SendCertificate(SessionSM<SendCertificateState>),
    SendFirmware(SessionSM<SendFirmwareState>),
    Done(SessionSM<DoneState>),
}
impl SessionStates {
    /// Run the current state and apply the transition its event asks for.
    ///
    /// Each `state + event` pair maps to a successor through `From`, so a
    /// transition nobody implemented cannot be written here. An event no arm
    /// expects is a programming error worth the panic.
    fn step(&mut self) -> Self {
        match self {
            SessionStates::Init(sm) => {
                let event = sm.run();
                match event {
                    Event::SwitchToHandshake(ev) => SessionStates::Handshake(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Handshake(sm) => {
                let event = sm.run();
                match event {
                    Event::StartUpload(ev) => SessionStates::SendBootloader(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::SendBootloader(sm) => {
                let event = sm.run();
                match event {
                    Event::SwitchToCertificate(ev) => SessionStates::SendCertificate(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::SendCertificate(sm) => {
                let event = sm.run();
                match event {
                    Event::SwitchToFirmware(ev) => SessionStates::SendFirmware(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::SendFirmware(sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Done(sm) => {
                let event = sm.run();
                match event {
                    Event::Exit(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<SwitchToHandshakeEvent> for SessionSM<HandshakeState> {
    fn from(event: SwitchToHandshakeEvent) -> SessionSM<HandshakeState> {
        SessionSM {
            settings: event.settings,
            state: HandshakeState {
                port: Some(event.port),
                events: Some(event.events),
                console: Some(event.console),
            },
        }
    }
}

impl From<StartUploadEvent> for SessionSM<SendBootloaderState> {
    fn from(event: StartUploadEvent) -> SessionSM<SendBootloaderState> {
        SessionSM {
            settings: event.settings,
            state: SendBootloaderState {
                port: Some(event.port),
                console: Some(event.console),
                images: Some(event.images),
                // The stream timer starts the moment the upload sequence is
                // entered.
                started: Instant::now(),
            },
        }
    }
}

impl From<SwitchToCertificateEvent> for SessionSM<SendCertificateState> {
    fn from(event: SwitchToCertificateEvent) -> SessionSM<SendCertificateState> {
        SessionSM {
            settings: event.settings,
            state: SendCertificateState {
                port: Some(event.port),
                console: Some(event.console),
                images: Some(event.images),
                started: event.started,
            },
        }
    }
}

impl From<SwitchToFirmwareEvent> for SessionSM<SendFirmwareState> {
    fn from(event: SwitchToFirmwareEvent) -> SessionSM<SendFirmwareState> {
        SessionSM {
            settings: event.settings,
            state: SendFirmwareState {
                port: Some(event.port),
                console: Some(event.console),
                images: Some(event.images),
                started: event.started,
            },
        }
    }
}

impl From<DoneEvent> for SessionSM<DoneState> {
    fn from(event: DoneEvent) -> SessionSM<DoneState> {
        SessionSM {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_errors,
                should_exit: false,
                console: event.console,
            },
        }
    }
}
impl From<ExitEvent> for SessionSM<DoneState> {
    fn from(event: ExitEvent) -> SessionSM<DoneState> {
        SessionSM {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_error,
                should_exit: true,
                console: None,
            },
        }
    }
}
