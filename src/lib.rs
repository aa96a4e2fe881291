//! Dfucom pushes a full modem firmware update (DFU) to a device over a serial
//! port connection. The modem announces its running firmware and its switch
//! into download mode on its boot console; `dfucom` picks the matching
//! firmware image out of a local store, unpacks it, and streams the image
//! segments down the same wire, framed record by record.
//!
//! Dfucom offers an interactive selection menu to pick the serial port to be
//! used, can wait for a device that is not plugged in yet, and echoes the
//! device console throughout, so the whole update can be watched from the
//! terminal it runs in.
//!
//! Most of the functionality in `dfucom` is implemented as state machines,
//! expressed in terms of **states** and **transitions** between them:
//!
//! * A machine holds exactly one state at a time, and each state carries its
//!   own data.
//! * A state asks for its transition by returning a typed **event**. Whatever
//!   the successor needs rides on that event.
//! * A transition consumes the state it leaves. Coming back to a state later
//!   means building a fresh one.
//!
//! Every `event => state` conversion is an ordinary `From` implementation, so
//! the compiler only accepts transitions someone spelled out; stepping the
//! machine is then nothing more than matching on the event and calling
//! `into`.

mod dfu_protocol;
mod error;
mod firmware;
mod monitor;
mod record;
mod settings;
mod update_server;
mod utils;

pub use error::{Error, Result};
pub use record::RecordError;
pub use settings::{Settings, SettingsBuilder};
pub use update_server::{singleton, UpdateServer};
