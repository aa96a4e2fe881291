//! `dfucom` firmware update (over serial port) server.
//!
//! The server resolves which serial device to use, runs one update session
//! against it and reports the session's verdict as its exit status.
//!
//! ```no_run
//! use dfucom::{self as dc, UpdateServer};
//!
//! let settings = dc::SettingsBuilder::default().finalize();
//! let mut server = dc::singleton(settings);
//! let status = server.run();
//! std::process::exit(status.into());
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::{singleton, UpdateServer};
