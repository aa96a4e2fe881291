//! `dfucom` firmware update session.
//!
//! One session pushes one firmware image over an already resolved serial
//! device: it opens the port, watches the device console for the two boot
//! announcements, stages the matching image and streams its three segments.
//!
//! ```ignore
//! let settings = SettingsBuilder::new()
//!     .path("/dev/ttyUSB0")
//!     .baud_rate(115_200)
//!     .finalize();
//! let mut session = dpsm::factory(settings);
//! let status = session.run();
//! ```

#[macro_use]
mod macros;

mod events;
mod state_machine;
mod states;

pub use state_machine::{factory, SerialDfuSession};
