//! Helpers shared by the state machines: port handling, keyboard polling and
//! segment streaming.

mod keyboard;
mod ports;
mod stream;

pub(crate) use keyboard::poll_escape;
pub(crate) use ports::{open_port, select_port, wait_for_port};
pub(crate) use stream::upload_stage;
