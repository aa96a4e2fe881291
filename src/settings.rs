//! Settings for the serial line and the update session.
//!
//! Values are assembled through the
//! [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern; anything not set explicitly keeps its default.

use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Public Interface
// =============================================================================

/// Everything `dfucom` needs to know to run an update: the serial line
/// parameters plus the image store, staging area and handshake patience of
/// the session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// Device path of the serial port, when one was requested.
    pub path: Option<String>,
    /// Symbols per second on the line.
    pub baud_rate: u32,
    /// Bits per character.
    pub data_bits: DataBits,
    /// Signalling used to pace the transfer.
    pub flow_control: FlowControl,
    /// Parity scheme for character error checking.
    pub parity: Parity,
    /// Bits closing each character.
    pub stop_bits: StopBits,

    /// Directory holding the candidate firmware images. The store must offer
    /// at least two images so one always differs from the firmware the modem
    /// reports it is running.
    pub firmware_dir: String,
    /// Directory the selected image is unpacked into before streaming.
    pub staging_dir: String,
    /// How long to wait for each of the modem's boot announcements before
    /// the session gives up.
    pub handshake_timeout: Duration,

    /// Keeps literal construction out of reach; values come from the
    /// [`SettingsBuilder`].
    #[doc(hidden)]
    _private_use_builder: (),
}

/// Assembles a [`Settings`] value, one setter per field.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().path("/dev/ttyACM0").finalize();
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start from the defaults: 115200 8N1 with no flow control, images under
    /// `fw/`, staging under `temp/`, two minutes of handshake patience and no
    /// port path.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                firmware_dir: "fw".to_string(),
                staging_dir: "temp".to_string(),
                handshake_timeout: Duration::from_secs(120),
                _private_use_builder: (),
            },
        }
    }

    /// Use the device at `path` instead of asking interactively.
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().into_owned());
        self
    }

    /// Line speed in symbols per second.
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Bits per character.
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Signalling used to pace the transfer.
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Parity scheme for character error checking.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Bits closing each character.
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Directory holding the candidate firmware images.
    pub fn firmware_dir<'a>(mut self, firmware_dir: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.firmware_dir = firmware_dir.into().into_owned();
        self
    }

    /// Directory the selected image is unpacked into.
    pub fn staging_dir<'a>(mut self, staging_dir: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.staging_dir = staging_dir.into().into_owned();
        self
    }

    /// How long to wait for each boot announcement from the modem.
    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.settings.handshake_timeout = handshake_timeout;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        SettingsBuilder::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            firmware_dir: "fw".to_string(),
            staging_dir: "temp".to_string(),
            handshake_timeout: Duration::from_secs(120),
            _private_use_builder: (),
        }
    )
}

#[test]
fn chosen_device_path_is_kept() {
    let settings = SettingsBuilder::new().path("/dev/ttyACM0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyACM0");
}

#[test]
fn serial_line_overrides() {
    let settings = SettingsBuilder::new()
        .baud_rate(921_600)
        .data_bits(DataBits::Seven)
        .flow_control(FlowControl::Hardware)
        .parity(Parity::Even)
        .stop_bits(StopBits::Two)
        .finalize();
    assert_eq!(settings.baud_rate, 921_600);
    assert_eq!(settings.data_bits, DataBits::Seven);
    assert_eq!(settings.flow_control, FlowControl::Hardware);
    assert_eq!(settings.parity, Parity::Even);
    assert_eq!(settings.stop_bits, StopBits::Two);
}

#[test]
fn update_session_overrides() {
    let settings = SettingsBuilder::new()
        .firmware_dir("images")
        .staging_dir("scratch")
        .handshake_timeout(Duration::from_secs(30))
        .finalize();
    assert_eq!(settings.firmware_dir, "images");
    assert_eq!(settings.staging_dir, "scratch");
    assert_eq!(settings.handshake_timeout, Duration::from_secs(30));
}

#[test]
fn builder_default_matches_new() {
    assert_eq!(
        SettingsBuilder::default().finalize(),
        SettingsBuilder::new().finalize()
    );
}
