//! Helper macros for the update session state machine modules.

/// Expand to a [`Debug`](std::fmt::Debug) tuple builder listing the line
/// parameters of a boxed [`SerialPort`](serialport::SerialPort). The caller
/// appends its own fields and finishes the tuple.
#[macro_export]
macro_rules! debug_fmt_port {
    ($port:ident, $f:ident) => {
        $f.debug_tuple("port")
            .field(&$port.name())
            .field(&$port.baud_rate())
            .field(&$port.data_bits())
            .field(&$port.stop_bits())
            .field(&$port.parity())
            .field(&$port.flow_control())
    };
}
