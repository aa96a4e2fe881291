//! Dfucom command line interface.

use std::process;
use std::str::FromStr;
use std::time::Duration;

use clap::{
    crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg, ArgMatches,
};
use console::style;
use log::{debug, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use dfucom::{self as dc, UpdateServer};

fn main() {
    println!("[DC] dfucom v{}", crate_version!());

    ctrlc::set_handler(move || {
        println!("[DC] 🛑 received Ctrl+C!");
        process::exit(0);
    })
    .expect("failed to install the Ctrl-C handler");

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .about(crate_description!())
        .long_about(
            "\n\
            Dfucom works in tandem with the modem's boot console to push a \
            full firmware update (DFU) over the serial port. When started, it \
            watches the console and echoes everything the device prints to \
            stdout.\n\
            \n\
            The boot console announces the identity of the running firmware, \
            which dfucom uses to pick an update image out of the local image \
            store. When the device then announces that it entered download \
            mode, dfucom answers by streaming the image: \n\
               \t* unpacks the bootloader, certificate and firmware resources \n\
               \t* parses each resource into records \n\
               \t* frames every record and writes it to the port \n\
            \n\
            The three segments always go out in the same order: bootloader, \
            certificate, firmware. There are no acknowledgments; the device \
            console is the only feedback channel and stays echoed until the \
            end.\n\
            \n\
            Dfucom can be started before or after the device is plugged in.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the tty device the modem is attached to")
                .long_help(
                    "the tty device the modem is attached to; the name may \
                     move around as the cable is re-plugged or between \
                     systems. When not given, dfucom lists the connected \
                     devices and asks.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("baud rate of the serial line")
                .long_help(
                    "baud rate of the serial line; the default matches the \
                     modem's boot console",
                )
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("data bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("stop bits closing each character")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity bit mode")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control on the line")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TIMEOUT")
                .help("seconds to wait for each boot announcement")
                .long_help(
                    "seconds to wait for each boot announcement before giving \
                     up on the device; the wait restarts with every \
                     announcement that arrives.",
                )
                .short("-w")
                .long("--timeout")
                .takes_value(true)
                .default_value("120")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STAGING_DIR")
                .help("directory where image resources are unpacked")
                .short("-u")
                .long("--staging-dir")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FW_DIR")
                .help("path to the firmware image store")
                .long_help(
                    "path to the firmware image store holding the update \
                     archives; when not set, `dfucom` will look for images in \
                     `fw` under the current working directory.",
                )
                .index(1),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("raise the logging verbosity, repeat for more detail"),
        )
        .get_matches();

    // Each repetition of `-v` raises the log level one notch.
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    let baud_rate: u32 = numeric_arg(&matches, "BAUD_RATE", "baud-rate");
    let timeout: u64 = numeric_arg(&matches, "TIMEOUT", "timeout");

    // The line parameters carry defaults, so `value_of` is always `Some`, and
    // `possible_values` already vetted the strings.
    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    let mut builder = dc::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .handshake_timeout(Duration::from_secs(timeout));

    if let Some(tty) = matches.value_of("DEVICE_TTY") {
        builder = builder.path(tty);
    }
    if let Some(dir) = matches.value_of("FW_DIR") {
        builder = builder.firmware_dir(dir);
    }
    if let Some(dir) = matches.value_of("STAGING_DIR") {
        builder = builder.staging_dir(dir);
    }
    let settings = builder.finalize();

    let mut server = dc::singleton(settings);
    let exit_code = server.run();
    debug!("exit code: {}", exit_code);
    process::exit(exit_code.into());
}

/// Parse a numeric argument, aborting with a readable message instead of a
/// stack trace when the value does not parse.
fn numeric_arg<T: FromStr>(matches: &ArgMatches, name: &str, flag: &str) -> T {
    value_t!(matches.value_of(name), T).unwrap_or_else(|_| {
        println!(
            "{}: `{}` expects a number",
            style("error").red(),
            style(flag).cyan()
        );
        println!(
            "   {} got `{}`",
            style("-->").cyan(),
            style(matches.value_of(name).unwrap()).on_red()
        );
        process::exit(-1);
    })
}
