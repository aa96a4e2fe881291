//! Helper functions to push staged update segments over the serial port.

use std::io::{self, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::error::{Error, Result};
use crate::record::{Segment, SegmentKind};

/// Parse a staged resource file and stream it as the given segment kind.
pub(crate) fn upload_stage<W: Write>(
    port: &mut W,
    resource: &Path,
    kind: SegmentKind,
) -> Result<()> {
    let segment = Segment::from_hex_file(resource, kind)?;
    push_segment(port, &segment)
}

/// Stream one segment, record by record.
///
/// Each record goes out as its framed wire form. The modem acknowledges
/// nothing during the stream; the device console is the only feedback
/// channel and it is watched elsewhere.
pub(crate) fn push_segment<W: Write>(port: &mut W, segment: &Segment) -> Result<()> {
    info!(
        "pushing {} records ({} bytes on the wire) for the {} segment",
        segment.records.len(),
        segment.wire_size(),
        segment.kind
    );

    let pb = ProgressBar::new(segment.records.len() as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("[DC] ⏩ {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} records ({eta})")
        .progress_chars("=>-"));
    pb.set_message(segment.kind.to_string());

    for record in &segment.records {
        record
            .write_framed(port, segment.kind)
            .map_err(connection_lost)?;
        pb.inc(1);
    }
    port.flush().map_err(connection_lost)?;

    pb.finish_with_message(format!("{} done", segment.kind));
    Ok(())
}

// =============================================================================
// Private stuff
// =============================================================================

/// A failed write means the serial link is gone. There is no retry and no
/// mid-segment recovery; the device ends up in an undefined state.
fn connection_lost(e: io::Error) -> Error {
    Error::Connection(serialport::Error {
        kind: serialport::ErrorKind::Io(e.kind()),
        description: e.to_string(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn frames_reconstruct_records() {
    use std::convert::TryFrom;

    use crate::record::Record;

    let lines = [":02010000feab54", ":020100000102FA", ":00000001FF"];
    let segment = Segment {
        kind: SegmentKind::Certificate,
        records: lines
            .iter()
            .map(|line| Record::parse(line).unwrap())
            .collect(),
    };

    let mut wire = Vec::new();
    push_segment(&mut wire, &segment).unwrap();
    assert_eq!(wire.len(), segment.wire_size());

    let mut at = 0;
    for record in &segment.records {
        let len = wire[at] as usize;
        assert_eq!(len, record.payload.len());
        assert_eq!(&wire[at + 1..at + 3], &record.address.to_be_bytes()[..]);
        assert_eq!(wire[at + 3], record.record_type);
        assert_eq!(&wire[at + 4..at + 4 + len], record.payload.as_slice());
        assert_eq!(wire[at + 4 + len], record.checksum);
        assert_eq!(
            SegmentKind::try_from(wire[at + 5 + len]),
            Ok(SegmentKind::Certificate)
        );
        at += len + 6;
    }
    assert_eq!(at, wire.len());
}

#[test]
fn upload_stage_reads_the_staged_file() {
    use std::io::Write as _;

    let dir = std::env::temp_dir().join(format!("dfucom-stream-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("segments.1");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, ":02000000AABB99").unwrap();
    writeln!(file, ":00000001FF").unwrap();
    drop(file);

    let mut wire = Vec::new();
    upload_stage(&mut wire, &path, SegmentKind::Firmware).unwrap();

    assert_eq!(wire.len(), (2 + 6) + 6);
    assert_eq!(wire[wire.len() - 1], SegmentKind::Firmware.tag());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn a_dead_link_fails_the_segment_as_a_connection_error() {
    use crate::record::Record;

    struct DeadLink;
    impl Write for DeadLink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "link is gone"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let segment = Segment {
        kind: SegmentKind::Bootloader,
        records: vec![Record::parse(":00000001FF").unwrap()],
    };

    let result = push_segment(&mut DeadLink, &segment);
    assert!(matches!(result, Err(Error::Connection(_))));
}

#[test]
fn a_malformed_stage_aborts_before_any_write() {
    use std::io::Write as _;

    let dir = std::env::temp_dir().join(format!("dfucom-stream-bad-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("segments.0");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "not a record").unwrap();
    drop(file);

    let mut wire = Vec::new();
    let result = upload_stage(&mut wire, &path, SegmentKind::Certificate);

    assert!(matches!(
        result,
        Err(crate::error::Error::MalformedRecord { .. })
    ));
    assert!(wire.is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}
