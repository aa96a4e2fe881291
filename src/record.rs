//! The wire data model of the update link: hex record lines, parsed
//! [`Record`]s, and the tagged [`Segment`]s streamed to the device.
//!
//! Resource files are line oriented. Each line is one record:
//!
//! ```text
//! <marker> <len:2> <addr:4> <type:2> <payload:2*len> <checksum:2>
//! ```
//!
//! where every field after the one-character marker is hexadecimal text,
//! upper or lower case. On the wire a record becomes the same fields as raw
//! bytes, closed by a one-byte segment tag:
//!
//! ```text
//! len (1) | addr (2) | type (1) | payload (len) | checksum (1) | tag (1)
//! ```
//!
//! The marker character is discarded without validation, and the checksum
//! byte is forwarded exactly as found in the file. Verification is the
//! device's job; re-checking here would reject images the device accepts.

use std::convert::TryFrom;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::error::{Error, Result};

// =============================================================================
// Public Interface
// =============================================================================

/// Why a record line failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The line is shorter than the minimal framing: a marker plus the
    /// length, address and type fields.
    #[error("line is too short to frame a record")]
    TooShort,
    /// A field holds something other than hexadecimal text.
    #[error("invalid hex in the {0} field")]
    BadHex(&'static str),
    /// The declared payload length does not match the rest of the line.
    #[error("payload of {declared} bytes was declared but {remaining} hex chars follow the type field")]
    LengthMismatch { declared: usize, remaining: usize },
}

/// The three components of a full modem update, in their fixed transmission
/// order. The numeric tag of a kind closes every frame streamed to the
/// device, which uses it to route the record to the right flash region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SegmentKind {
    Bootloader = 1,
    Certificate = 2,
    Firmware = 3,
}

impl SegmentKind {
    /// The one-byte wire tag of this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SegmentKind {
    type Error = u8;

    /// Tags are a closed set; anything else is handed back to the caller.
    fn try_from(tag: u8) -> std::result::Result<Self, u8> {
        match tag {
            1 => Ok(SegmentKind::Bootloader),
            2 => Ok(SegmentKind::Certificate),
            3 => Ok(SegmentKind::Firmware),
            other => Err(other),
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Bootloader => "bootloader",
            SegmentKind::Certificate => "certificate",
            SegmentKind::Firmware => "firmware",
        };
        f.write_str(name)
    }
}

/// One parsed record line, immutable once parsed.
///
/// The payload length is not stored: [`Record::parse`] guarantees it equals
/// `payload.len()`, and [`Record::length`] derives it from there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    /// Target address. Transmitted high byte first, matching the textual
    /// order of the four address characters in the file.
    pub address: u16,
    /// Record type byte, forwarded untouched.
    pub record_type: u8,
    /// Payload bytes, exactly as many as the line declared. Never more than
    /// 255; `parse` is the normal constructor.
    pub payload: Vec<u8>,
    /// Checksum byte, forwarded untouched and never re-verified.
    pub checksum: u8,
}

impl Record {
    /// Parse one resource file line into a record.
    ///
    /// Trailing `\r`/`\n` are stripped, the one-character marker is dropped,
    /// and the rest must be exactly the declared framing. Anything else is a
    /// [`RecordError`]; no input can make this panic.
    pub fn parse(line: &str) -> std::result::Result<Record, RecordError> {
        let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n');

        // Drop the marker. Its value is not checked.
        let body = match trimmed.chars().next() {
            Some(marker) => &trimmed[marker.len_utf8()..],
            None => return Err(RecordError::TooShort),
        };
        if body.len() < 8 {
            return Err(RecordError::TooShort);
        }

        // Every field goes through this gate. `get` instead of indexing, so
        // a multi-byte character in the middle of a field surfaces as bad
        // hex instead of a slicing panic; the digit check rejects what
        // `from_str_radix` alone would let through, a leading sign.
        let digits = |range: std::ops::Range<usize>, name: &'static str| {
            body.get(range)
                .filter(|field| field.bytes().all(|b| b.is_ascii_hexdigit()))
                .ok_or(RecordError::BadHex(name))
        };

        let declared = u8::from_str_radix(digits(0..2, "length")?, 16)
            .map_err(|_| RecordError::BadHex("length"))? as usize;
        let address = u16::from_str_radix(digits(2..6, "address")?, 16)
            .map_err(|_| RecordError::BadHex("address"))?;
        let record_type = u8::from_str_radix(digits(6..8, "type")?, 16)
            .map_err(|_| RecordError::BadHex("type"))?;

        // After the fixed fields the line must hold exactly the declared
        // payload plus the checksum byte.
        let remaining = body.len() - 8;
        if remaining != 2 * declared + 2 {
            return Err(RecordError::LengthMismatch {
                declared,
                remaining,
            });
        }

        let mut payload = Vec::with_capacity(declared);
        for index in 0..declared {
            let at = 8 + 2 * index;
            let byte = u8::from_str_radix(digits(at..at + 2, "payload")?, 16)
                .map_err(|_| RecordError::BadHex("payload"))?;
            payload.push(byte);
        }

        let at = 8 + 2 * declared;
        let checksum = u8::from_str_radix(digits(at..at + 2, "checksum")?, 16)
            .map_err(|_| RecordError::BadHex("checksum"))?;

        Ok(Record {
            address,
            record_type,
            payload,
            checksum,
        })
    }

    /// Number of payload bytes, as declared by the line this record came
    /// from.
    pub fn length(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Write this record's wire frame: the six fields in order, each as its
    /// own write, closed by the segment tag.
    pub fn write_framed<W: Write>(&self, w: &mut W, kind: SegmentKind) -> io::Result<()> {
        w.write_all(&[self.length()])?;
        w.write_all(&self.address.to_be_bytes())?;
        w.write_all(&[self.record_type])?;
        w.write_all(&self.payload)?;
        w.write_all(&[self.checksum])?;
        w.write_all(&[kind.tag()])?;
        Ok(())
    }
}

/// One component of the update: its kind plus the ordered records parsed
/// from one resource file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub kind: SegmentKind,
    pub records: Vec<Record>,
}

impl Segment {
    /// Parse a whole resource file, preserving record order.
    ///
    /// Stops at the first malformed line with an error naming the file and
    /// the 1-based line number.
    pub fn from_hex_file(path: &Path, kind: SegmentKind) -> Result<Segment> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let record = Record::parse(&line).map_err(|source| Error::MalformedRecord {
                file: path.display().to_string(),
                line: index + 1,
                source,
            })?;
            records.push(record);
        }

        debug!(
            "{}: {} records parsed from `{}`",
            kind,
            records.len(),
            path.display()
        );
        Ok(Segment { kind, records })
    }

    /// Total bytes this segment will put on the wire, tags included.
    pub fn wire_size(&self) -> usize {
        self.records.iter().map(|r| r.payload.len() + 6).sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn parse_canonical_line() {
    let record = Record::parse(":10010000214601360121470136007EFE09D2190140").unwrap();
    assert_eq!(record.length(), 0x10);
    assert_eq!(record.address, 0x0100);
    assert_eq!(record.record_type, 0x00);
    assert_eq!(record.payload.len(), 16);
    assert_eq!(&record.payload[..4], &[0x21, 0x46, 0x01, 0x36]);
    assert_eq!(record.checksum, 0x40);
}

#[test]
fn parse_strips_line_endings() {
    let bare = Record::parse(":00000001FF").unwrap();
    let newline = Record::parse(":00000001FF\n").unwrap();
    let crlf = Record::parse(":00000001FF\r\n").unwrap();
    assert_eq!(bare, newline);
    assert_eq!(bare, crlf);
    assert_eq!(bare.record_type, 0x01);
    assert_eq!(bare.checksum, 0xff);
    assert!(bare.payload.is_empty());
}

#[test]
fn parse_accepts_lowercase_hex() {
    let record = Record::parse(":02010000feab54").unwrap();
    assert_eq!(record.address, 0x0100);
    assert_eq!(record.payload, vec![0xfe, 0xab]);
    assert_eq!(record.checksum, 0x54);
}

#[test]
fn parse_rejects_missing_checksum() {
    // The length field promises 16 payload bytes, but the line ends right
    // where the checksum should start.
    let result = Record::parse(":10010000214601360121470136007EFE09D21901");
    assert_eq!(
        result,
        Err(RecordError::LengthMismatch {
            declared: 16,
            remaining: 32,
        })
    );
}

#[test]
fn parse_rejects_trailing_garbage() {
    // One stray character after the checksum breaks the exact framing.
    assert_eq!(
        Record::parse(":00000001FF0"),
        Err(RecordError::LengthMismatch {
            declared: 0,
            remaining: 3,
        })
    );
}

#[test]
fn parse_rejects_short_lines() {
    assert_eq!(Record::parse(""), Err(RecordError::TooShort));
    assert_eq!(Record::parse("\r\n"), Err(RecordError::TooShort));
    assert_eq!(Record::parse(":"), Err(RecordError::TooShort));
    assert_eq!(Record::parse(":10"), Err(RecordError::TooShort));
    assert_eq!(Record::parse(":1001000"), Err(RecordError::TooShort));
}

#[test]
fn parse_rejects_bad_hex() {
    assert_eq!(
        Record::parse(":XX00000000"),
        Err(RecordError::BadHex("length"))
    );
    assert_eq!(
        Record::parse(":00ZZZZ0000"),
        Err(RecordError::BadHex("address"))
    );
    assert_eq!(
        Record::parse(":000000GG00"),
        Err(RecordError::BadHex("type"))
    );
    assert_eq!(
        Record::parse(":01000000Zx33"),
        Err(RecordError::BadHex("payload"))
    );
    assert_eq!(
        Record::parse(":0100000041G!"),
        Err(RecordError::BadHex("checksum"))
    );
}

#[test]
fn parse_rejects_signed_hex_fields() {
    // `from_str_radix` tolerates a leading sign, so a `+` must be caught
    // before the numeric parse in every field.
    assert_eq!(
        Record::parse(":+1AAAA00BBCC"),
        Err(RecordError::BadHex("length"))
    );
    assert_eq!(
        Record::parse(":01+AAA00BBCC"),
        Err(RecordError::BadHex("address"))
    );
    assert_eq!(
        Record::parse(":01AAAA+0BBCC"),
        Err(RecordError::BadHex("type"))
    );
    assert_eq!(
        Record::parse(":01AAAA00+BCC"),
        Err(RecordError::BadHex("payload"))
    );
    assert_eq!(
        Record::parse(":01AAAA00BB+C"),
        Err(RecordError::BadHex("checksum"))
    );
}

#[test]
fn parse_never_panics_on_multibyte_input() {
    assert_eq!(Record::parse("é"), Err(RecordError::TooShort));
    assert_eq!(
        Record::parse(":é0010000FFFF"),
        Err(RecordError::BadHex("length"))
    );
    // The é straddles the length field boundary here.
    assert_eq!(
        Record::parse(":0é010000FF"),
        Err(RecordError::BadHex("length"))
    );
}

#[test]
fn frame_layout() {
    let record = Record::parse(":02010000feab54").unwrap();
    let mut frame = Vec::new();
    record
        .write_framed(&mut frame, SegmentKind::Firmware)
        .unwrap();
    assert_eq!(frame, vec![0x02, 0x01, 0x00, 0x00, 0xfe, 0xab, 0x54, 0x03]);
}

#[test]
fn canonical_frame_gets_firmware_tag() {
    let record = Record::parse(":10010000214601360121470136007EFE09D2190140").unwrap();
    let mut frame = Vec::new();
    record
        .write_framed(&mut frame, SegmentKind::Firmware)
        .unwrap();
    assert_eq!(frame.len(), 16 + 6);
    assert_eq!(frame[0], 0x10);
    assert_eq!(&frame[1..3], &[0x01, 0x00]);
    assert_eq!(frame[frame.len() - 2], 0x40);
    assert_eq!(frame[frame.len() - 1], 0x03);
}

#[test]
fn segment_tags_are_a_closed_set() {
    assert_eq!(SegmentKind::try_from(1), Ok(SegmentKind::Bootloader));
    assert_eq!(SegmentKind::try_from(2), Ok(SegmentKind::Certificate));
    assert_eq!(SegmentKind::try_from(3), Ok(SegmentKind::Firmware));
    assert_eq!(SegmentKind::try_from(0), Err(0));
    assert_eq!(SegmentKind::try_from(4), Err(4));
    assert_eq!(SegmentKind::try_from(0xff), Err(0xff));
}

#[cfg(test)]
fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("dfucom-record-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn segment_from_hex_file_keeps_order() {
    use std::io::Write as _;

    let dir = scratch_dir("order");
    let path = dir.join("segments.0");
    let mut file = File::create(&path).unwrap();
    writeln!(file, ":02000000AABB99").unwrap();
    writeln!(file, ":00000001FF").unwrap();
    drop(file);

    let segment = Segment::from_hex_file(&path, SegmentKind::Certificate).unwrap();
    assert_eq!(segment.kind, SegmentKind::Certificate);
    assert_eq!(segment.records.len(), 2);
    assert_eq!(segment.records[0].payload, vec![0xaa, 0xbb]);
    assert_eq!(segment.records[1].record_type, 0x01);
    assert_eq!(segment.wire_size(), (2 + 6) + 6);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn segment_from_hex_file_reports_line_context() {
    use std::io::Write as _;

    let dir = scratch_dir("context");
    let path = dir.join("signed.ihex");
    let mut file = File::create(&path).unwrap();
    writeln!(file, ":00000001FF").unwrap();
    writeln!(file, "garbage").unwrap();
    drop(file);

    let err = Segment::from_hex_file(&path, SegmentKind::Bootloader).unwrap_err();
    match err {
        Error::MalformedRecord { file, line, source } => {
            assert!(file.ends_with("signed.ihex"));
            assert_eq!(line, 2);
            assert_eq!(source, RecordError::TooShort);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    std::fs::remove_dir_all(&dir).unwrap();
}
