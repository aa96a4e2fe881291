//! The firmware image store: listing candidate images, picking the one to
//! flash, and unpacking its resources into the staging directory.
//!
//! An image is a zip archive holding one resource file per segment. The
//! resources are recognized by well-known name fragments anywhere in the
//! entry path:
//!
//!  * `signed.ihex` is the bootloader,
//!  * `segments.0` is the certificate,
//!  * `segments.1` is the firmware proper.
//!
//! Image file names encode the identity of the firmware they contain. The
//! store must offer at least two images with different identities so there
//! is always one that differs from whatever the modem is currently running.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::record::SegmentKind;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Archive entry fragment naming the bootloader resource.
pub(crate) const BOOTLOADER_ENTRY: &str = "signed.ihex";
/// Archive entry fragment naming the certificate resource.
pub(crate) const CERTIFICATE_ENTRY: &str = "segments.0";
/// Archive entry fragment naming the firmware resource.
pub(crate) const FIRMWARE_ENTRY: &str = "segments.1";

/// The three resource files of one unpacked image, ready to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageBundle {
    pub bootloader: PathBuf,
    pub certificate: PathBuf,
    pub firmware: PathBuf,
}

impl ImageBundle {
    /// The staged resource file backing the given segment kind.
    pub(crate) fn resource(&self, kind: SegmentKind) -> &Path {
        match kind {
            SegmentKind::Bootloader => &self.bootloader,
            SegmentKind::Certificate => &self.certificate,
            SegmentKind::Firmware => &self.firmware,
        }
    }
}

/// List the firmware images in the store, in file name order.
///
/// Only regular files with a `.zip` extension count. The order is part of
/// the selection contract, so it must not depend on how the directory
/// happens to enumerate.
pub(crate) fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::Configuration(format!(
            "cannot list firmware images in `{}`: {}",
            dir.display(),
            e
        ))
    })?;

    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().map(|ext| ext == "zip").unwrap_or(false))
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    debug!("{} firmware images in `{}`", images.len(), dir.display());
    Ok(images)
}

/// Pick the image to flash: the first candidate whose file name does not
/// contain the identity the modem reported.
///
/// Flashing the image the modem is already running would be a no-op update,
/// so a first candidate matching the identity is skipped in favor of the
/// second. Anything that leaves no valid choice is a configuration problem
/// the user has to fix in the store.
pub(crate) fn select_image(identity: &str, candidates: &[PathBuf]) -> Result<PathBuf> {
    if candidates.len() < 2 {
        return Err(Error::Configuration(format!(
            "the image store must hold at least two firmware images, found {}",
            candidates.len()
        )));
    }

    let matches_identity = |path: &Path| {
        path.file_name()
            .map(|name| name.to_string_lossy().contains(identity))
            .unwrap_or(false)
    };

    if !matches_identity(&candidates[0]) {
        return Ok(candidates[0].clone());
    }

    info!(
        "`{}` matches the running firmware {}, switching to the next image",
        candidates[0].display(),
        identity
    );
    if matches_identity(&candidates[1]) {
        return Err(Error::Configuration(format!(
            "both `{}` and `{}` contain the running firmware identity {}",
            candidates[0].display(),
            candidates[1].display(),
            identity
        )));
    }
    Ok(candidates[1].clone())
}

/// Unpack the three resources of an image into the staging directory.
///
/// The archive layout is flattened so the staged files sit directly in
/// `staging` under their bare file names. Entries beyond the first match
/// per resource are ignored, and an archive missing any of the three
/// resources is rejected.
pub(crate) fn extract_image(archive_path: &Path, staging: &Path) -> Result<ImageBundle> {
    fs::create_dir_all(staging)?;

    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut bootloader = None;
    let mut certificate = None;
    let mut firmware = None;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let entry_name = entry.name().to_string();
        if entry_name.ends_with('/') {
            continue;
        }

        let slot = if entry_name.contains(BOOTLOADER_ENTRY) {
            &mut bootloader
        } else if entry_name.contains(CERTIFICATE_ENTRY) {
            &mut certificate
        } else if entry_name.contains(FIRMWARE_ENTRY) {
            &mut firmware
        } else {
            continue;
        };
        if slot.is_some() {
            continue;
        }

        // Flatten the archive layout; only the file name matters from here.
        let file_name = match Path::new(&entry_name).file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let target = staging.join(file_name);
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        debug!("unpacked `{}` to `{}`", entry_name, target.display());
        *slot = Some(target);
    }

    let image = archive_path.display().to_string();
    let missing = |resource: &'static str| Error::Extraction {
        image: image.clone(),
        resource,
    };

    Ok(ImageBundle {
        bootloader: bootloader.ok_or_else(|| missing(BOOTLOADER_ENTRY))?,
        certificate: certificate.ok_or_else(|| missing(CERTIFICATE_ENTRY))?,
        firmware: firmware.ok_or_else(|| missing(FIRMWARE_ENTRY))?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dfucom-firmware-{}-{}", tag, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
fn build_archive(path: &Path, entries: &[(&str, &[u8])]) {
    use std::io::Write as _;
    use zip::write::FileOptions;

    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for &(name, content) in entries.iter() {
        zip.start_file(name, FileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn selects_first_when_identity_differs() {
    let candidates = vec![
        PathBuf::from("fw/fw_ABCD_v1.zip"),
        PathBuf::from("fw/fw_EFGH_v2.zip"),
    ];
    let choice = select_image("ZZZZ", &candidates).unwrap();
    assert_eq!(choice, candidates[0]);
}

#[test]
fn switches_to_second_when_first_matches() {
    let candidates = vec![
        PathBuf::from("fw/fw_ABCD_v1.zip"),
        PathBuf::from("fw/fw_EFGH_v2.zip"),
    ];
    let choice = select_image("ABCD", &candidates).unwrap();
    assert_eq!(choice, candidates[1]);
}

#[test]
fn rejects_single_candidate() {
    let candidates = vec![PathBuf::from("fw/fw_ABCD_v1.zip")];
    let result = select_image("ZZZZ", &candidates);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn rejects_when_both_candidates_match() {
    let candidates = vec![
        PathBuf::from("fw/fw_ABCD_a.zip"),
        PathBuf::from("fw/fw_ABCD_b.zip"),
    ];
    let result = select_image("ABCD", &candidates);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn matches_on_file_name_not_path() {
    // The identity shows up in the directory, not in the image name; the
    // first candidate must still win.
    let candidates = vec![
        PathBuf::from("builds/ABCD/fw_EFGH_v2.zip"),
        PathBuf::from("builds/ABCD/fw_IJKL_v3.zip"),
    ];
    let choice = select_image("ABCD", &candidates).unwrap();
    assert_eq!(choice, candidates[0]);
}

#[test]
fn lists_zip_files_sorted() {
    use std::io::Write as _;

    let dir = scratch_dir("list");
    for name in &["b.zip", "a.zip", "notes.txt"] {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(b"placeholder").unwrap();
    }
    fs::create_dir_all(dir.join("nested.zip")).unwrap();

    let images = list_images(&dir).unwrap();
    let names: Vec<_> = images
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.zip", "b.zip"]);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn listing_a_missing_store_is_a_configuration_error() {
    let dir = std::env::temp_dir().join("dfucom-firmware-absent");
    let result = list_images(&dir);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn extracts_the_three_resources() {
    let dir = scratch_dir("extract");
    let archive = dir.join("fw_ABCD_v1.zip");
    build_archive(
        &archive,
        &[
            ("mfw/firmware.update.image_signed.ihex", b":00000001FF\n"),
            ("mfw/firmware.update.image_segments.0", b":02000000AABB99\n"),
            ("mfw/firmware.update.image_segments.1", b":02000000CCDD55\n"),
            ("manifest.json", b"{}"),
        ],
    );

    let staging = dir.join("staging");
    let bundle = extract_image(&archive, &staging).unwrap();

    assert_eq!(
        bundle.bootloader,
        staging.join("firmware.update.image_signed.ihex")
    );
    assert_eq!(bundle.resource(SegmentKind::Bootloader), bundle.bootloader);
    assert_eq!(
        bundle.resource(SegmentKind::Certificate),
        bundle.certificate
    );
    assert_eq!(bundle.resource(SegmentKind::Firmware), bundle.firmware);

    let staged = fs::read(&bundle.certificate).unwrap();
    assert_eq!(staged, b":02000000AABB99\n");

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn extraction_reports_the_missing_resource() {
    let dir = scratch_dir("missing");
    let archive = dir.join("fw_ABCD_v1.zip");
    build_archive(
        &archive,
        &[
            ("mfw/firmware.update.image_signed.ihex", b":00000001FF\n"),
            ("mfw/firmware.update.image_segments.0", b":02000000AABB99\n"),
        ],
    );

    let err = extract_image(&archive, &dir.join("staging")).unwrap_err();
    match err {
        Error::Extraction { image, resource } => {
            assert!(image.ends_with("fw_ABCD_v1.zip"));
            assert_eq!(resource, FIRMWARE_ENTRY);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    fs::remove_dir_all(&dir).unwrap();
}
