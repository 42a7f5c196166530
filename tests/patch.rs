use pe_fixheader::patcher::{locate_pe_header, validate_pe_header};
use pe_fixheader::{inspect, patch, PatchError, PatchOptions, Subsystem};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;

const PE_OFFSET: usize = 0x80;
const CHARACTERISTICS: usize = PE_OFFSET + 4 + 18;
const SUBSYSTEM: usize = PE_OFFSET + 0x5C;

/// Minimal image: MZ stub, `e_lfanew = 0x80`, `PE\0\0`, and a filler pattern
/// so that stray writes show up in byte comparisons.
fn synthetic_image(characteristics_low: u8, subsystem: u16) -> Vec<u8> {
	let mut data: Vec<u8> = (0..0x400u32).map(|i| (i * 7 + 3) as u8).collect();
	data[0..2].copy_from_slice(b"MZ");
	data[0x3C..0x40].copy_from_slice(&(PE_OFFSET as u32).to_le_bytes());
	data[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");
	data[CHARACTERISTICS] = characteristics_low;
	data[SUBSYSTEM..SUBSYSTEM + 2].copy_from_slice(&subsystem.to_le_bytes());
	data
}

fn write_temp(data: &[u8]) -> NamedTempFile {
	let mut file = NamedTempFile::new().expect("Failed to create temp file");
	file.write_all(data).unwrap();
	file.flush().unwrap();
	file
}

fn read(path: &Path) -> Vec<u8> {
	std::fs::read(path).unwrap()
}

fn diff_offsets(a: &[u8], b: &[u8]) -> Vec<usize> {
	assert_eq!(a.len(), b.len(), "file length changed");
	a.iter()
		.zip(b)
		.enumerate()
		.filter(|(_, (x, y))| x != y)
		.map(|(i, _)| i)
		.collect()
}

#[test]
fn sets_large_address_aware_bit() {
	let original = synthetic_image(0x00, 3);
	let file = write_temp(&original);

	let report = patch(file.path(), &PatchOptions::large_address_aware()).unwrap();
	assert_eq!(report.pe_offset, 0x80);

	let patched = read(file.path());
	assert_eq!(patched[CHARACTERISTICS], 0x20);
	assert_eq!(diff_offsets(&original, &patched), vec![CHARACTERISTICS]);
}

#[test]
fn already_set_bit_is_preserved() {
	let original = synthetic_image(0x21, 3);
	let file = write_temp(&original);

	let report = patch(file.path(), &PatchOptions::large_address_aware()).unwrap();
	assert!(!report.modified());
	assert_eq!(read(file.path()), original);
	assert_eq!(read(file.path())[CHARACTERISTICS], 0x21);
}

#[test]
fn patching_twice_matches_patching_once() {
	let file = write_temp(&synthetic_image(0x02, 3));
	patch(file.path(), &PatchOptions::windows_gui()).unwrap();
	let once = read(file.path());
	patch(file.path(), &PatchOptions::windows_gui()).unwrap();
	assert_eq!(read(file.path()), once);
}

#[test]
fn windows_gui_touches_only_target_windows() {
	let original = synthetic_image(0x00, 3);
	let file = write_temp(&original);

	patch(file.path(), &PatchOptions::windows_gui()).unwrap();

	let patched = read(file.path());
	assert_eq!(&patched[SUBSYSTEM..SUBSYSTEM + 2], &[0x02, 0x00]);
	for offset in diff_offsets(&original, &patched) {
		assert!(
			offset == CHARACTERISTICS || (SUBSYSTEM..SUBSYSTEM + 2).contains(&offset),
			"unexpected change at {:#X}",
			offset
		);
	}
}

#[test]
fn subsystem_is_overwritten_whatever_it_was() {
	let file = write_temp(&synthetic_image(0x00, 0x0009));
	let report = patch(file.path(), &PatchOptions::windows_gui()).unwrap();
	assert_eq!(inspect(file.path()).unwrap().subsystem, Some(Subsystem::WindowsGui));
	assert!(report.modified());
}

#[test]
fn header_still_resolves_after_patch() {
	let file = write_temp(&synthetic_image(0x00, 3));
	patch(file.path(), &PatchOptions::windows_gui()).unwrap();

	let mut handle = File::open(file.path()).unwrap();
	let pe_offset = locate_pe_header(&mut handle).unwrap();
	assert_eq!(pe_offset, 0x80);
	validate_pe_header(&mut handle, pe_offset).unwrap();
}

#[test]
fn invalid_pe_signature_leaves_file_untouched() {
	let mut original = synthetic_image(0x00, 3);
	original[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"NE\0\0");
	let file = write_temp(&original);

	let err = patch(file.path(), &PatchOptions::windows_gui()).unwrap_err();
	assert!(matches!(err, PatchError::InvalidPeSignature { offset: 0x80, .. }));
	assert_eq!(read(file.path()), original);
}

#[test]
fn missing_mz_leaves_file_untouched() {
	let mut original = synthetic_image(0x00, 3);
	original[0..2].copy_from_slice(b"\x7fE");
	let file = write_temp(&original);

	let err = patch(file.path(), &PatchOptions::large_address_aware()).unwrap_err();
	assert!(matches!(err, PatchError::InvalidDosSignature(_)));
	assert_eq!(read(file.path()), original);
}

#[test]
fn missing_file_is_reported() {
	let dir = tempfile::tempdir().unwrap();
	let err = patch(&dir.path().join("nope.exe"), &PatchOptions::default()).unwrap_err();
	assert!(matches!(err, PatchError::FileNotFound(_)));
}

#[test]
fn backup_is_written_before_patching() {
	let original = synthetic_image(0x00, 3);
	let dir = tempfile::tempdir().unwrap();
	let exe = dir.path().join("game.exe");
	std::fs::write(&exe, &original).unwrap();

	let options = PatchOptions {
		backup_extension: Some("bak".to_string()),
		..PatchOptions::large_address_aware()
	};
	patch(&exe, &options).unwrap();

	assert_eq!(read(&dir.path().join("game.exe.bak")), original);
	assert_eq!(read(&exe)[CHARACTERISTICS], 0x20);
}

#[test]
fn no_backup_when_nothing_changes() {
	let dir = tempfile::tempdir().unwrap();
	let exe = dir.path().join("game.exe");
	std::fs::write(&exe, synthetic_image(0x20, 3)).unwrap();

	let options = PatchOptions {
		backup_extension: Some("bak".to_string()),
		..PatchOptions::large_address_aware()
	};
	patch(&exe, &options).unwrap();
	assert!(!dir.path().join("game.exe.bak").exists());
}

#[test]
fn cli_patches_and_prints_progress() {
	let file = write_temp(&synthetic_image(0x00, 3));

	let output = Command::new(env!("CARGO_BIN_EXE_fixheader"))
		.arg(file.path())
		.arg("--subsystem-windows")
		.output()
		.unwrap();

	assert!(output.status.success());
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(stdout.contains("Patching"));
	assert!(stdout.contains(" - Setting /LARGEADDRESSAWARE"));
	assert!(stdout.contains(" - Setting /subsystem:windows"));
	assert_eq!(read(file.path())[CHARACTERISTICS], 0x20);
}

#[test]
fn cli_fails_on_invalid_signature() {
	let mut original = synthetic_image(0x00, 3);
	original[PE_OFFSET] = 0;
	let file = write_temp(&original);

	let output = Command::new(env!("CARGO_BIN_EXE_fixheader"))
		.arg(file.path())
		.output()
		.unwrap();

	assert!(!output.status.success());
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(stdout.contains("   ERROR: Invalid PE signature"));
	assert_eq!(read(file.path()), original);
}

#[test]
fn cli_fails_on_missing_mz() {
	let mut original = synthetic_image(0x00, 3);
	original[0..2].copy_from_slice(b"ZM");
	let file = write_temp(&original);

	let output = Command::new(env!("CARGO_BIN_EXE_fixheader"))
		.arg(file.path())
		.arg("--subsystem-windows")
		.output()
		.unwrap();

	assert!(!output.status.success());
	assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid DOS magic number"));
	assert_eq!(read(file.path()), original);
}

#[test]
fn cli_rejects_patch_without_fields() {
	let original = synthetic_image(0x00, 3);
	let file = write_temp(&original);

	let output = Command::new(env!("CARGO_BIN_EXE_fixheader"))
		.arg(file.path())
		.arg("--no-large-address-aware")
		.output()
		.unwrap();

	assert!(!output.status.success());
	assert!(String::from_utf8_lossy(&output.stderr).contains("Nothing to patch"));
	assert!(!String::from_utf8_lossy(&output.stdout).contains("Already patched"));
	assert_eq!(read(file.path()), original);
}

#[test]
fn cli_check_conflicts_with_patch_flags() {
	let original = synthetic_image(0x00, 3);
	let file = write_temp(&original);

	let output = Command::new(env!("CARGO_BIN_EXE_fixheader"))
		.arg(file.path())
		.arg("--check")
		.arg("--subsystem-windows")
		.output()
		.unwrap();

	assert!(!output.status.success());
	assert_eq!(read(file.path()), original);
}

#[test]
fn cli_check_reports_without_writing() {
	let original = synthetic_image(0x20, 3);
	let file = write_temp(&original);

	let output = Command::new(env!("CARGO_BIN_EXE_fixheader"))
		.arg(file.path())
		.arg("--check")
		.output()
		.unwrap();

	assert!(output.status.success());
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(stdout.contains("Large Address Aware: yes"));
	assert!(stdout.contains("Subsystem: console"));
	assert_eq!(read(file.path()), original);
}
