use crate::error::{PatchError, Result};
use crate::pe::{
	FieldWidth, HeaderField, Subsystem, CHARACTERISTICS_OFFSET, DOS_E_LFANEW_OFFSET, DOS_HEADER_SIZE,
	IMAGE_DOS_SIGNATURE, IMAGE_FILE_LARGE_ADDRESS_AWARE, IMAGE_NT_SIGNATURE,
	LARGE_ADDRESS_AWARE_FIELD, PE_SIGNATURE_SIZE, SUBSYSTEM_FIELD,
};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which header fields `patch` should rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
	/// Set `IMAGE_FILE_LARGE_ADDRESS_AWARE` in the COFF Characteristics.
	pub large_address_aware: bool,
	/// Overwrite the Optional Header subsystem with this value.
	pub subsystem: Option<Subsystem>,
	/// Copy the file to `<path>.<ext>` once validation passed and before
	/// anything is written.
	pub backup_extension: Option<String>,
}

impl PatchOptions {
	/// `/LARGEADDRESSAWARE` only.
	pub fn large_address_aware() -> Self {
		Self {
			large_address_aware: true,
			subsystem: None,
			backup_extension: None,
		}
	}

	/// `/LARGEADDRESSAWARE` plus `/subsystem:windows`.
	pub fn windows_gui() -> Self {
		Self {
			subsystem: Some(Subsystem::WindowsGui),
			..Self::large_address_aware()
		}
	}

	/// True when no header field would be touched.
	pub fn is_empty(&self) -> bool {
		!self.large_address_aware && self.subsystem.is_none()
	}

	fn edits(&self) -> Vec<(HeaderField, FieldEdit)> {
		let mut edits = Vec::new();
		if self.large_address_aware {
			edits.push((
				LARGE_ADDRESS_AWARE_FIELD,
				FieldEdit::SetBits(IMAGE_FILE_LARGE_ADDRESS_AWARE),
			));
		}
		if let Some(subsystem) = self.subsystem {
			edits.push((SUBSYSTEM_FIELD, FieldEdit::Overwrite(subsystem.into())));
		}
		edits
	}
}

impl Default for PatchOptions {
	fn default() -> Self {
		Self::large_address_aware()
	}
}

/// How a single header field is modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEdit {
	/// OR the mask into the current value.
	SetBits(u16),
	/// Replace the current value regardless of what it was.
	Overwrite(u16),
}

impl FieldEdit {
	pub fn apply(self, old: u16, width: FieldWidth) -> u16 {
		let new = match self {
			FieldEdit::SetBits(mask) => old | mask,
			FieldEdit::Overwrite(value) => value,
		};
		new & width.mask()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldChange {
	pub field: HeaderField,
	pub old: u16,
	pub new: u16,
}

impl FieldChange {
	pub fn changed(&self) -> bool {
		self.old != self.new
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
	pub pe_offset: u64,
	pub changes: Vec<FieldChange>,
}

impl PatchReport {
	pub fn change(&self, field: HeaderField) -> Option<&FieldChange> {
		self.changes.iter().find(|c| c.field == field)
	}

	pub fn modified(&self) -> bool {
		self.changes.iter().any(FieldChange::changed)
	}
}

/// Read-only view of the header fields the patcher cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
	pub pe_offset: u64,
	pub characteristics: u16,
	/// `None` when the file ends before the Optional Header subsystem field.
	pub subsystem: Option<Subsystem>,
}

impl HeaderInfo {
	pub fn is_large_address_aware(&self) -> bool {
		self.characteristics & IMAGE_FILE_LARGE_ADDRESS_AWARE != 0
	}
}

fn read_u16_at<F: Read + Seek>(file: &mut F, offset: u64) -> Result<u16> {
	file.seek(SeekFrom::Start(offset))?;
	file.read_u16::<LittleEndian>()
		.map_err(|e| PatchError::from_read(e, offset, 2))
}

fn read_field<F: Read + Seek>(file: &mut F, pe_offset: u64, field: HeaderField) -> Result<u16> {
	let offset = field.absolute_offset(pe_offset);
	file.seek(SeekFrom::Start(offset))?;
	let value = match field.width {
		FieldWidth::Byte => file.read_u8().map(u16::from),
		FieldWidth::Word => file.read_u16::<LittleEndian>(),
	};
	value.map_err(|e| PatchError::from_read(e, offset, field.width.size()))
}

fn write_field<F: Write + Seek>(
	file: &mut F,
	pe_offset: u64,
	field: HeaderField,
	value: u16,
) -> Result<()> {
	let offset = field.absolute_offset(pe_offset);
	let write = |file: &mut F| -> io::Result<()> {
		file.seek(SeekFrom::Start(offset))?;
		match field.width {
			FieldWidth::Byte => file.write_u8(value as u8),
			FieldWidth::Word => file.write_u16::<LittleEndian>(value),
		}
	};
	write(file).map_err(|source| PatchError::WriteFailure {
		field: field.name,
		offset,
		source,
	})
}

/// Reads the 64-byte MS-DOS stub, checks `MZ` and returns `e_lfanew`, the
/// absolute offset of the PE header. Files shorter than the stub are rejected.
pub fn locate_pe_header<F: Read + Seek>(file: &mut F) -> Result<u64> {
	let mut stub = [0u8; DOS_HEADER_SIZE as usize];
	file.seek(SeekFrom::Start(0))?;
	file.read_exact(&mut stub)
		.map_err(|e| PatchError::from_read(e, 0, DOS_HEADER_SIZE))?;

	let e_magic = LittleEndian::read_u16(&stub[..2]);
	if e_magic != IMAGE_DOS_SIGNATURE {
		warn!("Invalid DOS magic number : {:X}", e_magic);
		return Err(PatchError::InvalidDosSignature(e_magic));
	}

	let e_lfanew = LittleEndian::read_u32(&stub[DOS_E_LFANEW_OFFSET as usize..]);
	debug!("e_lfanew = {:#X}", e_lfanew);
	Ok(u64::from(e_lfanew))
}

/// Fails unless `PE\0\0` sits at `pe_offset`.
pub fn validate_pe_header<F: Read + Seek>(file: &mut F, pe_offset: u64) -> Result<()> {
	file.seek(SeekFrom::Start(pe_offset))?;
	let signature = file
		.read_u32::<LittleEndian>()
		.map_err(|e| PatchError::from_read(e, pe_offset, PE_SIGNATURE_SIZE))?;
	if signature != IMAGE_NT_SIGNATURE {
		warn!(
			"Invalid PE signature at {:#X}: {:#010X}",
			pe_offset, signature
		);
		return Err(PatchError::InvalidPeSignature {
			offset: pe_offset,
			found: signature,
		});
	}
	Ok(())
}

/// Read-modify-write of one header field. Nothing is written when the edit
/// leaves the value unchanged.
pub fn apply_field_edit<F: Read + Write + Seek>(
	file: &mut F,
	pe_offset: u64,
	field: HeaderField,
	edit: FieldEdit,
) -> Result<FieldChange> {
	let change = plan_field_edit(file, pe_offset, field, edit)?;
	commit_change(file, pe_offset, &change)?;
	Ok(change)
}

fn plan_field_edit<F: Read + Seek>(
	file: &mut F,
	pe_offset: u64,
	field: HeaderField,
	edit: FieldEdit,
) -> Result<FieldChange> {
	let old = read_field(file, pe_offset, field)?;
	let new = edit.apply(old, field.width);
	debug!("{}: {:#06X} -> {:#06X}", field.name, old, new);
	Ok(FieldChange { field, old, new })
}

fn commit_change<F: Write + Seek>(file: &mut F, pe_offset: u64, change: &FieldChange) -> Result<()> {
	if !change.changed() {
		info!("{} already {:#06X}, leaving untouched", change.field.name, change.old);
		return Ok(());
	}
	write_field(file, pe_offset, change.field, change.new)?;
	info!(
		"{} at {:#X} set to {:#06X}",
		change.field.name,
		change.field.absolute_offset(pe_offset),
		change.new
	);
	Ok(())
}

/// Locates and validates the headers and reads every requested field. No
/// byte is written until all of this succeeded.
fn prepare<F: Read + Seek>(file: &mut F, options: &PatchOptions) -> Result<PatchReport> {
	let pe_offset = locate_pe_header(file)?;
	validate_pe_header(file, pe_offset)?;

	let changes = options
		.edits()
		.into_iter()
		.map(|(field, edit)| plan_field_edit(file, pe_offset, field, edit))
		.collect::<Result<Vec<_>>>()?;

	Ok(PatchReport { pe_offset, changes })
}

fn commit<F: Write + Seek>(file: &mut F, report: &PatchReport) -> Result<()> {
	for change in &report.changes {
		commit_change(file, report.pe_offset, change)?;
	}
	file.flush()
		.map_err(|source| PatchError::WriteFailure {
			field: "file",
			offset: report.pe_offset,
			source,
		})
}

/// Patches an already opened image. `options.backup_extension` is ignored
/// here since a stream has no path to copy.
pub fn patch_stream<F: Read + Write + Seek>(
	file: &mut F,
	options: &PatchOptions,
) -> Result<PatchReport> {
	let report = prepare(file, options)?;
	commit(file, &report)?;
	Ok(report)
}

/// Opens `path` read-write and applies `options` in place.
pub fn patch(path: &Path, options: &PatchOptions) -> Result<PatchReport> {
	let mut file = File::options()
		.read(true)
		.write(true)
		.open(path)
		.map_err(|e| PatchError::from_open(path.to_path_buf(), e))?;

	let report = prepare(&mut file, options)?;
	debug!("{:?}: PE header at {:#X}", path, report.pe_offset);

	if report.modified() {
		if let Some(extension) = &options.backup_extension {
			let backup_path = make_backup(path, extension)?;
			info!("Backup written to {:?}", backup_path);
		}
	}

	commit(&mut file, &report)?;
	file.sync_all()?;
	Ok(report)
}

/// Reads the Characteristics and Subsystem fields without modifying the file.
pub fn inspect(path: &Path) -> Result<HeaderInfo> {
	let mut file = File::open(path).map_err(|e| PatchError::from_open(path.to_path_buf(), e))?;
	inspect_stream(&mut file)
}

pub fn inspect_stream<F: Read + Seek>(file: &mut F) -> Result<HeaderInfo> {
	let pe_offset = locate_pe_header(file)?;
	validate_pe_header(file, pe_offset)?;

	let characteristics = read_u16_at(file, pe_offset + CHARACTERISTICS_OFFSET)?;
	let subsystem = match read_field(file, pe_offset, SUBSYSTEM_FIELD) {
		Ok(value) => Some(Subsystem::from(value)),
		Err(PatchError::TruncatedFile { .. }) => None,
		Err(e) => return Err(e),
	};

	Ok(HeaderInfo {
		pe_offset,
		characteristics,
		subsystem,
	})
}

/// Copies `path` to `<path>.<extension>` and returns the backup path.
pub fn make_backup(path: &Path, extension: &str) -> Result<PathBuf> {
	let mut backup = path.as_os_str().to_owned();
	backup.push(".");
	backup.push(extension);
	let backup_path = PathBuf::from(backup);

	std::fs::copy(path, &backup_path).map_err(|source| PatchError::Backup {
		path: path.to_path_buf(),
		extension: extension.to_string(),
		source,
	})?;
	Ok(backup_path)
}
