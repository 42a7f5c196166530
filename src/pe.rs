//! Cross-platform PE (Portable Executable) header layout.
//! Only the handful of offsets the patcher touches are described here; the
//! rest of the image is never parsed.

use std::fmt;

// Signatures
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const IMAGE_NT_SIGNATURE: u32 = 0x00004550; // PE\0\0

// Characteristics flags
pub const IMAGE_FILE_LARGE_ADDRESS_AWARE: u16 = 0x0020;

// Subsystem values
pub const IMAGE_SUBSYSTEM_WINDOWS_GUI: u16 = 0x0002;
pub const IMAGE_SUBSYSTEM_WINDOWS_CUI: u16 = 0x0003;

/// Size of the MS-DOS header at the start of every PE file.
pub const DOS_HEADER_SIZE: u64 = 64;
/// Absolute offset of `e_lfanew` inside the MS-DOS header.
pub const DOS_E_LFANEW_OFFSET: u64 = 0x3C;

pub const PE_SIGNATURE_SIZE: u64 = 4;
pub const FILE_HEADER_SIZE: u64 = 20;

// Offsets below are relative to the start of the PE header (the signature).
pub const FILE_HEADER_OFFSET: u64 = PE_SIGNATURE_SIZE;
pub const CHARACTERISTICS_OFFSET: u64 = FILE_HEADER_OFFSET + 18;
pub const OPTIONAL_HEADER_OFFSET: u64 = FILE_HEADER_OFFSET + FILE_HEADER_SIZE;
pub const SUBSYSTEM_OFFSET: u64 = OPTIONAL_HEADER_OFFSET + 68; // 0x5C

/// Width of a patchable header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
	Byte,
	Word,
}

impl FieldWidth {
	pub fn size(self) -> u64 {
		match self {
			FieldWidth::Byte => 1,
			FieldWidth::Word => 2,
		}
	}

	pub fn mask(self) -> u16 {
		match self {
			FieldWidth::Byte => 0x00FF,
			FieldWidth::Word => 0xFFFF,
		}
	}
}

/// A little-endian header field addressed relative to the PE header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField {
	pub name: &'static str,
	pub offset: u64,
	pub width: FieldWidth,
}

impl HeaderField {
	pub fn absolute_offset(&self, pe_offset: u64) -> u64 {
		pe_offset + self.offset
	}
}

/// Low byte of the COFF Characteristics bitfield. The large-address-aware bit
/// lives in this byte, so the high byte is never read or written.
pub const LARGE_ADDRESS_AWARE_FIELD: HeaderField = HeaderField {
	name: "Characteristics",
	offset: CHARACTERISTICS_OFFSET,
	width: FieldWidth::Byte,
};

pub const SUBSYSTEM_FIELD: HeaderField = HeaderField {
	name: "Subsystem",
	offset: SUBSYSTEM_OFFSET,
	width: FieldWidth::Word,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
	WindowsGui,
	WindowsCui,
	Other(u16),
}

impl From<u16> for Subsystem {
	fn from(value: u16) -> Self {
		match value {
			IMAGE_SUBSYSTEM_WINDOWS_GUI => Subsystem::WindowsGui,
			IMAGE_SUBSYSTEM_WINDOWS_CUI => Subsystem::WindowsCui,
			other => Subsystem::Other(other),
		}
	}
}

impl From<Subsystem> for u16 {
	fn from(value: Subsystem) -> Self {
		match value {
			Subsystem::WindowsGui => IMAGE_SUBSYSTEM_WINDOWS_GUI,
			Subsystem::WindowsCui => IMAGE_SUBSYSTEM_WINDOWS_CUI,
			Subsystem::Other(other) => other,
		}
	}
}

impl fmt::Display for Subsystem {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Subsystem::WindowsGui => write!(f, "windows"),
			Subsystem::WindowsCui => write!(f, "console"),
			Subsystem::Other(value) => write!(f, "unknown ({:#06X})", value),
		}
	}
}
