use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchError {
	#[error("File not found: {0:?}")]
	FileNotFound(PathBuf),

	#[error("Permission denied: {0:?}")]
	PermissionDenied(PathBuf),

	#[error("File is truncated: expected {needed} bytes at offset {offset:#X}")]
	TruncatedFile { offset: u64, needed: u64 },

	#[error("Invalid DOS magic number : {0:X}")]
	InvalidDosSignature(u16),

	#[error("Invalid PE signature at offset {offset:#X} (found {found:#010X})")]
	InvalidPeSignature { offset: u64, found: u32 },

	#[error("Couldn't write {field} at offset {offset:#X}")]
	WriteFailure {
		field: &'static str,
		offset: u64,
		#[source]
		source: io::Error,
	},

	#[error("Failed to create backup of file {path:?} with extension {extension}")]
	Backup {
		path: PathBuf,
		extension: String,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Io(#[from] io::Error),
}

impl PatchError {
	/// Maps an open failure for `path` to the matching typed error.
	pub(crate) fn from_open(path: PathBuf, err: io::Error) -> Self {
		match err.kind() {
			io::ErrorKind::NotFound => PatchError::FileNotFound(path),
			io::ErrorKind::PermissionDenied => PatchError::PermissionDenied(path),
			_ => PatchError::Io(err),
		}
	}

	/// Maps a short `read_exact` to `TruncatedFile`, leaving other errors as I/O.
	pub(crate) fn from_read(err: io::Error, offset: u64, needed: u64) -> Self {
		if err.kind() == io::ErrorKind::UnexpectedEof {
			PatchError::TruncatedFile { offset, needed }
		} else {
			PatchError::Io(err)
		}
	}
}

pub type Result<T> = std::result::Result<T, PatchError>;
