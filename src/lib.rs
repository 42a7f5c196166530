//! In-place patching of PE image headers.
//!
//! Sets `IMAGE_FILE_LARGE_ADDRESS_AWARE` in the COFF Characteristics and can
//! force the Optional Header subsystem to `WINDOWS`, without touching any
//! other byte of the file.

pub mod error;
pub mod patcher;
pub mod pe;

pub use error::PatchError;
pub use patcher::{
	inspect, make_backup, patch, patch_stream, FieldChange, FieldEdit, HeaderInfo, PatchOptions,
	PatchReport,
};
pub use pe::Subsystem;
