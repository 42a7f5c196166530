use anyhow::{bail, Context, Result};
use clap::Parser;
use pe_fixheader::pe::{LARGE_ADDRESS_AWARE_FIELD, SUBSYSTEM_FIELD};
use pe_fixheader::{inspect, patch, PatchError, PatchOptions, Subsystem};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// PE header fixer
///
/// Sets the Large Address Aware flag on a Windows executable and, optionally,
/// switches its subsystem from console to windows. The file is patched in place.
#[derive(Parser)]
#[command(name = "fixheader")]
#[command(version = VERSION)]
#[command(about = "Set /LARGEADDRESSAWARE (and optionally /subsystem:windows) on a PE image")]
struct Cli {
	/// Path to the executable to patch
	path: PathBuf,

	/// Also force the subsystem to windows (GUI) instead of console
	#[arg(long, env = "FIXHEADER_SUBSYSTEM_WINDOWS")]
	subsystem_windows: bool,

	/// Leave the Large Address Aware flag alone
	#[arg(long)]
	no_large_address_aware: bool,

	/// Only report the current header state, never write
	#[arg(long, conflicts_with_all = ["subsystem_windows", "no_large_address_aware", "backup"])]
	check: bool,

	/// Copy the file to <PATH>.<EXT> before writing
	#[arg(long, value_name = "EXT", env = "FIXHEADER_BACKUP")]
	backup: Option<String>,

	/// Log header offsets and field values to stderr
	#[arg(short, long)]
	verbose: bool,
}

impl Cli {
	fn options(&self) -> PatchOptions {
		PatchOptions {
			large_address_aware: !self.no_large_address_aware,
			subsystem: self.subsystem_windows.then_some(Subsystem::WindowsGui),
			backup_extension: self.backup.clone(),
		}
	}
}

fn init_logging(verbose: bool) {
	let default_level = if verbose { "debug" } else { "warn" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}

fn cmd_check(path: &Path) -> Result<()> {
	println!("Checking {}:", path.display());

	let info = inspect(path).with_context(|| format!("Couldn't read headers of {:?}", path))?;
	println!("  PE header offset: {:#X}", info.pe_offset);
	if info.is_large_address_aware() {
		println!("  Large Address Aware: yes");
	} else {
		println!("  Large Address Aware: no");
	}
	match info.subsystem {
		Some(subsystem) => println!("  Subsystem: {}", subsystem),
		None => println!("  Subsystem: missing (no optional header)"),
	}

	Ok(())
}

fn cmd_patch(path: &Path, options: &PatchOptions) -> Result<()> {
	if options.is_empty() {
		bail!("Nothing to patch: --no-large-address-aware requires --subsystem-windows");
	}

	println!("Patching {}:", path.display());

	let report = match patch(path, options) {
		Ok(report) => report,
		Err(e @ PatchError::InvalidPeSignature { .. }) => {
			println!("   ERROR: Invalid PE signature");
			return Err(e.into());
		}
		Err(e) => return Err(e).with_context(|| format!("Failed to patch {:?}", path)),
	};

	if report.change(LARGE_ADDRESS_AWARE_FIELD).is_some() {
		println!(" - Setting /LARGEADDRESSAWARE");
	}
	if let Some(change) = report.change(SUBSYSTEM_FIELD) {
		println!(" - Setting /subsystem:{}", Subsystem::from(change.new));
	}
	if !report.modified() {
		println!("  Already patched");
	}

	Ok(())
}

fn main() {
	let cli = Cli::parse();
	init_logging(cli.verbose);

	let result = if cli.check {
		cmd_check(&cli.path)
	} else {
		cmd_patch(&cli.path, &cli.options())
	};

	if let Err(e) = result {
		eprintln!("Error: {:#}", e);
		std::process::exit(1);
	}
}
