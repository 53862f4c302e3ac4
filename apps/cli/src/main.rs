use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wk_config::{default_data_dir, WatchConfig};

mod context;
mod domains;
mod sections;
mod util;

use context::{Context, OutputFormat};
use domains::{library::LibraryCmd, recent::RecentCmd};
use sections::Section;

#[derive(Parser, Debug)]
#[command(
	name = "watchkeeper",
	about = "Keeps drives, libraries, recent items, pinned folders and git repositories in view"
)]
struct Cli {
	/// Path to the watchkeeper data directory
	#[arg(long, env = "WATCHKEEPER_DATA_DIR")]
	data_dir: Option<PathBuf>,

	/// Log filter, used when RUST_LOG is not set
	#[arg(long, env = "WATCHKEEPER_LOG", default_value = "warn")]
	log_level: String,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Stream changes until Ctrl-C, every enabled section by default
	Watch {
		#[arg(value_enum)]
		sections: Vec<Section>,
	},
	/// Enumerate a section once and print it
	List {
		#[arg(value_enum)]
		section: Section,
	},
	/// Pin folders to quick access
	Pin {
		#[arg(required = true)]
		paths: Vec<PathBuf>,
	},
	/// Unpin folders from quick access
	Unpin {
		#[arg(required = true)]
		paths: Vec<PathBuf>,
	},
	/// Library definitions
	#[command(subcommand)]
	Library(LibraryCmd),
	/// Recent items
	#[command(subcommand)]
	Recent(RecentCmd),
}

fn init_logging(level: &str) -> Result<()> {
	let filter = match EnvFilter::try_from_default_env() {
		Ok(filter) => filter,
		Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))?,
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_writer(std::io::stderr).with_target(false))
		.init();

	Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(&cli.log_level)?;

	let data_dir = match cli.data_dir {
		Some(dir) => {
			std::fs::create_dir_all(&dir)
				.with_context(|| format!("creating {}", dir.display()))?;
			dir
		}
		None => default_data_dir()?,
	};

	let config = WatchConfig::load_or_create(&data_dir)?;
	debug!(data_dir = %data_dir.display(), "Config loaded;");

	let ctx = Context::new(cli.format, data_dir, config);

	match cli.command {
		Commands::Watch { sections } => domains::watch::watch(&ctx, sections).await,
		Commands::List { section } => domains::watch::list(&ctx, section).await,
		Commands::Pin { paths } => domains::quick_access::run(&ctx, paths, true).await,
		Commands::Unpin { paths } => domains::quick_access::run(&ctx, paths, false).await,
		Commands::Library(cmd) => domains::library::run(&ctx, cmd).await,
		Commands::Recent(cmd) => domains::recent::run(&ctx, cmd).await,
	}
}
