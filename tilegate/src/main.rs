//! The tilegate command line: seed, clean, summarise, compact and build
//! overviews for the configured tile caches.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::{
	path::PathBuf,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
};
use tilegate::{
	config::{load_cleanup_document, load_seed_document},
	jobs,
};
use tilegate_core::utils::sweep_orphan_locks;
use tilegate_store::{StoreOptions, StoreType, open_store};

#[derive(Parser)]
#[command(
	name = "tilegate",
	version,
	about = "Store, serve and seed map tile pyramids across multiple storage back-ends.",
	after_help = "Use the RUST_LOG environment variable to control logging, e.g. RUST_LOG=debug."
)]
struct Cli {
	/// Data root holding caches/, seed.json and cleanup.json.
	/// Defaults to $DATA_DIR, then ./data.
	#[arg(long)]
	data_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Seed the configured sources from their origins.
	Seed {
		/// Source ids to seed; all configured sources when empty.
		ids: Vec<String>,
	},
	/// Remove expired tiles and companion assets.
	Clean {
		/// Source ids to clean; all configured sources when empty.
		ids: Vec<String>,
	},
	/// Report counts and byte sizes of the catalog.
	Summary {
		/// Report actual vs expected tiles per seeded source instead.
		#[arg(long)]
		seed: bool,
	},
	/// Reclaim space in one source (SQLite VACUUM).
	Compact { id: String },
	/// Build pyramid overviews for one source.
	Overviews {
		id: String,
		#[arg(long, default_value_t = num_cpus::get().clamp(1, 16))]
		concurrency: usize,
		#[arg(long, default_value_t = 256)]
		tile_size: u32,
	},
	/// Print metadata and counts of one source.
	Probe { id: String },
}

#[tokio::main]
async fn main() {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(error) = run(Cli::parse()).await {
		error!("{error:#}");
		std::process::exit(1);
	}
}

fn resolve_data_dir(cli_value: Option<PathBuf>) -> PathBuf {
	cli_value
		.or_else(|| std::env::var_os("DATA_DIR").map(PathBuf::from))
		.unwrap_or_else(|| PathBuf::from("data"))
}

/// A flag flipped by Ctrl-C; running jobs stop dispatching and drain.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
	let cancel = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&cancel);
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("interrupt received, finishing outstanding tiles");
			flag.store(true, Ordering::Release);
		}
	});
	cancel
}

/// The store type of `id` as configured in seed.json.
fn configured_store_type(data_dir: &std::path::Path, id: &str) -> Result<StoreType> {
	let document = load_seed_document(data_dir)?;
	match document.datas.get(id) {
		Some(source) => Ok(source.store_type),
		None => bail!("source '{id}' is not configured in seed.json"),
	}
}

async fn run(cli: Cli) -> Result<()> {
	let data_dir = resolve_data_dir(cli.data_dir);
	let options = StoreOptions::new(&data_dir);

	// safe here: one CLI invocation owns the data directory
	sweep_orphan_locks(&options.caches_dir()).context("sweeping orphaned lock files")?;

	match cli.command {
		Command::Seed { ids } => {
			let document = load_seed_document(&data_dir)?;
			let cancel = cancel_on_ctrl_c();
			let outcomes = jobs::run_seed(&document, &ids, &options, Some(cancel)).await?;
			for outcome in outcomes {
				println!(
					"{}: {}/{} tiles, {} dispatched, {} failed",
					outcome.id, outcome.actual, outcome.expect, outcome.report.dispatched, outcome.report.failed
				);
			}
		}
		Command::Clean { ids } => {
			let document = load_cleanup_document(&data_dir)?;
			let cancel = cancel_on_ctrl_c();
			let outcomes = jobs::run_cleanup(&document, &ids, &options, Some(cancel)).await?;
			for outcome in outcomes {
				println!("{}: removed {} tiles, {} failed", outcome.id, outcome.removed, outcome.report.failed);
			}
		}
		Command::Summary { seed } => {
			let document = load_seed_document(&data_dir)?;
			if seed {
				for expectation in jobs::seed_summary(&document, &options).await? {
					println!("{}: {}/{} tiles", expectation.id, expectation.actual, expectation.expect);
				}
			} else {
				let (tiles, assets) = jobs::service_summary(&document, &options).await?;
				for summary in tiles.iter().chain(assets.iter()) {
					println!(
						"{}: {} sources, {} files, {} bytes",
						summary.class, summary.sources, summary.tiles, summary.bytes
					);
				}
			}
		}
		Command::Compact { id } => {
			let store_type = configured_store_type(&data_dir, &id)?;
			let store = open_store(&id, store_type, &options).await?;
			store.compact().await?;
			store.close().await?;
			info!("compacted '{id}'");
		}
		Command::Overviews {
			id,
			concurrency,
			tile_size,
		} => {
			let store_type = configured_store_type(&data_dir, &id)?;
			let store = open_store(&id, store_type, &options).await?;
			store.add_overviews(concurrency, tile_size).await?;
			let minzoom = store.metadata().await?.minzoom;
			store.close().await?;
			info!("built overviews for '{id}' down to zoom {minzoom:?}");
		}
		Command::Probe { id } => {
			let store_type = configured_store_type(&data_dir, &id)?;
			let store = open_store(&id, store_type, &options).await?;
			let meta = store.metadata().await?;
			println!("{}", serde_json::to_string_pretty(&meta)?);
			println!("tiles: {}", store.count_tiles().await?);
			println!("bytes: {}", store.size_bytes().await?);
			store.close().await?;
		}
	}

	Ok(())
}
