use anyhow::{Context as _, Result, ensure};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::{path::PathBuf, time::Duration};
use tilevault::{Registry, TileServer};
use tilevault_cache::PoolConfig;
use tilevault_core::config::Config;

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Serve tiles via http
	Serve(ServeArgs),

	/// Validate a configuration file and print what it declares
	Check(CheckArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
	/// IP address to bind to
	#[arg(long, default_value = "0.0.0.0")]
	bind: String,

	/// Port to listen on
	#[arg(short, long, default_value_t = 8080)]
	port: u16,

	/// Endpoint alias and its configuration file, as /prefix=config.xml
	/// (repeatable)
	#[arg(long = "alias", required = true)]
	aliases: Vec<String>,

	/// Minimum live connections per backend pool
	#[arg(long, default_value_t = 1)]
	pool_min: usize,

	/// Idle connections over this count are reaped when their ttl elapses
	#[arg(long, default_value_t = 5)]
	pool_smax: usize,

	/// Hard ceiling on connections per backend pool
	#[arg(long, default_value_t = 200)]
	pool_hmax: usize,

	/// Idle connection lifetime in seconds
	#[arg(long, default_value_t = 60)]
	pool_ttl: u64,

	/// Share one pool registry across all aliases
	#[arg(long, default_value_t = false)]
	pool_sharing: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
	/// Configuration file to validate
	config: PathBuf,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	match cli.command {
		Commands::Serve(args) => serve(args),
		Commands::Check(args) => check(&args),
	}
}

fn parse_aliases(raw: &[String]) -> Result<Vec<(String, Config)>> {
	let mut aliases = Vec::with_capacity(raw.len());
	for entry in raw {
		let (endpoint, path) = entry
			.split_once('=')
			.with_context(|| format!("alias {entry:?} must look like /prefix=config.xml"))?;
		ensure!(endpoint.starts_with('/'), "alias endpoint {endpoint:?} must start with '/'");
		let config = Config::from_path(std::path::Path::new(path))
			.with_context(|| format!("loading configuration for alias {endpoint:?}"))?;
		log::info!("loaded configuration file from {path} on endpoint {endpoint}");
		aliases.push((endpoint.to_string(), config));
	}
	Ok(aliases)
}

fn serve(args: ServeArgs) -> Result<()> {
	let aliases = parse_aliases(&args.aliases)?;
	let pool_config = PoolConfig {
		min: args.pool_min,
		soft_max: args.pool_smax,
		hard_max: args.pool_hmax,
		ttl: Duration::from_secs(args.pool_ttl),
	};

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async move {
			let registry = Registry::build(aliases, pool_config, args.pool_sharing)?;
			let mut server = TileServer::new(&args.bind, args.port, registry);
			server.start().await?;
			log::info!("serving on {}:{}", args.bind, server.get_port());
			tokio::signal::ctrl_c().await?;
			server.stop().await;
			Ok(())
		})
}

fn check(args: &CheckArgs) -> Result<()> {
	let config = Config::from_path(&args.config)?;
	println!(
		"{}: ok ({} cache(s), {} grid(s), {} source(s), {} tileset(s))",
		args.config.display(),
		config.caches.len(),
		config.grids.len(),
		config.sources.len(),
		config.tilesets.len()
	);
	Ok(())
}
