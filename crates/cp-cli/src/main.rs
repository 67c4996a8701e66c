//! Clearpage CLI
//!
//! Compile host rule sets, refresh filter lists and inspect lists from the
//! command line, using a JSON file as the cache store.

mod http;
mod store;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

use cp_compiler::parse_filter_list;
use cp_core::config::EngineConfig;
use cp_core::types::Profile;
use cp_engine::{Engine, HostRules, SystemClock};

use crate::http::ReqwestClient;
use crate::store::JsonFileStore;

#[derive(Parser)]
#[command(name = "cp-cli")]
#[command(about = "Clearpage anti-detection rule engine tools")]
struct Cli {
    /// Engine configuration (JSON). Built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache store file
    #[arg(short, long, global = true, default_value = "clearpage-cache.json")]
    store: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compiled rule set for a host as JSON
    Rules {
        /// Host name, e.g. news.example.com
        #[arg(long)]
        host: String,

        /// Requested profile (light, medium, nuclear)
        #[arg(short, long)]
        profile: Option<Profile>,

        /// Bypass the host rule cache
        #[arg(short, long)]
        force: bool,
    },

    /// Refetch every configured source now
    Update,

    /// Parse a local filter list and print what it contains
    Parse {
        /// Filter list file
        #[arg(short, long)]
        input: String,
    },

    /// Delete every cached entry
    ClearCache,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let result = match cli.command {
        Commands::Rules { host, profile, force } => {
            cmd_rules(cli.config.as_deref(), &cli.store, &host, profile, force)
        }
        Commands::Update => cmd_update(cli.config.as_deref(), &cli.store),
        Commands::Parse { input } => cmd_parse(&input),
        Commands::ClearCache => cmd_clear_cache(cli.config.as_deref(), &cli.store),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        log::warn!("No --config given, running without sources");
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    EngineConfig::from_json(&text).map_err(|e| format!("'{}': {}", path.display(), e))
}

type CliEngine = Engine<JsonFileStore, ReqwestClient, SystemClock>;

fn build_engine(config: EngineConfig, store_path: &Path) -> Result<CliEngine, String> {
    let store = JsonFileStore::open(store_path)?;
    let http = ReqwestClient::new()?;
    Ok(Engine::new(config, store, http, SystemClock))
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))
}

fn cmd_rules(
    config_path: Option<&Path>,
    store_path: &Path,
    host: &str,
    profile: Option<Profile>,
    force: bool,
) -> Result<(), String> {
    let mut config = load_config(config_path)?;
    if let Some(profile) = profile {
        config.global_profile = profile;
    }
    let engine = build_engine(config, store_path)?;

    let start = Instant::now();
    let resolved = runtime()?
        .block_on(engine.resolve_host(host, force))
        .map_err(|e| e.to_string())?;

    match resolved {
        Some(HostRules { rules, failed_sources }) => {
            for url in &failed_sources {
                log::warn!("Source unavailable, result not cached: {}", url);
            }
            let json = serde_json::to_string_pretty(&rules).map_err(|e| e.to_string())?;
            println!("{}", json);
            log::info!(
                "{} selectors, {} scriptlets in {:.1}ms",
                rules.all_selectors().len(),
                rules.scriptlets.len(),
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        None => println!("null"),
    }
    Ok(())
}

fn cmd_update(config_path: Option<&Path>, store_path: &Path) -> Result<(), String> {
    let engine = build_engine(load_config(config_path)?, store_path)?;
    let report = runtime()?.block_on(engine.update_lists_now());

    println!("Updated {} sources", report.total());
    println!("  Updated:     {}", report.updated);
    println!("  Unchanged:   {}", report.unchanged);
    println!("  Stale:       {}", report.stale);
    println!("  Failed:      {}", report.failed);

    if report.total() > 0 && report.failed == report.total() {
        return Err("Every source failed to fetch".to_string());
    }
    Ok(())
}

fn cmd_parse(input: &str) -> Result<(), String> {
    let text = fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;

    let start = Instant::now();
    let parsed = parse_filter_list(&text);
    let elapsed = start.elapsed();
    let stats = parsed.stats();

    println!("Filter list: {}", input);
    println!("  Lines:              {}", text.lines().count());
    println!("  Domain selectors:   {}", stats.domain_selectors);
    println!("  Global selectors:   {}", stats.global_selectors);
    println!("  Exceptions:         {}", stats.exceptions);
    println!("  Domain scriptlets:  {}", stats.domain_scriptlets);
    println!("  Global scriptlets:  {}", stats.global_scriptlets);
    println!("  Host hints:         {}", stats.host_hints);
    println!("  Time:               {:.1}ms", elapsed.as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_clear_cache(config_path: Option<&Path>, store_path: &Path) -> Result<(), String> {
    let engine = build_engine(load_config(config_path)?, store_path)?;
    let removed = engine.clear_caches().map_err(|e| e.to_string())?;
    println!("Removed {} cached entries ({} other keys left)", removed, engine.store().len());
    Ok(())
}
