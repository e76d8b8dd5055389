//! CLI binary for matfed.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use matfed::{AppConfig, EnginePaths, build_engine, matfed_dirs};
use matfed_search::{
    CrystalSystem, Property, PropertyRange, Query, SearchCache, SearchOptions, SearchResult,
    SpaceGroup,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// matfed: federated search across materials databases.
#[derive(Parser)]
#[command(name = "matfed", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Search every capable provider and print fused materials.
    Search(SearchArgs),

    /// List registered providers with their health.
    Providers {
        /// Re-run provider discovery instead of using the cached snapshot.
        #[arg(long)]
        refresh: bool,
    },

    /// Manage the result cache.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Delete every cached search result.
    Clear,
}

#[derive(Args)]
struct SearchArgs {
    /// Elements that must all be present (comma separated).
    #[arg(long, value_delimiter = ',')]
    elements: Vec<String>,
    /// At least one of these elements must be present.
    #[arg(long, value_delimiter = ',')]
    any: Vec<String>,
    /// None of these elements may be present.
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,
    /// Exact composition, e.g. Fe2O3.
    #[arg(long)]
    formula: Option<String>,
    #[arg(long)]
    nelements_min: Option<u32>,
    #[arg(long)]
    nelements_max: Option<u32>,
    /// Band gap bounds in eV.
    #[arg(long)]
    band_gap_min: Option<f64>,
    #[arg(long)]
    band_gap_max: Option<f64>,
    /// Formation energy bounds in eV/atom.
    #[arg(long)]
    formation_energy_min: Option<f64>,
    #[arg(long)]
    formation_energy_max: Option<f64>,
    /// Maximum energy above the convex hull in eV/atom.
    #[arg(long)]
    e_hull_max: Option<f64>,
    /// Bulk modulus bounds in GPa.
    #[arg(long)]
    bulk_modulus_min: Option<f64>,
    #[arg(long)]
    bulk_modulus_max: Option<f64>,
    /// Space group number (1-230) or Hermann-Mauguin symbol.
    #[arg(long)]
    space_group: Option<String>,
    #[arg(long)]
    crystal_system: Option<String>,
    /// Only query these providers, in this priority order.
    #[arg(long, value_delimiter = ',')]
    providers: Vec<String>,
    /// Maximum number of materials to return.
    #[arg(long)]
    limit: Option<usize>,
    /// Ignore cached results.
    #[arg(long)]
    refresh: bool,
    /// Print the full result as JSON.
    #[arg(long)]
    json: bool,
}

impl SearchArgs {
    fn to_query(&self) -> anyhow::Result<Query> {
        let mut builder = Query::builder()
            .elements(&self.elements)
            .elements_any(&self.any)
            .exclude(&self.exclude)
            .providers(&self.providers);
        if let Some(formula) = &self.formula {
            builder = builder.formula(formula);
        }
        if self.nelements_min.is_some() || self.nelements_max.is_some() {
            builder = builder.nelements(self.nelements_min, self.nelements_max);
        }
        let ranges = [
            (Property::BandGap, self.band_gap_min, self.band_gap_max),
            (
                Property::FormationEnergy,
                self.formation_energy_min,
                self.formation_energy_max,
            ),
            (Property::EnergyAboveHull, None, self.e_hull_max),
            (
                Property::BulkModulus,
                self.bulk_modulus_min,
                self.bulk_modulus_max,
            ),
        ];
        for (property, min, max) in ranges {
            if min.is_some() || max.is_some() {
                builder = builder.property(property, PropertyRange::new(min, max));
            }
        }
        if let Some(sg) = &self.space_group {
            builder = builder.space_group(sg.parse::<SpaceGroup>()?);
        }
        if let Some(cs) = &self.crystal_system {
            builder = builder.crystal_system(cs.parse::<CrystalSystem>()?);
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `--json` output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("matfed=info,matfed_search=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(matfed_dirs::config_file);
    let config = AppConfig::load_or_default(&config_path)?;
    let paths = EnginePaths::platform();

    match cli.command {
        Command::Search(args) => run_search(&config, &paths, &args).await,
        Command::Providers { refresh } => list_providers(&config, &paths, refresh).await,
        Command::Cache(CacheCommand::Clear) => clear_cache(&config, &paths),
    }
}

async fn run_search(config: &AppConfig, paths: &EnginePaths, args: &SearchArgs) -> anyhow::Result<()> {
    let query = args.to_query()?;
    let engine = build_engine(config, paths, false).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let options = SearchOptions {
        force_refresh: args.refresh,
    };
    let result = engine.search_cancellable(&query, options, cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &SearchResult) {
    for material in &result.materials {
        let space_group = material.space_group.as_deref().unwrap_or("-");
        println!(
            "{:<14} {:<12} {:<10} [{}]",
            material.id,
            material.formula,
            space_group,
            material.sources.join(", ")
        );
        for (name, value) in &material.properties {
            let unit = value.unit.as_deref().unwrap_or("");
            println!("    {name:<20} {:>10.4} {unit:<8} ({})", value.value, value.source);
        }
    }

    println!(
        "\n{} of {} materials{} in {} ms",
        result.materials.len(),
        result.total_count,
        if result.cached { " (cached)" } else { "" },
        result.search_time_ms
    );
    for log in &result.provider_logs {
        match &log.error {
            Some(error) => eprintln!(
                "  {:<24} {:<13} {error}",
                log.provider,
                log.status.name()
            ),
            None => eprintln!(
                "  {:<24} {:<13} {} results in {} ms",
                log.provider,
                log.status.name(),
                log.result_count,
                log.latency_ms
            ),
        }
    }
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
}

async fn list_providers(config: &AppConfig, paths: &EnginePaths, refresh: bool) -> anyhow::Result<()> {
    let engine = build_engine(config, paths, refresh).await?;
    let report = engine.health_report();

    println!(
        "{:<24} {:<13} {:<18} {:<8} {:<10} {:>10}",
        "ID", "TIER", "API", "ENABLED", "CIRCUIT", "LATENCY"
    );
    for provider in engine.registry().providers() {
        let endpoint = &provider.endpoint;
        let latency = report
            .iter()
            .find(|(id, _)| *id == endpoint.id)
            .and_then(|(_, h)| h.ema_latency_ms)
            .map_or_else(|| "-".to_owned(), |ms| format!("{ms:.0} ms"));
        let circuit = engine.provider_status(&endpoint.id).name();
        println!(
            "{:<24} {:<13} {:<18} {:<8} {:<10} {:>10}",
            endpoint.id,
            endpoint.tier.to_string(),
            endpoint.api_type.to_string(),
            if endpoint.enabled { "yes" } else { "no" },
            circuit,
            latency
        );
    }
    Ok(())
}

fn clear_cache(config: &AppConfig, paths: &EnginePaths) -> anyhow::Result<()> {
    let mut cache = SearchCache::open(&paths.query_cache, config.search.cache_ttl_seconds);
    let removed = cache.clear()?;
    println!("removed {removed} cached results");
    Ok(())
}
