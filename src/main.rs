use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;

use tw_geocoder::config::AppConfig;
use tw_geocoder::provider::{GeocodeProvider, NominatimClient, OpenCageClient};
use tw_geocoder::records::{Batch, ResolvedBatch};
use tw_geocoder::resilience::{BackoffPolicy, RateLimiter};
use tw_geocoder::resolver::Resolver;
use tw_geocoder::{init_tracing, ResultCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let mut config = AppConfig::from_env();
    apply_cli_overrides(&mut config)?;
    info!(config = ?config.public_profile(), "starting batch run");

    let raw = std::fs::read_to_string(&config.input_path)
        .with_context(|| format!("reading input file {}", config.input_path))?;
    let batch = Batch::parse(&raw)?;
    info!(county = %batch.county, records = batch.rows.len(), "loaded input batch");

    let cache = ResultCache::open(&config.cache_path)
        .with_context(|| format!("opening result cache {}", config.cache_path))?;
    info!(cached = cache.len()?, "result cache ready");

    let primary: Arc<dyn GeocodeProvider> = Arc::new(OpenCageClient::from_config(&config)?);
    let secondary: Option<Arc<dyn GeocodeProvider>> = if config.use_nominatim {
        Some(Arc::new(NominatimClient::from_config(&config)?))
    } else {
        None
    };

    let resolver = Resolver::new(
        cache,
        primary,
        secondary,
        RateLimiter::new(config.min_interval_ms),
        BackoffPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        ),
    );

    let (rows, stats) = resolver.resolve_all(&batch.rows).await?;
    let output = ResolvedBatch {
        county: batch.county,
        total: rows.len(),
        rows,
    };

    if let Some(parent) = Path::new(&config.output_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&config.output_path, serde_json::to_string_pretty(&output)?)
        .with_context(|| format!("writing output file {}", config.output_path))?;

    info!(
        output = %config.output_path,
        total = stats.total,
        resolved = stats.resolved,
        cache_hits = stats.cache_hits,
        approximate = stats.approximate,
        misses = stats.misses,
        provider_calls = stats.provider_calls,
        "batch run finished"
    );
    Ok(())
}

/// Flags override the corresponding environment variables.
fn apply_cli_overrides(config: &mut AppConfig) -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--in" => config.input_path = expect_value(&arg, args.next())?,
            "--out" => config.output_path = expect_value(&arg, args.next())?,
            "--cache" => config.cache_path = expect_value(&arg, args.next())?,
            "--nominatim" => config.use_nominatim = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other} (try --help)"),
        }
    }
    Ok(())
}

fn expect_value(flag: &str, value: Option<String>) -> anyhow::Result<String> {
    value.with_context(|| format!("{flag} requires a value"))
}

fn print_usage() {
    println!(
        "tw-geocoder: batch-resolve Taiwanese service addresses to coordinates

USAGE:
    tw-geocoder [--in FILE] [--out FILE] [--cache FILE] [--nominatim]

OPTIONS:
    --in FILE       input JSON (default: $GEOCODE_INPUT or clinics.json)
    --out FILE      output JSON (default: $GEOCODE_OUTPUT or clinics_geocoded.json)
    --cache FILE    sqlite result cache (default: $GEOCODE_CACHE or geocode-cache.db)
    --nominatim     enable the secondary Nominatim provider
    -h, --help      show this help

Requires OPENCAGE_API_KEY in the environment (or .env in dev builds)."
    );
}
