use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gap_scout::models::GeoPoint;
use gap_scout::output::JsonResultSink;
use gap_scout::scrapers::{naver, ChromeSession, NaverDetailSource, NaverMapSurface};
use gap_scout::{CrawlConfig, CrawlSession};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Find Naver Land listings whose previous jeonse covers the asking price
#[derive(Parser, Debug)]
#[command(name = "gap-scout", version, about)]
struct Args {
    /// Latitude of the sweep center
    #[arg(long, default_value_t = 37.5608, allow_negative_numbers = true)]
    lat: f64,

    /// Longitude of the sweep center
    #[arg(long, default_value_t = 126.9888, allow_negative_numbers = true)]
    lon: f64,

    /// Map zoom level, clamped to the configured range
    #[arg(long, short, default_value_t = 15)]
    zoom: u8,

    /// TOML config file; GAP_SCOUT__* environment variables override it
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory for the result files
    #[arg(long, short, default_value = "output")]
    output: PathBuf,

    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("🏠 Gap Scout - Naver Land Gap Finder");
    info!("======================================");
    info!("");

    let mut config = CrawlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.headful {
        config.headless = false;
    }
    let mut session = CrawlSession::new(config)?;

    let chrome = ChromeSession::launch(session.config().headless, session.config().block_heavy_resources)?;
    let mut surface = NaverMapSurface::open(&chrome)?;
    let source = Arc::new(NaverDetailSource::new(&chrome)?);
    let sink = JsonResultSink::new(&args.output);

    info!("📍 Center: {:.4}, {:.4} (zoom {})", args.lat, args.lon, args.zoom);
    info!("");

    let summary = session
        .run(
            &mut surface,
            source,
            &sink,
            GeoPoint::new(args.lat, args.lon),
            args.zoom,
        )
        .await?;

    info!("\n✅ {} candidates written to {}\n", summary.records_emitted, sink.dir().display());

    for (i, candidate) in summary.top_candidates.iter().enumerate() {
        println!("{}. {} ({})", i + 1, candidate.name, candidate.id);
        println!(
            "   Sale: {} won, previous jeonse: {} won",
            candidate.price.map_or_else(|| "?".to_string(), |p| p.to_string()),
            candidate
                .previous_jeonse
                .map_or_else(|| "?".to_string(), |p| p.to_string())
        );
        println!("   Gap: {} won ({:.2}%)", candidate.gap_amount, candidate.gap_ratio * 100.0);
        println!("   URL: {}", naver::detail_url(&candidate.id));
        println!();
    }

    Ok(())
}
