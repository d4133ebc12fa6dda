use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use triploader::error::PipelineResult;
use triploader::fetch::datasets::{self, Color};
use triploader::ingest::normalize::{normalize_page, NormalizePlan};
use triploader::ingest::reader::PagedReader;
use triploader::pipeline::{self, LoadOutcome};
use triploader::retry::with_retries;
use triploader::sink::Warehouse;
use triploader::{export, fetch};

const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_PAGE_SIZE: usize = 100_000;

/// Load NYC TLC trip records into a local warehouse, or mirror a month of
/// them to GCS as parquet.
#[derive(Parser, Debug)]
#[command(name = "triploader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download one month of trips plus the zone lookup and append both to
    /// the warehouse
    Ingest(IngestArgs),
    /// Download one month of trips and upload it as a parquet snapshot
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// DuckDB database file
    #[arg(long, default_value = "warehouse.duckdb")]
    db: PathBuf,

    /// Trip service color
    #[arg(long, value_enum)]
    color: ColorArg,

    /// Year of the trip file
    #[arg(long)]
    year: u16,

    /// Month of the trip file
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
    month: u8,

    /// Table the trips land in
    #[arg(long, default_value = "trips")]
    trips_table: String,

    /// Table the zone lookup lands in
    #[arg(long, default_value = "zones")]
    zones_table: String,

    /// Directory for downloaded files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Rows per page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(usize).range(1..))]
    page_size: usize,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Trip service color
    #[arg(long, value_enum)]
    color: ColorArg,

    /// Year of the trip file
    #[arg(long)]
    year: u16,

    /// Month of the trip file
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
    month: u8,

    /// Directory for downloaded files and snapshots
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// GCS bucket to upload into
    #[arg(long)]
    bucket: String,

    /// Optional prefix inside the bucket
    #[arg(long)]
    prefix: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ColorArg {
    Green,
    Yellow,
}

impl From<ColorArg> for Color {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Green => Color::Green,
            ColorArg::Yellow => Color::Yellow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with console fmt and environment filter
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    match Cli::parse().command {
        Command::Ingest(args) => run_ingest(args).await,
        Command::Export(args) => run_export(args).await,
    }
}

async fn run_ingest(args: IngestArgs) -> Result<()> {
    let color = Color::from(args.color);
    let trips = datasets::trip_data(color, args.year, args.month);
    let zones = datasets::zone_lookup();
    info!(
        db = %args.db.display(),
        trips_url = %trips.url,
        zones_url = %zones.url,
        "starting ingest"
    );

    let client = Client::new();
    let trips_path = fetch::download_file(&client, &trips.url, &args.data_dir).await?;
    let zones_path = fetch::download_file(&client, &zones.url, &args.data_dir).await?;

    let IngestArgs {
        db,
        trips_table,
        zones_table,
        page_size,
        ..
    } = args;

    // offload the DuckDB work to the blocking pool
    let (trips_outcome, zones_outcome) = tokio::task::spawn_blocking(
        move || -> PipelineResult<(LoadOutcome, LoadOutcome)> {
            let sink = Warehouse::open(&db)?;
            let trips_outcome = pipeline::load_chunked(
                PagedReader::open(&trips_path, page_size)?,
                &trips.rules(),
                &sink,
                &trips_table,
            )?;
            let zones_outcome = pipeline::load_single_shot(
                PagedReader::open(&zones_path, page_size)?,
                &zones.rules(),
                &sink,
                &zones_table,
            )?;
            Ok((trips_outcome, zones_outcome))
        },
    )
    .await??;

    info!(
        trips_rows = trips_outcome.rows,
        trips_pages = trips_outcome.pages,
        zones_rows = zones_outcome.rows,
        "ingest complete"
    );
    Ok(())
}

async fn run_export(args: ExportArgs) -> Result<()> {
    let color = Color::from(args.color);
    let dataset = datasets::trip_data(color, args.year, args.month);
    info!(
        url = %dataset.url,
        bucket = %args.bucket,
        prefix = ?args.prefix,
        "starting export"
    );

    let client = Client::new();
    let local = with_retries("download trip data", MAX_RETRIES, RETRY_DELAY, || {
        fetch::download_file(&client, &dataset.url, &args.data_dir)
    })
    .await?;

    // snapshots mirror the bucket layout: <color>/<stem>.parquet
    let rel = PathBuf::from(color.as_str()).join(format!(
        "{}.parquet",
        datasets::trip_file_stem(color, args.year, args.month)
    ));

    let rules = dataset.rules();
    let data_dir = args.data_dir.clone();
    let (snapshot_path, rows) =
        tokio::task::spawn_blocking(move || -> Result<(PathBuf, usize)> {
            let page = PagedReader::open(&local, DEFAULT_PAGE_SIZE)?.read_single_page()?;
            let plan = NormalizePlan::from_first_page(&page, &rules)?;
            let normalized = normalize_page(&page, &plan)?;
            let rows = normalized.num_rows();
            let path = export::write_snapshot(&normalized, &data_dir, &rel)?;
            Ok((path, rows))
        })
        .await??;

    let object = export::upload_snapshot(
        &args.bucket,
        args.prefix.as_deref(),
        &args.data_dir,
        &snapshot_path,
    )
    .await?;

    info!(rows, object = %object, "export complete");
    Ok(())
}
