use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use smash_meta::api::{ApiClient, HttpTransport};
use smash_meta::bounds;
use smash_meta::characters::CharacterMap;
use smash_meta::config::Settings;
use smash_meta::dataset;
use smash_meta::export;
use smash_meta::http_client::http_client;
use smash_meta::import;
use smash_meta::ingest::{IngestOptions, run_ingest};
use smash_meta::matchups::{self, MatchupMatrix};
use smash_meta::rate_limit::RateLimiter;

const GAME_DATA_FILE: &str = "game_data.csv";
const MATCHUPS_FILE: &str = "matchups.csv";
const WORKBOOK_FILE: &str = "game_data.xlsx";
const SOLVED_FILE: &str = "solved_lp.csv";
const INTERVALS_FILE: &str = "optimal_frequencies.csv";

#[derive(Debug, Parser)]
#[command(
    name = "smash_meta",
    version,
    about = "Download online Smash Ultimate game data and analyse character matchups"
)]
struct Cli {
    /// SQLite dataset path (defaults to the user cache directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory for exported files
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover completed online events and download their games
    Download(DownloadArgs),
    /// Load a pre-built game_data.csv archive from a URL or path
    Import(ImportArgs),
    /// Write game_data.csv and an Excel workbook from the dataset
    Export(ExportArgs),
    /// Compute character matchup win rates
    Matchups(MatchupsArgs),
    /// Solve the metagame LP and report near-optimal play frequencies
    Bounds(BoundsArgs),
    /// Show what the dataset contains
    Status,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// File whose first line is the API token
    #[arg(long)]
    token_file: Option<PathBuf>,
    /// Character id mapping (`name,id` per line)
    #[arg(long)]
    characters: Option<PathBuf>,
    /// First month to scan (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    start_date: Option<NaiveDate>,
    /// Only download events discovered by earlier runs
    #[arg(long)]
    skip_discovery: bool,
    /// Leave events that failed before alone
    #[arg(long)]
    no_retry_failed: bool,
    /// Stop after this many events
    #[arg(long)]
    max_events: Option<usize>,
    /// Calls allowed per rate-limit period
    #[arg(long)]
    rate_limit_calls: Option<usize>,
    /// Rate-limit period in seconds
    #[arg(long)]
    rate_limit_period_secs: Option<u64>,
    /// Write game_data.csv when the run finishes
    #[arg(long)]
    export: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// http(s) URL or local path of the archive
    source: String,
    /// Expected SHA-256 of the archive
    #[arg(long)]
    sha256: Option<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Also write an Excel workbook
    #[arg(long)]
    xlsx: bool,
    /// Minimum games for a matchup row in the workbook
    #[arg(long, default_value_t = 1)]
    min_games: usize,
}

#[derive(Debug, Args)]
struct MatchupsArgs {
    /// Minimum games for a matchup to be reported
    #[arg(long, default_value_t = 1)]
    min_games: usize,
}

#[derive(Debug, Args)]
struct BoundsArgs {
    /// Matchup table to solve; computed from the dataset when omitted
    #[arg(long)]
    matchups: Option<PathBuf>,
    /// Minimum games per matchup when computing from the dataset
    #[arg(long, default_value_t = 1)]
    min_games: usize,
    /// Steps between probability 0 and 1
    #[arg(long, default_value_t = 100)]
    division: usize,
    /// Game value a frequency must reach to count as near-optimal
    #[arg(long, default_value_t = -0.02, allow_negative_numbers = true)]
    threshold: f64,
    /// Re-solve even when a solved table exists
    #[arg(long)]
    force: bool,
    /// Keep matchup order instead of sorting by interval
    #[arg(long)]
    no_sort: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = Some(db);
    }
    if let Some(out_dir) = cli.out_dir {
        settings.out_dir = out_dir;
    }

    match cli.command {
        Command::Download(args) => cmd_download(settings, args),
        Command::Import(args) => cmd_import(&settings, args),
        Command::Export(args) => cmd_export(&settings, args),
        Command::Matchups(args) => cmd_matchups(&settings, args),
        Command::Bounds(args) => cmd_bounds(&settings, args),
        Command::Status => cmd_status(&settings),
    }
}

fn cmd_download(mut settings: Settings, args: DownloadArgs) -> Result<()> {
    if let Some(path) = args.token_file {
        settings.token_file = path;
    }
    if let Some(path) = args.characters {
        settings.character_file = path;
    }
    if let Some(date) = args.start_date {
        settings.start_date = date;
    }
    if let Some(calls) = args.rate_limit_calls {
        settings.rate_limit.max_calls = calls.max(1);
    }
    if let Some(secs) = args.rate_limit_period_secs {
        settings.rate_limit.period = Duration::from_secs(secs.max(1));
    }

    let token = settings.resolve_token()?;
    let characters = CharacterMap::load(&settings.character_file)?;
    tracing::info!(characters = characters.len(), "character map loaded");

    let db_path = settings.resolve_db_path()?;
    let mut conn = dataset::open_db(&db_path)?;

    let transport = HttpTransport::new(http_client()?, settings.api_url.clone(), token);
    let mut client = ApiClient::new(
        transport,
        RateLimiter::new(&settings.rate_limit),
        settings.retry.clone(),
    );

    let mut opts = IngestOptions::from_settings(&settings);
    opts.skip_discovery = args.skip_discovery;
    opts.retry_failed = !args.no_retry_failed;
    opts.max_events = args.max_events;

    let summary = run_ingest(&mut conn, &mut client, &characters, &opts)?;

    println!("Download complete");
    println!("DB: {}", db_path.display());
    println!(
        "Windows: {} scanned, {} skipped, {} total",
        summary.windows_scanned, summary.windows_skipped, summary.windows_total
    );
    println!("New events discovered: {}", summary.events_discovered);
    println!(
        "Events: {} attempted, {} stored, {} doubles, {} failed",
        summary.events_attempted, summary.events_done, summary.events_doubles, summary.events_failed
    );
    println!(
        "Games inserted: {} (skipped {} incomplete)",
        summary.games_inserted, summary.games_skipped
    );
    println!(
        "API calls: {} ({} retries, {:.0}s waiting on the rate limit)",
        summary.calls.calls,
        summary.calls.retries,
        summary.calls.rate_limit_wait.as_secs_f64()
    );
    if !summary.errors.is_empty() {
        println!("Errors: {}", summary.errors.len());
        for err in summary.errors.iter().take(8) {
            println!(" - {err}");
        }
    }

    if args.export {
        let games = dataset::load_games(&conn)?;
        let path = out_file(&settings, GAME_DATA_FILE)?;
        let rows = export::write_game_csv(&path, &games)?;
        println!("Wrote {rows} games to {}", path.display());
    }
    Ok(())
}

fn cmd_import(settings: &Settings, args: ImportArgs) -> Result<()> {
    let db_path = settings.resolve_db_path()?;
    let mut conn = dataset::open_db(&db_path)?;
    let summary = import::import_from_source(&mut conn, &args.source, args.sha256.as_deref())?;

    println!("Import complete");
    println!("DB: {}", db_path.display());
    println!("SHA-256: {}", summary.digest);
    println!(
        "Rows: {} usable, {} skipped; games inserted: {}",
        summary.rows, summary.rows_skipped, summary.games_inserted
    );
    Ok(())
}

fn cmd_export(settings: &Settings, args: ExportArgs) -> Result<()> {
    let conn = dataset::open_db(&settings.resolve_db_path()?)?;
    let games = dataset::load_games(&conn)?;
    let csv_path = out_file(settings, GAME_DATA_FILE)?;
    let rows = export::write_game_csv(&csv_path, &games)?;
    println!("Wrote {rows} games to {}", csv_path.display());

    if args.xlsx {
        let report = matchups::compute_matchups(&games, args.min_games);
        let path = out_file(settings, WORKBOOK_FILE)?;
        let out = export::export_workbook(&path, &games, &report)?;
        println!(
            "Wrote {} ({} games, {} matchups, {} characters, {} stage rows)",
            path.display(),
            out.games,
            out.matchups,
            out.characters,
            out.stages
        );
    }
    Ok(())
}

fn cmd_matchups(settings: &Settings, args: MatchupsArgs) -> Result<()> {
    let conn = dataset::open_db(&settings.resolve_db_path()?)?;
    let games = dataset::load_games(&conn)?;
    let report = matchups::compute_matchups(&games, args.min_games);
    let rows = matchups::matchup_rows(&report);

    let path = out_file(settings, MATCHUPS_FILE)?;
    matchups::write_matchups_csv(&path, &rows)?;

    println!(
        "Games used: {} (mirrors {}, incomplete {})",
        report.games_used, report.mirrors, report.incomplete
    );
    println!("Matchups: {} written to {}", rows.len(), path.display());

    let mut best = report.characters.clone();
    best.sort_by(|a, b| b.record.win_rate().total_cmp(&a.record.win_rate()));
    for c in best.iter().take(10) {
        println!(
            "  {:<24} {:>6.1}% over {} games",
            c.character,
            c.record.win_rate() * 100.0,
            c.record.games
        );
    }
    Ok(())
}

fn cmd_bounds(settings: &Settings, args: BoundsArgs) -> Result<()> {
    let solved_path = out_file(settings, SOLVED_FILE)?;
    let table = if solved_path.exists() && !args.force {
        tracing::info!(path = %solved_path.display(), "reusing solved table");
        bounds::read_win_rates_csv(&solved_path)?
    } else {
        let rows = match args.matchups.as_deref() {
            Some(path) => matchups::read_matchups_csv(path)?,
            None => {
                let conn = dataset::open_db(&settings.resolve_db_path()?)?;
                let games = dataset::load_games(&conn)?;
                matchups::matchup_rows(&matchups::compute_matchups(&games, args.min_games))
            }
        };
        let matrix = MatchupMatrix::from_rows(&rows);
        tracing::info!(characters = matrix.len(), division = args.division, "solving metagame");

        let equilibrium = bounds::solve_game(&matrix.payoffs())?;
        println!("Game value at equilibrium: {:.4}", equilibrium.value);
        let mut mix = matrix
            .names()
            .iter()
            .zip(&equilibrium.strategy)
            .filter(|(_, p)| **p > 1e-6)
            .collect::<Vec<_>>();
        mix.sort_by(|a, b| b.1.total_cmp(a.1));
        for (name, p) in mix {
            println!("  {:<24} {:>6.2}%", name, p * 100.0);
        }

        let table = bounds::all_win_rates(&matrix, args.division)?;
        bounds::write_win_rates_csv(&solved_path, &table)?;
        table
    };

    let intervals = bounds::intervals(&table, args.threshold, !args.no_sort);
    let path = out_file(settings, INTERVALS_FILE)?;
    bounds::write_intervals_csv(&path, &intervals)?;
    println!(
        "Near-optimal frequency ranges (value >= {}) written to {}",
        args.threshold,
        path.display()
    );
    for interval in &intervals {
        match (interval.minv, interval.maxv) {
            (Some(lo), Some(hi)) => println!("  {:<24} {:.2} - {:.2}", interval.name, lo, hi),
            _ => println!("  {:<24} never", interval.name),
        }
    }
    Ok(())
}

fn cmd_status(settings: &Settings) -> Result<()> {
    let db_path = settings.resolve_db_path()?;
    let conn = dataset::open_db(&db_path)?;
    let stats = dataset::stats(&conn)?;

    println!("DB: {}", db_path.display());
    println!(
        "Games: {} ({} imported), characters seen: {}",
        stats.games, stats.imported_games, stats.characters_seen
    );
    println!("Discovery windows completed: {}", stats.windows_completed);
    for (status, count) in &stats.events_by_status {
        println!("Events {status}: {count}");
    }
    if let Some(run) = stats.last_run {
        println!(
            "Last run: {} started {} finished {} (+{} games, {} errors)",
            run.kind,
            run.started_at,
            run.finished_at.as_deref().unwrap_or("never"),
            run.games_inserted,
            run.error_count
        );
    }
    Ok(())
}

fn out_file(settings: &Settings, name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(&settings.out_dir)
        .with_context(|| format!("create {}", settings.out_dir.display()))?;
    Ok(settings.out_path(name))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|err| format!("{raw}: {err}"))
}
