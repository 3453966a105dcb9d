use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kartlog::db::models::LapFilter;
use kartlog::storage::UploadStore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kartlog",
    version,
    about = "Kart-racing telemetry importer and lap analyzer"
)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Root directory for stored telemetry uploads
    #[arg(long, global = true)]
    upload_dir: Option<PathBuf>,

    /// Team id owning the imported data
    #[arg(long, global = true)]
    team: Option<i64>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import telemetry files (or directories of them) into the library
    Import {
        /// Telemetry files or directories to import
        paths: Vec<PathBuf>,
    },

    /// List supported telemetry formats
    Formats,

    /// Analyze a lap-time file (CSV or JSON) and print the metrics
    Analyze {
        /// File to analyze
        file: PathBuf,
    },

    /// List imported laps
    Laps {
        /// Filter by driver name (substring match)
        #[arg(long)]
        driver: Option<String>,

        /// Filter by track name (substring match)
        #[arg(long)]
        track: Option<String>,

        /// Only show valid laps
        #[arg(long)]
        valid_only: bool,

        /// Number of results
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Stream a lap's telemetry samples as JSON lines
    Telemetry {
        /// Lap id
        lap_id: i64,
    },

    /// List racing sessions
    Sessions,

    /// Delete a lap and its stored telemetry file
    DeleteLap {
        /// Lap id
        lap_id: i64,
    },

    /// Show library statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = kartlog::config::AppConfig::load();

    // Resolve paths: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(kartlog::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let upload_dir = cli
        .upload_dir
        .or(config.upload_dir.clone())
        .unwrap_or_else(kartlog::config::default_upload_dir);

    let team_id = cli.team.or(config.default_team).unwrap_or(1);

    let db = kartlog::db::Database::open(&db_path).context("Failed to open database")?;
    let store = UploadStore::new(upload_dir);
    let registry = kartlog::parser::ParserRegistry::with_default_parsers();

    match cli.command {
        Commands::Import { paths } => {
            if paths.is_empty() {
                anyhow::bail!("No files to import. Pass telemetry files or directories.");
            }
            let files = kartlog::ingest::collect_files(&paths);
            if files.is_empty() {
                anyhow::bail!("No telemetry files found under the given paths.");
            }

            let report = kartlog::ingest::import_batch(&db, &registry, &store, &files, team_id)
                .context("Import failed")?;

            println!(
                "Import complete: {} laps imported, {} errors",
                report.uploaded,
                report.errors.len()
            );
            if !report.created_drivers.is_empty() {
                println!("New drivers: {}", report.created_drivers.join(", "));
            }
            if !report.created_tracks.is_empty() {
                println!("New tracks: {}", report.created_tracks.join(", "));
            }
            if !report.created_karts.is_empty() {
                println!("New karts: {}", report.created_karts.join(", "));
            }
            for error in &report.errors {
                eprintln!("error: {error}");
            }
        }

        Commands::Formats => {
            for format in registry.available_formats() {
                println!("{format}");
            }
        }

        Commands::Analyze { file } => {
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let result = kartlog::analyzer::analyze_file(&file, &filename);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Laps {
            driver,
            track,
            valid_only,
            limit,
        } => {
            let filter = LapFilter {
                driver_name: driver,
                track_name: track,
                valid_only,
                limit: Some(limit),
            };
            let laps = db.list_laps(team_id, &filter)?;
            if laps.is_empty() {
                println!("No laps found.");
            }
            for lap in laps {
                println!(
                    "#{:<5} {:<20} {:<25} lap {:>3}  {}  {}{}",
                    lap.id,
                    lap.driver_name,
                    lap.track_name,
                    lap.lap_number,
                    format_lap_time(lap.lap_time_ms),
                    lap.source_format,
                    if lap.valid { "" } else { "  [invalid]" },
                );
            }
        }

        Commands::Telemetry { lap_id } => {
            let lap = db.get_lap(lap_id, team_id)?;
            let path = PathBuf::from(&lap.file_path);
            if !path.exists() {
                anyhow::bail!("Telemetry file not found: {}", path.display());
            }

            // Detect by content, fall back to the recorded source format
            let parser = registry
                .detect_parser(&path)
                .or_else(|| registry.get_parser(&lap.source_format))
                .with_context(|| {
                    format!("No parser available for format: {}", lap.source_format)
                })?;

            use std::io::Write;
            let stdout = std::io::stdout().lock();
            let mut out = std::io::BufWriter::new(stdout);
            for point in parser.stream_telemetry(&path)? {
                serde_json::to_writer(&mut out, &point)?;
                writeln!(out)?;
            }
        }

        Commands::Sessions => {
            let sessions = db.list_sessions(team_id)?;
            if sessions.is_empty() {
                println!("No sessions found.");
            }
            for session in sessions {
                println!(
                    "#{:<5} {}  {:<10} laps {:<3} best {}  avg {}  [{}]",
                    session.id,
                    session.session_date,
                    session.session_type.as_deref().unwrap_or("-"),
                    session.total_laps.unwrap_or(0),
                    session
                        .best_lap_time_ms
                        .map(format_lap_time)
                        .unwrap_or_else(|| "-".to_string()),
                    session
                        .average_lap_time_ms
                        .map(format_lap_time)
                        .unwrap_or_else(|| "-".to_string()),
                    session.data_source.as_deref().unwrap_or("manual"),
                );
            }
        }

        Commands::DeleteLap { lap_id } => {
            let lap = db.get_lap(lap_id, team_id)?;
            store.remove(std::path::Path::new(&lap.file_path))?;
            db.delete_lap(lap_id, team_id)?;
            println!("Deleted lap #{lap_id} ({})", lap.original_filename);
        }

        Commands::Stats => {
            let stats = db.team_stats(team_id)?;
            println!("Team {team_id}");
            println!("  laps:     {} ({} valid)", stats.total_laps, stats.valid_laps);
            println!("  sessions: {}", stats.total_sessions);
            println!("  drivers:  {}", stats.drivers);
            println!("  tracks:   {}", stats.tracks);
            println!("  karts:    {}", stats.karts);
        }
    }

    Ok(())
}

/// Format milliseconds as m:ss.mmm
fn format_lap_time(ms: i64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{minutes}:{seconds:02}.{millis:03}")
}
