//! Telemetry import pipeline.
//!
//! Each uploaded file is processed independently: save to the team store,
//! detect the format, parse, dedup by content hash, resolve or create the
//! driver/track/kart/session it belongs to, then persist the lap. One
//! file's failure never aborts the rest of the batch; errors are collected
//! per file and returned alongside the successes.

use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::TELEMETRY_EXTENSIONS;
use crate::db::models::{Lap, NewLap};
use crate::db::{Database, DbError};
use crate::parser::ParserRegistry;
use crate::storage::{StorageError, UploadStore};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unknown format")]
    UnknownFormat,
    #[error("Duplicate file (already imported)")]
    Duplicate,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Parse error: {0}")]
    Parse(#[from] crate::parser::ParseError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Outcome of one import batch.
pub struct ImportReport {
    pub uploaded: usize,
    pub laps: Vec<Lap>,
    /// Per-file error strings, keyed by filename ("name: reason").
    pub errors: Vec<String>,
    pub created_drivers: Vec<String>,
    pub created_tracks: Vec<String>,
    pub created_karts: Vec<String>,
}

/// Expand a mix of file and directory arguments into telemetry file paths.
/// Directories are walked recursively for known telemetry extensions.
pub fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let ext = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                if TELEMETRY_EXTENSIONS.contains(&ext.as_str()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

/// Import a batch of telemetry files for one team.
pub fn import_batch(
    db: &Database,
    registry: &ParserRegistry,
    store: &UploadStore,
    files: &[PathBuf],
    team_id: i64,
) -> Result<ImportReport> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message("Importing...");

    let mut report = ImportReport {
        uploaded: 0,
        laps: Vec::new(),
        errors: Vec::new(),
        created_drivers: Vec::new(),
        created_tracks: Vec::new(),
        created_karts: Vec::new(),
    };
    let mut created_drivers = BTreeSet::new();
    let mut created_tracks = BTreeSet::new();
    let mut created_karts = BTreeSet::new();
    let mut touched_sessions = BTreeSet::new();

    for file in files {
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.to_string_lossy().to_string());

        match import_one(
            db,
            registry,
            store,
            file,
            &filename,
            team_id,
            &mut created_drivers,
            &mut created_tracks,
            &mut created_karts,
            &mut touched_sessions,
        ) {
            Ok(lap) => {
                report.uploaded += 1;
                report.laps.push(lap);
            }
            Err(e) => {
                log::warn!("Import failed for {filename}: {e}");
                report.errors.push(format!("{filename}: {e}"));
            }
        }
        pb.inc(1);
    }

    // Refresh aggregates for every session that gained laps this batch
    for session_id in &touched_sessions {
        db.recompute_session_stats(*session_id)?;
    }

    pb.finish_with_message(format!(
        "Done: {} imported, {} errors",
        report.uploaded,
        report.errors.len()
    ));

    report.created_drivers = created_drivers.into_iter().collect();
    report.created_tracks = created_tracks.into_iter().collect();
    report.created_karts = created_karts.into_iter().collect();
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn import_one(
    db: &Database,
    registry: &ParserRegistry,
    store: &UploadStore,
    source: &Path,
    filename: &str,
    team_id: i64,
    created_drivers: &mut BTreeSet<String>,
    created_tracks: &mut BTreeSet<String>,
    created_karts: &mut BTreeSet<String>,
    touched_sessions: &mut BTreeSet<i64>,
) -> Result<Lap> {
    let stored = store.save(team_id, filename, source)?;

    let Some(parser) = registry.detect_parser(&stored) else {
        // Unknown format: nothing useful to keep, drop the stored copy
        store.remove(&stored)?;
        return Err(IngestError::UnknownFormat);
    };

    // Parse failures keep the stored file for later inspection; only the
    // unknown-format and duplicate branches clean up.
    let parsed = parser.parse(&stored)?;

    let file_hash = hash_file(&stored)?;
    if db.lap_hash_exists(&file_hash)? {
        store.remove(&stored)?;
        return Err(IngestError::Duplicate);
    }

    let (driver_id, driver_created) =
        db.find_or_create_driver(&parsed.metadata.driver_name, team_id)?;
    if driver_created {
        created_drivers.insert(parsed.metadata.driver_name.clone());
    }

    let (track_id, track_created) = db.find_or_create_track(&parsed.metadata.track_name)?;
    if track_created {
        created_tracks.insert(parsed.metadata.track_name.clone());
    }

    let (kart_id, kart_created) = db.find_or_create_kart(&parsed.metadata.car_name, team_id)?;
    if kart_created {
        created_karts.insert(parsed.metadata.car_name.clone());
    }

    let (session_id, _) = db.find_or_create_session(
        team_id,
        driver_id,
        track_id,
        kart_id,
        parsed.metadata.session_date,
    )?;
    touched_sessions.insert(session_id);

    if let Some(weather) = parsed.lap_summary.weather.as_deref() {
        db.adopt_session_weather(session_id, weather)?;
    }

    let lap_id = db.insert_lap(&NewLap {
        team_id,
        session_id,
        original_filename: filename.to_string(),
        file_path: stored.to_string_lossy().to_string(),
        file_hash,
        source_format: parsed.metadata.source_format.clone(),
        driver_name: parsed.metadata.driver_name.clone(),
        track_name: parsed.metadata.track_name.clone(),
        car_name: parsed.metadata.car_name.clone(),
        event_type: parsed.metadata.event_type.clone(),
        lap_number: parsed.lap_summary.lap_number,
        lap_time_ms: parsed.lap_summary.lap_time_ms,
        sector1_ms: parsed.lap_summary.sector1_ms,
        sector2_ms: parsed.lap_summary.sector2_ms,
        sector3_ms: parsed.lap_summary.sector3_ms,
        sector4_ms: parsed.lap_summary.sector4_ms,
        valid: parsed.lap_summary.valid,
        weather: parsed.lap_summary.weather.clone(),
        track_temp_c: parsed.lap_summary.track_temp_c,
        air_temp_c: parsed.lap_summary.air_temp_c,
        tire_compound: parsed.lap_summary.tire_compound.clone(),
        driver_id,
        track_id,
        kart_id,
        recorded_at: parsed.metadata.session_date,
        has_detailed_telemetry: parsed.has_detailed_telemetry,
    })?;

    let lap = db.get_lap(lap_id, team_id)?;
    Ok(lap)
}

/// SHA-256 of the file contents as 64 hex characters.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::LapFilter;
    use std::fs;

    fn rf2_file(dir: &Path, name: &str, driver: &str, lap_time: &str) -> PathBuf {
        let content = format!(
            "player,v8,{driver},0,S1\n\
             Game,Version,Date,Track,Car,Event,LapTime,S1,S2,S3\n\
             KartSim,1.0,2024-05-12 14:30:00,Genk Karting,KZ2,Practice,{lap_time},15.1,15.2,14.93,\n\
             TrackID,TrackLen,Weather,Tire,Valid,LapNumber\n\
             gen-01,1360,2,1,cloudy,0,soft,true,0,0,3,0,0,0,0,0,28.5,22.0\n\
             SetupHeader\n\
             SetupData\n\
             dist,lap,time,sector,posx,speed,rpm,throttle,brake,steering,clutch,gear\n\
             0.0,3,0.1,1,0,62.5,9500,100,0,2.1,0,3\n"
        );
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn setup() -> (Database, ParserRegistry, UploadStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let registry = ParserRegistry::with_default_parsers();
        let store = UploadStore::new(dir.path().join("uploads"));
        (db, registry, store, dir)
    }

    fn stored_files(store: &UploadStore, team_id: i64) -> Vec<PathBuf> {
        let dir = store.root().join(team_id.to_string()).join("telemetry");
        if !dir.exists() {
            return Vec::new();
        }
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn import_creates_entities_and_aggregates() {
        let (db, registry, store, dir) = setup();
        let file = rf2_file(dir.path(), "lap3.csv", "Alex", "45.230");

        let report = import_batch(&db, &registry, &store, &[file], 1).unwrap();
        assert_eq!(report.uploaded, 1);
        assert!(report.errors.is_empty());
        assert_eq!(report.created_drivers, vec!["Alex"]);
        assert_eq!(report.created_tracks, vec!["Genk Karting"]);
        assert_eq!(report.created_karts, vec!["KZ2"]);

        let lap = &report.laps[0];
        assert_eq!(lap.lap_time_ms, 45_230);
        assert_eq!(lap.original_filename, "lap3.csv");
        assert_eq!(lap.file_hash.as_deref().map(str::len), Some(64));

        let session = db.get_session(lap.session_id.unwrap(), 1).unwrap();
        assert_eq!(session.total_laps, Some(1));
        assert_eq!(session.best_lap_time_ms, Some(45_230));
        // Parsed weather replaced the creation default
        assert_eq!(session.weather_condition.as_deref(), Some("cloudy"));
        assert_eq!(session.data_source.as_deref(), Some("telemetry_import"));
    }

    #[test]
    fn same_day_files_share_a_session() {
        let (db, registry, store, dir) = setup();
        let a = rf2_file(dir.path(), "lap3.csv", "Alex", "45.230");
        let b = rf2_file(dir.path(), "lap4.csv", "Alex", "44.950");

        let report = import_batch(&db, &registry, &store, &[a, b], 1).unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.laps[0].session_id, report.laps[1].session_id);

        let session = db.get_session(report.laps[0].session_id.unwrap(), 1).unwrap();
        assert_eq!(session.total_laps, Some(2));
        assert_eq!(session.best_lap_time_ms, Some(44_950));
        assert_eq!(session.average_lap_time_ms, Some(45_090));
    }

    #[test]
    fn duplicate_content_is_rejected_across_batches() {
        let (db, registry, store, dir) = setup();
        let file = rf2_file(dir.path(), "lap3.csv", "Alex", "45.230");

        let first = import_batch(&db, &registry, &store, &[file.clone()], 1).unwrap();
        assert_eq!(first.uploaded, 1);

        // Byte-identical re-upload: zero new laps, one duplicate error,
        // nothing new left in the store.
        let second = import_batch(&db, &registry, &store, &[file], 1).unwrap();
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.errors.len(), 1);
        assert!(second.errors[0].contains("Duplicate file"));
        assert!(second.created_drivers.is_empty());
        assert_eq!(db.list_laps(1, &LapFilter::default()).unwrap().len(), 1);
        assert_eq!(stored_files(&store, 1).len(), 1);
    }

    #[test]
    fn unknown_format_is_reported_and_stored_copy_deleted() {
        let (db, registry, store, dir) = setup();
        let bogus = dir.path().join("notes.csv");
        fs::write(&bogus, "just,some,notes\n").unwrap();

        let report = import_batch(&db, &registry, &store, &[bogus], 1).unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.errors, vec!["notes.csv: Unknown format".to_string()]);
        assert!(stored_files(&store, 1).is_empty());
    }

    #[test]
    fn parse_failure_is_reported_but_stored_copy_retained() {
        let (db, registry, store, dir) = setup();
        // Sniffs as RF2 but carries an unparseable lap time
        let broken = dir.path().join("broken.csv");
        fs::write(
            &broken,
            "player,v8,Alex,0,S1\n\
             LapHeader\n\
             KartSim,1.0,2024-05-12,Genk,KZ2,Practice,not-a-number,15.1\n",
        )
        .unwrap();

        let report = import_batch(&db, &registry, &store, &[broken], 1).unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("broken.csv: "));
        // Known asymmetry with the unknown-format branch: the saved file stays
        assert_eq!(stored_files(&store, 1).len(), 1);
    }

    #[test]
    fn one_bad_file_does_not_abort_the_batch() {
        let (db, registry, store, dir) = setup();
        let good = rf2_file(dir.path(), "lap3.csv", "Alex", "45.230");
        let bogus = dir.path().join("notes.csv");
        fs::write(&bogus, "just,some,notes\n").unwrap();
        let also_good = rf2_file(dir.path(), "lap4.csv", "Sam", "46.100");

        let report = import_batch(&db, &registry, &store, &[good, bogus, also_good], 1).unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.created_drivers, vec!["Alex", "Sam"]);
    }

    #[test]
    fn collect_files_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("stint1");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("lap1.csv"), "x").unwrap();
        fs::write(nested.join("readme.md"), "x").unwrap();
        let single = dir.path().join("lap2.csv");
        fs::write(&single, "x").unwrap();

        let mut files = collect_files(&[dir.path().to_path_buf()]);
        files.sort();
        assert_eq!(files.len(), 2);

        // Explicit file arguments pass through untouched
        let direct = collect_files(&[single.clone()]);
        assert_eq!(direct, vec![single]);
    }

    #[test]
    fn hash_is_stable_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.csv");
        fs::write(&path, b"player,v8,Alex").unwrap();

        let a = hash_file(&path).unwrap();
        let b = hash_file(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
