//! rFactor 2 / KartSim telemetry parser.
//!
//! Parses CSV exports from the rF2 Telemetry Tool plugin (v15.04+).
//! The header is a fixed positional layout:
//!   line 1: metadata (player, version, driver_name, 0, session_id)
//!   line 2: lap summary header
//!   line 3: lap summary data (game, version, date, track, car, event, laptime, sectors...)
//!   line 4: session header
//!   line 5: session data (track_id, track_len, weather, tire, valid, lap_number...)
//!   line 6: setup header
//!   line 7: setup data
//!   line 8: telemetry column header
//!   line 9+: telemetry samples, one CSV row each

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{LapMetadata, LapSummary, ParsedTelemetry, Result, TelemetryDataPoint, TelemetryParser};

const FORMAT_NAME: &str = "RF2";

/// Number of header lines before the telemetry samples start.
const HEADER_LINES: usize = 8;

/// Date formats seen in exported files, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d"];

pub struct Rf2Parser;

impl Rf2Parser {
    /// Read up to `n` header lines, trimmed of line endings. Short files
    /// yield empty strings for the missing lines.
    fn read_header(path: &Path, n: usize) -> Result<Vec<String>> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            let mut line = String::new();
            reader.read_line(&mut line)?;
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(lines)
    }

    fn parse_session_date(raw: &str) -> NaiveDateTime {
        for format in DATE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
                return dt;
            }
            if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                return date.and_time(NaiveTime::MIN);
            }
        }
        log::debug!("Unparseable session date {raw:?}, falling back to now");
        chrono::Local::now().naive_local()
    }
}

/// Positional field access: `None` when the index is out of range.
fn field<'a>(parts: &'a [&str], index: usize) -> Option<&'a str> {
    parts.get(index).copied()
}

/// Positional string field, empty treated as absent.
fn text_field(parts: &[&str], index: usize) -> Option<String> {
    field(parts, index)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric field where only the position is optional: out-of-range → `None`,
/// but a value that is present yet unparseable is a malformed file.
fn num_field(parts: &[&str], index: usize, path: &Path) -> super::Result<Option<f64>> {
    match field(parts, index) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| malformed(path, index, raw)),
    }
}

/// Numeric field where absence and emptiness both mean "not recorded".
fn opt_num_field(parts: &[&str], index: usize, path: &Path) -> super::Result<Option<f64>> {
    match field(parts, index) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| malformed(path, index, raw)),
    }
}

fn malformed(path: &Path, index: usize, raw: &str) -> super::ParseError {
    super::ParseError::Malformed {
        format: FORMAT_NAME,
        path: path.to_string_lossy().to_string(),
        message: format!("unparseable numeric field at position {index}: {raw:?}"),
    }
}

/// Seconds → whole milliseconds, truncating. Zero means "no sector recorded".
fn sector_ms(seconds: Option<f64>) -> Option<i64> {
    seconds.filter(|s| *s != 0.0).map(|s| (s * 1000.0) as i64)
}

impl TelemetryParser for Rf2Parser {
    fn format_name(&self) -> &'static str {
        FORMAT_NAME
    }

    fn can_parse(&self, path: &Path) -> bool {
        // RF2 files start with: player,v8,DriverName,0,SessionID
        let first_line = match Self::read_header(path, 1) {
            Ok(lines) => lines.into_iter().next().unwrap_or_default(),
            Err(_) => return false,
        };
        let parts: Vec<&str> = first_line.split(',').collect();
        parts.len() >= 3 && parts[0] == "player"
    }

    fn parse_metadata(&self, path: &Path) -> Result<LapMetadata> {
        let lines = Self::read_header(path, 6)?;

        // Line 1: player,v8,DriverName,0,SessionID
        let meta_parts: Vec<&str> = lines[0].split(',').collect();
        let driver_name = field(&meta_parts, 2).unwrap_or("Unknown").to_string();

        // Line 3: Game,version,date,track,car,event,laptime,S1,S2,S3
        let lap_parts: Vec<&str> = lines[2].split(',').collect();
        let session_date = Self::parse_session_date(field(&lap_parts, 2).unwrap_or(""));
        let track_name = field(&lap_parts, 3).unwrap_or("Unknown Track").to_string();
        let car_name = field(&lap_parts, 4).unwrap_or("Unknown Kart").to_string();
        let event_type = field(&lap_parts, 5).unwrap_or("Practice").to_string();

        Ok(LapMetadata {
            driver_name,
            track_name,
            car_name,
            event_type,
            session_date,
            source_format: FORMAT_NAME.to_string(),
        })
    }

    fn parse(&self, path: &Path) -> Result<ParsedTelemetry> {
        let lines = Self::read_header(path, HEADER_LINES)?;
        let metadata = self.parse_metadata(path)?;

        // Line 3: lap summary
        let lap_parts: Vec<&str> = lines[2].split(',').collect();
        let lap_time_s = num_field(&lap_parts, 6, path)?.unwrap_or(0.0);

        // Line 5: session data
        let session_parts: Vec<&str> = lines[4].split(',').collect();
        let valid = field(&session_parts, 7)
            .unwrap_or("true")
            .eq_ignore_ascii_case("true");
        let lap_number = match field(&session_parts, 10) {
            None => 1,
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| malformed(path, 10, raw))?,
        };

        let lap_summary = LapSummary {
            lap_number,
            lap_time_ms: (lap_time_s * 1000.0) as i64,
            sector1_ms: sector_ms(opt_num_field(&lap_parts, 7, path)?),
            sector2_ms: sector_ms(opt_num_field(&lap_parts, 8, path)?),
            sector3_ms: sector_ms(opt_num_field(&lap_parts, 9, path)?),
            sector4_ms: sector_ms(opt_num_field(&lap_parts, 10, path)?),
            valid,
            weather: text_field(&session_parts, 4),
            track_temp_c: num_field(&session_parts, 16, path)?,
            air_temp_c: num_field(&session_parts, 17, path)?,
            tire_compound: text_field(&session_parts, 6),
        };

        // Line 8: telemetry column header
        let telemetry_columns = lines[7]
            .split(',')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ParsedTelemetry {
            metadata,
            lap_summary,
            original_filename: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_path: path.to_string_lossy().to_string(),
            telemetry_columns,
            has_detailed_telemetry: true,
        })
    }

    fn stream_telemetry(
        &self,
        path: &Path,
    ) -> Result<Box<dyn Iterator<Item = TelemetryDataPoint>>> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut skip = String::new();
        for _ in 0..HEADER_LINES {
            skip.clear();
            reader.read_line(&mut skip)?;
        }

        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader)
            .into_records();

        Ok(Box::new(Rf2TelemetryStream { records }))
    }
}

/// Lazy pull-based sample stream. Rows with too few fields or unparseable
/// numeric values are skipped so one corrupt row does not abort the lap.
struct Rf2TelemetryStream {
    records: csv::StringRecordsIntoIter<BufReader<File>>,
}

impl Iterator for Rf2TelemetryStream {
    type Item = TelemetryDataPoint;

    fn next(&mut self) -> Option<TelemetryDataPoint> {
        loop {
            match self.records.next()? {
                Ok(record) => {
                    if let Some(point) = parse_sample_row(&record) {
                        return Some(point);
                    }
                }
                Err(e) => {
                    log::debug!("Skipping unreadable telemetry row: {e}");
                }
            }
        }
    }
}

/// Fixed column indices per the rF2 plugin's 113-column sample layout.
fn parse_sample_row(row: &csv::StringRecord) -> Option<TelemetryDataPoint> {
    if row.len() < 10 {
        return None;
    }

    // Required columns: empty defaults to zero, garbage rejects the row.
    let required = |index: usize| -> Option<f64> {
        let raw = row.get(index)?;
        if raw.is_empty() {
            Some(0.0)
        } else {
            raw.trim().parse().ok()
        }
    };
    // Optional g-force columns: absent or empty is fine, garbage rejects.
    let optional = |index: usize| -> Option<Option<f64>> {
        match row.get(index) {
            Some(raw) if !raw.is_empty() => raw.trim().parse().ok().map(Some),
            _ => Some(None),
        }
    };

    Some(TelemetryDataPoint {
        distance_m: required(0)?,
        time_s: required(2)?,
        speed_kmh: required(5)?,
        rpm: required(6)?,
        throttle_pct: required(7)?,
        brake_pct: required(8)?,
        steering_pct: required(9)?,
        gear: required(11)? as i32,
        g_lat: optional(25)?,
        g_long: optional(26)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_file(telemetry_rows: &str) -> NamedTempFile {
        // Session line index map: weather@4, tire@6, valid@7, lap@10, temps@16/17
        let session_line =
            "gen-01,1360,2,1,sunny,0,soft,true,0,0,3,0,0,0,0,0,28.5,22.0";
        let content = format!(
            "player,v8,Alex,0,S1\n\
             Game,Version,Date,Track,Car,Event,LapTime,S1,S2,S3\n\
             KartSim,1.0,2024-05-12 14:30:00,Genk Karting,KZ2,Practice,45.230,15.1,15.2,14.93,\n\
             TrackID,TrackLen,Weather,Tire,Valid,LapNumber\n\
             {session_line}\n\
             SetupHeader\n\
             SetupData\n\
             dist,lap,time,sector,posx,speed,rpm,throttle,brake,steering,clutch,gear\n\
             {telemetry_rows}"
        );
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn sniffs_player_marker() {
        let file = sample_file("");
        assert!(Rf2Parser.can_parse(file.path()));

        let mut other = NamedTempFile::new().unwrap();
        other.write_all(b"lap_time,driver\n45.2,Alex\n").unwrap();
        assert!(!Rf2Parser.can_parse(other.path()));
    }

    #[test]
    fn can_parse_never_errors_on_missing_file() {
        assert!(!Rf2Parser.can_parse(Path::new("/nonexistent/lap.csv")));
    }

    #[test]
    fn metadata_from_header() {
        let file = sample_file("");
        let meta = Rf2Parser.parse_metadata(file.path()).unwrap();

        assert_eq!(meta.driver_name, "Alex");
        assert_eq!(meta.track_name, "Genk Karting");
        assert_eq!(meta.car_name, "KZ2");
        assert_eq!(meta.event_type, "Practice");
        assert_eq!(meta.source_format, "RF2");
        assert_eq!(
            meta.session_date,
            NaiveDate::from_ymd_opt(2024, 5, 12)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn metadata_defaults_on_short_header() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"player,v8,Alex\n").unwrap();

        let meta = Rf2Parser.parse_metadata(file.path()).unwrap();
        assert_eq!(meta.driver_name, "Alex");
        assert_eq!(meta.track_name, "Unknown Track");
        assert_eq!(meta.car_name, "Unknown Kart");
        assert_eq!(meta.event_type, "Practice");
    }

    #[test]
    fn date_only_falls_back_to_midnight() {
        let date = Rf2Parser::parse_session_date("2024-05-12");
        assert_eq!(
            date,
            NaiveDate::from_ymd_opt(2024, 5, 12)
                .unwrap()
                .and_time(NaiveTime::MIN)
        );
    }

    #[test]
    fn full_parse_converts_times_to_ms() {
        let file = sample_file("");
        let parsed = Rf2Parser.parse(file.path()).unwrap();

        assert_eq!(parsed.lap_summary.lap_time_ms, 45230);
        assert_eq!(parsed.lap_summary.sector1_ms, Some(15100));
        assert_eq!(parsed.lap_summary.sector2_ms, Some(15200));
        assert_eq!(parsed.lap_summary.sector3_ms, Some(14930));
        assert_eq!(parsed.lap_summary.sector4_ms, None);
        assert!(parsed.lap_summary.valid);
        assert_eq!(parsed.lap_summary.lap_number, 3);
        assert_eq!(parsed.lap_summary.weather.as_deref(), Some("sunny"));
        assert_eq!(parsed.lap_summary.tire_compound.as_deref(), Some("soft"));
        assert_eq!(parsed.lap_summary.track_temp_c, Some(28.5));
        assert_eq!(parsed.lap_summary.air_temp_c, Some(22.0));
        assert!(parsed.has_detailed_telemetry);
        assert_eq!(parsed.telemetry_columns.len(), 12);
        assert_eq!(parsed.telemetry_columns[0], "dist");
    }

    #[test]
    fn parse_rejects_garbage_numerics() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"player,v8,Alex,0,S1\n\
              LapHeader\n\
              KartSim,1.0,2024-05-12,Genk Karting,KZ2,Practice,not-a-number,15.1\n",
        )
        .unwrap();

        let err = Rf2Parser.parse(file.path()).unwrap_err();
        assert!(matches!(err, crate::parser::ParseError::Malformed { .. }));
    }

    #[test]
    fn parse_defaults_on_missing_positions() {
        // Header block with short lines: missing positions become defaults,
        // they do not error.
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"player,v8,Alex\n").unwrap();

        let parsed = Rf2Parser.parse(file.path()).unwrap();
        assert_eq!(parsed.lap_summary.lap_time_ms, 0);
        assert_eq!(parsed.lap_summary.lap_number, 1);
        assert_eq!(parsed.lap_summary.sector1_ms, None);
        assert!(parsed.lap_summary.valid);
        assert_eq!(parsed.lap_summary.weather, None);
        assert_eq!(parsed.lap_summary.track_temp_c, None);
        assert!(parsed.telemetry_columns.is_empty());
    }

    #[test]
    fn stream_skips_corrupt_rows() {
        // Columns: dist@0 time@2 speed@5 rpm@6 throttle@7 brake@8 steering@9 gear@11
        let rows = "\
0.0,3,0.1,1,0,62.5,9500,100,0,2.1,0,3\n\
not,a,valid,row\n\
5.2,3,0.2,1,0,64.0,9650,100,0,1.8,0,3\n\
10.4,3,0.3,1,0,garbage,9700,100,0,1.5,0,3\n\
15.6,3,0.4,1,0,66.1,9800,95,0,1.2,0,4\n";
        let file = sample_file(rows);

        let points: Vec<_> = Rf2Parser.stream_telemetry(file.path()).unwrap().collect();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].speed_kmh, 62.5);
        assert_eq!(points[0].gear, 3);
        assert_eq!(points[2].gear, 4);
        assert_eq!(points[0].g_lat, None);
    }

    #[test]
    fn stream_parses_gforce_when_present() {
        let mut row = vec!["0"; 27];
        row[0] = "12.5";
        row[2] = "0.9";
        row[5] = "71.2";
        row[6] = "10200";
        row[7] = "100";
        row[8] = "0";
        row[9] = "0.4";
        row[11] = "4";
        row[25] = "1.45";
        row[26] = "-0.32";
        let file = sample_file(&(row.join(",") + "\n"));

        let points: Vec<_> = Rf2Parser.stream_telemetry(file.path()).unwrap().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].g_lat, Some(1.45));
        assert_eq!(points[0].g_long, Some(-0.32));
    }

    #[test]
    fn stream_is_lazy_and_restartable_by_reopening() {
        let file = sample_file("0.0,3,0.1,1,0,62.5,9500,100,0,2.1,0,3\n");

        let mut first = Rf2Parser.stream_telemetry(file.path()).unwrap();
        assert!(first.next().is_some());
        assert!(first.next().is_none());

        // A fresh call re-reads from the start.
        let again: Vec<_> = Rf2Parser.stream_telemetry(file.path()).unwrap().collect();
        assert_eq!(again.len(), 1);
    }
}
