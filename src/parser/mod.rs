pub mod rf2;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed {format} file {path}: {message}")]
    Malformed {
        format: &'static str,
        path: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Metadata extracted from a telemetry file header. Immutable once parsed.
#[derive(Debug, Clone, Serialize)]
pub struct LapMetadata {
    pub driver_name: String,
    pub track_name: String,
    /// Kart class/model
    pub car_name: String,
    /// Practice, Qualifying, Race
    pub event_type: String,
    pub session_date: NaiveDateTime,
    pub source_format: String,
}

/// Summary data for a single lap.
#[derive(Debug, Clone, Serialize)]
pub struct LapSummary {
    pub lap_number: i64,
    pub lap_time_ms: i64,
    pub sector1_ms: Option<i64>,
    pub sector2_ms: Option<i64>,
    pub sector3_ms: Option<i64>,
    pub sector4_ms: Option<i64>,
    pub valid: bool,

    // Conditions at time of lap
    pub weather: Option<String>,
    pub track_temp_c: Option<f64>,
    pub air_temp_c: Option<f64>,
    pub tire_compound: Option<String>,
}

/// Single telemetry sample point within a lap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryDataPoint {
    pub distance_m: f64,
    pub time_s: f64,
    pub speed_kmh: f64,
    pub throttle_pct: f64,
    pub brake_pct: f64,
    pub steering_pct: f64,
    pub gear: i32,
    pub rpm: f64,
    pub g_lat: Option<f64>,
    pub g_long: Option<f64>,
}

/// Complete parsed telemetry file result.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedTelemetry {
    pub metadata: LapMetadata,
    pub lap_summary: LapSummary,
    pub original_filename: String,
    pub file_path: String,
    pub telemetry_columns: Vec<String>,
    pub has_detailed_telemetry: bool,
}

/// A telemetry file format parser.
///
/// Implementations are registered with a [`ParserRegistry`] which dispatches
/// by sniffing file content (`can_parse`) or by format name.
pub trait TelemetryParser: Send + Sync {
    /// Stable format identifier (e.g. "RF2").
    fn format_name(&self) -> &'static str;

    /// Cheap structural sniff. Must never fail: any I/O or format problem
    /// means "not mine" and returns false.
    fn can_parse(&self, path: &Path) -> bool;

    /// Extract metadata from the header region without a full parse.
    /// Missing or short fields substitute documented defaults.
    fn parse_metadata(&self, path: &Path) -> Result<LapMetadata>;

    /// Full structural parse of the header block.
    fn parse(&self, path: &Path) -> Result<ParsedTelemetry>;

    /// Lazily stream telemetry sample points. The returned iterator is
    /// finite and non-restartable; call again to re-read from the start.
    /// Corrupt rows are skipped, never yielded as errors.
    fn stream_telemetry(&self, path: &Path)
    -> Result<Box<dyn Iterator<Item = TelemetryDataPoint>>>;
}

/// Registry of available telemetry parsers.
///
/// Append-only: populated once at startup, read thereafter. Detection runs
/// in registration order and the first parser whose `can_parse` returns true
/// wins, so more specific sniffers must be registered before general ones.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn TelemetryParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// Registry with all built-in parsers, in detection priority order.
    pub fn with_default_parsers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(rf2::Rf2Parser));
        registry
    }

    /// Append a parser. Names are not de-duplicated: lookups by name return
    /// the first match, detection still tries every entry.
    pub fn register(&mut self, parser: Box<dyn TelemetryParser>) {
        log::debug!("Registered telemetry parser: {}", parser.format_name());
        self.parsers.push(parser);
    }

    /// Auto-detect the appropriate parser for a file.
    pub fn detect_parser(&self, path: &Path) -> Option<&dyn TelemetryParser> {
        self.parsers
            .iter()
            .find(|p| p.can_parse(path))
            .map(|p| p.as_ref())
    }

    /// Get a specific parser by format name.
    pub fn get_parser(&self, format_name: &str) -> Option<&dyn TelemetryParser> {
        self.parsers
            .iter()
            .find(|p| p.format_name() == format_name)
            .map(|p| p.as_ref())
    }

    /// All registered format names, in registration order.
    pub fn available_formats(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.format_name()).collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_default_parsers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Sniffs any file whose first byte matches its marker.
    struct MarkerParser {
        name: &'static str,
        marker: u8,
    }

    impl TelemetryParser for MarkerParser {
        fn format_name(&self) -> &'static str {
            self.name
        }

        fn can_parse(&self, path: &Path) -> bool {
            std::fs::read(path)
                .map(|bytes| bytes.first() == Some(&self.marker))
                .unwrap_or(false)
        }

        fn parse_metadata(&self, _path: &Path) -> Result<LapMetadata> {
            unimplemented!()
        }

        fn parse(&self, _path: &Path) -> Result<ParsedTelemetry> {
            unimplemented!()
        }

        fn stream_telemetry(
            &self,
            _path: &Path,
        ) -> Result<Box<dyn Iterator<Item = TelemetryDataPoint>>> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    fn registry() -> ParserRegistry {
        let mut registry = ParserRegistry::new();
        registry.register(Box::new(MarkerParser {
            name: "ALPHA",
            marker: b'a',
        }));
        registry.register(Box::new(MarkerParser {
            name: "BRAVO",
            marker: b'b',
        }));
        registry
    }

    #[test]
    fn detect_returns_first_match_in_registration_order() {
        let registry = registry();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a-file").unwrap();

        let parser = registry.detect_parser(file.path()).unwrap();
        assert_eq!(parser.format_name(), "ALPHA");
        assert!(parser.can_parse(file.path()));
    }

    #[test]
    fn detect_returns_none_when_no_parser_matches() {
        let registry = registry();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"zzz").unwrap();

        assert!(registry.detect_parser(file.path()).is_none());
    }

    #[test]
    fn detect_on_missing_file_returns_none() {
        let registry = registry();
        assert!(
            registry
                .detect_parser(Path::new("/nonexistent/telemetry.csv"))
                .is_none()
        );
    }

    #[test]
    fn lookup_by_name() {
        let registry = registry();
        assert_eq!(registry.get_parser("BRAVO").unwrap().format_name(), "BRAVO");
        assert!(registry.get_parser("CHARLIE").is_none());
    }

    #[test]
    fn duplicate_names_first_registered_wins_on_lookup() {
        let mut registry = registry();
        registry.register(Box::new(MarkerParser {
            name: "ALPHA",
            marker: b'z',
        }));

        // Lookup by name resolves to the first ALPHA...
        let parser = registry.get_parser("ALPHA").unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"zzz").unwrap();
        assert!(!parser.can_parse(file.path()));

        // ...but detection still tries the second one.
        let detected = registry.detect_parser(file.path()).unwrap();
        assert_eq!(detected.format_name(), "ALPHA");
        assert!(detected.can_parse(file.path()));
    }

    #[test]
    fn available_formats_in_registration_order() {
        let registry = registry();
        assert_eq!(registry.available_formats(), vec!["ALPHA", "BRAVO"]);
    }

    #[test]
    fn default_registry_knows_rf2() {
        let registry = ParserRegistry::with_default_parsers();
        assert_eq!(registry.available_formats(), vec!["RF2"]);
    }
}
