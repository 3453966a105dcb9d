use chrono::NaiveDateTime;
use serde::Serialize;

/// Data for inserting a lap (import phase).
pub struct NewLap {
    pub team_id: i64,
    pub session_id: i64,

    pub original_filename: String,
    pub file_path: String,
    pub file_hash: String,
    pub source_format: String,

    pub driver_name: String,
    pub track_name: String,
    pub car_name: String,
    pub event_type: String,

    pub lap_number: i64,
    pub lap_time_ms: i64,
    pub sector1_ms: Option<i64>,
    pub sector2_ms: Option<i64>,
    pub sector3_ms: Option<i64>,
    pub sector4_ms: Option<i64>,
    pub valid: bool,

    pub weather: Option<String>,
    pub track_temp_c: Option<f64>,
    pub air_temp_c: Option<f64>,
    pub tire_compound: Option<String>,

    pub driver_id: i64,
    pub track_id: i64,
    pub kart_id: i64,

    pub recorded_at: NaiveDateTime,
    pub has_detailed_telemetry: bool,
}

/// A lap row read from the database.
#[derive(Debug, Clone, Serialize)]
pub struct Lap {
    pub id: i64,
    pub team_id: i64,
    pub session_id: Option<i64>,
    pub original_filename: String,
    pub file_path: String,
    pub file_hash: Option<String>,
    pub source_format: String,
    pub driver_name: String,
    pub track_name: String,
    pub car_name: String,
    pub event_type: Option<String>,
    pub lap_number: i64,
    pub lap_time_ms: i64,
    pub sector1_ms: Option<i64>,
    pub sector2_ms: Option<i64>,
    pub sector3_ms: Option<i64>,
    pub sector4_ms: Option<i64>,
    pub valid: bool,
    pub weather: Option<String>,
    pub track_temp_c: Option<f64>,
    pub air_temp_c: Option<f64>,
    pub tire_compound: Option<String>,
    pub has_detailed_telemetry: bool,
}

/// A session row: a bucket of laps sharing team, driver, track, kart, and
/// calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: i64,
    pub team_id: i64,
    pub driver_id: i64,
    pub track_id: i64,
    pub kart_id: Option<i64>,
    pub session_date: String,
    pub session_type: Option<String>,
    pub data_source: Option<String>,
    pub weather_condition: Option<String>,
    pub track_condition: Option<String>,
    pub best_lap_time_ms: Option<i64>,
    pub average_lap_time_ms: Option<i64>,
    pub total_laps: Option<i64>,
}

/// Optional filters for listing laps.
#[derive(Debug, Default)]
pub struct LapFilter {
    pub driver_name: Option<String>,
    pub track_name: Option<String>,
    pub valid_only: bool,
    pub limit: Option<usize>,
}

/// Library statistics for one team.
#[derive(Debug)]
pub struct TeamStats {
    pub total_laps: i64,
    pub valid_laps: i64,
    pub total_sessions: i64,
    pub drivers: i64,
    pub tracks: i64,
    pub karts: i64,
}
