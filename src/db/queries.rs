use super::models::{Lap, LapFilter, NewLap, Session, TeamStats};
use super::{Database, DbError, Result};
use chrono::NaiveDateTime;
use rusqlite::{Row, params};

/// Storage format for datetimes (lexicographically sortable).
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Marker distinguishing sessions created by telemetry import from manually
/// created ones. Import preferentially reuses these.
pub const SOURCE_TELEMETRY_IMPORT: &str = "telemetry_import";

/// Default weather assigned at session creation; the first non-default
/// parsed value replaces it.
pub const DEFAULT_WEATHER: &str = "sunny";

impl Database {
    /// Find a driver by name within the team, creating one if absent.
    /// Returns (id, created).
    pub fn find_or_create_driver(&self, name: &str, team_id: i64) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM drivers WHERE name = ?1 AND team_id = ?2",
                params![name, team_id],
                |row| row.get(0),
            )
            .ok();
        if let Some(id) = existing {
            return Ok((id, false));
        }

        self.conn.execute(
            "INSERT INTO drivers (team_id, name) VALUES (?1, ?2)",
            params![team_id, name],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    /// Find a track by name, creating one if absent. Tracks are global,
    /// not team-scoped. Returns (id, created).
    pub fn find_or_create_track(&self, name: &str) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM tracks WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .ok();
        if let Some(id) = existing {
            return Ok((id, false));
        }

        self.conn
            .execute("INSERT INTO tracks (name) VALUES (?1)", params![name])?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    /// Find a kart by chassis name within the team, creating one if absent.
    /// Returns (id, created).
    pub fn find_or_create_kart(&self, name: &str, team_id: i64) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM karts WHERE chassis_brand = ?1 AND team_id = ?2",
                params![name, team_id],
                |row| row.get(0),
            )
            .ok();
        if let Some(id) = existing {
            return Ok((id, false));
        }

        self.conn.execute(
            "INSERT INTO karts (team_id, chassis_brand, chassis_model) VALUES (?1, ?2, ?2)",
            params![team_id, name],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    /// Find an import-created session for the same team, driver, track,
    /// kart, and calendar day, or create a fresh one with default
    /// conditions. Returns (id, created).
    pub fn find_or_create_session(
        &self,
        team_id: i64,
        driver_id: i64,
        track_id: i64,
        kart_id: i64,
        session_date: NaiveDateTime,
    ) -> Result<(i64, bool)> {
        let day = session_date.format("%Y-%m-%d").to_string();

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM sessions
                 WHERE team_id = ?1 AND driver_id = ?2 AND track_id = ?3 AND kart_id = ?4
                   AND date(session_date) = ?5
                   AND data_source = ?6",
                params![
                    team_id,
                    driver_id,
                    track_id,
                    kart_id,
                    day,
                    SOURCE_TELEMETRY_IMPORT
                ],
                |row| row.get(0),
            )
            .ok();
        if let Some(id) = existing {
            return Ok((id, false));
        }

        self.conn.execute(
            "INSERT INTO sessions (
                team_id, driver_id, track_id, kart_id, session_date,
                session_type, data_source, weather_condition, track_condition
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'Practice', ?6, ?7, 'dry')",
            params![
                team_id,
                driver_id,
                track_id,
                kart_id,
                session_date.format(DATETIME_FORMAT).to_string(),
                SOURCE_TELEMETRY_IMPORT,
                DEFAULT_WEATHER,
            ],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    /// Adopt a parsed weather value if the session is still at its creation
    /// default. First non-default value wins per session.
    pub fn adopt_session_weather(&self, session_id: i64, weather: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sessions SET weather_condition = ?1, updated_at = datetime('now')
             WHERE id = ?2 AND weather_condition = ?3",
            params![weather, session_id, DEFAULT_WEATHER],
        )?;
        Ok(())
    }

    /// Content-hash dedup check: has any lap been imported from a
    /// byte-identical file?
    pub fn lap_hash_exists(&self, file_hash: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM laps WHERE file_hash = ?1",
            params![file_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a lap row. Returns the lap id.
    pub fn insert_lap(&self, lap: &NewLap) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO laps (
                team_id, session_id,
                original_filename, file_path, file_hash, source_format,
                driver_name, track_name, car_name, event_type,
                lap_number, lap_time_ms,
                sector1_ms, sector2_ms, sector3_ms, sector4_ms, valid,
                weather, track_temp_c, air_temp_c, tire_compound,
                driver_id, track_id, kart_id,
                recorded_at, has_detailed_telemetry
            ) VALUES (
                ?1, ?2,
                ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10,
                ?11, ?12,
                ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21,
                ?22, ?23, ?24,
                ?25, ?26
            )",
            params![
                lap.team_id,
                lap.session_id,
                lap.original_filename,
                lap.file_path,
                lap.file_hash,
                lap.source_format,
                lap.driver_name,
                lap.track_name,
                lap.car_name,
                lap.event_type,
                lap.lap_number,
                lap.lap_time_ms,
                lap.sector1_ms,
                lap.sector2_ms,
                lap.sector3_ms,
                lap.sector4_ms,
                lap.valid,
                lap.weather,
                lap.track_temp_c,
                lap.air_temp_c,
                lap.tire_compound,
                lap.driver_id,
                lap.track_id,
                lap.kart_id,
                lap.recorded_at.format(DATETIME_FORMAT).to_string(),
                lap.has_detailed_telemetry,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Recompute a session's aggregates from its laps: total counts every
    /// lap, best/average consider valid laps only. Sessions with no valid
    /// laps get NULL best/average but a non-null total.
    pub fn recompute_session_stats(&self, session_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE sessions SET
                total_laps = (SELECT COUNT(*) FROM laps WHERE session_id = ?1),
                best_lap_time_ms = (
                    SELECT MIN(lap_time_ms) FROM laps WHERE session_id = ?1 AND valid = 1
                ),
                average_lap_time_ms = (
                    SELECT CAST(AVG(lap_time_ms) AS INTEGER)
                    FROM laps WHERE session_id = ?1 AND valid = 1
                ),
                updated_at = datetime('now')
             WHERE id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    pub fn get_lap(&self, lap_id: i64, team_id: i64) -> Result<Lap> {
        self.conn
            .query_row(
                &format!("{LAP_SELECT} WHERE id = ?1 AND team_id = ?2"),
                params![lap_id, team_id],
                lap_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::NotFound {
                    entity: "lap",
                    id: lap_id,
                },
                other => other.into(),
            })
    }

    /// List a team's laps, newest first then fastest first, with optional
    /// substring filters.
    pub fn list_laps(&self, team_id: i64, filter: &LapFilter) -> Result<Vec<Lap>> {
        let mut sql = format!("{LAP_SELECT} WHERE team_id = ?1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(team_id)];

        if let Some(driver) = &filter.driver_name {
            args.push(Box::new(format!("%{driver}%")));
            sql.push_str(&format!(" AND driver_name LIKE ?{}", args.len()));
        }
        if let Some(track) = &filter.track_name {
            args.push(Box::new(format!("%{track}%")));
            sql.push_str(&format!(" AND track_name LIKE ?{}", args.len()));
        }
        if filter.valid_only {
            sql.push_str(" AND valid = 1");
        }
        sql.push_str(" ORDER BY recorded_at DESC, lap_time_ms ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let laps = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), lap_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(laps)
    }

    /// Delete a lap row. The caller is responsible for removing the backing
    /// file (use the path from `get_lap` first).
    pub fn delete_lap(&self, lap_id: i64, team_id: i64) -> Result<()> {
        let affected = self.conn.execute(
            "DELETE FROM laps WHERE id = ?1 AND team_id = ?2",
            params![lap_id, team_id],
        )?;
        if affected == 0 {
            return Err(DbError::NotFound {
                entity: "lap",
                id: lap_id,
            });
        }
        Ok(())
    }

    pub fn get_session(&self, session_id: i64, team_id: i64) -> Result<Session> {
        self.conn
            .query_row(
                &format!("{SESSION_SELECT} WHERE id = ?1 AND team_id = ?2"),
                params![session_id, team_id],
                session_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::NotFound {
                    entity: "session",
                    id: session_id,
                },
                other => other.into(),
            })
    }

    pub fn list_sessions(&self, team_id: i64) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SESSION_SELECT} WHERE team_id = ?1 ORDER BY session_date DESC"
        ))?;
        let sessions = stmt
            .query_map(params![team_id], session_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub fn team_stats(&self, team_id: i64) -> Result<TeamStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, params![team_id], |row| row.get(0))?)
        };
        Ok(TeamStats {
            total_laps: count("SELECT COUNT(*) FROM laps WHERE team_id = ?1")?,
            valid_laps: count("SELECT COUNT(*) FROM laps WHERE team_id = ?1 AND valid = 1")?,
            total_sessions: count("SELECT COUNT(*) FROM sessions WHERE team_id = ?1")?,
            drivers: count("SELECT COUNT(*) FROM drivers WHERE team_id = ?1")?,
            tracks: self
                .conn
                .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?,
            karts: count("SELECT COUNT(*) FROM karts WHERE team_id = ?1")?,
        })
    }
}

const LAP_SELECT: &str = "SELECT
    id, team_id, session_id,
    original_filename, file_path, file_hash, source_format,
    driver_name, track_name, car_name, event_type,
    lap_number, lap_time_ms,
    sector1_ms, sector2_ms, sector3_ms, sector4_ms, valid,
    weather, track_temp_c, air_temp_c, tire_compound,
    has_detailed_telemetry
    FROM laps";

fn lap_from_row(row: &Row) -> rusqlite::Result<Lap> {
    Ok(Lap {
        id: row.get(0)?,
        team_id: row.get(1)?,
        session_id: row.get(2)?,
        original_filename: row.get(3)?,
        file_path: row.get(4)?,
        file_hash: row.get(5)?,
        source_format: row.get(6)?,
        driver_name: row.get(7)?,
        track_name: row.get(8)?,
        car_name: row.get(9)?,
        event_type: row.get(10)?,
        lap_number: row.get(11)?,
        lap_time_ms: row.get(12)?,
        sector1_ms: row.get(13)?,
        sector2_ms: row.get(14)?,
        sector3_ms: row.get(15)?,
        sector4_ms: row.get(16)?,
        valid: row.get(17)?,
        weather: row.get(18)?,
        track_temp_c: row.get(19)?,
        air_temp_c: row.get(20)?,
        tire_compound: row.get(21)?,
        has_detailed_telemetry: row.get(22)?,
    })
}

const SESSION_SELECT: &str = "SELECT
    id, team_id, driver_id, track_id, kart_id,
    session_date, session_type, data_source,
    weather_condition, track_condition,
    best_lap_time_ms, average_lap_time_ms, total_laps
    FROM sessions";

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        team_id: row.get(1)?,
        driver_id: row.get(2)?,
        track_id: row.get(3)?,
        kart_id: row.get(4)?,
        session_date: row.get(5)?,
        session_type: row.get(6)?,
        data_source: row.get(7)?,
        weather_condition: row.get(8)?,
        track_condition: row.get(9)?,
        best_lap_time_ms: row.get(10)?,
        average_lap_time_ms: row.get(11)?,
        total_laps: row.get(12)?,
    })
}
