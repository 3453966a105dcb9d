pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: entities resolved during import plus the lap archive itself.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS drivers (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id     INTEGER NOT NULL,
                name        TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(team_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_drivers_team ON drivers(team_id);

            -- Tracks are global, not team-scoped
            CREATE TABLE IF NOT EXISTS tracks (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS karts (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id         INTEGER NOT NULL,
                chassis_brand   TEXT NOT NULL,
                chassis_model   TEXT,
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(team_id, chassis_brand)
            );
            CREATE INDEX IF NOT EXISTS idx_karts_team ON karts(team_id);

            CREATE TABLE IF NOT EXISTS sessions (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id             INTEGER NOT NULL,
                driver_id           INTEGER NOT NULL REFERENCES drivers(id),
                track_id            INTEGER NOT NULL REFERENCES tracks(id),
                kart_id             INTEGER REFERENCES karts(id),
                session_date        TEXT NOT NULL,
                session_type        TEXT,
                data_source         TEXT,
                weather_condition   TEXT,
                track_condition     TEXT,

                -- Aggregates recomputed after each import batch
                best_lap_time_ms    INTEGER,
                average_lap_time_ms INTEGER,
                total_laps          INTEGER,

                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_team ON sessions(team_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_date ON sessions(session_date);
            CREATE INDEX IF NOT EXISTS idx_sessions_source ON sessions(data_source);

            CREATE TABLE IF NOT EXISTS laps (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id              INTEGER REFERENCES sessions(id),
                team_id                 INTEGER NOT NULL,

                -- File storage
                original_filename       TEXT NOT NULL,
                file_path               TEXT NOT NULL,
                file_hash               TEXT,
                source_format           TEXT NOT NULL DEFAULT 'RF2',

                -- Extracted metadata
                driver_name             TEXT NOT NULL,
                track_name              TEXT NOT NULL,
                car_name                TEXT NOT NULL,
                event_type              TEXT,

                -- Lap timing
                lap_number              INTEGER NOT NULL,
                lap_time_ms             INTEGER NOT NULL,
                sector1_ms              INTEGER,
                sector2_ms              INTEGER,
                sector3_ms              INTEGER,
                sector4_ms              INTEGER,
                valid                   INTEGER NOT NULL DEFAULT 1,

                -- Conditions at time of lap
                weather                 TEXT,
                track_temp_c            REAL,
                air_temp_c              REAL,
                tire_compound           TEXT,

                -- Linked entities
                driver_id               INTEGER REFERENCES drivers(id),
                track_id                INTEGER REFERENCES tracks(id),
                kart_id                 INTEGER REFERENCES karts(id),

                recorded_at             TEXT,
                imported_at             TEXT NOT NULL DEFAULT (datetime('now')),
                has_detailed_telemetry  INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_laps_team ON laps(team_id);
            CREATE INDEX IF NOT EXISTS idx_laps_session ON laps(session_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_laps_hash ON laps(file_hash);
            ",
        )?;
        Ok(())
    }
}
