//! Relational persistence. Generalizes the original `db/db.py` +
//! `db/repositories/*.py` split into a single typed repository over a
//! `sqlx` SQLite pool, matching the bit-exact column layout the GTFS
//! emitter and read API depend on.

use chrono::{NaiveDateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteQueryResult};
use sqlx::{Row, SqlitePool};

use crate::error::PipelineError;
use crate::model::{Incident, IncidentStatus, LatLon, Location, Report, ReportType, User};

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_reports_location ON reports(location_id)",
    "CREATE INDEX IF NOT EXISTS idx_reports_type ON reports(type_id)",
    "CREATE INDEX IF NOT EXISTS idx_reports_created_at ON reports(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_reports_location_type_created ON reports(location_id, type_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_incidents_location ON incidents(location_id)",
    "CREATE INDEX IF NOT EXISTS idx_incidents_type ON incidents(type_id)",
    "CREATE INDEX IF NOT EXISTS idx_incidents_last_updated ON incidents(last_updated)",
    "CREATE INDEX IF NOT EXISTS idx_incidents_location_type_updated ON incidents(location_id, type_id, last_updated)",
];

/// Grace period after which a stale `active` incident with no fresh reports
/// transitions to `resolved` (see `sweep_stale_incidents`).
pub const STALE_GRACE_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// A report row joined with its reporter's current reputation and its own
/// type name, as needed by the Step-E recomputation.
#[derive(Clone)]
pub struct ReportWithReporter {
    pub report: Report,
    pub reporter_trust_score: f64,
    pub reporter_reports_made: i64,
    pub report_type_name: String,
}

impl Store {
    pub async fn connect(db_path: &str) -> Result<Self, PipelineError> {
        // A pooled `:memory:` database gives each connection its own
        // isolated database unless confined to a single connection, so
        // tests (which always pass ":memory:") get a pool of size one.
        let (url, max_connections) = if db_path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite://{db_path}?mode=rwc"), 8)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        store.seed_report_types().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PipelineError> {
        sqlx::query("PRAGMA foreign_keys = ON").execute(&self.pool).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS report_types (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                coords_lat REAL NOT NULL,
                coords_lon REAL NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                trust_score REAL NOT NULL DEFAULT 1.0,
                reports_made INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                location_id INTEGER NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
                type_id INTEGER NOT NULL REFERENCES report_types(id),
                delay_minutes INTEGER,
                incident_id INTEGER REFERENCES incidents(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location_id INTEGER NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
                type_id INTEGER NOT NULL REFERENCES report_types(id),
                avg_delay REAL,
                trust_score REAL NOT NULL DEFAULT 0.0,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        for idx in INDEXES {
            sqlx::query(idx).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Fills the closed `report_types` set. Idempotent.
    pub async fn seed_report_types(&self) -> Result<(), PipelineError> {
        for t in ReportType::ALL {
            sqlx::query("INSERT OR IGNORE INTO report_types (name) VALUES (?)")
                .bind(t.db_name())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Resolves a closed-set report type to its row id. Absence indicates
    /// schema drift (seeding did not run, or the row was deleted) and is
    /// fatal.
    pub async fn type_id(&self, rt: ReportType) -> Result<i64, PipelineError> {
        let row = sqlx::query("SELECT id FROM report_types WHERE name = ?")
            .bind(rt.db_name())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.get::<i64, _>("id"))
            .ok_or_else(|| PipelineError::UnknownType(rt.db_name().to_string()))
    }

    pub async fn user_by_name(&self, username: &str) -> Result<Option<User>, PipelineError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, trust_score, reports_made, created_at
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn user_by_id(&self, id: i64) -> Result<Option<User>, PipelineError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, trust_score, reports_made, created_at
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Creates a user. Users are created externally to the core pipeline
    /// (e.g. by an onboarding flow or, in tests, directly); the pipeline
    /// itself only ever reads and updates existing rows.
    pub async fn create_user(&self, username: &str, email: &str) -> Result<i64, PipelineError> {
        let now = Utc::now().naive_utc();
        let result: SqliteQueryResult = sqlx::query(
            "INSERT INTO users (username, email, trust_score, reports_made, created_at)
             VALUES (?, ?, 1.0, 0, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_trust_score(&self, user_id: i64, new_score: f64) -> Result<(), PipelineError> {
        sqlx::query("UPDATE users SET trust_score = ? WHERE id = ?")
            .bind(new_score.clamp(0.0, 1.0))
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn location_id_by_name(&self, name: &str) -> Result<Option<i64>, PipelineError> {
        let row = sqlx::query("SELECT id FROM locations WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    pub async fn add_location(&self, name: &str, pos: LatLon) -> Result<i64, PipelineError> {
        let result = sqlx::query(
            "INSERT INTO locations (name, coords_lat, coords_lon) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(pos.latitude)
        .bind(pos.longitude)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn location_name(&self, id: i64) -> Result<Option<String>, PipelineError> {
        let row = sqlx::query("SELECT name FROM locations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("name")))
    }

    pub async fn list_locations(&self) -> Result<Vec<Location>, PipelineError> {
        let rows = sqlx::query_as::<_, Location>(
            "SELECT id, name, coords_lat, coords_lon FROM locations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_report_types(&self) -> Result<Vec<(i64, String)>, PipelineError> {
        let rows = sqlx::query("SELECT id, name FROM report_types ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("name")))
            .collect())
    }

    /// Inserts a report and increments the reporter's `reports_made` in one
    /// transaction (Step B). Returns the new report id and its `created_at`.
    pub async fn insert_report_and_increment(
        &self,
        user_id: i64,
        location_id: i64,
        type_id: i64,
        delay_minutes: Option<i64>,
    ) -> Result<(i64, NaiveDateTime), PipelineError> {
        let now = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO reports (user_id, location_id, type_id, delay_minutes, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(location_id)
        .bind(type_id)
        .bind(delay_minutes)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let report_id = result.last_insert_rowid();

        sqlx::query("UPDATE users SET reports_made = reports_made + 1 WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((report_id, now))
    }

    pub async fn assign_report_to_incident(&self, report_id: i64, incident_id: i64) -> Result<(), PipelineError> {
        sqlx::query("UPDATE reports SET incident_id = ? WHERE id = ?")
            .bind(incident_id)
            .bind(report_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The unique `active` incident at `location_id` with the greatest
    /// `last_updated`, if one exists (I3: there can be at most one).
    pub async fn active_incident_by_location(&self, location_id: i64) -> Result<Option<Incident>, PipelineError> {
        let incident = sqlx::query_as::<_, Incident>(
            "SELECT id, location_id, type_id, avg_delay, trust_score, status, created_at, last_updated
             FROM incidents
             WHERE location_id = ? AND status = 'active'
             ORDER BY last_updated DESC
             LIMIT 1",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(incident)
    }

    pub async fn insert_incident(
        &self,
        location_id: i64,
        type_id: i64,
        avg_delay: Option<f64>,
        trust_score: f64,
        status: IncidentStatus,
    ) -> Result<i64, PipelineError> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "INSERT INTO incidents (location_id, type_id, avg_delay, trust_score, status, created_at, last_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(location_id)
        .bind(type_id)
        .bind(avg_delay)
        .bind(trust_score.clamp(0.0, 1.0))
        .bind(status.db_name())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn incident(&self, id: i64) -> Result<Option<Incident>, PipelineError> {
        let incident = sqlx::query_as::<_, Incident>(
            "SELECT id, location_id, type_id, avg_delay, trust_score, status, created_at, last_updated
             FROM incidents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(incident)
    }

    pub async fn list_incidents(&self) -> Result<Vec<Incident>, PipelineError> {
        let rows = sqlx::query_as::<_, Incident>(
            "SELECT id, location_id, type_id, avg_delay, trust_score, status, created_at, last_updated
             FROM incidents ORDER BY last_updated DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Incidents enriched with their location's name, as the read API
    /// returns them.
    pub async fn list_incidents_with_location_name(&self) -> Result<Vec<(Incident, String)>, PipelineError> {
        let incidents = self.list_incidents().await?;
        let mut out = Vec::with_capacity(incidents.len());
        for incident in incidents {
            let name = self.location_name(incident.location_id).await?.unwrap_or_default();
            out.push((incident, name));
        }
        Ok(out)
    }

    pub async fn list_reports(&self) -> Result<Vec<Report>, PipelineError> {
        let rows = sqlx::query_as::<_, Report>(
            "SELECT id, user_id, location_id, type_id, delay_minutes, incident_id, created_at
             FROM reports ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn reports_by_incident(&self, incident_id: i64) -> Result<Vec<Report>, PipelineError> {
        let rows = sqlx::query_as::<_, Report>(
            "SELECT id, user_id, location_id, type_id, delay_minutes, incident_id, created_at
             FROM reports WHERE incident_id = ? ORDER BY created_at DESC",
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Reports linked to an incident, each joined with its reporter's
    /// current reputation — exactly the inputs Step E needs.
    pub async fn reports_with_reporters(&self, incident_id: i64) -> Result<Vec<ReportWithReporter>, PipelineError> {
        let rows = sqlx::query(
            "SELECT r.id, r.user_id, r.location_id, r.type_id, r.delay_minutes, r.incident_id, r.created_at,
                    u.trust_score AS reporter_trust_score, u.reports_made AS reporter_reports_made,
                    rt.name AS report_type_name
             FROM reports r
             JOIN users u ON u.id = r.user_id
             JOIN report_types rt ON rt.id = r.type_id
             WHERE r.incident_id = ?
             ORDER BY r.created_at DESC",
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ReportWithReporter {
                report: Report {
                    id: r.get("id"),
                    user_id: r.get("user_id"),
                    location_id: r.get("location_id"),
                    type_id: r.get("type_id"),
                    delay_minutes: r.get("delay_minutes"),
                    incident_id: r.get("incident_id"),
                    created_at: r.get("created_at"),
                },
                reporter_trust_score: r.get("reporter_trust_score"),
                reporter_reports_made: r.get("reporter_reports_made"),
                report_type_name: r.get("report_type_name"),
            })
            .collect())
    }

    /// Step E write: `type -> avg_delay -> trust -> last_updated`, all
    /// inside one transaction.
    pub async fn recompute_incident(
        &self,
        incident_id: i64,
        type_id: i64,
        avg_delay: Option<f64>,
        trust_score: f64,
    ) -> Result<(), PipelineError> {
        let now = Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE incidents SET type_id = ? WHERE id = ?")
            .bind(type_id)
            .bind(incident_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE incidents SET avg_delay = ? WHERE id = ?")
            .bind(avg_delay)
            .bind(incident_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE incidents SET trust_score = ? WHERE id = ?")
            .bind(trust_score.clamp(0.0, 1.0))
            .bind(incident_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE incidents SET last_updated = ? WHERE id = ?")
            .bind(now)
            .bind(incident_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_incident_status(&self, incident_id: i64, status: IncidentStatus) -> Result<(), PipelineError> {
        sqlx::query("UPDATE incidents SET status = ?, last_updated = ? WHERE id = ?")
            .bind(status.db_name())
            .bind(Utc::now().naive_utc())
            .bind(incident_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `active` incidents whose `last_updated` is at or after `since`,
    /// joined with their location name. Used by the GTFS emitter.
    pub async fn active_incidents_updated_since(
        &self,
        since: NaiveDateTime,
    ) -> Result<Vec<(Incident, String)>, PipelineError> {
        let incidents = sqlx::query_as::<_, Incident>(
            "SELECT id, location_id, type_id, avg_delay, trust_score, status, created_at, last_updated
             FROM incidents
             WHERE status = 'active' AND last_updated >= ?
             ORDER BY last_updated DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(incidents.len());
        for incident in incidents {
            let name = self.location_name(incident.location_id).await?.unwrap_or_default();
            out.push((incident, name));
        }
        Ok(out)
    }

    /// Applies the staleness rule in application code (SQLite has no
    /// portable `INTERVAL` arithmetic): any `active` incident whose
    /// `last_updated + avg_delay + grace` has passed transitions to
    /// `resolved`. Returns the number of incidents transitioned.
    pub async fn sweep_stale_incidents(&self) -> Result<usize, PipelineError> {
        let now = Utc::now().naive_utc();
        let active = sqlx::query_as::<_, Incident>(
            "SELECT id, location_id, type_id, avg_delay, trust_score, status, created_at, last_updated
             FROM incidents WHERE status = 'active'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut transitioned = 0;
        for incident in active {
            let avg_delay_minutes = incident.avg_delay.unwrap_or(0.0).max(0.0);
            let deadline = incident.last_updated
                + chrono::Duration::minutes(avg_delay_minutes.round() as i64)
                + chrono::Duration::minutes(STALE_GRACE_MINUTES);
            if now > deadline {
                self.set_incident_status(incident.id, IncidentStatus::Resolved).await?;
                transitioned += 1;
            }
        }
        Ok(transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        Store::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn seeds_the_closed_type_set() {
        let store = test_store().await;
        let types = store.list_report_types().await.unwrap();
        assert_eq!(types.len(), ReportType::ALL.len());
        for t in ReportType::ALL {
            assert!(store.type_id(t).await.is_ok());
        }
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = test_store().await;
        store.seed_report_types().await.unwrap();
        let types = store.list_report_types().await.unwrap();
        assert_eq!(types.len(), ReportType::ALL.len());
    }

    #[tokio::test]
    async fn location_is_created_on_first_reference() {
        let store = test_store().await;
        assert!(store.location_id_by_name("L1").await.unwrap().is_none());
        let id = store.add_location("L1", LatLon::new(50.0, 19.0)).await.unwrap();
        assert_eq!(store.location_id_by_name("L1").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn report_insert_increments_reports_made() {
        let store = test_store().await;
        let uid = store.create_user("alice", "alice@example.com").await.unwrap();
        let lid = store.add_location("L1", LatLon::new(50.0, 19.0)).await.unwrap();
        let tid = store.type_id(ReportType::Delay).await.unwrap();

        store.insert_report_and_increment(uid, lid, tid, Some(10)).await.unwrap();
        let user = store.user_by_id(uid).await.unwrap().unwrap();
        assert_eq!(user.reports_made, 1);

        store.insert_report_and_increment(uid, lid, tid, Some(5)).await.unwrap();
        let user = store.user_by_id(uid).await.unwrap().unwrap();
        assert_eq!(user.reports_made, 2);
    }

    #[tokio::test]
    async fn at_most_one_active_incident_per_location() {
        let store = test_store().await;
        let lid = store.add_location("L1", LatLon::new(50.0, 19.0)).await.unwrap();
        let tid = store.type_id(ReportType::Delay).await.unwrap();

        let iid = store.insert_incident(lid, tid, None, 0.0, IncidentStatus::Active).await.unwrap();
        let active = store.active_incident_by_location(lid).await.unwrap().unwrap();
        assert_eq!(active.id, iid);

        store.set_incident_status(iid, IncidentStatus::Resolved).await.unwrap();
        assert!(store.active_incident_by_location(lid).await.unwrap().is_none());
    }
}
