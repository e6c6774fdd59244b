use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::DatabaseError;
use crate::models::*;

/// Persistence surface the pipeline writes run state through.
///
/// A run row is created once admission passes, updated on terminal failure,
/// and finalized with the verification fields on completion.
pub trait RunStore: Send + Sync {
    fn create_run(&self, record: &RunRecord) -> Result<(), DatabaseError>;

    fn update_run_status(
        &self,
        id: &Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError>;

    fn complete_run(
        &self,
        id: &Uuid,
        status: RunStatus,
        overall_score: f64,
        certificate_hash: &str,
    ) -> Result<(), DatabaseError>;

    fn get_run_status(&self, id: &Uuid) -> Result<Option<RunRecord>, DatabaseError>;

    fn list_runs(&self, user_id: &str, limit: usize) -> Result<Vec<RunRecord>, DatabaseError>;
}

// ═══════════════════════════════════════════
// Run Repository
// ═══════════════════════════════════════════

pub fn insert_run(conn: &Connection, run: &RunRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO runs (id, user_id, fiscal_year, document_ref, status, error_message,
         overall_score, certificate_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run.id.to_string(),
            run.user_id,
            run.fiscal_year,
            run.document_ref,
            run.status.as_str(),
            run.error_message,
            run.overall_score,
            run.certificate_hash,
            run.created_at,
            run.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_run(conn: &Connection, id: &Uuid) -> Result<Option<RunRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, fiscal_year, document_ref, status, error_message,
         overall_score, certificate_hash, created_at, updated_at
         FROM runs WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id.to_string()], |row| {
        Ok(RunRow {
            id: row.get::<_, String>(0)?,
            user_id: row.get::<_, String>(1)?,
            fiscal_year: row.get::<_, i32>(2)?,
            document_ref: row.get::<_, String>(3)?,
            status: row.get::<_, String>(4)?,
            error_message: row.get::<_, Option<String>>(5)?,
            overall_score: row.get::<_, Option<f64>>(6)?,
            certificate_hash: row.get::<_, Option<String>>(7)?,
            created_at: row.get::<_, DateTime<Utc>>(8)?,
            updated_at: row.get::<_, DateTime<Utc>>(9)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(run_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn update_run_status(
    conn: &Connection,
    id: &Uuid,
    status: RunStatus,
    error_message: Option<&str>,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE runs SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
        params![id.to_string(), status.as_str(), error_message, Utc::now()],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "run".to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn complete_run(
    conn: &Connection,
    id: &Uuid,
    status: RunStatus,
    overall_score: f64,
    certificate_hash: &str,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE runs SET status = ?2, overall_score = ?3, certificate_hash = ?4,
         error_message = NULL, updated_at = ?5 WHERE id = ?1",
        params![
            id.to_string(),
            status.as_str(),
            overall_score,
            certificate_hash,
            Utc::now(),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "run".to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn list_runs(
    conn: &Connection,
    user_id: &str,
    limit: usize,
) -> Result<Vec<RunRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, fiscal_year, document_ref, status, error_message,
         overall_score, certificate_hash, created_at, updated_at
         FROM runs WHERE user_id = ?1
         ORDER BY created_at DESC LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![user_id, limit as i64], |row| {
        Ok(RunRow {
            id: row.get::<_, String>(0)?,
            user_id: row.get::<_, String>(1)?,
            fiscal_year: row.get::<_, i32>(2)?,
            document_ref: row.get::<_, String>(3)?,
            status: row.get::<_, String>(4)?,
            error_message: row.get::<_, Option<String>>(5)?,
            overall_score: row.get::<_, Option<f64>>(6)?,
            certificate_hash: row.get::<_, Option<String>>(7)?,
            created_at: row.get::<_, DateTime<Utc>>(8)?,
            updated_at: row.get::<_, DateTime<Utc>>(9)?,
        })
    })?;

    let mut runs = Vec::new();
    for row in rows {
        runs.push(run_from_row(row?)?);
    }
    Ok(runs)
}

// Internal row type for RunRecord mapping
struct RunRow {
    id: String,
    user_id: String,
    fiscal_year: i32,
    document_ref: String,
    status: String,
    error_message: Option<String>,
    overall_score: Option<f64>,
    certificate_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn run_from_row(row: RunRow) -> Result<RunRecord, DatabaseError> {
    Ok(RunRecord {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        user_id: row.user_id,
        fiscal_year: row.fiscal_year,
        document_ref: row.document_ref,
        status: RunStatus::from_str(&row.status)?,
        error_message: row.error_message,
        overall_score: row.overall_score,
        certificate_hash: row.certificate_hash,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

// ═══════════════════════════════════════════
// SQLite-backed store
// ═══════════════════════════════════════════

/// [`RunStore`] over a single SQLite connection.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(super::sqlite::open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(super::sqlite::open_memory_database()?))
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("run store lock poisoned")
    }
}

impl RunStore for SqliteRunStore {
    fn create_run(&self, record: &RunRecord) -> Result<(), DatabaseError> {
        insert_run(&self.conn(), record)
    }

    fn update_run_status(
        &self,
        id: &Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        update_run_status(&self.conn(), id, status, error_message)
    }

    fn complete_run(
        &self,
        id: &Uuid,
        status: RunStatus,
        overall_score: f64,
        certificate_hash: &str,
    ) -> Result<(), DatabaseError> {
        complete_run(&self.conn(), id, status, overall_score, certificate_hash)
    }

    fn get_run_status(&self, id: &Uuid) -> Result<Option<RunRecord>, DatabaseError> {
        get_run(&self.conn(), id)
    }

    fn list_runs(&self, user_id: &str, limit: usize) -> Result<Vec<RunRecord>, DatabaseError> {
        list_runs(&self.conn(), user_id, limit)
    }
}
