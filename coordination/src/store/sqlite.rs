//! SQLite-backed persistence collaborator
//!
//! Uses the same table layout as the coordination database of the wider
//! workflow system (`agent_configurations`, `agent_assignments`,
//! `workflow_results`, `workflow_analytics`). Tables are created on open if
//! they do not exist. rusqlite is synchronous, so every call runs on the
//! blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use super::{
    AgentRecord, AgentStatus, AgentSummary, AssignmentOutcomes, AssignmentRecord,
    CoordinationStore, DailyAggregate, StoreError, StoreResult,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agent_configurations (
    agent_id TEXT PRIMARY KEY,
    agent_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    current_workload INTEGER NOT NULL DEFAULT 0,
    max_workload INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS agent_assignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    status TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS workflow_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id TEXT NOT NULL,
    execution_time_ms INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS workflow_analytics (
    date TEXT NOT NULL,
    workflow_type TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    total_workflows INTEGER NOT NULL,
    successful_workflows INTEGER NOT NULL,
    failed_workflows INTEGER NOT NULL,
    avg_execution_time_ms INTEGER NOT NULL,
    PRIMARY KEY (date, workflow_type)
);
"#;

/// Relational store over a single SQLite connection
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        debug!(path = %path.display(), "Opened coordination database");
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Register or update an agent
    pub async fn upsert_agent(&self, agent: AgentRecord) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO agent_configurations
                    (agent_id, agent_type, status, current_workload, max_workload)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(agent_id) DO UPDATE SET
                    agent_type = excluded.agent_type,
                    status = excluded.status,
                    current_workload = excluded.current_workload,
                    max_workload = excluded.max_workload
                "#,
                params![
                    agent.agent_id,
                    agent.agent_type,
                    agent.status.as_str(),
                    agent.current_workload,
                    agent.max_workload
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Append an assignment outcome
    pub async fn record_assignment(&self, assignment: AssignmentRecord) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO agent_assignments (workflow_id, agent_id, agent_type, status) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    assignment.workflow_id,
                    assignment.agent_id,
                    assignment.agent_type,
                    assignment.status.as_str()
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Append a workflow result
    pub async fn record_result(&self, workflow_id: &str, execution_time_ms: u64) -> StoreResult<()> {
        let workflow_id = workflow_id.to_string();
        let ms = i64::try_from(execution_time_ms)
            .map_err(|_| StoreError::Decode(format!("duration out of range: {execution_time_ms}")))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO workflow_results (workflow_id, execution_time_ms) VALUES (?1, ?2)",
                params![workflow_id, ms],
            )?;
            Ok(())
        })
        .await
    }

    /// Read back one aggregate row
    pub async fn aggregate(
        &self,
        date: NaiveDate,
        workflow_type: &str,
    ) -> StoreResult<Option<DailyAggregate>> {
        let workflow_type = workflow_type.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT agent_type, total_workflows, successful_workflows,
                           failed_workflows, avg_execution_time_ms
                    FROM workflow_analytics
                    WHERE date = ?1 AND workflow_type = ?2
                    "#,
                    params![date.to_string(), workflow_type],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, u64>(1)?,
                            row.get::<_, u64>(2)?,
                            row.get::<_, u64>(3)?,
                            row.get::<_, u64>(4)?,
                        ))
                    },
                )
                .optional()?;

            Ok(row.map(|(agent_type, total, successful, failed, avg)| DailyAggregate {
                date,
                workflow_type,
                agent_type,
                total_workflows: total,
                successful_workflows: successful,
                failed_workflows: failed,
                avg_execution_time_ms: avg,
            }))
        })
        .await
    }
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    let status: String = row.get(2)?;
    let status = status
        .parse::<AgentStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(AgentRecord {
        agent_id: row.get(0)?,
        agent_type: row.get(1)?,
        status,
        current_workload: row.get(3)?,
        max_workload: row.get(4)?,
    })
}

/// Errors that concern a single row's contents rather than the query
fn is_row_decode_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

fn collect_agents<I>(rows: I) -> StoreResult<Vec<AgentRecord>>
where
    I: Iterator<Item = rusqlite::Result<AgentRecord>>,
{
    let mut agents = Vec::new();
    for row in rows {
        match row {
            Ok(agent) => agents.push(agent),
            Err(e) if is_row_decode_error(&e) => {
                warn!(error = %e, "Skipping malformed agent row");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(agents)
}

fn to_u64(value: i64, what: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Decode(format!("negative {what}: {value}")))
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn candidate_agents(&self, agent_type: &str) -> StoreResult<Vec<AgentRecord>> {
        let agent_type = agent_type.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT agent_id, agent_type, status, current_workload, max_workload
                FROM agent_configurations
                WHERE agent_type = ?1
                  AND status = 'active'
                  AND current_workload < max_workload
                ORDER BY current_workload ASC
                "#,
            )?;
            let rows = stmt.query_map(params![agent_type], agent_from_row)?;
            collect_agents(rows)
        })
        .await
    }

    async fn active_agents(&self) -> StoreResult<Vec<AgentRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT agent_id, agent_type, status, current_workload, max_workload
                FROM agent_configurations
                WHERE status = 'active'
                "#,
            )?;
            let rows = stmt.query_map([], agent_from_row)?;
            collect_agents(rows)
        })
        .await
    }

    async fn assignment_outcomes(&self, agent_id: &str) -> StoreResult<AssignmentOutcomes> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let (total, completed): (i64, i64) = conn.query_row(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)
                FROM agent_assignments WHERE agent_id = ?1
                "#,
                params![agent_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(AssignmentOutcomes {
                total: to_u64(total, "assignment count")?,
                completed: to_u64(completed, "completed count")?,
            })
        })
        .await
    }

    async fn average_duration_ms(&self, agent_id: &str) -> StoreResult<Option<f64>> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            let avg: Option<f64> = conn.query_row(
                r#"
                SELECT AVG(wr.execution_time_ms)
                FROM workflow_results wr
                JOIN agent_assignments aa ON wr.workflow_id = aa.workflow_id
                WHERE aa.agent_id = ?1
                "#,
                params![agent_id],
                |row| row.get(0),
            )?;
            Ok(avg)
        })
        .await
    }

    async fn result_count(&self, workflow_id: &str) -> StoreResult<u64> {
        let workflow_id = workflow_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM workflow_results WHERE workflow_id = ?1",
                params![workflow_id],
                |row| row.get(0),
            )?;
            to_u64(count, "result count")
        })
        .await
    }

    async fn agent_summary(&self) -> StoreResult<AgentSummary> {
        self.with_conn(|conn| {
            let registered: i64 =
                conn.query_row("SELECT COUNT(*) FROM agent_configurations", [], |row| {
                    row.get(0)
                })?;
            let active: i64 = conn.query_row(
                "SELECT COUNT(*) FROM agent_configurations WHERE status = 'active'",
                [],
                |row| row.get(0),
            )?;

            let mut summary = AgentSummary {
                total_registered: to_u64(registered, "agent count")?,
                total_active: to_u64(active, "active agent count")?,
                ..Default::default()
            };

            let mut stmt = conn.prepare(
                r#"
                SELECT agent_type, COUNT(*),
                       AVG(CAST(current_workload AS REAL) / NULLIF(max_workload, 0))
                FROM agent_configurations
                WHERE status = 'active'
                GROUP BY agent_type
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            })?;
            for row in rows {
                let (agent_type, count, avg_load) = match row {
                    Ok(row) => row,
                    Err(e) if is_row_decode_error(&e) => {
                        warn!(error = %e, "Skipping malformed agent summary row");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let entry = summary.by_type.entry(agent_type).or_default();
                entry.active = to_u64(count, "active agent count")?;
                entry.avg_workload = avg_load.unwrap_or(0.0) * 100.0;
            }

            let mut stmt = conn.prepare(
                "SELECT agent_type, COUNT(*) FROM agent_assignments GROUP BY agent_type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (agent_type, count) = row?;
                if let Some(entry) = summary.by_type.get_mut(&agent_type) {
                    entry.total_assignments = to_u64(count, "assignment count")?;
                }
            }

            Ok(summary)
        })
        .await
    }

    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> StoreResult<()> {
        let aggregate = aggregate.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO workflow_analytics
                    (date, workflow_type, agent_type, total_workflows,
                     successful_workflows, failed_workflows, avg_execution_time_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(date, workflow_type) DO UPDATE SET
                    agent_type = excluded.agent_type,
                    total_workflows = excluded.total_workflows,
                    successful_workflows = excluded.successful_workflows,
                    failed_workflows = excluded.failed_workflows,
                    avg_execution_time_ms = excluded.avg_execution_time_ms
                "#,
                params![
                    aggregate.date.to_string(),
                    aggregate.workflow_type,
                    aggregate.agent_type,
                    aggregate.total_workflows,
                    aggregate.successful_workflows,
                    aggregate.failed_workflows,
                    aggregate.avg_execution_time_ms
                ],
            )?;
            Ok(())
        })
        .await
    }
}
