use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{validate_table_name, Database};

/// One persisted agent or team run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub message: String,
    pub content: String,
    pub tools_used: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Run history stored in a `<prefix>agent_sessions` table.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
    table: String,
}

impl SessionStore {
    pub fn new(db: Arc<Database>, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        db.lock()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                run_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                user_id TEXT,
                message TEXT NOT NULL,
                content TEXT NOT NULL,
                tools_used TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table}(session_id, agent_id, created_at);"
        ))?;
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    /// Table name for an agent's `table_prefix`.
    pub fn table_for(prefix: &str) -> String {
        format!("{prefix}agent_sessions")
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn record(&self, run: &RunRecord) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (run_id, session_id, agent_id, user_id, message, content, tools_used, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                self.table
            ),
            params![
                run.run_id,
                run.session_id,
                run.agent_id,
                run.user_id,
                run.message,
                run.content,
                serde_json::to_string(&run.tools_used)?,
                run.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }

    /// The most recent `limit` runs of one agent in a session, oldest first.
    pub fn recent_runs(
        &self,
        agent_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<RunRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT run_id, session_id, agent_id, user_id, message, content, tools_used, created_at
             FROM {} WHERE agent_id = ?1 AND session_id = ?2
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
            self.table
        ))?;
        let mut runs = stmt
            .query_map(params![agent_id, session_id, limit as i64], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        runs.reverse();
        Ok(runs)
    }

    pub fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.db.lock()?;
        let run = conn
            .query_row(
                &format!(
                    "SELECT run_id, session_id, agent_id, user_id, message, content, tools_used, created_at
                     FROM {} WHERE run_id = ?1",
                    self.table
                ),
                params![run_id],
                row_to_record,
            )
            .optional()?;
        Ok(run)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let tools: String = row.get(6)?;
    let created: String = row.get(7)?;
    Ok(RunRecord {
        run_id: row.get(0)?,
        session_id: row.get(1)?,
        agent_id: row.get(2)?,
        user_id: row.get(3)?,
        message: row.get(4)?,
        content: row.get(5)?,
        tools_used: serde_json::from_str(&tools).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}
