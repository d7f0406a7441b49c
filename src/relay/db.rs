use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use super::models::*;

/// Async-safe handle to the dashboard database.
///
/// Wraps `DashboardDb` behind `Arc<Mutex>` and runs every access on tokio's
/// blocking pool via `spawn_blocking`, so SQLite I/O never parks an async
/// worker thread.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DashboardDb>>,
}

impl DbHandle {
    pub fn new(db: DashboardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DashboardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct DashboardDb {
    conn: Connection,
}

const EVENT_COLUMNS: &str =
    "id, event_type, agent_name, project_name, message, metadata, created_at";
const AGENT_COLUMNS: &str =
    "id, name, description, system_prompt, webhook_path, model, is_active, created_at, updated_at";
const PROJECT_COLUMNS: &str =
    "id, name, description, status, workspace_path, github_repo, tech_stack, created_at, updated_at";

impl DashboardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS realtime_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_type TEXT NOT NULL,
                    agent_name TEXT,
                    project_name TEXT,
                    message TEXT NOT NULL DEFAULT '',
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                );

                CREATE TABLE IF NOT EXISTS agents (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT,
                    system_prompt TEXT,
                    webhook_path TEXT,
                    model TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT,
                    status TEXT DEFAULT 'active',
                    workspace_path TEXT,
                    github_repo TEXT,
                    tech_stack TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                );

                CREATE INDEX IF NOT EXISTS idx_events_created ON realtime_events(created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Events ────────────────────────────────────────────────────────

    pub fn create_event(&self, event: &NewEvent) -> Result<RealtimeEvent> {
        let metadata =
            serde_json::to_string(&event.metadata).context("Failed to encode event metadata")?;
        self.conn
            .execute(
                "INSERT INTO realtime_events (event_type, agent_name, project_name, message, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.event_type,
                    event.agent_name,
                    event.project_name,
                    event.message,
                    metadata
                ],
            )
            .context("Failed to insert event")?;
        let id = self.conn.last_insert_rowid();
        self.get_event(id)?.context("Event not found after insert")
    }

    pub fn get_event(&self, id: i64) -> Result<Option<RealtimeEvent>> {
        let sql = format!("SELECT {} FROM realtime_events WHERE id = ?1", EVENT_COLUMNS);
        self.conn
            .query_row(&sql, params![id], event_from_row)
            .optional()
            .context("Failed to query event")
    }

    /// Most recent first.
    pub fn list_recent_events(&self, limit: u32) -> Result<Vec<RealtimeEvent>> {
        let sql = format!(
            "SELECT {} FROM realtime_events ORDER BY id DESC LIMIT ?1",
            EVENT_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_recent_events")?;
        let rows = stmt
            .query_map(params![limit], event_from_row)
            .context("Failed to query events")?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row.context("Failed to read event row")?);
        }
        Ok(events)
    }

    pub fn count_events(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM realtime_events", [], |row| row.get(0))
            .context("Failed to count events")
    }

    // ── Agents ────────────────────────────────────────────────────────

    pub fn create_agent(&self, agent: &NewAgent) -> Result<Agent> {
        self.conn
            .execute(
                "INSERT INTO agents (name, description, system_prompt, webhook_path, model, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    agent.name,
                    agent.description,
                    agent.system_prompt,
                    agent.webhook_path,
                    agent.model,
                    agent.is_active.unwrap_or(true)
                ],
            )
            .context("Failed to insert agent")?;
        let id = self.conn.last_insert_rowid();
        self.get_agent(id)?.context("Agent not found after insert")
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let sql = format!("SELECT {} FROM agents ORDER BY name ASC", AGENT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_agents")?;
        let rows = stmt
            .query_map([], agent_from_row)
            .context("Failed to query agents")?;
        let mut agents = Vec::new();
        for row in rows {
            agents.push(row.context("Failed to read agent row")?);
        }
        Ok(agents)
    }

    pub fn get_agent(&self, id: i64) -> Result<Option<Agent>> {
        let sql = format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS);
        self.conn
            .query_row(&sql, params![id], agent_from_row)
            .optional()
            .context("Failed to query agent")
    }

    /// Apply the set fields of `patch` and bump `updated_at`.
    /// Returns `None` if the agent does not exist.
    pub fn update_agent(&self, id: i64, patch: &AgentPatch) -> Result<Option<Agent>> {
        if self.get_agent(id)?.is_none() {
            return Ok(None);
        }

        // DbHandle's Mutex already serializes access to the connection.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let text_columns = [
            ("name", &patch.name),
            ("description", &patch.description),
            ("system_prompt", &patch.system_prompt),
            ("webhook_path", &patch.webhook_path),
            ("model", &patch.model),
        ];
        for (column, value) in text_columns {
            if let Some(v) = value {
                tx.execute(
                    &format!("UPDATE agents SET {} = ?1 WHERE id = ?2", column),
                    params![v, id],
                )
                .with_context(|| format!("Failed to update agent {}", column))?;
            }
        }
        if let Some(active) = patch.is_active {
            tx.execute(
                "UPDATE agents SET is_active = ?1 WHERE id = ?2",
                params![active, id],
            )
            .context("Failed to update agent is_active")?;
        }
        tx.execute(
            "UPDATE agents SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
            params![id],
        )
        .context("Failed to bump agent updated_at")?;

        tx.commit().context("Failed to commit agent update")?;
        self.get_agent(id)
    }

    pub fn delete_agent(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM agents WHERE id = ?1", params![id])
            .context("Failed to delete agent")?;
        Ok(count > 0)
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&self, project: &NewProject) -> Result<Project> {
        let tech_stack =
            serde_json::to_string(&project.tech_stack).context("Failed to encode tech_stack")?;
        self.conn
            .execute(
                "INSERT INTO projects (name, description, status, workspace_path, github_repo, tech_stack)
                 VALUES (?1, ?2, COALESCE(?3, 'active'), ?4, ?5, ?6)",
                params![
                    project.name,
                    project.description,
                    project.status,
                    project.workspace_path,
                    project.github_repo,
                    tech_stack
                ],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?.context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
        self.conn
            .query_row(&sql, params![id], project_from_row)
            .optional()
            .context("Failed to query project")
    }

    /// Most recently updated first.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {} FROM projects ORDER BY updated_at DESC, id DESC",
            PROJECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], project_from_row)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    // ── Snapshot ──────────────────────────────────────────────────────

    pub fn snapshot(&self, event_limit: u32) -> Result<Snapshot> {
        Ok(Snapshot {
            agents: self.list_agents()?,
            projects: self.list_projects()?,
            events: self.list_recent_events(event_limit)?,
        })
    }
}

/// Decode a JSON text column, keeping the raw string if it is not valid JSON.
fn json_column(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<RealtimeEvent> {
    Ok(RealtimeEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        agent_name: row.get(2)?,
        project_name: row.get(3)?,
        message: row.get(4)?,
        metadata: json_column(row.get(5)?),
        created_at: row.get(6)?,
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        system_prompt: row.get(3)?,
        webhook_path: row.get(4)?,
        model: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        workspace_path: row.get(4)?,
        github_repo: row.get(5)?,
        tech_stack: json_column(row.get(6)?),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(name: &str) -> NewProject {
        NewProject {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tables_created() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
             AND name IN ('realtime_events', 'agents', 'projects')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 3);
        Ok(())
    }

    #[test]
    fn test_migrations_idempotent() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        db.run_migrations()?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_create_event_assigns_id_and_timestamp() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        let event = db.create_event(
            &NewEvent::new("task_started")
                .agent("Dev")
                .message("Starting build")
                .metadata(json!({"step": 1})),
        )?;
        assert!(event.id.is_some());
        assert!(event.created_at.is_some());
        assert_eq!(event.event_type, "task_started");
        assert_eq!(event.agent_name.as_deref(), Some("Dev"));
        assert_eq!(event.project_name, None);
        assert_eq!(event.metadata, json!({"step": 1}));
        Ok(())
    }

    #[test]
    fn test_list_recent_events_newest_first_with_limit() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        for i in 0..5 {
            db.create_event(&NewEvent::new(format!("e{}", i)))?;
        }
        let events = db.list_recent_events(3)?;
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["e4", "e3", "e2"]);
        assert_eq!(db.count_events()?, 5);
        Ok(())
    }

    #[test]
    fn test_agent_crud() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        let agent = db.create_agent(&NewAgent {
            name: "Dev".to_string(),
            model: Some("sonnet".to_string()),
            ..Default::default()
        })?;
        assert!(agent.is_active);
        assert_eq!(agent.model.as_deref(), Some("sonnet"));

        let fetched = db.get_agent(agent.id)?.unwrap();
        assert_eq!(fetched, agent);

        assert!(db.delete_agent(agent.id)?);
        assert!(!db.delete_agent(agent.id)?);
        assert!(db.get_agent(agent.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_duplicate_agent_name_rejected() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        let new = NewAgent {
            name: "Dev".to_string(),
            ..Default::default()
        };
        db.create_agent(&new)?;
        assert!(db.create_agent(&new).is_err());
        Ok(())
    }

    #[test]
    fn test_list_agents_sorted_by_name() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        for name in ["Ops", "Dev", "QA"] {
            db.create_agent(&NewAgent {
                name: name.to_string(),
                ..Default::default()
            })?;
        }
        let names: Vec<String> = db.list_agents()?.into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Dev", "Ops", "QA"]);
        Ok(())
    }

    #[test]
    fn test_update_agent_partial() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        let agent = db.create_agent(&NewAgent {
            name: "Dev".to_string(),
            description: Some("Writes code".to_string()),
            ..Default::default()
        })?;

        let updated = db
            .update_agent(
                agent.id,
                &AgentPatch {
                    is_active: Some(false),
                    model: Some("opus".to_string()),
                    ..Default::default()
                },
            )?
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.model.as_deref(), Some("opus"));
        assert_eq!(updated.description.as_deref(), Some("Writes code"));
        assert_eq!(updated.name, "Dev");
        Ok(())
    }

    #[test]
    fn test_update_missing_agent_returns_none() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        assert!(db.update_agent(42, &AgentPatch::default())?.is_none());
        Ok(())
    }

    #[test]
    fn test_projects() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        let created = db.create_project(&NewProject {
            tech_stack: vec!["rust".to_string(), "sqlite".to_string()],
            ..project("relay")
        })?;
        assert_eq!(created.status.as_deref(), Some("active"));
        assert_eq!(created.tech_stack, json!(["rust", "sqlite"]));

        db.create_project(&NewProject {
            status: Some("paused".to_string()),
            ..project("website")
        })?;

        let projects = db.list_projects()?;
        assert_eq!(projects.len(), 2);
        let website = projects.iter().find(|p| p.name == "website").unwrap();
        assert_eq!(website.status.as_deref(), Some("paused"));
        Ok(())
    }

    #[test]
    fn test_snapshot() -> Result<()> {
        let db = DashboardDb::new_in_memory()?;
        db.create_agent(&NewAgent {
            name: "Dev".to_string(),
            ..Default::default()
        })?;
        db.create_project(&project("relay"))?;
        for i in 0..3 {
            db.create_event(&NewEvent::new(format!("e{}", i)))?;
        }
        let snapshot = db.snapshot(2)?;
        assert_eq!(snapshot.agents.len(), 1);
        assert_eq!(snapshot.projects.len(), 1);
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[0].event_type, "e2");
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_call() -> Result<()> {
        let handle = DbHandle::new(DashboardDb::new_in_memory()?);
        let event = handle
            .call(|db| db.create_event(&NewEvent::new("from_handle")))
            .await?;
        assert_eq!(event.event_type, "from_handle");
        Ok(())
    }
}
