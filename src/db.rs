use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params, params_from_iter, types::Value};
use serde::Deserialize;

use crate::models::*;

/// Async-safe handle to the caseboard database.
///
/// Wraps `CaseDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<CaseDb>>,
}

impl DbHandle {
    pub fn new(db: CaseDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CaseDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct CaseDb {
    conn: Connection,
}

impl CaseDb {
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
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'planning',
                    priority TEXT NOT NULL DEFAULT 'Medium',
                    start_date TEXT,
                    target_completion TEXT,
                    project_manager TEXT,
                    stakeholders TEXT NOT NULL DEFAULT '[]',
                    budget REAL,
                    tags TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS epics (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'planning',
                    priority TEXT NOT NULL DEFAULT 'Medium',
                    start_date TEXT,
                    target_completion TEXT,
                    epic_owner TEXT,
                    budget REAL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS features (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    epic_id INTEGER NOT NULL REFERENCES epics(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'backlog',
                    priority TEXT NOT NULL DEFAULT 'Medium',
                    feature_owner TEXT,
                    estimated_story_points REAL NOT NULL DEFAULT 0,
                    user_stories TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    feature_id INTEGER NOT NULL REFERENCES features(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'backlog',
                    priority TEXT NOT NULL DEFAULT 'Medium',
                    assigned_to TEXT,
                    estimated_hours REAL NOT NULL DEFAULT 0,
                    actual_hours REAL NOT NULL DEFAULT 0,
                    due_date TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sub_tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'backlog',
                    assigned_to TEXT,
                    estimated_hours REAL NOT NULL DEFAULT 0,
                    actual_hours REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    subject TEXT NOT NULL,
                    description TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'Open',
                    priority TEXT NOT NULL DEFAULT 'Medium',
                    type TEXT NOT NULL DEFAULT 'Question',
                    user_identifier TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS voice_notes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
                    file_url TEXT NOT NULL,
                    duration INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS attachments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
                    original_name TEXT NOT NULL,
                    file_size INTEGER NOT NULL,
                    mime_type TEXT NOT NULL,
                    file_data BLOB NOT NULL,
                    user_identifier TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    type TEXT NOT NULL DEFAULT 'info',
                    ticket_id INTEGER REFERENCES tickets(id) ON DELETE SET NULL,
                    user_identifier TEXT,
                    read INTEGER NOT NULL DEFAULT 0,
                    read_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS candidates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT,
                    role TEXT,
                    status TEXT NOT NULL DEFAULT 'applied',
                    notes TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS interview_postings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    department TEXT,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'open',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS drafts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    kind TEXT NOT NULL,
                    payload TEXT NOT NULL DEFAULT '{}',
                    user_identifier TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_epics_project ON epics(project_id);
                CREATE INDEX IF NOT EXISTS idx_features_epic ON features(epic_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_feature ON tasks(feature_id);
                CREATE INDEX IF NOT EXISTS idx_sub_tasks_task ON sub_tasks(task_id);
                CREATE INDEX IF NOT EXISTS idx_voice_notes_ticket ON voice_notes(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_attachments_ticket ON attachments(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_identifier);
                CREATE INDEX IF NOT EXISTS idx_notifications_unread ON notifications(read);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    pub fn create_project(&self, p: NewProject) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (name, description, status, priority, start_date,
                    target_completion, project_manager, stakeholders, budget, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    p.name,
                    p.description,
                    p.status.unwrap_or_else(|| "planning".to_string()),
                    p.priority.unwrap_or_else(|| "Medium".to_string()),
                    p.start_date,
                    p.target_completion,
                    p.project_manager,
                    to_json(&p.stakeholders.unwrap_or_default()),
                    p.budget,
                    to_json(&p.tags.unwrap_or_default()),
                ],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn list_projects(
        &self,
        status: Option<String>,
        priority: Option<String>,
    ) -> Result<Vec<Project>> {
        let (clause, values) = equality_clause(&[("status", status), ("priority", priority)]);
        let sql = format!(
            "SELECT id FROM projects{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let ids = self.query_ids(&sql, values)?;
        ids.into_iter()
            .map(|id| {
                self.get_project(id)?
                    .context("Project vanished during list")
            })
            .collect()
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, status, priority, start_date, target_completion,
                        project_manager, stakeholders, budget, tags, created_at, updated_at
                 FROM projects WHERE id = ?1",
            )
            .context("Failed to prepare get_project")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    status: row.get(3)?,
                    priority: row.get(4)?,
                    start_date: row.get(5)?,
                    target_completion: row.get(6)?,
                    project_manager: row.get(7)?,
                    stakeholders: string_list(row.get(8)?),
                    budget: row.get(9)?,
                    tags: string_list(row.get(10)?),
                    created_at: row.get(11)?,
                    updated_at: row.get(12)?,
                    epics: Vec::new(),
                })
            })
            .context("Failed to query project")?;
        match rows.next() {
            Some(row) => {
                let mut project = row.context("Failed to read project row")?;
                project.epics = self.epics_for_project(project.id)?;
                Ok(Some(project))
            }
            None => Ok(None),
        }
    }

    pub fn update_project(&self, id: i64, patch: ProjectPatch) -> Result<Option<Project>> {
        if self.get_project(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "projects", id, "name", patch.name.map(Value::from))?;
        set_field(&tx, "projects", id, "description", patch.description.map(Value::from))?;
        set_field(&tx, "projects", id, "status", patch.status.map(Value::from))?;
        set_field(&tx, "projects", id, "priority", patch.priority.map(Value::from))?;
        set_field(&tx, "projects", id, "start_date", patch.start_date.map(Value::from))?;
        set_field(&tx, "projects", id, "target_completion", patch.target_completion.map(Value::from))?;
        set_field(&tx, "projects", id, "project_manager", patch.project_manager.map(Value::from))?;
        set_field(&tx, "projects", id, "stakeholders", patch.stakeholders.map(|v| Value::from(to_json(&v))))?;
        set_field(&tx, "projects", id, "budget", patch.budget.map(Value::from))?;
        set_field(&tx, "projects", id, "tags", patch.tags.map(|v| Value::from(to_json(&v))))?;
        touch(&tx, "projects", id)?;
        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)
    }

    pub fn delete_project(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    // ── Epic CRUD ─────────────────────────────────────────────────────

    pub fn create_epic(&self, e: NewEpic) -> Result<Epic> {
        self.conn
            .execute(
                "INSERT INTO epics (project_id, name, description, status, priority, start_date,
                    target_completion, epic_owner, budget)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    e.project_id,
                    e.name,
                    e.description,
                    e.status.unwrap_or_else(|| "planning".to_string()),
                    e.priority.unwrap_or_else(|| "Medium".to_string()),
                    e.start_date,
                    e.target_completion,
                    e.epic_owner,
                    e.budget,
                ],
            )
            .context("Failed to insert epic")?;
        let id = self.conn.last_insert_rowid();
        self.get_epic(id)?.context("Epic not found after insert")
    }

    pub fn list_epics(
        &self,
        project_id: Option<i64>,
        status: Option<String>,
        priority: Option<String>,
    ) -> Result<Vec<Epic>> {
        let mut conds: Vec<(&str, Value)> = Vec::new();
        if let Some(pid) = project_id {
            conds.push(("project_id", Value::from(pid)));
        }
        if let Some(s) = status {
            conds.push(("status", Value::from(s)));
        }
        if let Some(p) = priority {
            conds.push(("priority", Value::from(p)));
        }
        let (clause, values) = clause_from(conds);
        let sql = format!(
            "SELECT id FROM epics{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let ids = self.query_ids(&sql, values)?;
        ids.into_iter()
            .map(|id| self.get_epic(id)?.context("Epic vanished during list"))
            .collect()
    }

    pub fn get_epic(&self, id: i64) -> Result<Option<Epic>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, name, description, status, priority, start_date,
                        target_completion, epic_owner, budget, created_at, updated_at
                 FROM epics WHERE id = ?1",
            )
            .context("Failed to prepare get_epic")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(Epic {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    status: row.get(4)?,
                    priority: row.get(5)?,
                    start_date: row.get(6)?,
                    target_completion: row.get(7)?,
                    epic_owner: row.get(8)?,
                    budget: row.get(9)?,
                    created_at: row.get(10)?,
                    updated_at: row.get(11)?,
                    features: Vec::new(),
                })
            })
            .context("Failed to query epic")?;
        match rows.next() {
            Some(row) => {
                let mut epic = row.context("Failed to read epic row")?;
                epic.features = self.features_for_epic(epic.id)?;
                Ok(Some(epic))
            }
            None => Ok(None),
        }
    }

    fn epics_for_project(&self, project_id: i64) -> Result<Vec<Epic>> {
        let ids = self.query_ids(
            "SELECT id FROM epics WHERE project_id = ?1 ORDER BY id",
            vec![Value::from(project_id)],
        )?;
        ids.into_iter()
            .map(|id| self.get_epic(id)?.context("Epic vanished during load"))
            .collect()
    }

    pub fn update_epic(&self, id: i64, patch: EpicPatch) -> Result<Option<Epic>> {
        if self.get_epic(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "epics", id, "name", patch.name.map(Value::from))?;
        set_field(&tx, "epics", id, "description", patch.description.map(Value::from))?;
        set_field(&tx, "epics", id, "status", patch.status.map(Value::from))?;
        set_field(&tx, "epics", id, "priority", patch.priority.map(Value::from))?;
        set_field(&tx, "epics", id, "start_date", patch.start_date.map(Value::from))?;
        set_field(&tx, "epics", id, "target_completion", patch.target_completion.map(Value::from))?;
        set_field(&tx, "epics", id, "epic_owner", patch.epic_owner.map(Value::from))?;
        set_field(&tx, "epics", id, "budget", patch.budget.map(Value::from))?;
        touch(&tx, "epics", id)?;
        tx.commit().context("Failed to commit epic update")?;
        self.get_epic(id)
    }

    pub fn delete_epic(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM epics WHERE id = ?1", params![id])
            .context("Failed to delete epic")?;
        Ok(count > 0)
    }

    // ── Feature CRUD ──────────────────────────────────────────────────

    pub fn create_feature(&self, f: NewFeature) -> Result<Feature> {
        self.conn
            .execute(
                "INSERT INTO features (epic_id, name, description, status, priority,
                    feature_owner, estimated_story_points, user_stories)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    f.epic_id,
                    f.name,
                    f.description,
                    f.status.unwrap_or_else(|| "backlog".to_string()),
                    f.priority.unwrap_or_else(|| "Medium".to_string()),
                    f.feature_owner,
                    f.estimated_story_points.unwrap_or(0.0),
                    to_json(&f.user_stories.unwrap_or_default()),
                ],
            )
            .context("Failed to insert feature")?;
        let id = self.conn.last_insert_rowid();
        self.get_feature(id)?
            .context("Feature not found after insert")
    }

    pub fn list_features(
        &self,
        epic_id: Option<i64>,
        status: Option<String>,
    ) -> Result<Vec<Feature>> {
        let mut conds: Vec<(&str, Value)> = Vec::new();
        if let Some(eid) = epic_id {
            conds.push(("epic_id", Value::from(eid)));
        }
        if let Some(s) = status {
            conds.push(("status", Value::from(s)));
        }
        let (clause, values) = clause_from(conds);
        let sql = format!(
            "SELECT id FROM features{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let ids = self.query_ids(&sql, values)?;
        ids.into_iter()
            .map(|id| self.get_feature(id)?.context("Feature vanished during list"))
            .collect()
    }

    pub fn get_feature(&self, id: i64) -> Result<Option<Feature>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, epic_id, name, description, status, priority, feature_owner,
                        estimated_story_points, user_stories, created_at, updated_at
                 FROM features WHERE id = ?1",
            )
            .context("Failed to prepare get_feature")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(Feature {
                    id: row.get(0)?,
                    epic_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    status: row.get(4)?,
                    priority: row.get(5)?,
                    feature_owner: row.get(6)?,
                    estimated_story_points: row.get(7)?,
                    user_stories: story_list(row.get(8)?),
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                    tasks: Vec::new(),
                })
            })
            .context("Failed to query feature")?;
        match rows.next() {
            Some(row) => {
                let mut feature = row.context("Failed to read feature row")?;
                feature.tasks = self.tasks_for_feature(feature.id)?;
                Ok(Some(feature))
            }
            None => Ok(None),
        }
    }

    fn features_for_epic(&self, epic_id: i64) -> Result<Vec<Feature>> {
        let ids = self.query_ids(
            "SELECT id FROM features WHERE epic_id = ?1 ORDER BY id",
            vec![Value::from(epic_id)],
        )?;
        ids.into_iter()
            .map(|id| self.get_feature(id)?.context("Feature vanished during load"))
            .collect()
    }

    pub fn update_feature(&self, id: i64, patch: FeaturePatch) -> Result<Option<Feature>> {
        if self.get_feature(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "features", id, "name", patch.name.map(Value::from))?;
        set_field(&tx, "features", id, "description", patch.description.map(Value::from))?;
        set_field(&tx, "features", id, "status", patch.status.map(Value::from))?;
        set_field(&tx, "features", id, "priority", patch.priority.map(Value::from))?;
        set_field(&tx, "features", id, "feature_owner", patch.feature_owner.map(Value::from))?;
        set_field(&tx, "features", id, "estimated_story_points", patch.estimated_story_points.map(Value::from))?;
        set_field(&tx, "features", id, "user_stories", patch.user_stories.map(|v| Value::from(to_json(&v))))?;
        touch(&tx, "features", id)?;
        tx.commit().context("Failed to commit feature update")?;
        self.get_feature(id)
    }

    pub fn delete_feature(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM features WHERE id = ?1", params![id])
            .context("Failed to delete feature")?;
        Ok(count > 0)
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    pub fn create_task(&self, t: NewTask) -> Result<Task> {
        self.conn
            .execute(
                "INSERT INTO tasks (feature_id, title, description, status, priority,
                    assigned_to, estimated_hours, due_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    t.feature_id,
                    t.title,
                    t.description,
                    t.status.unwrap_or_else(|| "backlog".to_string()),
                    t.priority.unwrap_or_else(|| "Medium".to_string()),
                    t.assigned_to,
                    t.estimated_hours.unwrap_or(0.0),
                    t.due_date,
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn list_tasks(
        &self,
        feature_id: Option<i64>,
        status: Option<String>,
        assigned_to: Option<String>,
    ) -> Result<Vec<Task>> {
        let mut conds: Vec<(&str, Value)> = Vec::new();
        if let Some(fid) = feature_id {
            conds.push(("feature_id", Value::from(fid)));
        }
        if let Some(s) = status {
            conds.push(("status", Value::from(s)));
        }
        if let Some(a) = assigned_to {
            conds.push(("assigned_to", Value::from(a)));
        }
        let (clause, values) = clause_from(conds);
        let sql = format!(
            "SELECT id FROM tasks{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let ids = self.query_ids(&sql, values)?;
        ids.into_iter()
            .map(|id| self.get_task(id)?.context("Task vanished during list"))
            .collect()
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, feature_id, title, description, status, priority, assigned_to,
                        estimated_hours, actual_hours, due_date, created_at, updated_at
                 FROM tasks WHERE id = ?1",
            )
            .context("Failed to prepare get_task")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(Task {
                    id: row.get(0)?,
                    feature_id: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    status: row.get(4)?,
                    priority: row.get(5)?,
                    assigned_to: row.get(6)?,
                    estimated_hours: row.get(7)?,
                    actual_hours: row.get(8)?,
                    due_date: row.get(9)?,
                    created_at: row.get(10)?,
                    updated_at: row.get(11)?,
                    sub_tasks: Vec::new(),
                })
            })
            .context("Failed to query task")?;
        match rows.next() {
            Some(row) => {
                let mut task = row.context("Failed to read task row")?;
                task.sub_tasks = self.sub_tasks_for_task(task.id)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    fn tasks_for_feature(&self, feature_id: i64) -> Result<Vec<Task>> {
        let ids = self.query_ids(
            "SELECT id FROM tasks WHERE feature_id = ?1 ORDER BY id",
            vec![Value::from(feature_id)],
        )?;
        ids.into_iter()
            .map(|id| self.get_task(id)?.context("Task vanished during load"))
            .collect()
    }

    pub fn update_task(&self, id: i64, patch: TaskPatch) -> Result<Option<Task>> {
        if self.get_task(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "tasks", id, "title", patch.title.map(Value::from))?;
        set_field(&tx, "tasks", id, "description", patch.description.map(Value::from))?;
        set_field(&tx, "tasks", id, "status", patch.status.map(Value::from))?;
        set_field(&tx, "tasks", id, "priority", patch.priority.map(Value::from))?;
        set_field(&tx, "tasks", id, "assigned_to", patch.assigned_to.map(Value::from))?;
        set_field(&tx, "tasks", id, "estimated_hours", patch.estimated_hours.map(Value::from))?;
        set_field(&tx, "tasks", id, "actual_hours", patch.actual_hours.map(Value::from))?;
        set_field(&tx, "tasks", id, "due_date", patch.due_date.map(Value::from))?;
        touch(&tx, "tasks", id)?;
        tx.commit().context("Failed to commit task update")?;
        self.get_task(id)
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(count > 0)
    }

    // ── SubTask CRUD ──────────────────────────────────────────────────

    pub fn create_sub_task(&self, s: NewSubTask) -> Result<SubTask> {
        self.conn
            .execute(
                "INSERT INTO sub_tasks (task_id, title, description, status, assigned_to,
                    estimated_hours, actual_hours)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    s.task_id,
                    s.title,
                    s.description,
                    s.status.unwrap_or_else(|| "backlog".to_string()),
                    s.assigned_to,
                    s.estimated_hours.unwrap_or(0.0),
                    s.actual_hours.unwrap_or(0.0),
                ],
            )
            .context("Failed to insert sub-task")?;
        let id = self.conn.last_insert_rowid();
        self.get_sub_task(id)?
            .context("Sub-task not found after insert")
    }

    pub fn list_sub_tasks(
        &self,
        task_id: Option<i64>,
        status: Option<String>,
        assigned_to: Option<String>,
    ) -> Result<Vec<SubTask>> {
        let mut conds: Vec<(&str, Value)> = Vec::new();
        if let Some(tid) = task_id {
            conds.push(("task_id", Value::from(tid)));
        }
        if let Some(s) = status {
            conds.push(("status", Value::from(s)));
        }
        if let Some(a) = assigned_to {
            conds.push(("assigned_to", Value::from(a)));
        }
        let (clause, values) = clause_from(conds);
        let sql = format!(
            "SELECT id FROM sub_tasks{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let ids = self.query_ids(&sql, values)?;
        ids.into_iter()
            .map(|id| {
                self.get_sub_task(id)?
                    .context("Sub-task vanished during list")
            })
            .collect()
    }

    pub fn get_sub_task(&self, id: i64) -> Result<Option<SubTask>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, task_id, title, description, status, assigned_to,
                        estimated_hours, actual_hours, created_at, updated_at
                 FROM sub_tasks WHERE id = ?1",
            )
            .context("Failed to prepare get_sub_task")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(SubTask {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    status: row.get(4)?,
                    assigned_to: row.get(5)?,
                    estimated_hours: row.get(6)?,
                    actual_hours: row.get(7)?,
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            })
            .context("Failed to query sub-task")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read sub-task row")?)),
            None => Ok(None),
        }
    }

    fn sub_tasks_for_task(&self, task_id: i64) -> Result<Vec<SubTask>> {
        let ids = self.query_ids(
            "SELECT id FROM sub_tasks WHERE task_id = ?1 ORDER BY id",
            vec![Value::from(task_id)],
        )?;
        ids.into_iter()
            .map(|id| {
                self.get_sub_task(id)?
                    .context("Sub-task vanished during load")
            })
            .collect()
    }

    pub fn update_sub_task(&self, id: i64, patch: SubTaskPatch) -> Result<Option<SubTask>> {
        if self.get_sub_task(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "sub_tasks", id, "title", patch.title.map(Value::from))?;
        set_field(&tx, "sub_tasks", id, "description", patch.description.map(Value::from))?;
        set_field(&tx, "sub_tasks", id, "status", patch.status.map(Value::from))?;
        set_field(&tx, "sub_tasks", id, "assigned_to", patch.assigned_to.map(Value::from))?;
        set_field(&tx, "sub_tasks", id, "estimated_hours", patch.estimated_hours.map(Value::from))?;
        set_field(&tx, "sub_tasks", id, "actual_hours", patch.actual_hours.map(Value::from))?;
        touch(&tx, "sub_tasks", id)?;
        tx.commit().context("Failed to commit sub-task update")?;
        self.get_sub_task(id)
    }

    pub fn delete_sub_task(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sub_tasks WHERE id = ?1", params![id])
            .context("Failed to delete sub-task")?;
        Ok(count > 0)
    }

    // ── Ticket CRUD ───────────────────────────────────────────────────

    pub fn create_ticket(&self, t: NewTicket) -> Result<Ticket> {
        self.conn
            .execute(
                "INSERT INTO tickets (subject, description, status, priority, type, user_identifier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    t.subject,
                    t.description,
                    t.status.as_str(),
                    t.priority.as_str(),
                    t.ticket_type,
                    t.user_identifier,
                ],
            )
            .context("Failed to insert ticket")?;
        let id = self.conn.last_insert_rowid();
        self.get_ticket(id)?
            .context("Ticket not found after insert")
    }

    pub fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<Ticket>> {
        let (clause, values) = equality_clause(&[
            ("status", filter.status.map(|s| s.as_str().to_string())),
            ("priority", filter.priority.map(|p| p.as_str().to_string())),
            ("type", filter.ticket_type),
            ("user_identifier", filter.user_identifier),
        ]);
        let sql = format!(
            "SELECT id FROM tickets{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let ids = self.query_ids(&sql, values)?;
        ids.into_iter()
            .map(|id| self.get_ticket(id)?.context("Ticket vanished during list"))
            .collect()
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, subject, description, status, priority, type, user_identifier,
                        created_at, updated_at
                 FROM tickets WHERE id = ?1",
            )
            .context("Failed to prepare get_ticket")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(TicketRow {
                    id: row.get(0)?,
                    subject: row.get(1)?,
                    description: row.get(2)?,
                    status: row.get(3)?,
                    priority: row.get(4)?,
                    ticket_type: row.get(5)?,
                    user_identifier: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })
            .context("Failed to query ticket")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read ticket row")?;
                let mut ticket = r.into_ticket()?;
                ticket.voice_notes = self.voice_notes_for_ticket(ticket.id)?;
                ticket.attachments = self.attachments_for_ticket(ticket.id)?;
                Ok(Some(ticket))
            }
            None => Ok(None),
        }
    }

    pub fn update_ticket(&self, id: i64, patch: TicketPatch) -> Result<Option<Ticket>> {
        if self.get_ticket(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "tickets", id, "subject", Some(Value::from(patch.subject)))?;
        set_field(&tx, "tickets", id, "description", Some(Value::from(patch.description)))?;
        set_field(&tx, "tickets", id, "status", patch.status.map(|s| Value::from(s.as_str().to_string())))?;
        set_field(&tx, "tickets", id, "priority", patch.priority.map(|p| Value::from(p.as_str().to_string())))?;
        set_field(&tx, "tickets", id, "type", patch.ticket_type.map(Value::from))?;
        set_field(&tx, "tickets", id, "user_identifier", patch.user_identifier.map(Value::from))?;
        touch(&tx, "tickets", id)?;
        tx.commit().context("Failed to commit ticket update")?;
        self.get_ticket(id)
    }

    pub fn delete_ticket(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tickets WHERE id = ?1", params![id])
            .context("Failed to delete ticket")?;
        Ok(count > 0)
    }

    // ── Voice notes & attachments ─────────────────────────────────────

    pub fn add_voice_note(&self, ticket_id: i64, file_url: &str, duration: i64) -> Result<VoiceNote> {
        self.conn
            .execute(
                "INSERT INTO voice_notes (ticket_id, file_url, duration) VALUES (?1, ?2, ?3)",
                params![ticket_id, file_url, duration],
            )
            .context("Failed to insert voice note")?;
        let id = self.conn.last_insert_rowid();
        self.get_voice_note(id)?
            .context("Voice note not found after insert")
    }

    fn get_voice_note(&self, id: i64) -> Result<Option<VoiceNote>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ticket_id, file_url, duration, created_at
                 FROM voice_notes WHERE id = ?1",
            )
            .context("Failed to prepare get_voice_note")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(VoiceNote {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    file_url: row.get(2)?,
                    duration: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .context("Failed to query voice note")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read voice note row")?)),
            None => Ok(None),
        }
    }

    fn voice_notes_for_ticket(&self, ticket_id: i64) -> Result<Vec<VoiceNote>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ticket_id, file_url, duration, created_at
                 FROM voice_notes WHERE ticket_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare voice_notes_for_ticket")?;
        let rows = stmt
            .query_map(params![ticket_id], |row| {
                Ok(VoiceNote {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    file_url: row.get(2)?,
                    duration: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .context("Failed to query voice notes")?;
        let mut notes = Vec::new();
        for row in rows {
            notes.push(row.context("Failed to read voice note row")?);
        }
        Ok(notes)
    }

    pub fn add_attachment(&self, a: NewAttachment) -> Result<Attachment> {
        self.conn
            .execute(
                "INSERT INTO attachments (ticket_id, original_name, file_size, mime_type,
                    file_data, user_identifier)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    a.ticket_id,
                    a.original_name,
                    a.file_data.len() as i64,
                    a.mime_type,
                    a.file_data,
                    a.user_identifier,
                ],
            )
            .context("Failed to insert attachment")?;
        let id = self.conn.last_insert_rowid();
        self.get_attachment(id)?
            .context("Attachment not found after insert")
    }

    pub fn get_attachment(&self, id: i64) -> Result<Option<Attachment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ticket_id, original_name, file_size, mime_type, file_data,
                        user_identifier, created_at
                 FROM attachments WHERE id = ?1",
            )
            .context("Failed to prepare get_attachment")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(Attachment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    original_name: row.get(2)?,
                    file_size: row.get(3)?,
                    mime_type: row.get(4)?,
                    file_data: row.get(5)?,
                    user_identifier: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .context("Failed to query attachment")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read attachment row")?)),
            None => Ok(None),
        }
    }

    fn attachments_for_ticket(&self, ticket_id: i64) -> Result<Vec<Attachment>> {
        // Listing skips the binary payload; it is only loaded by id.
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ticket_id, original_name, file_size, mime_type,
                        user_identifier, created_at
                 FROM attachments WHERE ticket_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare attachments_for_ticket")?;
        let rows = stmt
            .query_map(params![ticket_id], |row| {
                Ok(Attachment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    original_name: row.get(2)?,
                    file_size: row.get(3)?,
                    mime_type: row.get(4)?,
                    file_data: Vec::new(),
                    user_identifier: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .context("Failed to query attachments")?;
        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row.context("Failed to read attachment row")?);
        }
        Ok(attachments)
    }

    // ── Notifications ─────────────────────────────────────────────────

    pub fn create_notification(&self, n: NewNotification) -> Result<Notification> {
        self.conn
            .execute(
                "INSERT INTO notifications (title, message, type, ticket_id, user_identifier, read)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![
                    n.title,
                    n.message,
                    n.kind.unwrap_or_else(|| "info".to_string()),
                    n.ticket_id,
                    n.user_identifier,
                ],
            )
            .context("Failed to insert notification")?;
        let id = self.conn.last_insert_rowid();
        self.get_notification(id)?
            .context("Notification not found after insert")
    }

    pub fn get_notification(&self, id: i64) -> Result<Option<Notification>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, message, type, ticket_id, user_identifier, read, read_at,
                        created_at
                 FROM notifications WHERE id = ?1",
            )
            .context("Failed to prepare get_notification")?;
        let mut rows = stmt
            .query_map(params![id], notification_from_row)
            .context("Failed to query notification")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read notification row")?)),
            None => Ok(None),
        }
    }

    pub fn list_notifications(
        &self,
        user_identifier: Option<String>,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut conds: Vec<(&str, Value)> = Vec::new();
        if let Some(u) = user_identifier {
            conds.push(("user_identifier", Value::from(u)));
        }
        if unread_only {
            conds.push(("read", Value::from(0i64)));
        }
        let (clause, mut values) = clause_from(conds);
        values.push(Value::from(limit));
        let sql = format!(
            "SELECT id, title, message, type, ticket_id, user_identifier, read, read_at, created_at
             FROM notifications{} ORDER BY created_at DESC, id DESC LIMIT ?{}",
            clause,
            values.len()
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_notifications")?;
        let rows = stmt
            .query_map(params_from_iter(values), notification_from_row)
            .context("Failed to query notifications")?;
        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row.context("Failed to read notification row")?);
        }
        Ok(notifications)
    }

    /// Bulk mark read/unread. Returns the updated rows.
    pub fn mark_notifications(&self, ids: &[i64], read: bool) -> Result<Vec<Notification>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = id_placeholders(ids.len());
        let sql = if read {
            format!(
                "UPDATE notifications SET read = 1, read_at = datetime('now') WHERE id IN ({})",
                placeholders
            )
        } else {
            format!(
                "UPDATE notifications SET read = 0, read_at = NULL WHERE id IN ({})",
                placeholders
            )
        };
        self.conn
            .execute(&sql, params_from_iter(ids.iter()))
            .context("Failed to mark notifications")?;
        let mut updated = Vec::new();
        for id in ids {
            if let Some(n) = self.get_notification(*id)? {
                updated.push(n);
            }
        }
        Ok(updated)
    }

    pub fn delete_notifications(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM notifications WHERE id IN ({})",
            id_placeholders(ids.len())
        );
        self.conn
            .execute(&sql, params_from_iter(ids.iter()))
            .context("Failed to delete notifications")
    }

    pub fn clear_notifications(&self, user_identifier: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM notifications WHERE user_identifier = ?1",
                params![user_identifier],
            )
            .context("Failed to clear notifications")
    }

    // ── Candidates ────────────────────────────────────────────────────

    pub fn create_candidate(&self, c: NewCandidate) -> Result<Candidate> {
        self.conn
            .execute(
                "INSERT INTO candidates (name, email, role, status, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    c.name,
                    c.email,
                    c.role,
                    c.status.unwrap_or_else(|| "applied".to_string()),
                    c.notes,
                ],
            )
            .context("Failed to insert candidate")?;
        let id = self.conn.last_insert_rowid();
        self.get_candidate(id)?
            .context("Candidate not found after insert")
    }

    pub fn list_candidates(&self, status: Option<String>) -> Result<Vec<Candidate>> {
        let (clause, values) = equality_clause(&[("status", status)]);
        let sql = format!(
            "SELECT id, name, email, role, status, notes, created_at, updated_at
             FROM candidates{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_candidates")?;
        let rows = stmt
            .query_map(params_from_iter(values), candidate_from_row)
            .context("Failed to query candidates")?;
        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row.context("Failed to read candidate row")?);
        }
        Ok(candidates)
    }

    pub fn get_candidate(&self, id: i64) -> Result<Option<Candidate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, email, role, status, notes, created_at, updated_at
                 FROM candidates WHERE id = ?1",
            )
            .context("Failed to prepare get_candidate")?;
        let mut rows = stmt
            .query_map(params![id], candidate_from_row)
            .context("Failed to query candidate")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read candidate row")?)),
            None => Ok(None),
        }
    }

    pub fn update_candidate(&self, id: i64, patch: CandidatePatch) -> Result<Option<Candidate>> {
        if self.get_candidate(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "candidates", id, "name", patch.name.map(Value::from))?;
        set_field(&tx, "candidates", id, "email", patch.email.map(Value::from))?;
        set_field(&tx, "candidates", id, "role", patch.role.map(Value::from))?;
        set_field(&tx, "candidates", id, "status", patch.status.map(Value::from))?;
        set_field(&tx, "candidates", id, "notes", patch.notes.map(Value::from))?;
        touch(&tx, "candidates", id)?;
        tx.commit().context("Failed to commit candidate update")?;
        self.get_candidate(id)
    }

    pub fn delete_candidate(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM candidates WHERE id = ?1", params![id])
            .context("Failed to delete candidate")?;
        Ok(count > 0)
    }

    // ── Interview postings ────────────────────────────────────────────

    pub fn create_posting(&self, p: NewPosting) -> Result<InterviewPosting> {
        self.conn
            .execute(
                "INSERT INTO interview_postings (title, department, description, status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    p.title,
                    p.department,
                    p.description,
                    p.status.unwrap_or_else(|| "open".to_string()),
                ],
            )
            .context("Failed to insert posting")?;
        let id = self.conn.last_insert_rowid();
        self.get_posting(id)?
            .context("Posting not found after insert")
    }

    pub fn list_postings(&self, status: Option<String>) -> Result<Vec<InterviewPosting>> {
        let (clause, values) = equality_clause(&[("status", status)]);
        let sql = format!(
            "SELECT id, title, department, description, status, created_at, updated_at
             FROM interview_postings{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_postings")?;
        let rows = stmt
            .query_map(params_from_iter(values), posting_from_row)
            .context("Failed to query postings")?;
        let mut postings = Vec::new();
        for row in rows {
            postings.push(row.context("Failed to read posting row")?);
        }
        Ok(postings)
    }

    pub fn get_posting(&self, id: i64) -> Result<Option<InterviewPosting>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, department, description, status, created_at, updated_at
                 FROM interview_postings WHERE id = ?1",
            )
            .context("Failed to prepare get_posting")?;
        let mut rows = stmt
            .query_map(params![id], posting_from_row)
            .context("Failed to query posting")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read posting row")?)),
            None => Ok(None),
        }
    }

    pub fn update_posting(&self, id: i64, patch: PostingPatch) -> Result<Option<InterviewPosting>> {
        if self.get_posting(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "interview_postings", id, "title", patch.title.map(Value::from))?;
        set_field(&tx, "interview_postings", id, "department", patch.department.map(Value::from))?;
        set_field(&tx, "interview_postings", id, "description", patch.description.map(Value::from))?;
        set_field(&tx, "interview_postings", id, "status", patch.status.map(Value::from))?;
        touch(&tx, "interview_postings", id)?;
        tx.commit().context("Failed to commit posting update")?;
        self.get_posting(id)
    }

    pub fn delete_posting(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM interview_postings WHERE id = ?1", params![id])
            .context("Failed to delete posting")?;
        Ok(count > 0)
    }

    // ── Drafts ────────────────────────────────────────────────────────

    pub fn create_draft(&self, d: NewDraft) -> Result<Draft> {
        self.conn
            .execute(
                "INSERT INTO drafts (kind, payload, user_identifier) VALUES (?1, ?2, ?3)",
                params![
                    d.kind,
                    serde_json::to_string(&d.payload).unwrap_or_else(|_| "{}".to_string()),
                    d.user_identifier,
                ],
            )
            .context("Failed to insert draft")?;
        let id = self.conn.last_insert_rowid();
        self.get_draft(id)?.context("Draft not found after insert")
    }

    pub fn list_drafts(
        &self,
        kind: Option<String>,
        user_identifier: Option<String>,
    ) -> Result<Vec<Draft>> {
        let (clause, values) =
            equality_clause(&[("kind", kind), ("user_identifier", user_identifier)]);
        let sql = format!(
            "SELECT id, kind, payload, user_identifier, created_at, updated_at
             FROM drafts{} ORDER BY created_at DESC, id DESC",
            clause
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_drafts")?;
        let rows = stmt
            .query_map(params_from_iter(values), draft_from_row)
            .context("Failed to query drafts")?;
        let mut drafts = Vec::new();
        for row in rows {
            drafts.push(row.context("Failed to read draft row")?);
        }
        Ok(drafts)
    }

    pub fn get_draft(&self, id: i64) -> Result<Option<Draft>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, kind, payload, user_identifier, created_at, updated_at
                 FROM drafts WHERE id = ?1",
            )
            .context("Failed to prepare get_draft")?;
        let mut rows = stmt
            .query_map(params![id], draft_from_row)
            .context("Failed to query draft")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read draft row")?)),
            None => Ok(None),
        }
    }

    pub fn update_draft(&self, id: i64, patch: DraftPatch) -> Result<Option<Draft>> {
        if self.get_draft(id)?.is_none() {
            return Ok(None);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        set_field(&tx, "drafts", id, "kind", patch.kind.map(Value::from))?;
        set_field(
            &tx,
            "drafts",
            id,
            "payload",
            patch.payload.map(|p| {
                Value::from(serde_json::to_string(&p).unwrap_or_else(|_| "{}".to_string()))
            }),
        )?;
        touch(&tx, "drafts", id)?;
        tx.commit().context("Failed to commit draft update")?;
        self.get_draft(id)
    }

    pub fn delete_draft(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM drafts WHERE id = ?1", params![id])
            .context("Failed to delete draft")?;
        Ok(count > 0)
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn query_ids(&self, sql: &str, values: Vec<Value>) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare query")?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, i64>(0))
            .context("Failed to query ids")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("Failed to read id")?);
        }
        Ok(ids)
    }
}

// ── Payload types ─────────────────────────────────────────────────────
//
// Insert/update payloads deliberately exclude server-managed fields (id,
// created_at, nested relations); unknown keys from clients are dropped by
// serde before they can reach the database.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub start_date: Option<String>,
    pub target_completion: Option<String>,
    pub project_manager: Option<String>,
    pub stakeholders: Option<Vec<String>>,
    pub budget: Option<f64>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub start_date: Option<String>,
    pub target_completion: Option<String>,
    pub project_manager: Option<String>,
    pub stakeholders: Option<Vec<String>>,
    pub budget: Option<f64>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEpic {
    pub project_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub start_date: Option<String>,
    pub target_completion: Option<String>,
    pub epic_owner: Option<String>,
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpicPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub start_date: Option<String>,
    pub target_completion: Option<String>,
    pub epic_owner: Option<String>,
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewFeature {
    pub epic_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub feature_owner: Option<String>,
    pub estimated_story_points: Option<f64>,
    pub user_stories: Option<Vec<UserStory>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub feature_owner: Option<String>,
    pub estimated_story_points: Option<f64>,
    pub user_stories: Option<Vec<UserStory>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub feature_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    pub estimated_hours: Option<f64>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSubTask {
    pub task_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubTaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub ticket_type: String,
    pub user_identifier: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TicketPatch {
    pub subject: String,
    pub description: String,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub ticket_type: Option<String>,
    pub user_identifier: Option<String>,
}

/// Typed equality filter for ticket listings.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub ticket_type: Option<String>,
    pub user_identifier: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub ticket_id: i64,
    pub original_name: String,
    pub mime_type: String,
    pub file_data: Vec<u8>,
    pub user_identifier: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub ticket_id: Option<i64>,
    pub user_identifier: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidatePatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPosting {
    pub title: String,
    pub department: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostingPatch {
    pub title: Option<String>,
    pub department: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDraft {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub user_identifier: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DraftPatch {
    pub kind: Option<String>,
    pub payload: Option<serde_json::Value>,
}

// ── Row mapping helpers ───────────────────────────────────────────────

struct TicketRow {
    id: i64,
    subject: String,
    description: String,
    status: String,
    priority: String,
    ticket_type: String,
    user_identifier: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TicketRow {
    fn into_ticket(self) -> Result<Ticket> {
        Ok(Ticket {
            id: self.id,
            subject: self.subject,
            description: self.description,
            status: self
                .status
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            priority: self
                .priority
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            ticket_type: self.ticket_type,
            user_identifier: self.user_identifier,
            created_at: self.created_at,
            updated_at: self.updated_at,
            voice_notes: Vec::new(),
            attachments: Vec::new(),
        })
    }
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        title: row.get(1)?,
        message: row.get(2)?,
        kind: row.get(3)?,
        ticket_id: row.get(4)?,
        user_identifier: row.get(5)?,
        read: row.get::<_, i64>(6)? != 0,
        read_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn candidate_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        status: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn posting_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InterviewPosting> {
    Ok(InterviewPosting {
        id: row.get(0)?,
        title: row.get(1)?,
        department: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn draft_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Draft> {
    let payload: String = row.get(2)?;
    Ok(Draft {
        id: row.get(0)?,
        kind: row.get(1)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        user_identifier: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Parse a JSON text column into a string list; malformed data counts as empty.
fn string_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

/// Parse the embedded user-story JSON column; malformed data counts as empty.
fn story_list(raw: String) -> Vec<UserStory> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

/// Build `" WHERE a = ?1 AND b = ?2"` from optional equality conditions.
fn equality_clause(conds: &[(&str, Option<String>)]) -> (String, Vec<Value>) {
    let present: Vec<(&str, Value)> = conds
        .iter()
        .filter_map(|(col, v)| v.clone().map(|v| (*col, Value::from(v))))
        .collect();
    clause_from(present)
}

fn clause_from(conds: Vec<(&str, Value)>) -> (String, Vec<Value>) {
    if conds.is_empty() {
        return (String::new(), Vec::new());
    }
    let parts: Vec<String> = conds
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{} = ?{}", col, i + 1))
        .collect();
    let values = conds.into_iter().map(|(_, v)| v).collect();
    (format!(" WHERE {}", parts.join(" AND ")), values)
}

fn id_placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn set_field(
    tx: &rusqlite::Transaction<'_>,
    table: &str,
    id: i64,
    column: &str,
    value: Option<Value>,
) -> Result<()> {
    if let Some(value) = value {
        let sql = format!("UPDATE {} SET {} = ?1 WHERE id = ?2", table, column);
        tx.execute(&sql, params![value, id])
            .with_context(|| format!("Failed to update {}.{}", table, column))?;
    }
    Ok(())
}

fn touch(tx: &rusqlite::Transaction<'_>, table: &str, id: i64) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET updated_at = datetime('now') WHERE id = ?1",
        table
    );
    tx.execute(&sql, params![id])
        .with_context(|| format!("Failed to touch {}", table))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> CaseDb {
        CaseDb::new_in_memory().unwrap()
    }

    fn seed_hierarchy(db: &CaseDb) -> (Project, Epic, Feature, Task) {
        let project = db
            .create_project(NewProject {
                name: "Platform".to_string(),
                ..Default::default()
            })
            .unwrap();
        let epic = db
            .create_epic(NewEpic {
                project_id: project.id,
                name: "Auth".to_string(),
                ..Default::default()
            })
            .unwrap();
        let feature = db
            .create_feature(NewFeature {
                epic_id: epic.id,
                name: "Login".to_string(),
                user_stories: Some(vec![UserStory {
                    title: "As a user I can log in".to_string(),
                    status: "done".to_string(),
                    story_points: 5.0,
                }]),
                ..Default::default()
            })
            .unwrap();
        let task = db
            .create_task(NewTask {
                feature_id: feature.id,
                title: "Build form".to_string(),
                ..Default::default()
            })
            .unwrap();
        (project, epic, feature, task)
    }

    #[test]
    fn test_project_graph_loads_nested_children() {
        let db = db();
        let (project, _epic, feature, task) = seed_hierarchy(&db);
        db.create_sub_task(NewSubTask {
            task_id: task.id,
            title: "Markup".to_string(),
            ..Default::default()
        })
        .unwrap();

        let loaded = db.get_project(project.id).unwrap().unwrap();
        assert_eq!(loaded.epics.len(), 1);
        assert_eq!(loaded.epics[0].features.len(), 1);
        assert_eq!(loaded.epics[0].features[0].id, feature.id);
        assert_eq!(loaded.epics[0].features[0].tasks.len(), 1);
        assert_eq!(loaded.epics[0].features[0].tasks[0].sub_tasks.len(), 1);
        assert_eq!(loaded.epics[0].features[0].user_stories[0].story_points, 5.0);
    }

    #[test]
    fn test_project_update_patches_only_given_fields() {
        let db = db();
        let (project, ..) = seed_hierarchy(&db);
        let updated = db
            .update_project(
                project.id,
                ProjectPatch {
                    status: Some("active".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, "active");
        assert_eq!(updated.name, "Platform");
    }

    #[test]
    fn test_update_missing_project_returns_none() {
        let db = db();
        assert!(db
            .update_project(999, ProjectPatch::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_cascade_delete_project_removes_descendants() {
        let db = db();
        let (project, epic, feature, task) = seed_hierarchy(&db);
        assert!(db.delete_project(project.id).unwrap());
        assert!(db.get_epic(epic.id).unwrap().is_none());
        assert!(db.get_feature(feature.id).unwrap().is_none());
        assert!(db.get_task(task.id).unwrap().is_none());
    }

    #[test]
    fn test_epic_insert_requires_existing_project() {
        let db = db();
        let err = db
            .create_epic(NewEpic {
                project_id: 42,
                name: "orphan".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("insert epic"));
    }

    #[test]
    fn test_ticket_crud_roundtrip() {
        let db = db();
        let ticket = db
            .create_ticket(NewTicket {
                subject: "Login broken".to_string(),
                description: "Cannot log in on iOS".to_string(),
                status: TicketStatus::Open,
                priority: TicketPriority::High,
                ticket_type: "Bug".to_string(),
                user_identifier: Some("u-1".to_string()),
            })
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);

        let fetched = db.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(fetched.subject, "Login broken");
        assert_eq!(fetched.priority, TicketPriority::High);

        let updated = db
            .update_ticket(
                ticket.id,
                TicketPatch {
                    subject: "Login broken".to_string(),
                    description: "Cannot log in on iOS".to_string(),
                    status: Some(TicketStatus::Closed),
                    priority: None,
                    ticket_type: None,
                    user_identifier: None,
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, TicketStatus::Closed);

        assert!(db.delete_ticket(ticket.id).unwrap());
        assert!(db.get_ticket(ticket.id).unwrap().is_none());
    }

    #[test]
    fn test_ticket_filters() {
        let db = db();
        for (subject, priority) in [("a", TicketPriority::High), ("b", TicketPriority::Low)] {
            db.create_ticket(NewTicket {
                subject: subject.to_string(),
                description: "d".to_string(),
                status: TicketStatus::Open,
                priority,
                ticket_type: "Bug".to_string(),
                user_identifier: None,
            })
            .unwrap();
        }
        let high = db
            .list_tickets(TicketFilter {
                priority: Some(TicketPriority::High),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].subject, "a");
    }

    #[test]
    fn test_ticket_children_load_and_cascade() {
        let db = db();
        let ticket = db
            .create_ticket(NewTicket {
                subject: "s".to_string(),
                description: "d".to_string(),
                status: TicketStatus::Open,
                priority: TicketPriority::Medium,
                ticket_type: "Question".to_string(),
                user_identifier: None,
            })
            .unwrap();
        db.add_voice_note(ticket.id, "/api/voice-notes/1/x.wav", 60)
            .unwrap();
        let attachment = db
            .add_attachment(NewAttachment {
                ticket_id: ticket.id,
                original_name: "log.txt".to_string(),
                mime_type: "text/plain".to_string(),
                file_data: vec![1, 2, 3],
                user_identifier: None,
            })
            .unwrap();
        assert_eq!(attachment.file_size, 3);

        let loaded = db.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(loaded.voice_notes.len(), 1);
        assert_eq!(loaded.attachments.len(), 1);
        // Listing omits the payload; fetch by id includes it.
        assert!(loaded.attachments[0].file_data.is_empty());
        let full = db.get_attachment(attachment.id).unwrap().unwrap();
        assert_eq!(full.file_data, vec![1, 2, 3]);

        db.delete_ticket(ticket.id).unwrap();
        assert!(db.get_attachment(attachment.id).unwrap().is_none());
    }

    #[test]
    fn test_notifications_mark_and_clear() {
        let db = db();
        let n1 = db
            .create_notification(NewNotification {
                title: "t1".to_string(),
                message: "m1".to_string(),
                kind: None,
                ticket_id: None,
                user_identifier: Some("u-1".to_string()),
            })
            .unwrap();
        let n2 = db
            .create_notification(NewNotification {
                title: "t2".to_string(),
                message: "m2".to_string(),
                kind: Some("ticket_created".to_string()),
                ticket_id: None,
                user_identifier: Some("u-1".to_string()),
            })
            .unwrap();
        assert!(!n1.read);
        assert_eq!(n1.kind, "info");

        let updated = db.mark_notifications(&[n1.id, n2.id], true).unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|n| n.read && n.read_at.is_some()));

        let unread = db
            .list_notifications(Some("u-1".to_string()), true, 50)
            .unwrap();
        assert!(unread.is_empty());

        let reverted = db.mark_notifications(&[n1.id], false).unwrap();
        assert!(!reverted[0].read);
        assert!(reverted[0].read_at.is_none());

        let cleared = db.clear_notifications("u-1").unwrap();
        assert_eq!(cleared, 2);
    }

    #[test]
    fn test_list_notifications_respects_limit() {
        let db = db();
        for i in 0..5 {
            db.create_notification(NewNotification {
                title: format!("t{}", i),
                message: "m".to_string(),
                kind: None,
                ticket_id: None,
                user_identifier: None,
            })
            .unwrap();
        }
        let listed = db.list_notifications(None, false, 3).unwrap();
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn test_candidate_and_posting_crud() {
        let db = db();
        let c = db
            .create_candidate(NewCandidate {
                name: "Alex".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(c.status, "applied");
        let c = db
            .update_candidate(
                c.id,
                CandidatePatch {
                    status: Some("interviewing".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(c.status, "interviewing");
        assert!(db.delete_candidate(c.id).unwrap());

        let p = db
            .create_posting(NewPosting {
                title: "Backend engineer".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(p.status, "open");
        assert_eq!(db.list_postings(None).unwrap().len(), 1);
    }

    #[test]
    fn test_draft_payload_roundtrip() {
        let db = db();
        let d = db
            .create_draft(NewDraft {
                kind: "ticket".to_string(),
                payload: serde_json::json!({"subject": "wip"}),
                user_identifier: None,
            })
            .unwrap();
        assert_eq!(d.payload["subject"], "wip");
        let d = db
            .update_draft(
                d.id,
                DraftPatch {
                    kind: None,
                    payload: Some(serde_json::json!({"subject": "v2"})),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(d.payload["subject"], "v2");
    }

    #[test]
    fn test_malformed_embedded_stories_count_as_empty() {
        let db = db();
        let (_p, epic, feature, _t) = seed_hierarchy(&db);
        db.conn
            .execute(
                "UPDATE features SET user_stories = 'not json' WHERE id = ?1",
                params![feature.id],
            )
            .unwrap();
        let loaded = db.get_epic(epic.id).unwrap().unwrap();
        assert!(loaded.features[0].user_stories.is_empty());
    }
}
