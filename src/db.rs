use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::*;

/// Async-safe handle to the application database.
///
/// Wraps `TaskifyDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. One handle is created at process
/// start and shared by the HTTP handlers and the reminder sweep.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TaskifyDb>>,
}

impl DbHandle {
    pub fn new(db: TaskifyDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskifyDb) -> Result<R> + Send + 'static,
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

pub struct TaskifyDb {
    conn: Connection,
}

impl TaskifyDb {
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
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL REFERENCES users(id),
                    name TEXT NOT NULL,
                    description TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id),
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    deadline TEXT NOT NULL,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    status TEXT NOT NULL DEFAULT 'open',
                    assigned_to INTEGER REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    expires_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_deadline ON tasks(deadline, status);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── User CRUD ─────────────────────────────────────────────────────

    pub fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (name, email, password_hash) VALUES (?1, ?2, ?3)",
                params![name, email, password_hash],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, email, created_at FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user by email")
    }

    /// Look up the stored credential hash for a login attempt.
    /// Returns (user id, hash) so the caller can verify and then issue a session.
    pub fn get_credential_hash(&self, email: &str) -> Result<Option<(i64, String)>> {
        self.conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query credential hash")
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, email, created_at FROM users ORDER BY id")
            .context("Failed to prepare list_users")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?);
        }
        Ok(users)
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    pub fn create_project(
        &self,
        owner_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (owner_id, name, description) VALUES (?1, ?2, ?3)",
                params![owner_id, name, description],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, owner_id, name, description, created_at FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query project")
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, owner_id, name, description, created_at FROM projects ORDER BY id",
            )
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?);
        }
        Ok(projects)
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        project_id: i64,
        title: &str,
        description: &str,
        deadline: DateTime<Utc>,
        priority: &Priority,
        status: &TaskStatus,
        assigned_to: Option<i64>,
    ) -> Result<Task> {
        self.conn
            .execute(
                "INSERT INTO tasks (project_id, title, description, deadline, priority, status, assigned_to)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    project_id,
                    title,
                    description,
                    deadline,
                    priority.as_str(),
                    status.as_str(),
                    assigned_to
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, title, description, deadline, priority, status, assigned_to, created_at, updated_at
                 FROM tasks WHERE id = ?1",
            )
            .context("Failed to prepare get_task")?;
        let row = stmt
            .query_row(params![id], TaskRow::from_row)
            .optional()
            .context("Failed to query task")?;
        match row {
            Some(r) => Ok(Some(r.into_task()?)),
            None => Ok(None),
        }
    }

    pub fn list_tasks(&self, project_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, title, description, deadline, priority, status, assigned_to, created_at, updated_at
                 FROM tasks WHERE project_id = ?1 ORDER BY deadline",
            )
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![project_id], TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    /// Full-replace update: every field is resupplied and written wholesale,
    /// including the deadline. Returns None if the task does not exist.
    #[allow(clippy::too_many_arguments)]
    pub fn update_task(
        &self,
        id: i64,
        project_id: i64,
        title: &str,
        description: &str,
        deadline: DateTime<Utc>,
        priority: &Priority,
        status: &TaskStatus,
        assigned_to: Option<i64>,
    ) -> Result<Option<Task>> {
        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET project_id = ?2, title = ?3, description = ?4, deadline = ?5,
                        priority = ?6, status = ?7, assigned_to = ?8, updated_at = datetime('now')
                 WHERE id = ?1",
                params![
                    id,
                    project_id,
                    title,
                    description,
                    deadline,
                    priority.as_str(),
                    status.as_str(),
                    assigned_to
                ],
            )
            .context("Failed to update task")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_task(id)
    }

    /// Tasks whose deadline lies in `[window_start, window_end]` (inclusive)
    /// and whose status is not `exclude_status`, each joined with the
    /// assignee's display name and email. The join is LEFT so tasks with a
    /// null or dangling assignee still come back (with None contact fields)
    /// and the caller decides to skip them.
    pub fn find_tasks_due_between(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        exclude_status: &TaskStatus,
    ) -> Result<Vec<DueTask>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.id, t.project_id, t.title, t.description, t.deadline, t.priority, t.status,
                        t.assigned_to, t.created_at, t.updated_at, u.name, u.email
                 FROM tasks t
                 LEFT JOIN users u ON u.id = t.assigned_to
                 WHERE t.deadline >= ?1 AND t.deadline <= ?2 AND t.status != ?3
                 ORDER BY t.deadline",
            )
            .context("Failed to prepare find_tasks_due_between")?;
        let rows = stmt
            .query_map(
                params![window_start, window_end, exclude_status.as_str()],
                |row| {
                    Ok((
                        TaskRow::from_row(row)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, Option<String>>(11)?,
                    ))
                },
            )
            .context("Failed to query due-soon tasks")?;
        let mut due = Vec::new();
        for row in rows {
            let (r, assignee_name, assignee_email) = row.context("Failed to read due task row")?;
            due.push(DueTask {
                task: r.into_task()?,
                assignee_name,
                assignee_email,
            });
        }
        Ok(due)
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token, user_id, expires_at],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    /// Resolve a session token to its user. Expired sessions resolve to None.
    pub fn get_session_user(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT u.id, u.name, u.email, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                params![token, now],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to resolve session")
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(changed > 0)
    }
}

/// Raw task row with status/priority still as stored text.
struct TaskRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    deadline: DateTime<Utc>,
    priority: String,
    status: String,
    assigned_to: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            deadline: row.get(4)?,
            priority: row.get(5)?,
            status: row.get(6)?,
            assigned_to: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            deadline: self.deadline,
            priority: Priority::from_str(&self.priority)
                .map_err(|e| anyhow::anyhow!("Corrupt priority column: {}", e))?,
            status: TaskStatus::from_str(&self.status)
                .map_err(|e| anyhow::anyhow!("Corrupt status column: {}", e))?,
            assigned_to: self.assigned_to,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    fn db() -> TaskifyDb {
        TaskifyDb::new_in_memory().unwrap()
    }

    fn seed_user(db: &TaskifyDb, name: &str, email: &str) -> User {
        db.create_user(name, email, "$2b$04$fakehash").unwrap()
    }

    #[test]
    fn test_create_and_get_user() {
        let db = db();
        let user = seed_user(&db, "Ada", "ada@example.com");
        let fetched = db.get_user(user.id).unwrap().unwrap();
        assert_eq!(fetched.email, "ada@example.com");
        assert!(db.get_user(9999).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = db();
        seed_user(&db, "Ada", "ada@example.com");
        let dup = db.create_user("Imposter", "ada@example.com", "hash");
        assert!(dup.is_err());
    }

    #[test]
    fn test_credential_hash_lookup() {
        let db = db();
        let user = seed_user(&db, "Ada", "ada@example.com");
        let (id, hash) = db.get_credential_hash("ada@example.com").unwrap().unwrap();
        assert_eq!(id, user.id);
        assert_eq!(hash, "$2b$04$fakehash");
        assert!(db.get_credential_hash("nobody@x.com").unwrap().is_none());
    }

    #[test]
    fn test_project_crud() {
        let db = db();
        let owner = seed_user(&db, "Ada", "ada@example.com");
        let project = db
            .create_project(owner.id, "Apollo", Some("Moonshot"))
            .unwrap();
        assert_eq!(project.owner_id, owner.id);
        assert_eq!(project.description.as_deref(), Some("Moonshot"));

        let bare = db.create_project(owner.id, "Bare", None).unwrap();
        assert!(bare.description.is_none());

        let all = db.list_projects().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_task_create_and_list() {
        let db = db();
        let owner = seed_user(&db, "Ada", "ada@example.com");
        let project = db.create_project(owner.id, "Apollo", None).unwrap();
        let deadline = Utc::now() + Duration::days(3);

        let task = db
            .create_task(
                project.id,
                "Write report",
                "Quarterly report",
                deadline,
                &Priority::High,
                &TaskStatus::Open,
                Some(owner.id),
            )
            .unwrap();
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.assigned_to, Some(owner.id));
        assert_eq!(task.deadline, deadline);

        let tasks = db.list_tasks(project.id).unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(db.list_tasks(9999).unwrap().is_empty());
    }

    #[test]
    fn test_task_requires_existing_project() {
        let db = db();
        let result = db.create_task(
            42,
            "Orphan",
            "",
            Utc::now(),
            &Priority::Low,
            &TaskStatus::Open,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_update_task_replaces_all_fields() {
        let db = db();
        let owner = seed_user(&db, "Ada", "ada@example.com");
        let project = db.create_project(owner.id, "Apollo", None).unwrap();
        let task = db
            .create_task(
                project.id,
                "Draft",
                "v1",
                Utc::now() + Duration::days(1),
                &Priority::Low,
                &TaskStatus::Open,
                None,
            )
            .unwrap();

        let new_deadline = Utc::now() + Duration::days(10);
        let updated = db
            .update_task(
                task.id,
                project.id,
                "Final",
                "v2",
                new_deadline,
                &Priority::High,
                &TaskStatus::Review,
                Some(owner.id),
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.status, TaskStatus::Review);
        assert_eq!(updated.deadline, new_deadline);
        assert_eq!(updated.assigned_to, Some(owner.id));

        assert!(
            db.update_task(
                9999,
                project.id,
                "x",
                "",
                new_deadline,
                &Priority::Low,
                &TaskStatus::Open,
                None,
            )
            .unwrap()
            .is_none()
        );
    }

    #[test]
    fn test_status_transitions_unconstrained() {
        // Any status may be written over any other; no transition table exists.
        let db = db();
        let owner = seed_user(&db, "Ada", "ada@example.com");
        let project = db.create_project(owner.id, "Apollo", None).unwrap();
        let task = db
            .create_task(
                project.id,
                "T",
                "",
                Utc::now(),
                &Priority::Low,
                &TaskStatus::Closed,
                None,
            )
            .unwrap();
        let reopened = db
            .update_task(
                task.id,
                project.id,
                "T",
                "",
                task.deadline,
                &Priority::Low,
                &TaskStatus::Open,
                None,
            )
            .unwrap()
            .unwrap();
        assert_eq!(reopened.status, TaskStatus::Open);
    }

    #[test]
    fn test_find_tasks_due_between_filters() {
        let db = db();
        let owner = seed_user(&db, "Ada", "ada@example.com");
        let project = db.create_project(owner.id, "Apollo", None).unwrap();
        let now = Utc::now();

        let mk = |title: &str, offset_hours: i64, status: TaskStatus| {
            db.create_task(
                project.id,
                title,
                "",
                now + Duration::hours(offset_hours),
                &Priority::Medium,
                &status,
                Some(owner.id),
            )
            .unwrap()
        };
        mk("in-window", 24, TaskStatus::Open);
        mk("past", -1, TaskStatus::Open);
        mk("beyond", 72, TaskStatus::Open);
        mk("closed", 1, TaskStatus::Closed);

        let due = db
            .find_tasks_due_between(now, now + Duration::hours(48), &TaskStatus::Closed)
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task.title, "in-window");
        assert_eq!(due[0].assignee_email.as_deref(), Some("ada@example.com"));
        assert_eq!(due[0].assignee_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_find_tasks_window_bounds_inclusive() {
        let db = db();
        let owner = seed_user(&db, "Ada", "ada@example.com");
        let project = db.create_project(owner.id, "Apollo", None).unwrap();
        // Whole-second timestamps so the stored text compares exactly.
        let now = Utc::now()
            .with_nanosecond(0)
            .expect("zero nanoseconds is always valid");
        let end = now + Duration::hours(48);

        for (title, deadline) in [("at-start", now), ("at-end", end)] {
            db.create_task(
                project.id,
                title,
                "",
                deadline,
                &Priority::Low,
                &TaskStatus::Open,
                Some(owner.id),
            )
            .unwrap();
        }

        let due = db
            .find_tasks_due_between(now, end, &TaskStatus::Closed)
            .unwrap();
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn test_find_tasks_unassigned_has_no_contact() {
        let db = db();
        let owner = seed_user(&db, "Ada", "ada@example.com");
        let project = db.create_project(owner.id, "Apollo", None).unwrap();
        let now = Utc::now();
        db.create_task(
            project.id,
            "unassigned",
            "",
            now + Duration::hours(2),
            &Priority::Low,
            &TaskStatus::Open,
            None,
        )
        .unwrap();

        let due = db
            .find_tasks_due_between(now, now + Duration::hours(48), &TaskStatus::Closed)
            .unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].assignee_email.is_none());
        assert!(due[0].assignee_name.is_none());
    }

    #[test]
    fn test_sessions_expiry_and_revocation() {
        let db = db();
        let user = seed_user(&db, "Ada", "ada@example.com");
        let now = Utc::now();

        db.create_session("tok-live", user.id, now + Duration::days(30))
            .unwrap();
        db.create_session("tok-dead", user.id, now - Duration::hours(1))
            .unwrap();

        assert!(db.get_session_user("tok-live", now).unwrap().is_some());
        assert!(db.get_session_user("tok-dead", now).unwrap().is_none());
        assert!(db.get_session_user("tok-missing", now).unwrap().is_none());

        assert!(db.delete_session("tok-live").unwrap());
        assert!(db.get_session_user("tok-live", now).unwrap().is_none());
        assert!(!db.delete_session("tok-live").unwrap());
    }
}
