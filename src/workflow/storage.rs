/// SQLite persistence layer for workflow definitions, instances, steps and audit
///
/// Ids, timestamps (RFC 3339) and JSON payloads are stored as TEXT. Multi-row
/// writes go through the connection-level functions below inside one
/// transaction opened with `WorkflowStorage::begin`; the `WorkflowStorage`
/// methods are single-statement reads against the pool.

use crate::workflow::types::{
    InstanceFilter, StepStatus, WorkflowAuditLog, WorkflowInstance, WorkflowRecord, WorkflowStep,
};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, SqliteConnection, Transaction,
};
use std::path::Path;
use uuid::Uuid;

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and ensure the schema
    pub async fn open(path: &Path) -> Result<Self> {
        tracing::info!("🗄️ Opening workflow database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open workflow database '{}': {}", path.display(), e))?;

        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn in_memory() -> Result<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open in-memory database: {}", e))?;

        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                definition TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                is_active BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT,
                created_by TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_instances (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                tenant_id TEXT,
                instance_data TEXT NOT NULL,
                status TEXT NOT NULL,
                current_step_id TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                initiated_by TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_steps (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                step_type TEXT NOT NULL,
                status TEXT NOT NULL,
                assigned_to TEXT,
                assigned_role TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                comments TEXT,
                step_data TEXT,
                sequence INTEGER NOT NULL,
                advanced BOOLEAN NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_audit_logs (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL,
                action TEXT NOT NULL,
                step_id TEXT,
                previous_state TEXT,
                new_state TEXT,
                performed_by TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                comments TEXT,
                additional_data TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_workflows_name ON workflows(name)",
            "CREATE INDEX IF NOT EXISTS idx_instances_workflow ON workflow_instances(workflow_id)",
            "CREATE INDEX IF NOT EXISTS idx_steps_instance ON workflow_steps(instance_id, sequence)",
            "CREATE INDEX IF NOT EXISTS idx_audit_instance ON workflow_audit_logs(instance_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize workflow schema: {}", e))?;
        }

        Ok(())
    }

    /// Open a transaction; deref it to `&mut SqliteConnection` for the write functions
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to begin transaction: {}", e))
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRecord>> {
        let mut conn = self.pool.acquire().await?;
        fetch_workflow(&mut conn, id).await
    }

    /// All definitions, or only active ones; ordered by name then version
    pub async fn list_workflows(&self, active_only: bool) -> Result<Vec<WorkflowRecord>> {
        let sql = if active_only {
            "SELECT * FROM workflows WHERE is_active = 1 ORDER BY name, version"
        } else {
            "SELECT * FROM workflows ORDER BY name, version"
        };

        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn get_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        let mut conn = self.pool.acquire().await?;
        fetch_instance(&mut conn, id).await
    }

    /// Instances matching the filter, newest first
    pub async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_instances
            WHERE (?1 IS NULL OR workflow_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY started_at DESC, rowid DESC
            "#,
        )
        .bind(filter.workflow_id.map(|id| id.to_string()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instance_from_row).collect()
    }

    pub async fn get_steps(&self, instance_id: Uuid) -> Result<Vec<WorkflowStep>> {
        let mut conn = self.pool.acquire().await?;
        fetch_steps(&mut conn, instance_id).await
    }

    /// Audit trail of an instance, newest first
    pub async fn audit_log(&self, instance_id: Uuid) -> Result<Vec<WorkflowAuditLog>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_audit_logs WHERE instance_id = ? ORDER BY timestamp DESC, rowid DESC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }

    /// Running instances with a Pending step assigned to the user or to any role, oldest first
    pub async fn user_task_instances(&self, user_id: &str) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT i.* FROM workflow_instances i
            JOIN workflow_steps s ON s.instance_id = i.id
            WHERE i.status = 'Running'
              AND s.status = ?
              AND (s.assigned_to = ? OR s.assigned_role IS NOT NULL)
            ORDER BY i.started_at ASC
            "#,
        )
        .bind(StepStatus::Pending.as_str())
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instance_from_row).collect()
    }
}

pub async fn insert_workflow(conn: &mut SqliteConnection, record: &WorkflowRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO workflows (id, name, description, definition, version, is_active, created_at, updated_at, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.name)
    .bind(&record.description)
    .bind(&record.definition)
    .bind(record.version)
    .bind(record.is_active)
    .bind(timestamp(&record.created_at))
    .bind(record.updated_at.as_ref().map(timestamp))
    .bind(&record.created_by)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn fetch_workflow(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<WorkflowRecord>> {
    let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(workflow_from_row).transpose()
}

/// Flip the active flag; false when no such workflow exists
pub async fn set_workflow_active(conn: &mut SqliteConnection, id: Uuid, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE workflows SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(active)
        .bind(timestamp(&Utc::now()))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_running_instances(conn: &mut SqliteConnection, workflow_id: Uuid) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS running FROM workflow_instances WHERE workflow_id = ? AND status = 'Running'",
    )
    .bind(workflow_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.get("running"))
}

/// Delete a workflow and every instance, step and audit row beneath it
pub async fn delete_workflow_cascade(conn: &mut SqliteConnection, id: Uuid) -> Result<bool> {
    let id = id.to_string();
    let owned_instances = "SELECT id FROM workflow_instances WHERE workflow_id = ?";

    sqlx::query(&format!("DELETE FROM workflow_audit_logs WHERE instance_id IN ({})", owned_instances))
        .bind(&id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!("DELETE FROM workflow_steps WHERE instance_id IN ({})", owned_instances))
        .bind(&id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM workflow_instances WHERE workflow_id = ?")
        .bind(&id)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
        .bind(&id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn insert_instance(conn: &mut SqliteConnection, instance: &WorkflowInstance) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO workflow_instances
            (id, workflow_id, tenant_id, instance_data, status, current_step_id, started_at, completed_at, initiated_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(instance.id.to_string())
    .bind(instance.workflow_id.to_string())
    .bind(&instance.tenant_id)
    .bind(serde_json::to_string(&instance.instance_data)?)
    .bind(instance.status.as_str())
    .bind(&instance.current_step_id)
    .bind(timestamp(&instance.started_at))
    .bind(instance.completed_at.as_ref().map(timestamp))
    .bind(&instance.initiated_by)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update_instance(conn: &mut SqliteConnection, instance: &WorkflowInstance) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE workflow_instances
        SET instance_data = ?, status = ?, current_step_id = ?, completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(serde_json::to_string(&instance.instance_data)?)
    .bind(instance.status.as_str())
    .bind(&instance.current_step_id)
    .bind(instance.completed_at.as_ref().map(timestamp))
    .bind(instance.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn fetch_instance(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<WorkflowInstance>> {
    let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(instance_from_row).transpose()
}

/// Step records of an instance in creation order
pub async fn fetch_steps(conn: &mut SqliteConnection, instance_id: Uuid) -> Result<Vec<WorkflowStep>> {
    let rows = sqlx::query("SELECT * FROM workflow_steps WHERE instance_id = ? ORDER BY sequence")
        .bind(instance_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(step_from_row).collect()
}

pub async fn upsert_step(conn: &mut SqliteConnection, step: &WorkflowStep) -> Result<()> {
    let step_data = step.step_data.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO workflow_steps
            (id, instance_id, step_id, step_name, step_type, status, assigned_to, assigned_role,
             created_at, started_at, completed_at, comments, step_data, sequence, advanced)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at,
            comments = excluded.comments,
            step_data = excluded.step_data,
            advanced = excluded.advanced
        "#,
    )
    .bind(step.id.to_string())
    .bind(step.instance_id.to_string())
    .bind(&step.step_id)
    .bind(&step.step_name)
    .bind(&step.step_type)
    .bind(step.status.as_str())
    .bind(&step.assigned_to)
    .bind(&step.assigned_role)
    .bind(timestamp(&step.created_at))
    .bind(step.started_at.as_ref().map(timestamp))
    .bind(step.completed_at.as_ref().map(timestamp))
    .bind(&step.comments)
    .bind(step_data)
    .bind(step.sequence)
    .bind(step.advanced)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn insert_audit(conn: &mut SqliteConnection, entry: &WorkflowAuditLog) -> Result<()> {
    let additional_data = entry.additional_data.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO workflow_audit_logs
            (id, instance_id, action, step_id, previous_state, new_state, performed_by, timestamp, comments, additional_data)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.instance_id.to_string())
    .bind(&entry.action)
    .bind(&entry.step_id)
    .bind(&entry.previous_state)
    .bind(&entry.new_state)
    .bind(&entry.performed_by)
    .bind(timestamp(&entry.timestamp))
    .bind(&entry.comments)
    .bind(additional_data)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("Invalid stored timestamp '{}': {}", raw, e))
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    row.try_get::<Option<String>, _>(column)?
        .as_deref()
        .map(parse_timestamp)
        .transpose()
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| anyhow::anyhow!("Invalid stored id '{}': {}", raw, e))
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>> {
    row.try_get::<Option<String>, _>(column)?
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| anyhow::anyhow!("Invalid stored JSON in '{}': {}", column, e))
}

fn workflow_from_row(row: &SqliteRow) -> Result<WorkflowRecord> {
    Ok(WorkflowRecord {
        id: uuid_column(row, "id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        definition: row.try_get("definition")?,
        version: row.try_get("version")?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: optional_timestamp(row, "updated_at")?,
        created_by: row.try_get("created_by")?,
    })
}

fn instance_from_row(row: &SqliteRow) -> Result<WorkflowInstance> {
    Ok(WorkflowInstance {
        id: uuid_column(row, "id")?,
        workflow_id: uuid_column(row, "workflow_id")?,
        tenant_id: row.try_get("tenant_id")?,
        instance_data: json_column(row, "instance_data")?.unwrap_or(Value::Null),
        status: row.try_get::<String, _>("status")?.parse()?,
        current_step_id: row.try_get("current_step_id")?,
        started_at: parse_timestamp(&row.try_get::<String, _>("started_at")?)?,
        completed_at: optional_timestamp(row, "completed_at")?,
        initiated_by: row.try_get("initiated_by")?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<WorkflowStep> {
    Ok(WorkflowStep {
        id: uuid_column(row, "id")?,
        instance_id: uuid_column(row, "instance_id")?,
        step_id: row.try_get("step_id")?,
        step_name: row.try_get("step_name")?,
        step_type: row.try_get("step_type")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        assigned_to: row.try_get("assigned_to")?,
        assigned_role: row.try_get("assigned_role")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        started_at: optional_timestamp(row, "started_at")?,
        completed_at: optional_timestamp(row, "completed_at")?,
        comments: row.try_get("comments")?,
        step_data: json_column(row, "step_data")?,
        sequence: row.try_get("sequence")?,
        advanced: row.try_get("advanced")?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<WorkflowAuditLog> {
    Ok(WorkflowAuditLog {
        id: uuid_column(row, "id")?,
        instance_id: uuid_column(row, "instance_id")?,
        action: row.try_get("action")?,
        step_id: row.try_get("step_id")?,
        previous_state: row.try_get("previous_state")?,
        new_state: row.try_get("new_state")?,
        performed_by: row.try_get("performed_by")?,
        timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?)?,
        comments: row.try_get("comments")?,
        additional_data: json_column(row, "additional_data")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::WorkflowStatus;
    use serde_json::json;

    fn record(name: &str, active: bool) -> WorkflowRecord {
        WorkflowRecord {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            definition: "{}".into(),
            version: 1,
            is_active: active,
            created_at: Utc::now(),
            updated_at: None,
            created_by: "tester".into(),
        }
    }

    fn instance(workflow_id: Uuid) -> WorkflowInstance {
        WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id,
            tenant_id: Some("tenant-a".into()),
            instance_data: json!({ "amount": 250 }),
            status: WorkflowStatus::Running,
            current_step_id: None,
            started_at: Utc::now(),
            completed_at: None,
            initiated_by: "alice".into(),
        }
    }

    fn step(instance_id: Uuid, step_id: &str, sequence: i64) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::new_v4(),
            instance_id,
            step_id: step_id.into(),
            step_name: step_id.to_uppercase(),
            step_type: "manual".into(),
            status: StepStatus::Pending,
            assigned_to: Some("bob".into()),
            assigned_role: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            comments: None,
            step_data: None,
            sequence,
            advanced: false,
        }
    }

    #[tokio::test]
    async fn workflow_records_round_trip() {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let active = record("b-active", true);
        let inactive = record("a-inactive", false);

        let mut tx = storage.begin().await.unwrap();
        insert_workflow(&mut tx, &active).await.unwrap();
        insert_workflow(&mut tx, &inactive).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = storage.get_workflow(active.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "b-active");
        assert!(loaded.is_active);

        assert_eq!(storage.list_workflows(true).await.unwrap().len(), 1);
        let all = storage.list_workflows(false).await.unwrap();
        assert_eq!(all[0].name, "a-inactive");

        let mut conn = storage.pool.acquire().await.unwrap();
        assert!(set_workflow_active(&mut conn, inactive.id, true).await.unwrap());
        assert!(!set_workflow_active(&mut conn, Uuid::new_v4(), true).await.unwrap());
    }

    #[tokio::test]
    async fn steps_upsert_and_keep_creation_order() {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let workflow = record("flow", true);
        let inst = instance(workflow.id);
        let mut second = step(inst.id, "review", 2);
        let first = step(inst.id, "submit", 1);

        let mut tx = storage.begin().await.unwrap();
        insert_workflow(&mut tx, &workflow).await.unwrap();
        insert_instance(&mut tx, &inst).await.unwrap();
        upsert_step(&mut tx, &second).await.unwrap();
        upsert_step(&mut tx, &first).await.unwrap();
        tx.commit().await.unwrap();

        second.status = StepStatus::Completed;
        second.step_data = Some(json!({ "note": "ok" }));
        second.advanced = true;
        let mut conn = storage.pool.acquire().await.unwrap();
        upsert_step(&mut conn, &second).await.unwrap();
        drop(conn);

        let steps = storage.get_steps(inst.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_id, "submit");
        assert_eq!(steps[1].status, StepStatus::Completed);
        assert!(steps[1].advanced);
        assert_eq!(steps[1].step_data, Some(json!({ "note": "ok" })));

        let loaded = storage.get_instance(inst.id).await.unwrap().unwrap();
        assert_eq!(loaded, inst_with_micros(inst));
    }

    fn inst_with_micros(mut inst: WorkflowInstance) -> WorkflowInstance {
        inst.started_at = parse_timestamp(&timestamp(&inst.started_at)).unwrap();
        inst
    }

    #[tokio::test]
    async fn user_tasks_and_cascade_delete() {
        let storage = WorkflowStorage::in_memory().await.unwrap();
        let workflow = record("flow", true);
        let inst = instance(workflow.id);
        let pending = step(inst.id, "review", 1);

        let mut tx = storage.begin().await.unwrap();
        insert_workflow(&mut tx, &workflow).await.unwrap();
        insert_instance(&mut tx, &inst).await.unwrap();
        upsert_step(&mut tx, &pending).await.unwrap();
        insert_audit(&mut tx, &WorkflowAuditLog::new(inst.id, "STARTED", "alice"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(storage.user_task_instances("bob").await.unwrap().len(), 1);
        assert!(storage.user_task_instances("carol").await.unwrap().is_empty());

        let mut conn = storage.pool.acquire().await.unwrap();
        assert_eq!(count_running_instances(&mut conn, workflow.id).await.unwrap(), 1);
        assert!(delete_workflow_cascade(&mut conn, workflow.id).await.unwrap());
        drop(conn);

        assert!(storage.get_instance(inst.id).await.unwrap().is_none());
        assert!(storage.get_steps(inst.id).await.unwrap().is_empty());
        assert!(storage.audit_log(inst.id).await.unwrap().is_empty());
    }
}
