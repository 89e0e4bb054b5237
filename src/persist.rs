// used for persistence
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::descriptor::{AdHocDataset, DescriptorId};
use crate::error::{AdHocError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunRequestId(pub i64);

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for RunRequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A run-time query definition, built to service one evaluation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub id: Option<DefinitionId>,
    pub name: String,
    pub body: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Pending,
    Completed,
    Failed,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(AdHocError::Persistence(format!("unknown run status '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: Option<RunRequestId>,
    pub definition: DefinitionId,
    pub status: RunStatus,
    pub requested_at: String,
}

/// Something rendered from a definition's output, deleted along with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderingArtifact {
    pub id: Option<i64>,
    pub definition: DefinitionId,
    pub label: String,
    pub payload: String,
}

/// Storage for descriptors, disposable definitions and run requests.
pub trait DescriptorStore: Send + Sync {
    /// Inserts, or replaces when the descriptor carries an id.
    fn save_descriptor(&self, dataset: &AdHocDataset) -> Result<DescriptorId>;
    fn load_descriptor(&self, id: DescriptorId) -> Result<Option<AdHocDataset>>;
    fn delete_descriptor(&self, id: DescriptorId) -> Result<bool>;

    fn save_definition(&self, definition: &QueryDefinition) -> Result<DefinitionId>;
    fn load_definition(&self, id: DefinitionId) -> Result<Option<QueryDefinition>>;
    /// Ids of definitions whose name starts with `prefix`.
    fn definitions_named(&self, prefix: &str) -> Result<Vec<DefinitionId>>;
    /// Deletes a definition and its rendering artifacts, but only if no run
    /// request references it. Returns whether anything was deleted.
    fn delete_definition_if_unreferenced(&self, id: DefinitionId) -> Result<bool>;

    fn save_run_request(&self, request: &RunRequest) -> Result<RunRequestId>;
    fn set_run_status(&self, id: RunRequestId, status: RunStatus) -> Result<bool>;
    fn delete_run_request(&self, id: RunRequestId) -> Result<bool>;
    fn run_requests_referencing(&self, definition: DefinitionId) -> Result<Vec<RunRequest>>;

    fn save_rendering_artifact(&self, artifact: &RenderingArtifact) -> Result<i64>;
    fn rendering_artifacts(&self, definition: DefinitionId) -> Result<Vec<RenderingArtifact>>;
}

// ------------- Persistence -------------
#[derive(Clone, Debug)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

pub struct Persistor {
    connection: Mutex<Connection>,
}

impl Persistor {
    pub fn new(mode: PersistenceMode) -> Result<Self> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        connection.execute_batch(
            "
            pragma foreign_keys = on;
            create table if not exists Descriptor (
                Descriptor_Identity integer not null,
                Name text not null,
                Body text not null,
                constraint referenceable_Descriptor_Identity primary key (
                    Descriptor_Identity
                )
            );-- STRICT;
            create table if not exists QueryDefinition (
                QueryDefinition_Identity integer not null,
                Name text not null,
                Body text not null,
                constraint referenceable_QueryDefinition_Identity primary key (
                    QueryDefinition_Identity
                )
            );-- STRICT;
            create table if not exists RunRequest (
                RunRequest_Identity integer not null,
                QueryDefinition_Identity integer not null,
                Status text not null,
                RequestedAt text not null,
                constraint RunRequest_runs_QueryDefinition foreign key (
                    QueryDefinition_Identity
                ) references QueryDefinition(QueryDefinition_Identity),
                constraint referenceable_RunRequest_Identity primary key (
                    RunRequest_Identity
                )
            );-- STRICT;
            create table if not exists RenderingArtifact (
                RenderingArtifact_Identity integer not null,
                QueryDefinition_Identity integer not null,
                Label text not null,
                Payload text not null,
                constraint RenderingArtifact_renders_QueryDefinition foreign key (
                    QueryDefinition_Identity
                ) references QueryDefinition(QueryDefinition_Identity),
                constraint referenceable_RenderingArtifact_Identity primary key (
                    RenderingArtifact_Identity
                )
            );-- STRICT;
            ",
        )?;
        debug!(?mode, "persistor ready");
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| AdHocError::Persistence(format!("connection lock poisoned: {e}")))
    }
}

impl DescriptorStore for Persistor {
    fn save_descriptor(&self, dataset: &AdHocDataset) -> Result<DescriptorId> {
        let conn = self.lock()?;
        let mut stored = dataset.clone();
        stored.id = None;
        let body = serde_json::to_string(&stored)?;
        match dataset.id {
            Some(id) => {
                let changed = conn.execute(
                    "update Descriptor set Name = ?, Body = ? where Descriptor_Identity = ?",
                    params![&dataset.name, &body, id.0],
                )?;
                if changed == 0 {
                    return Err(AdHocError::NotFound(format!("descriptor {id}")));
                }
                Ok(id)
            }
            None => {
                conn.execute(
                    "insert into Descriptor (Name, Body) values (?, ?)",
                    params![&dataset.name, &body],
                )?;
                Ok(DescriptorId(conn.last_insert_rowid()))
            }
        }
    }

    fn load_descriptor(&self, id: DescriptorId) -> Result<Option<AdHocDataset>> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "select Body from Descriptor where Descriptor_Identity = ?",
                params![id.0],
                |r| r.get(0),
            )
            .optional()?;
        match body {
            Some(body) => {
                let mut dataset: AdHocDataset = serde_json::from_str(&body)?;
                dataset.id = Some(id);
                Ok(Some(dataset))
            }
            None => Ok(None),
        }
    }

    fn delete_descriptor(&self, id: DescriptorId) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "delete from Descriptor where Descriptor_Identity = ?",
            params![id.0],
        )?;
        Ok(deleted > 0)
    }

    fn save_definition(&self, definition: &QueryDefinition) -> Result<DefinitionId> {
        let conn = self.lock()?;
        let body = serde_json::to_string(&definition.body)?;
        match definition.id {
            Some(id) => {
                conn.execute(
                    "insert or replace into QueryDefinition (QueryDefinition_Identity, Name, Body)
                        values (?, ?, ?)",
                    params![id.0, &definition.name, &body],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "insert into QueryDefinition (Name, Body) values (?, ?)",
                    params![&definition.name, &body],
                )?;
                Ok(DefinitionId(conn.last_insert_rowid()))
            }
        }
    }

    fn load_definition(&self, id: DefinitionId) -> Result<Option<QueryDefinition>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "select Name, Body from QueryDefinition where QueryDefinition_Identity = ?",
                params![id.0],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match row {
            Some((name, body)) => Ok(Some(QueryDefinition {
                id: Some(id),
                name,
                body: serde_json::from_str(&body)?,
            })),
            None => Ok(None),
        }
    }

    fn definitions_named(&self, prefix: &str) -> Result<Vec<DefinitionId>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "select QueryDefinition_Identity, Name
                from QueryDefinition
                order by QueryDefinition_Identity",
        )?;
        let rows = statement.query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?;
        let mut ids = Vec::new();
        for row in rows {
            let (id, name) = row?;
            if name.starts_with(prefix) {
                ids.push(DefinitionId(id));
            }
        }
        Ok(ids)
    }

    fn delete_definition_if_unreferenced(&self, id: DefinitionId) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let referenced: i64 = tx.query_row(
            "select count(*) from RunRequest where QueryDefinition_Identity = ?",
            params![id.0],
            |r| r.get(0),
        )?;
        if referenced > 0 {
            return Ok(false);
        }
        tx.execute(
            "delete from RenderingArtifact where QueryDefinition_Identity = ?",
            params![id.0],
        )?;
        let deleted = tx.execute(
            "delete from QueryDefinition where QueryDefinition_Identity = ?",
            params![id.0],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn save_run_request(&self, request: &RunRequest) -> Result<RunRequestId> {
        let conn = self.lock()?;
        conn.execute(
            "insert into RunRequest (QueryDefinition_Identity, Status, RequestedAt)
                values (?, ?, ?)",
            params![request.definition.0, request.status.as_str(), &request.requested_at],
        )?;
        Ok(RunRequestId(conn.last_insert_rowid()))
    }

    fn set_run_status(&self, id: RunRequestId, status: RunStatus) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "update RunRequest set Status = ? where RunRequest_Identity = ?",
            params![status.as_str(), id.0],
        )?;
        Ok(changed > 0)
    }

    fn delete_run_request(&self, id: RunRequestId) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "delete from RunRequest where RunRequest_Identity = ?",
            params![id.0],
        )?;
        Ok(deleted > 0)
    }

    fn run_requests_referencing(&self, definition: DefinitionId) -> Result<Vec<RunRequest>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "select RunRequest_Identity, Status, RequestedAt
                from RunRequest
                where QueryDefinition_Identity = ?
                order by RunRequest_Identity",
        )?;
        let rows = statement.query_map(params![definition.0], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?;
        let mut requests = Vec::new();
        for row in rows {
            let (id, status, requested_at) = row?;
            requests.push(RunRequest {
                id: Some(RunRequestId(id)),
                definition,
                status: RunStatus::parse(&status)?,
                requested_at,
            });
        }
        Ok(requests)
    }

    fn save_rendering_artifact(&self, artifact: &RenderingArtifact) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "insert into RenderingArtifact (QueryDefinition_Identity, Label, Payload)
                values (?, ?, ?)",
            params![artifact.definition.0, &artifact.label, &artifact.payload],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn rendering_artifacts(&self, definition: DefinitionId) -> Result<Vec<RenderingArtifact>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "select RenderingArtifact_Identity, Label, Payload
                from RenderingArtifact
                where QueryDefinition_Identity = ?
                order by RenderingArtifact_Identity",
        )?;
        let rows = statement.query_map(params![definition.0], |r| {
            Ok(RenderingArtifact {
                id: Some(r.get(0)?),
                definition,
                label: r.get(1)?,
                payload: r.get(2)?,
            })
        })?;
        let mut artifacts = Vec::new();
        for row in rows {
            artifacts.push(row?);
        }
        Ok(artifacts)
    }
}
