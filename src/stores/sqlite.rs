//! SQLite [`KnowledgeStore`] with vector search via `sqlite-vec`.
//!
//! One connection, one schema, raw SQL throughout: the queries this trait
//! needs (tenant-scoped filters, status re-checks, multi-table
//! transactions) do not fit an ORM-shaped wrapper. Vectors are stored as
//! JSON arrays and compared with `vec_distance_cosine` at query time.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tokio_rusqlite::{ffi, Connection};

use super::{
    AppliedProposal, ChunkRecord, ChunkStatus, DocumentStatus, KnowledgeDocument, KnowledgeStore,
    RetrievedChunk,
};
use crate::jobs::{IngestJob, IngestProposal, JobStatus, ProposalStatus};
use crate::types::{StoreError, StructuredError};
use async_trait::async_trait;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL,
    source        TEXT NOT NULL,
    status        TEXT NOT NULL,
    chunk_count   INTEGER NOT NULL DEFAULT 0,
    content_hash  TEXT,
    page_count    INTEGER,
    mime_type     TEXT,
    error         TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_tenant ON documents(tenant_id, status);

CREATE TABLE IF NOT EXISTS chunks (
    content_hash  TEXT PRIMARY KEY,
    document_id   TEXT NOT NULL,
    tenant_id     TEXT NOT NULL,
    chunk_index   INTEGER NOT NULL,
    content       TEXT NOT NULL,
    status        TEXT NOT NULL,
    embedding     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_tenant ON chunks(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    target_id       TEXT NOT NULL,
    kind            TEXT NOT NULL,
    sources         TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    status          TEXT NOT NULL,
    proposal_id     TEXT,
    error           TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_key ON jobs(tenant_id, idempotency_key, status);

CREATE TABLE IF NOT EXISTS proposals (
    id          TEXT PRIMARY KEY,
    job_id      TEXT NOT NULL,
    tenant_id   TEXT NOT NULL,
    items       TEXT NOT NULL,
    warnings    TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS target_items (
    id          TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    kind        TEXT NOT NULL,
    item        TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_target_items ON target_items(tenant_id, target_id, kind);
"#;

/// SQLite-backed knowledge store.
#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    conn: Connection,
}

impl SqliteKnowledgeStore {
    /// Open (or create) the database at `path` and run schema migration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), StoreError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(StoreError::Storage)
    }
}

fn storage_err(err: tokio_rusqlite::Error) -> StoreError {
    StoreError::Storage(err.to_string())
}

fn json_column<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Storage(err.to_string()))
}

fn parse_json_at<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: String,
) -> rusqlite::Result<T> {
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn parse_time_at(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn parse_status_at(idx: usize, raw: String) -> rusqlite::Result<DocumentStatus> {
    DocumentStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown document status '{raw}'").into(),
        )
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, tenant_id, source, status, chunk_count, content_hash, page_count, mime_type, error, \
     created_at, updated_at";

fn map_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeDocument> {
    Ok(KnowledgeDocument {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        source: parse_json_at(2, row.get::<_, String>(2)?)?,
        status: parse_status_at(3, row.get::<_, String>(3)?)?,
        chunk_count: row.get(4)?,
        content_hash: row.get(5)?,
        page_count: row.get(6)?,
        mime_type: row.get(7)?,
        error: row
            .get::<_, Option<String>>(8)?
            .map(|raw| parse_json_at(8, raw))
            .transpose()?,
        created_at: parse_time_at(9, row.get::<_, String>(9)?)?,
        updated_at: parse_time_at(10, row.get::<_, String>(10)?)?,
    })
}

const JOB_COLUMNS: &str = "id, tenant_id, target_id, kind, sources, idempotency_key, status, \
                           proposal_id, error, created_at, updated_at";

fn map_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestJob> {
    let status_raw: String = row.get(6)?;
    Ok(IngestJob {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        target_id: row.get(2)?,
        kind: row.get(3)?,
        sources: parse_json_at(4, row.get::<_, String>(4)?)?,
        idempotency_key: row.get(5)?,
        status: JobStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                Type::Text,
                format!("unknown job status '{status_raw}'").into(),
            )
        })?,
        proposal_id: row.get(7)?,
        error: row
            .get::<_, Option<String>>(8)?
            .map(|raw| parse_json_at(8, raw))
            .transpose()?,
        created_at: parse_time_at(9, row.get::<_, String>(9)?)?,
        updated_at: parse_time_at(10, row.get::<_, String>(10)?)?,
    })
}

fn map_proposal_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestProposal> {
    let status_raw: String = row.get(5)?;
    Ok(IngestProposal {
        id: row.get(0)?,
        job_id: row.get(1)?,
        tenant_id: row.get(2)?,
        items: parse_json_at(3, row.get::<_, String>(3)?)?,
        warnings: parse_json_at(4, row.get::<_, String>(4)?)?,
        status: ProposalStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                Type::Text,
                format!("unknown proposal status '{status_raw}'").into(),
            )
        })?,
        created_at: parse_time_at(6, row.get::<_, String>(6)?)?,
    })
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn insert_document(&self, document: &KnowledgeDocument) -> Result<(), StoreError> {
        let source = json_column(&document.source)?;
        let error = document.error.as_ref().map(json_column).transpose()?;
        let doc = document.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO documents \
                     (id, tenant_id, source, status, chunk_count, content_hash, page_count, \
                      mime_type, error, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        doc.id,
                        doc.tenant_id,
                        source,
                        doc.status.as_str(),
                        doc.chunk_count,
                        doc.content_hash,
                        doc.page_count,
                        doc.mime_type,
                        error,
                        doc.created_at.to_rfc3339(),
                        doc.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn get_document(
        &self,
        tenant_id: &str,
        document_id: &str,
    ) -> Result<Option<KnowledgeDocument>, StoreError> {
        let tenant_id = tenant_id.to_string();
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND tenant_id = ?2"
                    ),
                    params![document_id, tenant_id],
                    map_document_row,
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    async fn finalize_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        chunk_count: u32,
        content_hash: &str,
        page_count: Option<u32>,
        mime_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let tenant_id = tenant_id.to_string();
        let document_id = document_id.to_string();
        let content_hash = content_hash.to_string();
        let mime_type = mime_type.map(str::to_string);
        let updated = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE documents SET status = 'active', chunk_count = ?3, \
                     content_hash = ?4, page_count = ?5, mime_type = ?6, error = NULL, \
                     updated_at = ?7 \
                     WHERE id = ?1 AND tenant_id = ?2 AND status != 'disabled'",
                    params![
                        document_id,
                        tenant_id,
                        chunk_count,
                        content_hash,
                        page_count,
                        mime_type,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(StoreError::Conflict(
                "document missing or disabled".into(),
            ));
        }
        Ok(())
    }

    async fn fail_document(
        &self,
        tenant_id: &str,
        document_id: &str,
        error: &StructuredError,
    ) -> Result<(), StoreError> {
        let tenant_id = tenant_id.to_string();
        let document_id = document_id.to_string();
        let error = json_column(error)?;
        let updated = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE documents SET status = 'failed', error = ?3, updated_at = ?4 \
                     WHERE id = ?1 AND tenant_id = ?2 AND status != 'disabled'",
                    params![document_id, tenant_id, error, Utc::now().to_rfc3339()],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(StoreError::Conflict(
                "document missing or disabled".into(),
            ));
        }
        Ok(())
    }

    async fn set_document_enabled(
        &self,
        tenant_id: &str,
        document_id: &str,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let tenant_id = tenant_id.to_string();
        let document_id = document_id.to_string();
        let doc_status = if enabled { "active" } else { "disabled" };
        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let updated = tx
                    .execute(
                        "UPDATE documents SET status = ?3, updated_at = ?4 \
                         WHERE id = ?1 AND tenant_id = ?2 AND status IN ('active', 'disabled')",
                        params![document_id, tenant_id, doc_status, Utc::now().to_rfc3339()],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if updated > 0 {
                    tx.execute(
                        "UPDATE chunks SET status = ?2 WHERE document_id = ?1",
                        params![document_id, doc_status],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(updated)
            })
            .await
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(StoreError::Conflict(
                "document missing or not in a toggleable state".into(),
            ));
        }
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[ChunkRecord]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            rows.push((
                chunk.content_hash.clone(),
                chunk.document_id.clone(),
                chunk.tenant_id.clone(),
                chunk.chunk_index as i64,
                chunk.content.clone(),
                chunk.status.as_str(),
                json_column(&chunk.embedding)?,
            ));
        }
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (hash, document_id, tenant_id, index, content, status, embedding) in rows {
                    tx.execute(
                        "INSERT INTO chunks \
                         (content_hash, document_id, tenant_id, chunk_index, content, status, embedding) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                         ON CONFLICT(content_hash) DO UPDATE SET \
                           chunk_index = excluded.chunk_index, \
                           status = excluded.status",
                        params![hash, document_id, tenant_id, index, content, status, embedding],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn prune_document_chunks(
        &self,
        document_id: &str,
        keep: &[String],
    ) -> Result<usize, StoreError> {
        let document_id = document_id.to_string();
        let keep: Vec<String> = keep.to_vec();
        self.conn
            .call(move |conn| {
                let deleted = if keep.is_empty() {
                    conn.execute(
                        "DELETE FROM chunks WHERE document_id = ?1",
                        params![document_id],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?
                } else {
                    let placeholders = (2..keep.len() + 2)
                        .map(|i| format!("?{i}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "DELETE FROM chunks WHERE document_id = ?1 \
                         AND content_hash NOT IN ({placeholders})"
                    );
                    let mut values = Vec::with_capacity(keep.len() + 1);
                    values.push(document_id);
                    values.extend(keep);
                    conn.execute(&sql, params_from_iter(values))
                        .map_err(tokio_rusqlite::Error::Rusqlite)?
                };
                Ok(deleted)
            })
            .await
            .map_err(storage_err)
    }

    async fn active_chunk_count(
        &self,
        tenant_id: &str,
        exclude_document: Option<&str>,
    ) -> Result<u64, StoreError> {
        let tenant_id = tenant_id.to_string();
        let exclude = exclude_document.map(str::to_string);
        self.conn
            .call(move |conn| {
                let count: i64 = match exclude {
                    Some(document_id) => conn
                        .query_row(
                            "SELECT COUNT(*) FROM chunks \
                             WHERE tenant_id = ?1 AND status = 'active' AND document_id != ?2",
                            params![tenant_id, document_id],
                            |row| row.get(0),
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?,
                    None => conn
                        .query_row(
                            "SELECT COUNT(*) FROM chunks \
                             WHERE tenant_id = ?1 AND status = 'active'",
                            params![tenant_id],
                            |row| row.get(0),
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?,
                };
                Ok(count as u64)
            })
            .await
            .map_err(storage_err)
    }

    async fn search_chunks(
        &self,
        tenant_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        let tenant_id = tenant_id.to_string();
        let query_json = json_column(&query.to_vec())?;
        let limit = k as i64;
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT c.content_hash, c.document_id, d.source, c.content, \
                         vec_distance_cosine(vec_f32(c.embedding), vec_f32(?2)) AS distance \
                         FROM chunks c \
                         JOIN documents d ON d.id = c.document_id \
                         WHERE c.tenant_id = ?1 AND c.status = 'active' AND d.status = 'active' \
                         ORDER BY distance ASC \
                         LIMIT ?3",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map(params![tenant_id, query_json, limit], |row| {
                        let source: super::DocumentSource =
                            parse_json_at(2, row.get::<_, String>(2)?)?;
                        Ok(RetrievedChunk {
                            content_hash: row.get(0)?,
                            document_id: row.get(1)?,
                            source_name: source.source_name(),
                            content: row.get(3)?,
                            distance: row.get(4)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut hits = Vec::new();
                for row in rows {
                    hits.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(hits)
            })
            .await
            .map_err(storage_err)
    }

    async fn insert_job(&self, job: &IngestJob) -> Result<(), StoreError> {
        let sources = json_column(&job.sources)?;
        let error = job.error.as_ref().map(json_column).transpose()?;
        let job = job.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs \
                     (id, tenant_id, target_id, kind, sources, idempotency_key, status, \
                      proposal_id, error, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        job.id,
                        job.tenant_id,
                        job.target_id,
                        job.kind,
                        sources,
                        job.idempotency_key,
                        job.status.as_str(),
                        job.proposal_id,
                        error,
                        job.created_at.to_rfc3339(),
                        job.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn get_job(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> Result<Option<IngestJob>, StoreError> {
        let tenant_id = tenant_id.to_string();
        let job_id = job_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND tenant_id = ?2"),
                    params![job_id, tenant_id],
                    map_job_row,
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    async fn find_open_job(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<IngestJob>, StoreError> {
        let tenant_id = tenant_id.to_string();
        let idempotency_key = idempotency_key.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {JOB_COLUMNS} FROM jobs \
                         WHERE tenant_id = ?1 AND idempotency_key = ?2 \
                         AND status IN ('queued', 'processing', 'needs_review') \
                         ORDER BY created_at DESC LIMIT 1"
                    ),
                    params![tenant_id, idempotency_key],
                    map_job_row,
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    async fn claim_job(&self, tenant_id: &str, job_id: &str) -> Result<bool, StoreError> {
        let tenant_id = tenant_id.to_string();
        let job_id = job_id.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = 'processing', updated_at = ?3 \
                     WHERE id = ?1 AND tenant_id = ?2 AND status = 'queued'",
                    params![job_id, tenant_id, Utc::now().to_rfc3339()],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)?;
        Ok(updated > 0)
    }

    async fn complete_job_for_review(
        &self,
        tenant_id: &str,
        job_id: &str,
        proposal: &IngestProposal,
    ) -> Result<(), StoreError> {
        let tenant_id = tenant_id.to_string();
        let job_id = job_id.to_string();
        let items = json_column(&proposal.items)?;
        let warnings = json_column(&proposal.warnings)?;
        let proposal = proposal.clone();
        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let updated = tx
                    .execute(
                        "UPDATE jobs SET status = 'needs_review', proposal_id = ?3, \
                         updated_at = ?4 \
                         WHERE id = ?1 AND tenant_id = ?2 AND status = 'processing'",
                        params![job_id, tenant_id, proposal.id, Utc::now().to_rfc3339()],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                if updated > 0 {
                    tx.execute(
                        "INSERT INTO proposals \
                         (id, job_id, tenant_id, items, warnings, status, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            proposal.id,
                            proposal.job_id,
                            proposal.tenant_id,
                            items,
                            warnings,
                            proposal.status.as_str(),
                            proposal.created_at.to_rfc3339(),
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(updated)
            })
            .await
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(StoreError::Conflict(
                "job is no longer processing".into(),
            ));
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        tenant_id: &str,
        job_id: &str,
        error: &StructuredError,
    ) -> Result<(), StoreError> {
        let tenant_id = tenant_id.to_string();
        let job_id = job_id.to_string();
        let error = json_column(error)?;
        let updated = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = 'failed', error = ?3, updated_at = ?4 \
                     WHERE id = ?1 AND tenant_id = ?2",
                    params![job_id, tenant_id, error, Utc::now().to_rfc3339()],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(StoreError::NotFound("job"));
        }
        Ok(())
    }

    async fn get_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
    ) -> Result<Option<IngestProposal>, StoreError> {
        let tenant_id = tenant_id.to_string();
        let proposal_id = proposal_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, job_id, tenant_id, items, warnings, status, created_at \
                     FROM proposals WHERE id = ?1 AND tenant_id = ?2",
                    params![proposal_id, tenant_id],
                    map_proposal_row,
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    async fn apply_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
    ) -> Result<AppliedProposal, StoreError> {
        let tenant_id = tenant_id.to_string();
        let proposal_id = proposal_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let proposal = tx
                    .query_row(
                        "SELECT id, job_id, tenant_id, items, warnings, status, created_at \
                         FROM proposals WHERE id = ?1 AND tenant_id = ?2",
                        params![proposal_id, tenant_id],
                        map_proposal_row,
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?
                    .ok_or_else(|| {
                        tokio_rusqlite::Error::Other("proposal not found".into())
                    })?;
                if proposal.status == ProposalStatus::Rejected {
                    return Err(tokio_rusqlite::Error::Other(
                        "cannot apply a rejected proposal".into(),
                    ));
                }

                let job = tx
                    .query_row(
                        &format!(
                            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND tenant_id = ?2"
                        ),
                        params![proposal.job_id, tenant_id],
                        map_job_row,
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?
                    .ok_or_else(|| tokio_rusqlite::Error::Other("job not found".into()))?;

                let now = Utc::now().to_rfc3339();
                let mut item_ids = Vec::with_capacity(proposal.items.len());
                for item in &proposal.items {
                    let id = item.deterministic_id(&job.kind);
                    let payload = serde_json::to_string(item).map_err(|err| {
                        tokio_rusqlite::Error::Other(err.to_string().into())
                    })?;
                    tx.execute(
                        "INSERT INTO target_items \
                         (id, tenant_id, target_id, kind, item, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                         ON CONFLICT(id) DO UPDATE SET item = excluded.item, \
                           updated_at = excluded.updated_at",
                        params![id, tenant_id, job.target_id, job.kind, payload, now],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    item_ids.push(id);
                }

                tx.execute(
                    "UPDATE proposals SET status = 'applied' WHERE id = ?1",
                    params![proposal.id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "UPDATE jobs SET status = 'applied', updated_at = ?2 WHERE id = ?1",
                    params![job.id, now],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(AppliedProposal {
                    proposal_id: proposal.id,
                    job_id: job.id,
                    item_ids,
                })
            })
            .await
            .map_err(|err| match err {
                tokio_rusqlite::Error::Other(message) => {
                    let message = message.to_string();
                    if message.contains("not found") {
                        StoreError::NotFound("proposal")
                    } else {
                        StoreError::Conflict(message)
                    }
                }
                other => storage_err(other),
            })
    }

    async fn reject_proposal(
        &self,
        tenant_id: &str,
        proposal_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let tenant_id = tenant_id.to_string();
        let proposal_id = proposal_id.to_string();
        let error = json_column(&StructuredError::new(
            "proposal_rejected",
            format!("rejected by reviewer: {reason}"),
        ))?;
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let proposal = tx
                    .query_row(
                        "SELECT id, job_id, tenant_id, items, warnings, status, created_at \
                         FROM proposals WHERE id = ?1 AND tenant_id = ?2",
                        params![proposal_id, tenant_id],
                        map_proposal_row,
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?
                    .ok_or_else(|| {
                        tokio_rusqlite::Error::Other("proposal not found".into())
                    })?;
                match proposal.status {
                    ProposalStatus::Applied => {
                        return Err(tokio_rusqlite::Error::Other(
                            "cannot reject an applied proposal".into(),
                        ));
                    }
                    ProposalStatus::Rejected => {
                        tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                        return Ok(());
                    }
                    ProposalStatus::Proposed => {}
                }
                tx.execute(
                    "UPDATE proposals SET status = 'rejected' WHERE id = ?1",
                    params![proposal.id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "UPDATE jobs SET status = 'failed', error = ?2, updated_at = ?3 \
                     WHERE id = ?1",
                    params![proposal.job_id, error, Utc::now().to_rfc3339()],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| match err {
                tokio_rusqlite::Error::Other(message) => {
                    let message = message.to_string();
                    if message.contains("not found") {
                        StoreError::NotFound("proposal")
                    } else {
                        StoreError::Conflict(message)
                    }
                }
                other => storage_err(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{CandidateItem, IngestSource};
    use crate::stores::DocumentSource;
    use tempfile::tempdir;

    async fn open_store() -> (tempfile::TempDir, SqliteKnowledgeStore) {
        let dir = tempdir().unwrap();
        let store = SqliteKnowledgeStore::open(dir.path().join("lore.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn active_document(tenant: &str) -> KnowledgeDocument {
        let mut doc = KnowledgeDocument::new_processing(
            tenant,
            DocumentSource::Url {
                url: "https://cafe.example/menu".into(),
            },
        );
        doc.status = DocumentStatus::Active;
        doc
    }

    fn chunk(tenant: &str, doc_id: &str, hash: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            content_hash: hash.into(),
            document_id: doc_id.into(),
            tenant_id: tenant.into(),
            chunk_index: 0,
            content: format!("chunk {hash}"),
            status: ChunkStatus::Active,
            embedding,
        }
    }

    #[tokio::test]
    async fn document_round_trip() {
        let (_dir, store) = open_store().await;
        let doc = KnowledgeDocument::new_processing(
            "t1",
            DocumentSource::Text {
                content: "inline".into(),
            },
        );
        store.insert_document(&doc).await.unwrap();

        let loaded = store.get_document("t1", &doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Processing);
        assert_eq!(loaded.source, doc.source);
        assert!(store.get_document("t2", &doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_sets_fields_and_clears_error() {
        let (_dir, store) = open_store().await;
        let mut doc = active_document("t1");
        doc.status = DocumentStatus::Processing;
        doc.error = Some(StructuredError::new("fetch_failed", "old failure"));
        store.insert_document(&doc).await.unwrap();

        store
            .finalize_document("t1", &doc.id, 3, "hash-abc", Some(2), Some("text/html"))
            .await
            .unwrap();
        let loaded = store.get_document("t1", &doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Active);
        assert_eq!(loaded.chunk_count, 3);
        assert_eq!(loaded.content_hash.as_deref(), Some("hash-abc"));
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn chunk_upsert_is_idempotent_and_searchable() {
        let (_dir, store) = open_store().await;
        let doc = active_document("t1");
        store.insert_document(&doc).await.unwrap();

        let chunks = vec![
            chunk("t1", &doc.id, "hash-near", vec![1.0, 0.0, 0.0]),
            chunk("t1", &doc.id, "hash-far", vec![0.0, 1.0, 0.0]),
        ];
        store.upsert_chunks(&chunks).await.unwrap();
        store.upsert_chunks(&chunks).await.unwrap();

        assert_eq!(store.active_chunk_count("t1", None).await.unwrap(), 2);

        let hits = store
            .search_chunks("t1", &[1.0, 0.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content_hash, "hash-near");
        assert!(hits[0].distance < hits[1].distance);
        assert_eq!(hits[0].source_name, "https://cafe.example/menu");
    }

    #[tokio::test]
    async fn pruning_removes_stale_chunks_only() {
        let (_dir, store) = open_store().await;
        let doc = active_document("t1");
        store.insert_document(&doc).await.unwrap();
        store
            .upsert_chunks(&[
                chunk("t1", &doc.id, "keep-me", vec![1.0]),
                chunk("t1", &doc.id, "stale", vec![0.5]),
            ])
            .await
            .unwrap();

        let pruned = store
            .prune_document_chunks(&doc.id, &["keep-me".to_string()])
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.active_chunk_count("t1", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn job_claim_and_review_flow() {
        let (_dir, store) = open_store().await;
        let job = IngestJob::new(
            "t1",
            "target-1",
            "menu_items",
            vec![IngestSource::Url {
                url: "https://cafe.example/menu".into(),
            }],
        );
        store.insert_job(&job).await.unwrap();

        let found = store
            .find_open_job("t1", &job.idempotency_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, job.id);

        assert!(store.claim_job("t1", &job.id).await.unwrap());
        assert!(!store.claim_job("t1", &job.id).await.unwrap());

        let proposal = IngestProposal::new(
            &job,
            vec![CandidateItem {
                name: "Espresso".into(),
                description: None,
                price_cents: Some(350),
                currency: "USD".into(),
                category: None,
            }],
            vec![],
        );
        store
            .complete_job_for_review("t1", &job.id, &proposal)
            .await
            .unwrap();

        let loaded = store.get_job("t1", &job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::NeedsReview);
        assert_eq!(loaded.proposal_id.as_deref(), Some(proposal.id.as_str()));

        let applied = store.apply_proposal("t1", &proposal.id).await.unwrap();
        assert_eq!(applied.item_ids.len(), 1);
        let reapplied = store.apply_proposal("t1", &proposal.id).await.unwrap();
        assert_eq!(applied.item_ids, reapplied.item_ids);

        let job_after = store.get_job("t1", &job.id).await.unwrap().unwrap();
        assert_eq!(job_after.status, JobStatus::Applied);
    }
}
