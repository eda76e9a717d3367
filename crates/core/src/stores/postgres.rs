//! PostgreSQL + pgvector backend.
//!
//! Distances come from pgvector's `<=>` cosine-distance operator. Chunks live
//! in `embeddings` with `ON DELETE CASCADE` on their document.

use crate::error::{RagError, Result};
use crate::flow::{FlowDefinition, FlowExecution, FlowSummary};
use crate::models::{
    ChatExchange, ChatOutcome, ChatRecord, DocumentSummary, FileType, NewChatRecord, NewChunk,
    NewDocument, RetrievedChunk,
};
use crate::traits::{ChatHistoryStore, FlowStore, KnowledgeStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "postgres";

#[derive(Debug, Clone)]
pub struct PgConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PgConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 20,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

pub struct PgStore {
    pool: PgPool,
}

fn map_err(error: sqlx::Error) -> RagError {
    RagError::store(BACKEND, error.to_string())
}

/// pgvector accepts vectors as text literals: `[0.1,0.2,...]`.
fn vector_literal(vector: &[f32]) -> String {
    let joined = vector
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{joined}]")
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name).map_err(map_err)
}

fn to_db_count(value: usize, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| RagError::Input(format!("{what} {value} is out of range")))
}

impl PgStore {
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(map_err)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the extension, tables and vector index when missing.
    pub async fn ensure_schema(&self, dimensions: usize) -> Result<()> {
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            "CREATE TABLE IF NOT EXISTS documents (\
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
                filename VARCHAR(255) NOT NULL, \
                file_type VARCHAR(10) NOT NULL, \
                content TEXT NOT NULL, \
                checksum VARCHAR(64) NOT NULL DEFAULT '', \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()\
            )"
            .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS embeddings (\
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
                    document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE, \
                    chunk_text TEXT NOT NULL, \
                    embedding vector({dimensions}), \
                    chunk_index INTEGER NOT NULL, \
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()\
                )"
            ),
            "CREATE TABLE IF NOT EXISTS message_history (\
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
                type VARCHAR(50), \
                question TEXT NOT NULL, \
                answer TEXT NOT NULL, \
                context_documents TEXT[] NOT NULL DEFAULT '{}', \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()\
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS flows (\
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
                name VARCHAR(255) NOT NULL, \
                nodes JSONB NOT NULL, \
                edges JSONB NOT NULL, \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\
            )"
            .to_string(),
            "CREATE TABLE IF NOT EXISTS flow_executions (\
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
                session_id VARCHAR(255) NOT NULL, \
                user_input TEXT NOT NULL, \
                bot_response TEXT NOT NULL, \
                node_type VARCHAR(50) NOT NULL, \
                node_data JSONB NOT NULL, \
                variables JSONB NOT NULL, \
                executed_at TIMESTAMPTZ NOT NULL DEFAULT now()\
            )"
            .to_string(),
            "CREATE INDEX IF NOT EXISTS embeddings_vector_idx ON embeddings \
                USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"
                .to_string(),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
        }

        info!(dimensions, "database schema ready");
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for PgStore {
    async fn insert_document(&self, document: NewDocument<'_>) -> Result<Uuid> {
        let row = sqlx::query(
            "INSERT INTO documents (filename, file_type, content, checksum) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(document.filename)
        .bind(document.file_type.as_str())
        .bind(document.content)
        .bind(&document.checksum)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        column(&row, "id")
    }

    async fn insert_chunk(&self, chunk: NewChunk<'_>) -> Result<Uuid> {
        let index = i32::try_from(chunk.index)
            .map_err(|_| RagError::store(BACKEND, format!("chunk index {} overflows", chunk.index)))?;

        let row = sqlx::query(
            "INSERT INTO embeddings (document_id, chunk_text, embedding, chunk_index) \
             VALUES ($1, $2, $3::vector, $4) RETURNING id",
        )
        .bind(chunk.document_id)
        .bind(chunk.text)
        .bind(vector_literal(chunk.embedding))
        .bind(index)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        column(&row, "id")
    }

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        max_distance: Option<f64>,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let threshold = if max_distance.is_some() {
            "WHERE (e.embedding <=> $1::vector) < $3"
        } else {
            ""
        };
        let sql = format!(
            "SELECT e.chunk_text, e.document_id, d.filename, \
                    (e.embedding <=> $1::vector)::float8 AS distance, e.chunk_index \
             FROM embeddings e \
             JOIN documents d ON e.document_id = d.id \
             {threshold} \
             ORDER BY e.embedding <=> $1::vector \
             LIMIT $2"
        );

        let mut query = sqlx::query(&sql)
            .bind(vector_literal(query_vector))
            .bind(to_db_count(limit, "limit")?);
        if let Some(max) = max_distance {
            query = query.bind(max);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(map_err)?;
        debug!(rows = rows.len(), ?max_distance, limit, "nearest neighbour query");

        rows.iter()
            .map(|row| {
                let index: i32 = column(row, "chunk_index")?;
                Ok(RetrievedChunk {
                    text: column(row, "chunk_text")?,
                    document_id: column(row, "document_id")?,
                    filename: column(row, "filename")?,
                    distance: column::<f64>(row, "distance")?.max(0.0),
                    chunk_index: usize::try_from(index).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<String> {
        let row = sqlx::query("DELETE FROM documents WHERE id = $1 RETURNING filename")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| RagError::NotFound(format!("document {document_id}")))?;

        column(&row, "filename")
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            "SELECT d.id, d.filename, d.file_type, d.created_at, \
                    (SELECT COUNT(*) FROM embeddings WHERE document_id = d.id) AS chunk_count \
             FROM documents d \
             ORDER BY d.created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.iter()
            .map(|row| {
                let file_type: String = column(row, "file_type")?;
                let chunk_count: i64 = column(row, "chunk_count")?;
                Ok(DocumentSummary {
                    id: column(row, "id")?,
                    filename: column(row, "filename")?,
                    file_type: file_type
                        .parse::<FileType>()
                        .map_err(|details| RagError::store(BACKEND, details))?,
                    created_at: column(row, "created_at")?,
                    chunk_count: u64::try_from(chunk_count).unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn chat_from_row(row: &PgRow) -> Result<ChatRecord> {
    let outcome: Option<String> = column(row, "type")?;
    Ok(ChatRecord {
        id: column(row, "id")?,
        outcome: outcome.and_then(|label| label.parse::<ChatOutcome>().ok()),
        question: column(row, "question")?,
        answer: column(row, "answer")?,
        context_documents: column(row, "context_documents")?,
        created_at: column(row, "created_at")?,
    })
}

#[async_trait]
impl ChatHistoryStore for PgStore {
    async fn save_chat(&self, record: NewChatRecord) -> Result<Uuid> {
        let row = sqlx::query(
            "INSERT INTO message_history (question, answer, context_documents, type) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&record.question)
        .bind(&record.answer)
        .bind(&record.context_documents)
        .bind(record.outcome.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        column(&row, "id")
    }

    async fn recent_exchanges(&self, limit: usize) -> Result<Vec<ChatExchange>> {
        let rows = sqlx::query(
            "SELECT question, answer FROM message_history ORDER BY created_at DESC LIMIT $1",
        )
        .bind(to_db_count(limit, "limit")?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        let mut exchanges = rows
            .iter()
            .map(|row| {
                Ok(ChatExchange {
                    question: column(row, "question")?,
                    answer: column(row, "answer")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        exchanges.reverse();
        Ok(exchanges)
    }

    async fn list_chats(&self, limit: usize, offset: usize) -> Result<Vec<ChatRecord>> {
        let rows = sqlx::query(
            "SELECT id, type, question, answer, context_documents, created_at \
             FROM message_history ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(to_db_count(limit, "limit")?)
        .bind(to_db_count(offset, "offset")?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.iter().map(chat_from_row).collect()
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM message_history WHERE id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?
            .rows_affected();

        if deleted == 0 {
            return Err(RagError::NotFound(format!("chat entry {chat_id}")));
        }
        Ok(())
    }

    async fn clear_chats(&self) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM message_history")
            .execute(&self.pool)
            .await
            .map_err(map_err)?
            .rows_affected();
        Ok(deleted)
    }

    async fn record_human_response(&self, chat_id: Uuid, answer: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE message_history SET answer = $1, type = $2 \
             WHERE id = $3 AND type = $4",
        )
        .bind(answer)
        .bind(ChatOutcome::HumanResponded.as_str())
        .bind(chat_id)
        .bind(ChatOutcome::HumanIntervention.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_err)?
        .rows_affected();

        if updated == 0 {
            return Err(RagError::NotFound(format!(
                "chat entry {chat_id} not found or not awaiting a human response"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FlowStore for PgStore {
    async fn save_flow(&self, name: &str, definition: &FlowDefinition) -> Result<Uuid> {
        let nodes = serde_json::to_value(&definition.nodes)
            .map_err(|error| RagError::store(BACKEND, error.to_string()))?;
        let edges = serde_json::Value::Array(definition.edges.clone());

        let row = sqlx::query("INSERT INTO flows (name, nodes, edges) VALUES ($1, $2, $3) RETURNING id")
            .bind(name)
            .bind(nodes)
            .bind(edges)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;

        column(&row, "id")
    }

    async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM flows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.iter()
            .map(|row| {
                Ok(FlowSummary {
                    id: column(row, "id")?,
                    name: column(row, "name")?,
                    created_at: column::<DateTime<Utc>>(row, "created_at")?,
                    updated_at: column::<DateTime<Utc>>(row, "updated_at")?,
                })
            })
            .collect()
    }

    async fn load_flow(&self, flow_id: Uuid) -> Result<FlowDefinition> {
        let row = sqlx::query("SELECT nodes, edges FROM flows WHERE id = $1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?
            .ok_or_else(|| RagError::NotFound(format!("flow {flow_id}")))?;

        let nodes: serde_json::Value = column(&row, "nodes")?;
        let edges: serde_json::Value = column(&row, "edges")?;
        Ok(FlowDefinition {
            nodes: serde_json::from_value(nodes)
                .map_err(|error| RagError::store(BACKEND, error.to_string()))?,
            edges: match edges {
                serde_json::Value::Array(items) => items,
                _ => Vec::new(),
            },
        })
    }

    async fn record_flow_execution(&self, execution: FlowExecution) -> Result<()> {
        let variables = serde_json::to_value(&execution.variables)
            .map_err(|error| RagError::store(BACKEND, error.to_string()))?;

        sqlx::query(
            "INSERT INTO flow_executions \
                (session_id, user_input, bot_response, node_type, node_data, variables) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&execution.session_id)
        .bind(&execution.user_input)
        .bind(&execution.bot_response)
        .bind(&execution.node_type)
        .bind(&execution.node_data)
        .bind(variables)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::vector_literal;

    #[test]
    fn vectors_are_rendered_as_pgvector_literals() {
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
