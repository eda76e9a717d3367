use crate::error::Result;
use crate::flow::{FlowDefinition, FlowExecution, FlowSummary};
use crate::models::{
    ChatExchange, ChatRecord, DocumentSummary, NewChatRecord, NewChunk, NewDocument,
    RetrievedChunk,
};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String>;
}

/// Documents plus their chunk embeddings.
///
/// `nearest_neighbors` returns rows in ascending cosine distance. With
/// `max_distance` set, only rows strictly closer than it are returned.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn insert_document(&self, document: NewDocument<'_>) -> Result<Uuid>;

    async fn insert_chunk(&self, chunk: NewChunk<'_>) -> Result<Uuid>;

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        max_distance: Option<f64>,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Deletes the document and its chunks, returning the document's filename.
    async fn delete_document(&self, document_id: Uuid) -> Result<String>;

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;
}

#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn save_chat(&self, record: NewChatRecord) -> Result<Uuid>;

    /// The latest `limit` exchanges, oldest first.
    async fn recent_exchanges(&self, limit: usize) -> Result<Vec<ChatExchange>>;

    async fn list_chats(&self, limit: usize, offset: usize) -> Result<Vec<ChatRecord>>;

    async fn delete_chat(&self, chat_id: Uuid) -> Result<()>;

    async fn clear_chats(&self) -> Result<u64>;

    /// Replaces the answer of an exchange waiting for a human.
    async fn record_human_response(&self, chat_id: Uuid, answer: &str) -> Result<()>;
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn save_flow(&self, name: &str, definition: &FlowDefinition) -> Result<Uuid>;

    async fn list_flows(&self) -> Result<Vec<FlowSummary>>;

    async fn load_flow(&self, flow_id: Uuid) -> Result<FlowDefinition>;

    async fn record_flow_execution(&self, execution: FlowExecution) -> Result<()>;
}

#[async_trait]
impl<T: CompletionProvider + ?Sized> CompletionProvider for Arc<T> {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        (**self).complete(system_prompt, user_message).await
    }
}

#[async_trait]
impl<T: KnowledgeStore + ?Sized> KnowledgeStore for Arc<T> {
    async fn insert_document(&self, document: NewDocument<'_>) -> Result<Uuid> {
        (**self).insert_document(document).await
    }

    async fn insert_chunk(&self, chunk: NewChunk<'_>) -> Result<Uuid> {
        (**self).insert_chunk(chunk).await
    }

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        max_distance: Option<f64>,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        (**self)
            .nearest_neighbors(query_vector, max_distance, limit)
            .await
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<String> {
        (**self).delete_document(document_id).await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        (**self).list_documents().await
    }
}

#[async_trait]
impl<T: ChatHistoryStore + ?Sized> ChatHistoryStore for Arc<T> {
    async fn save_chat(&self, record: NewChatRecord) -> Result<Uuid> {
        (**self).save_chat(record).await
    }

    async fn recent_exchanges(&self, limit: usize) -> Result<Vec<ChatExchange>> {
        (**self).recent_exchanges(limit).await
    }

    async fn list_chats(&self, limit: usize, offset: usize) -> Result<Vec<ChatRecord>> {
        (**self).list_chats(limit, offset).await
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<()> {
        (**self).delete_chat(chat_id).await
    }

    async fn clear_chats(&self) -> Result<u64> {
        (**self).clear_chats().await
    }

    async fn record_human_response(&self, chat_id: Uuid, answer: &str) -> Result<()> {
        (**self).record_human_response(chat_id, answer).await
    }
}

#[async_trait]
impl<T: FlowStore + ?Sized> FlowStore for Arc<T> {
    async fn save_flow(&self, name: &str, definition: &FlowDefinition) -> Result<Uuid> {
        (**self).save_flow(name, definition).await
    }

    async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        (**self).list_flows().await
    }

    async fn load_flow(&self, flow_id: Uuid) -> Result<FlowDefinition> {
        (**self).load_flow(flow_id).await
    }

    async fn record_flow_execution(&self, execution: FlowExecution) -> Result<()> {
        (**self).record_flow_execution(execution).await
    }
}
