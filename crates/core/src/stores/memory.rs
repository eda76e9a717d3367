use crate::error::{RagError, Result};
use crate::flow::{FlowDefinition, FlowExecution, FlowSummary};
use crate::models::{
    ChatExchange, ChatOutcome, ChatRecord, Document, DocumentSummary, NewChatRecord, NewChunk,
    NewDocument, RetrievedChunk,
};
use crate::traits::{ChatHistoryStore, FlowStore, KnowledgeStore};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct StoredChunk {
    document_id: Uuid,
    text: String,
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Clone)]
struct StoredFlow {
    summary: FlowSummary,
    definition: FlowDefinition,
}

#[derive(Debug, Default)]
struct State {
    documents: Vec<Document>,
    chunks: Vec<StoredChunk>,
    chats: Vec<ChatRecord>,
    flows: Vec<StoredFlow>,
    flow_executions: Vec<FlowExecution>,
}

/// Process-local store with brute-force cosine search. Rows keep insertion order.
#[derive(Debug)]
pub struct InMemoryStore {
    dimensions: usize,
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(State::default()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn document(&self, document_id: Uuid) -> Option<Document> {
        let state = self.state.read().await;
        state
            .documents
            .iter()
            .find(|document| document.id == document_id)
            .cloned()
    }

    /// Chunk texts of a document, ordered by chunk index.
    pub async fn chunk_texts(&self, document_id: Uuid) -> Vec<(usize, String)> {
        let state = self.state.read().await;
        let mut texts = state
            .chunks
            .iter()
            .filter(|chunk| chunk.document_id == document_id)
            .map(|chunk| (chunk.index, chunk.text.clone()))
            .collect::<Vec<_>>();
        texts.sort_by_key(|(index, _)| *index);
        texts
    }

    pub async fn flow_executions(&self) -> Vec<FlowExecution> {
        self.state.read().await.flow_executions.clone()
    }
}

pub(crate) fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let norm_left = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let norm_right = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();
    if norm_left == 0.0 || norm_right == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_left * norm_right)).max(0.0)
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn insert_document(&self, document: NewDocument<'_>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut state = self.state.write().await;
        state.documents.push(Document {
            id,
            filename: document.filename.to_string(),
            file_type: document.file_type,
            content: document.content.to_string(),
            checksum: document.checksum,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn insert_chunk(&self, chunk: NewChunk<'_>) -> Result<Uuid> {
        if chunk.embedding.len() != self.dimensions {
            return Err(RagError::store(
                BACKEND,
                format!(
                    "embedding dimension {} != {}",
                    chunk.embedding.len(),
                    self.dimensions
                ),
            ));
        }

        let mut state = self.state.write().await;
        if !state
            .documents
            .iter()
            .any(|document| document.id == chunk.document_id)
        {
            return Err(RagError::store(
                BACKEND,
                format!("document {} does not exist", chunk.document_id),
            ));
        }

        let id = Uuid::new_v4();
        state.chunks.push(StoredChunk {
            document_id: chunk.document_id,
            text: chunk.text.to_string(),
            embedding: chunk.embedding.to_vec(),
            index: chunk.index,
        });
        Ok(id)
    }

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        max_distance: Option<f64>,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if query_vector.len() != self.dimensions {
            return Err(RagError::store(
                BACKEND,
                format!(
                    "query vector dim {} is not {}",
                    query_vector.len(),
                    self.dimensions
                ),
            ));
        }

        let state = self.state.read().await;
        let mut rows = state
            .chunks
            .iter()
            .filter_map(|chunk| {
                let filename = state
                    .documents
                    .iter()
                    .find(|document| document.id == chunk.document_id)?
                    .filename
                    .clone();
                Some(RetrievedChunk {
                    text: chunk.text.clone(),
                    document_id: chunk.document_id,
                    filename,
                    distance: cosine_distance(&chunk.embedding, query_vector),
                    chunk_index: chunk.index,
                })
            })
            .filter(|row| max_distance.map_or(true, |max| row.distance < max))
            .collect::<Vec<_>>();

        rows.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<String> {
        let mut state = self.state.write().await;
        let position = state
            .documents
            .iter()
            .position(|document| document.id == document_id)
            .ok_or_else(|| RagError::NotFound(format!("document {document_id}")))?;

        let removed = state.documents.remove(position);
        state.chunks.retain(|chunk| chunk.document_id != document_id);
        Ok(removed.filename)
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let state = self.state.read().await;
        let mut summaries = state
            .documents
            .iter()
            .map(|document| DocumentSummary {
                id: document.id,
                filename: document.filename.clone(),
                file_type: document.file_type,
                created_at: document.created_at,
                chunk_count: state
                    .chunks
                    .iter()
                    .filter(|chunk| chunk.document_id == document.id)
                    .count() as u64,
            })
            .collect::<Vec<_>>();

        // newest first; insertion order breaks timestamp ties
        summaries.reverse();
        summaries.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(summaries)
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryStore {
    async fn save_chat(&self, record: NewChatRecord) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.state.write().await.chats.push(ChatRecord {
            id,
            outcome: Some(record.outcome),
            question: record.question,
            answer: record.answer,
            context_documents: record.context_documents,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn recent_exchanges(&self, limit: usize) -> Result<Vec<ChatExchange>> {
        let state = self.state.read().await;
        let skip = state.chats.len().saturating_sub(limit);
        Ok(state
            .chats
            .iter()
            .skip(skip)
            .map(|chat| ChatExchange {
                question: chat.question.clone(),
                answer: chat.answer.clone(),
            })
            .collect())
    }

    async fn list_chats(&self, limit: usize, offset: usize) -> Result<Vec<ChatRecord>> {
        let state = self.state.read().await;
        Ok(state
            .chats
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_chat(&self, chat_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.chats.len();
        state.chats.retain(|chat| chat.id != chat_id);
        if state.chats.len() == before {
            return Err(RagError::NotFound(format!("chat entry {chat_id}")));
        }
        Ok(())
    }

    async fn clear_chats(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let removed = state.chats.len() as u64;
        state.chats.clear();
        Ok(removed)
    }

    async fn record_human_response(&self, chat_id: Uuid, answer: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let chat = state
            .chats
            .iter_mut()
            .find(|chat| {
                chat.id == chat_id && chat.outcome == Some(ChatOutcome::HumanIntervention)
            })
            .ok_or_else(|| {
                RagError::NotFound(format!(
                    "chat entry {chat_id} not found or not awaiting a human response"
                ))
            })?;

        chat.answer = answer.to_string();
        chat.outcome = Some(ChatOutcome::HumanResponded);
        Ok(())
    }
}

#[async_trait]
impl FlowStore for InMemoryStore {
    async fn save_flow(&self, name: &str, definition: &FlowDefinition) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.state.write().await.flows.push(StoredFlow {
            summary: FlowSummary {
                id,
                name: name.to_string(),
                created_at: now,
                updated_at: now,
            },
            definition: definition.clone(),
        });
        Ok(id)
    }

    async fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        let state = self.state.read().await;
        Ok(state
            .flows
            .iter()
            .rev()
            .map(|flow| flow.summary.clone())
            .collect())
    }

    async fn load_flow(&self, flow_id: Uuid) -> Result<FlowDefinition> {
        let state = self.state.read().await;
        state
            .flows
            .iter()
            .find(|flow| flow.summary.id == flow_id)
            .map(|flow| flow.definition.clone())
            .ok_or_else(|| RagError::NotFound(format!("flow {flow_id}")))
    }

    async fn record_flow_execution(&self, execution: FlowExecution) -> Result<()> {
        self.state.write().await.flow_executions.push(execution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileType;

    fn document(name: &str) -> NewDocument<'_> {
        NewDocument {
            filename: name,
            file_type: FileType::Pdf,
            content: "body",
            checksum: String::new(),
        }
    }

    async fn seed(store: &InMemoryStore) -> Uuid {
        let id = store.insert_document(document("manual.pdf")).await.unwrap();
        let vectors: [[f32; 2]; 3] = [[1.0, 0.0], [0.0, 1.0], [0.6, 0.8]];
        for (index, vector) in vectors.iter().enumerate() {
            store
                .insert_chunk(NewChunk {
                    document_id: id,
                    text: &format!("chunk {index}"),
                    embedding: vector,
                    index,
                })
                .await
                .unwrap();
        }
        id
    }

    #[test]
    fn cosine_distance_is_zero_for_identical_and_one_for_orthogonal() {
        assert!(cosine_distance(&[1.0, 2.0], &[1.0, 2.0]) < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[tokio::test]
    async fn nearest_neighbors_are_ordered_and_thresholded() {
        let store = InMemoryStore::new(2);
        seed(&store).await;

        let all = store.nearest_neighbors(&[1.0, 0.0], None, 10).await.unwrap();
        assert_eq!(
            all.iter().map(|row| row.chunk_index).collect::<Vec<_>>(),
            vec![0, 2, 1]
        );
        assert_eq!(all[0].filename, "manual.pdf");

        let close = store.nearest_neighbors(&[1.0, 0.0], Some(0.5), 10).await.unwrap();
        assert_eq!(close.len(), 2);

        let capped = store.nearest_neighbors(&[1.0, 0.0], None, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let store = InMemoryStore::new(3);
        let id = store.insert_document(document("a.pdf")).await.unwrap();
        let result = store
            .insert_chunk(NewChunk {
                document_id: id,
                text: "x",
                embedding: &[1.0, 0.0],
                index: 0,
            })
            .await;
        assert!(matches!(result, Err(RagError::Store { .. })));
    }

    #[tokio::test]
    async fn deleting_a_document_cascades_to_chunks() {
        let store = InMemoryStore::new(2);
        let id = seed(&store).await;

        assert_eq!(store.delete_document(id).await.unwrap(), "manual.pdf");
        assert!(store.chunk_texts(id).await.is_empty());
        assert!(store.list_documents().await.unwrap().is_empty());
        assert!(matches!(
            store.delete_document(id).await,
            Err(RagError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_counts_chunks_newest_first() {
        let store = InMemoryStore::new(2);
        seed(&store).await;
        store.insert_document(document("later.csv")).await.unwrap();

        let listed = store.list_documents().await.unwrap();
        assert_eq!(listed[0].filename, "later.csv");
        assert_eq!(listed[0].chunk_count, 0);
        assert_eq!(listed[1].chunk_count, 3);
    }

    #[tokio::test]
    async fn human_response_only_applies_to_escalated_chats() {
        let store = InMemoryStore::new(2);
        let escalated = store
            .save_chat(NewChatRecord {
                outcome: ChatOutcome::HumanIntervention,
                question: "q1".to_string(),
                answer: "I'm not sure".to_string(),
                context_documents: vec![],
            })
            .await
            .unwrap();
        let answered = store
            .save_chat(NewChatRecord {
                outcome: ChatOutcome::Answered,
                question: "q2".to_string(),
                answer: "42".to_string(),
                context_documents: vec!["a.pdf".to_string()],
            })
            .await
            .unwrap();

        store.record_human_response(escalated, "Call support").await.unwrap();
        assert!(matches!(
            store.record_human_response(answered, "nope").await,
            Err(RagError::NotFound(_))
        ));

        let listed = store.list_chats(10, 0).await.unwrap();
        assert_eq!(listed[0].question, "q2");
        assert_eq!(listed[1].outcome, Some(ChatOutcome::HumanResponded));
        assert_eq!(listed[1].answer, "Call support");

        let recent = store.recent_exchanges(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].question, "q2");

        assert_eq!(store.clear_chats().await.unwrap(), 2);
        assert!(matches!(
            store.delete_chat(answered).await,
            Err(RagError::NotFound(_))
        ));
    }
}
