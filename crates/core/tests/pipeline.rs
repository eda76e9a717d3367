//! Ingestion through retrieval against the in-memory store.

use async_trait::async_trait;
use docchat_core::{
    CharacterNgramEmbedder, ChatCoordinator, ChatHistoryStore, ChatOptions, ChatOutcome,
    CompletionProvider, FileType, IngestionOptions, IngestionPipeline, InMemoryStore,
    KnowledgeStore, RagError, RetrievalOptions, Retriever,
};
use std::sync::Arc;

const DIMENSIONS: usize = 256;

const LIBRARY: &str = "The river town keeps a small library near the old stone bridge. \
Volunteers open the reading room every morning before the market starts. \
Children borrow picture books while their parents look for recipes and maps. \
In winter the librarians light a stove and serve warm tea to visitors.";

const PUMPS: &str = "Hydraulic pumps in the plant must be inspected every six months. \
A certified technician checks the seals, measures the outlet pressure and replaces worn bearings. \
Any leak found during the inspection is reported to the maintenance supervisor the same day.";

struct EchoCompletion;

#[async_trait]
impl CompletionProvider for EchoCompletion {
    async fn complete(&self, _system_prompt: &str, user_message: &str) -> docchat_core::Result<String> {
        Ok(format!("Answer to: {user_message}"))
    }
}

async fn ingested_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new(DIMENSIONS));
    let pipeline = IngestionPipeline::new(
        store.clone(),
        CharacterNgramEmbedder::new(DIMENSIONS),
        IngestionOptions::default(),
    )
    .unwrap();

    pipeline
        .ingest(LIBRARY, "library.pdf", FileType::Pdf)
        .await
        .unwrap();
    pipeline
        .ingest(PUMPS, "pumps.pdf", FileType::Pdf)
        .await
        .unwrap();
    store
}

fn retriever(store: Arc<InMemoryStore>) -> Retriever<Arc<InMemoryStore>, CharacterNgramEmbedder> {
    Retriever::new(
        store,
        CharacterNgramEmbedder::new(DIMENSIONS),
        RetrievalOptions::default(),
    )
}

#[tokio::test]
async fn ingested_documents_are_retrievable() {
    let store = ingested_store().await;
    let retriever = retriever(store.clone());

    let hits = retriever
        .retrieve("When do volunteers open the library reading room?", 5)
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].filename, "library.pdf");
    assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
}

#[tokio::test]
async fn deleting_a_document_removes_its_chunks() {
    let store = ingested_store().await;
    let documents = store.list_documents().await.unwrap();
    let library = documents
        .iter()
        .find(|document| document.filename == "library.pdf")
        .unwrap();

    let filename = store.delete_document(library.id).await.unwrap();
    assert_eq!(filename, "library.pdf");

    let hits = retriever(store.clone())
        .retrieve("library reading room", 10)
        .await
        .unwrap();
    assert!(hits.iter().all(|hit| hit.filename == "pumps.pdf"));

    assert!(matches!(
        store.delete_document(library.id).await,
        Err(RagError::NotFound(_))
    ));
}

#[tokio::test]
async fn questions_are_answered_and_escalations_can_be_resolved() {
    let store = ingested_store().await;
    let coordinator = ChatCoordinator::new(
        retriever(store.clone()),
        EchoCompletion,
        store.clone(),
        ChatOptions::default(),
    );

    let answer = coordinator
        .ask("How often are the hydraulic pumps inspected?")
        .await
        .unwrap();
    assert_eq!(answer.outcome, ChatOutcome::Answered);
    assert!(!answer.sources.is_empty());

    let chats = store.list_chats(10, 0).await.unwrap();
    assert_eq!(chats.len(), 1);
    assert!(matches!(
        store.record_human_response(chats[0].id, "Every six months.").await,
        Err(RagError::NotFound(_))
    ));

    assert_eq!(store.clear_chats().await.unwrap(), 1);
    assert!(store.list_chats(10, 0).await.unwrap().is_empty());
}
