pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod flow;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod providers;
pub mod quality;
pub mod retrieval;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_text, split_spans, ChunkSpan, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, EmbeddingProvider, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ExtractError, RagError, Result};
pub use extractor::{csv_to_text, extract_text, OcrEndpointConfig};
pub use flow::{
    execute_step, FlowDefinition, FlowExecution, FlowNode, FlowRunner, FlowState, FlowStep,
    FlowSummary, FlowVariables,
};
pub use ingest::{
    discover_source_files, FolderIngestionReport, IngestedFile, IngestionPipeline, SkippedFile,
};
pub use models::{
    ChatAnswer, ChatExchange, ChatOptions, ChatOutcome, ChatRecord, Document, DocumentSummary,
    FileType, IngestionOptions, IngestionReport, NewChatRecord, NewChunk, NewDocument,
    RetrievalOptions, RetrievedChunk,
};
pub use normalize::TextNormalizer;
pub use orchestrator::ChatCoordinator;
pub use providers::{OpenAiClient, OpenAiConfig};
pub use quality::ContentFilter;
pub use retrieval::Retriever;
pub use stores::{InMemoryStore, PgConfig, PgStore};
pub use traits::{ChatHistoryStore, CompletionProvider, FlowStore, KnowledgeStore};
