use crate::chunking::{chunk_text, ChunkingConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{ExtractError, RagError, Result};
use crate::extractor::{extract_text, OcrEndpointConfig};
use crate::models::{FileType, IngestionOptions, IngestionReport, NewChunk, NewDocument};
use crate::normalize::TextNormalizer;
use crate::quality::ContentFilter;
use crate::traits::KnowledgeStore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Recursively lists `.pdf` and `.csv` files under `folder`, sorted by path.
pub fn discover_source_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| FileType::from_path(entry.path()).is_some())
        .map(|entry| entry.path().to_path_buf())
        .collect::<Vec<_>>();

    files.sort_unstable();
    files
}

pub fn digest_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub report: IngestionReport,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct FolderIngestionReport {
    pub ingested: Vec<IngestedFile>,
    pub skipped: Vec<SkippedFile>,
}

pub struct IngestionPipeline<S, E>
where
    S: KnowledgeStore,
    E: EmbeddingProvider,
{
    store: S,
    embedder: E,
    normalizer: TextNormalizer,
    filter: ContentFilter,
    chunking: ChunkingConfig,
    ocr: Option<OcrEndpointConfig>,
}

impl<S, E> IngestionPipeline<S, E>
where
    S: KnowledgeStore,
    E: EmbeddingProvider,
{
    pub fn new(store: S, embedder: E, options: IngestionOptions) -> Result<Self> {
        let chunking = ChunkingConfig::from(&options);
        chunking.validate()?;

        Ok(Self {
            store,
            embedder,
            normalizer: TextNormalizer::new()?,
            filter: ContentFilter::new(&options)?,
            chunking,
            ocr: None,
        })
    }

    /// PDFs that fail to parse locally are sent to this endpoint.
    pub fn with_ocr(mut self, ocr: Option<OcrEndpointConfig>) -> Self {
        self.ocr = ocr;
        self
    }

    /// Normalizes, chunks, embeds and persists one document.
    ///
    /// The document row is written even when no chunk survives the quality
    /// filter. A failure part way through leaves the rows written so far.
    pub async fn ingest(
        &self,
        raw_text: &str,
        filename: &str,
        file_type: FileType,
    ) -> Result<IngestionReport> {
        if filename.trim().is_empty() {
            return Err(RagError::Input("filename is empty".to_string()));
        }

        let normalized = self.normalizer.normalize(raw_text);
        let chunks = chunk_text(&normalized, &self.chunking, &self.filter);

        let document_id = self
            .store
            .insert_document(NewDocument {
                filename,
                file_type,
                content: &normalized,
                checksum: digest_text(&normalized),
            })
            .await?;

        if chunks.is_empty() {
            warn!(filename, %document_id, "no chunk passed the content filter");
            return Ok(IngestionReport {
                document_id,
                chunk_count: 0,
            });
        }

        let texts = chunks.iter().map(String::as_str).collect::<Vec<_>>();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::provider(
                "embeddings",
                format!(
                    "expected {} vectors, received {}",
                    chunks.len(),
                    embeddings.len()
                ),
            ));
        }

        for (index, (text, embedding)) in chunks.iter().zip(&embeddings).enumerate() {
            self.store
                .insert_chunk(NewChunk {
                    document_id,
                    text,
                    embedding,
                    index,
                })
                .await?;
        }

        info!(filename, %document_id, chunks = chunks.len(), "document ingested");
        Ok(IngestionReport {
            document_id,
            chunk_count: chunks.len(),
        })
    }

    /// Extracts a `.pdf` or `.csv` file and ingests it under its file name.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestionReport> {
        let file_type = FileType::from_path(path).ok_or_else(|| {
            ExtractError::UnsupportedFileType(path.display().to_string())
        })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ExtractError::MissingFileName(path.display().to_string()))?;

        let text = extract_text(path, file_type, self.ocr.as_ref()).await?;
        self.ingest(&text, filename, file_type).await
    }

    /// Ingests every source file under `folder`, collecting per-file failures
    /// instead of stopping at the first one.
    pub async fn ingest_folder_best_effort(&self, folder: &Path) -> Result<FolderIngestionReport> {
        let files = discover_source_files(folder);
        if files.is_empty() {
            return Err(RagError::Input(format!(
                "no pdf or csv files found in {}",
                folder.display()
            )));
        }

        let mut report = FolderIngestionReport::default();
        for path in files {
            match self.ingest_file(&path).await {
                Ok(file_report) => report.ingested.push(IngestedFile {
                    path,
                    report: file_report,
                }),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping file");
                    report.skipped.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{digest_text, discover_source_files, IngestionPipeline};
    use crate::embeddings::{CharacterNgramEmbedder, EmbeddingProvider};
    use crate::error::{RagError, Result};
    use crate::models::{
        DocumentSummary, FileType, IngestionOptions, NewChunk, NewDocument, RetrievedChunk,
    };
    use crate::stores::InMemoryStore;
    use crate::traits::KnowledgeStore;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use uuid::Uuid;

    const DIMENSIONS: usize = 32;

    fn passage() -> String {
        let sentences = [
            "The river town keeps a small library near the old stone bridge.",
            "Volunteers open the reading room every morning before the market starts.",
            "Children borrow picture books while their parents look for recipes and maps.",
            "In winter the librarians light a stove and serve warm tea to visitors.",
            "Local historians store letters, diaries and photographs in the back archive.",
        ];
        let mut text = String::new();
        for sentence in sentences.iter().cycle() {
            if text.len() >= 1_300 {
                break;
            }
            text.push_str(sentence);
            text.push(' ');
        }
        text.truncate(1_300);
        text.trim_end().to_string()
    }

    fn pipeline(
        store: Arc<InMemoryStore>,
    ) -> IngestionPipeline<Arc<InMemoryStore>, CharacterNgramEmbedder> {
        IngestionPipeline::new(
            store,
            CharacterNgramEmbedder::new(DIMENSIONS),
            IngestionOptions::default(),
        )
        .unwrap()
    }

    /// Delegates to an in-memory store but fails every chunk insert after the first `allowed`.
    struct FlakyStore {
        inner: InMemoryStore,
        allowed: usize,
        inserted: AtomicUsize,
    }

    #[async_trait]
    impl KnowledgeStore for FlakyStore {
        async fn insert_document(&self, document: NewDocument<'_>) -> Result<Uuid> {
            self.inner.insert_document(document).await
        }

        async fn insert_chunk(&self, chunk: NewChunk<'_>) -> Result<Uuid> {
            if self.inserted.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(RagError::store("flaky", "disk full"));
            }
            self.inner.insert_chunk(chunk).await
        }

        async fn nearest_neighbors(
            &self,
            query_vector: &[f32],
            max_distance: Option<f64>,
            limit: usize,
        ) -> Result<Vec<RetrievedChunk>> {
            self.inner
                .nearest_neighbors(query_vector, max_distance, limit)
                .await
        }

        async fn delete_document(&self, document_id: Uuid) -> Result<String> {
            self.inner.delete_document(document_id).await
        }

        async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
            self.inner.list_documents().await
        }
    }

    /// Returns one vector fewer than asked for.
    struct ShortBatchEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ShortBatchEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(CharacterNgramEmbedder::new(DIMENSIONS).embed_sync(text))
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            let mut vectors = Vec::new();
            for text in texts.iter().skip(1) {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }

        fn dimensions(&self) -> usize {
            DIMENSIONS
        }
    }

    #[tokio::test]
    async fn passage_is_stored_with_contiguous_chunk_indices() {
        let store = Arc::new(InMemoryStore::new(DIMENSIONS));
        let report = pipeline(store.clone())
            .ingest(&passage(), "library.pdf", FileType::Pdf)
            .await
            .unwrap();

        assert_eq!(report.chunk_count, 3);
        let chunks = store.chunk_texts(report.document_id).await;
        let indices = chunks.iter().map(|(index, _)| *index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(chunks.iter().all(|(_, text)| text.chars().count() <= 800));

        let document = store.document(report.document_id).await.unwrap();
        assert_eq!(document.filename, "library.pdf");
        assert_eq!(document.checksum, digest_text(&document.content));
    }

    #[tokio::test]
    async fn table_of_numbers_keeps_document_without_chunks() {
        let store = Arc::new(InMemoryStore::new(DIMENSIONS));
        let table = (0..120)
            .map(|row| format!("{row} {} {}.5 {}", row * 3, row + 7, row * 11))
            .collect::<Vec<_>>()
            .join("\n");

        let report = pipeline(store.clone())
            .ingest(&table, "figures.csv", FileType::Csv)
            .await
            .unwrap();

        assert_eq!(report.chunk_count, 0);
        assert!(store.document(report.document_id).await.is_some());
        assert!(store.chunk_texts(report.document_id).await.is_empty());
    }

    #[tokio::test]
    async fn blank_inputs_are_rejected_before_any_write() {
        let store = Arc::new(InMemoryStore::new(DIMENSIONS));
        let pipeline = pipeline(store.clone());

        assert!(matches!(
            pipeline.ingest(&passage(), "  ", FileType::Pdf).await,
            Err(RagError::Input(_))
        ));
        assert!(store.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_without_content_is_stored_as_empty_document() {
        let store = Arc::new(InMemoryStore::new(DIMENSIONS));
        let pipeline = pipeline(store.clone());

        let scan = pipeline
            .ingest("Page 1\nPage 2\n3 / 4", "scan.pdf", FileType::Pdf)
            .await
            .unwrap();
        let header_only = crate::extractor::csv_to_text("a,b\n".as_bytes()).unwrap();
        let csv = pipeline
            .ingest(&header_only, "empty.csv", FileType::Csv)
            .await
            .unwrap();

        assert_eq!(scan.chunk_count, 0);
        assert_eq!(csv.chunk_count, 0);
        let document = store.document(scan.document_id).await.unwrap();
        assert_eq!(document.content, "");
        let documents = store.list_documents().await.unwrap();
        assert_eq!(documents.len(), 2);
        assert!(documents.iter().all(|document| document.chunk_count == 0));
    }

    #[tokio::test]
    async fn failing_chunk_insert_leaves_partial_ingestion() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(DIMENSIONS),
            allowed: 1,
            inserted: AtomicUsize::new(0),
        });
        let pipeline = IngestionPipeline::new(
            store.clone(),
            CharacterNgramEmbedder::new(DIMENSIONS),
            IngestionOptions::default(),
        )
        .unwrap();

        let error = pipeline
            .ingest(&passage(), "library.pdf", FileType::Pdf)
            .await
            .unwrap_err();
        assert!(matches!(error, RagError::Store { ref backend, .. } if backend == "flaky"));

        let documents = store.list_documents().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].chunk_count, 1);
    }

    #[tokio::test]
    async fn embedding_count_mismatch_is_a_provider_error() {
        let store = Arc::new(InMemoryStore::new(DIMENSIONS));
        let pipeline =
            IngestionPipeline::new(store.clone(), ShortBatchEmbedder, IngestionOptions::default())
                .unwrap();

        let error = pipeline
            .ingest(&passage(), "library.pdf", FileType::Pdf)
            .await
            .unwrap_err();

        assert!(matches!(error, RagError::Provider { .. }));
        let documents = store.list_documents().await.unwrap();
        assert_eq!(documents[0].chunk_count, 0);
    }

    #[tokio::test]
    async fn zero_chunk_target_is_rejected() {
        let options = IngestionOptions {
            chunk_target_chars: 0,
            ..IngestionOptions::default()
        };

        let result = IngestionPipeline::new(
            InMemoryStore::new(DIMENSIONS),
            CharacterNgramEmbedder::new(DIMENSIONS),
            options,
        );

        assert!(matches!(result, Err(RagError::Input(_))));
    }

    #[test]
    fn discovery_is_recursive_and_filters_extensions() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("b.csv"), "a\n1\n")?;
        fs::write(nested.join("a.PDF"), b"%PDF-1.4")?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let files = discover_source_files(dir.path());

        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|path| path.extension().is_some_and(|ext| ext != "txt")));
        Ok(())
    }

    #[tokio::test]
    async fn folder_ingestion_skips_unreadable_files() {
        let dir = tempdir().unwrap();
        let rows = (1..=6)
            .map(|row| {
                format!(
                    "Branch {row},The branch library on street number {row} offers children's reading sessions every Saturday morning with volunteers"
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(dir.path().join("branches.csv"), format!("name,description\n{rows}\n")).unwrap();
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken").unwrap();

        let store = Arc::new(InMemoryStore::new(DIMENSIONS));
        let report = pipeline(store.clone())
            .ingest_folder_best_effort(dir.path())
            .await
            .unwrap();

        assert_eq!(report.ingested.len(), 1);
        assert!(report.ingested[0].report.chunk_count > 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            report.skipped[0].path.file_name().and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
    }

    #[tokio::test]
    async fn empty_folder_is_an_input_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new(DIMENSIONS));

        let result = pipeline(store).ingest_folder_best_effort(dir.path()).await;

        assert!(matches!(result, Err(RagError::Input(_))));
    }
}
