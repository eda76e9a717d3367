use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Csv,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown file type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub file_type: FileType,
    pub content: String,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub filename: &'a str,
    pub file_type: FileType,
    pub content: &'a str,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub filename: String,
    pub file_type: FileType,
    pub created_at: DateTime<Utc>,
    pub chunk_count: u64,
}

#[derive(Debug, Clone)]
pub struct NewChunk<'a> {
    pub document_id: Uuid,
    pub text: &'a str,
    pub embedding: &'a [f32],
    pub index: usize,
}

/// One nearest-neighbour row. `distance` is a cosine distance, lower is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub document_id: Uuid,
    pub filename: String,
    pub distance: f64,
    pub chunk_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub document_id: Uuid,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatOutcome {
    Answered,
    Unanswered,
    HumanIntervention,
    HumanResponded,
}

impl ChatOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::Unanswered => "unanswered",
            Self::HumanIntervention => "human_intervention",
            Self::HumanResponded => "human_responded",
        }
    }
}

impl fmt::Display for ChatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "answered" => Ok(Self::Answered),
            "unanswered" => Ok(Self::Unanswered),
            "human_intervention" => Ok(Self::HumanIntervention),
            "human_responded" => Ok(Self::HumanResponded),
            other => Err(format!("unknown chat outcome: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewChatRecord {
    pub outcome: ChatOutcome,
    pub question: String,
    pub answer: String,
    pub context_documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: Uuid,
    pub outcome: Option<ChatOutcome>,
    pub question: String,
    pub answer: String,
    pub context_documents: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub question: String,
    pub answer: String,
    pub context: String,
    pub sources: Vec<String>,
    pub outcome: ChatOutcome,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_target_chars: usize,
    pub chunk_overlap_chars: usize,
    pub paragraph_lookahead_chars: usize,
    pub sentence_lookahead_chars: usize,
    pub newline_lookahead_chars: usize,
    pub min_chunk_chars: usize,
    pub min_meaningful_words: usize,
    pub min_meaningful_ratio: f64,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_target_chars: 600,
            chunk_overlap_chars: 100,
            paragraph_lookahead_chars: 200,
            sentence_lookahead_chars: 150,
            newline_lookahead_chars: 100,
            min_chunk_chars: 80,
            min_meaningful_words: 8,
            min_meaningful_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    /// Threshold for the first nearest-neighbour query (exclusive).
    pub primary_max_distance: f64,
    /// Secondary cutoff applied to whichever result set was used (exclusive).
    pub quality_max_distance: f64,
    pub default_limit: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            primary_max_distance: 0.85,
            quality_max_distance: 0.9,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub context_limit: usize,
    pub history_turns: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            context_limit: 3,
            history_turns: 0,
        }
    }
}
