use crate::models::IngestionOptions;
use crate::normalize::PageArtifacts;

const KEPT_PUNCTUATION: [char; 9] = ['.', ',', '!', '?', ';', ':', '-', '(', ')'];

/// Decides whether a chunk is worth embedding: long enough and made mostly of words.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pages: PageArtifacts,
    min_chars: usize,
    min_meaningful_words: usize,
    min_meaningful_ratio: f64,
}

impl ContentFilter {
    pub fn new(options: &IngestionOptions) -> Result<Self, regex::Error> {
        Ok(Self {
            pages: PageArtifacts::new()?,
            min_chars: options.min_chunk_chars,
            min_meaningful_words: options.min_meaningful_words,
            min_meaningful_ratio: options.min_meaningful_ratio,
        })
    }

    pub fn accepts(&self, chunk: &str) -> bool {
        chunk.trim().chars().count() > self.min_chars && self.is_meaningful(chunk)
    }

    pub fn is_meaningful(&self, chunk: &str) -> bool {
        let cleaned: String = self
            .pages
            .strip(chunk)
            .chars()
            .map(|ch| if is_kept(ch) { ch } else { ' ' })
            .collect();

        let words = cleaned
            .split_whitespace()
            .filter(|word| word.chars().count() > 1)
            .collect::<Vec<_>>();
        let meaningful = words
            .iter()
            .filter(|word| word.chars().any(char::is_alphabetic))
            .count();

        if words.is_empty() || meaningful < self.min_meaningful_words {
            return false;
        }

        (meaningful as f64 / words.len() as f64) > self.min_meaningful_ratio
    }
}

fn is_kept(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch.is_whitespace() || KEPT_PUNCTUATION.contains(&ch)
}
