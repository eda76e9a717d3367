use crate::error::RagError;
use crate::models::IngestionOptions;
use crate::quality::ContentFilter;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub target_chars: usize,
    pub overlap_chars: usize,
    pub paragraph_lookahead: usize,
    pub sentence_lookahead: usize,
    pub newline_lookahead: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&IngestionOptions::default())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            target_chars: value.chunk_target_chars,
            overlap_chars: value.chunk_overlap_chars,
            paragraph_lookahead: value.paragraph_lookahead_chars,
            sentence_lookahead: value.sentence_lookahead_chars,
            newline_lookahead: value.newline_lookahead_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.target_chars == 0 {
            return Err(RagError::Input(
                "chunk target size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A window over the normalized text. `start` and `end` are character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Walks `text` with overlapping windows, ending each window on the nearest
/// paragraph break, sentence end or newline after the target size.
pub fn split_spans(text: &str, config: &ChunkingConfig) -> Vec<ChunkSpan> {
    let offsets = char_offsets(text);
    let len = offsets.len().saturating_sub(1);
    let target = config.target_chars.max(1);

    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let naive_end = start + target;
        let window_end = if naive_end < len {
            boundary_after(text, &offsets, naive_end, config)
                .filter(|boundary| *boundary < len)
                .unwrap_or(naive_end)
        } else {
            naive_end
        };

        let end = window_end.min(len);
        spans.push(ChunkSpan {
            start,
            end,
            text: text[offsets[start]..offsets[end]].trim().to_string(),
        });

        let next = window_end.saturating_sub(config.overlap_chars);
        start = if next > start { next } else { window_end };
    }

    spans
}

pub fn chunk_text(text: &str, config: &ChunkingConfig, filter: &ContentFilter) -> Vec<String> {
    split_spans(text, config)
        .into_iter()
        .map(|span| span.text)
        .filter(|chunk| filter.accepts(chunk))
        .collect()
}

fn char_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn boundary_after(
    text: &str,
    offsets: &[usize],
    from: usize,
    config: &ChunkingConfig,
) -> Option<usize> {
    find_within(text, offsets, from, "\n\n", config.paragraph_lookahead)
        .map(|position| position + 2)
        .or_else(|| {
            find_within(text, offsets, from, ". ", config.sentence_lookahead)
                .map(|position| position + 2)
        })
        .or_else(|| {
            find_within(text, offsets, from, "\n", config.newline_lookahead)
                .map(|position| position + 1)
        })
}

/// Character position of the first `pattern` starting in `[from, from + lookahead]`.
fn find_within(
    text: &str,
    offsets: &[usize],
    from: usize,
    pattern: &str,
    lookahead: usize,
) -> Option<usize> {
    let len = offsets.len().saturating_sub(1);
    if from >= len {
        return None;
    }

    let limit = (from + lookahead + pattern.chars().count()).min(len);
    let window = &text[offsets[from]..offsets[limit]];
    window
        .find(pattern)
        .map(|byte| from + window[..byte].chars().count())
}
