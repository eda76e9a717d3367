use regex::Regex;

/// Page labels and `N / M` page fractions left behind by PDF text extraction.
#[derive(Debug, Clone)]
pub(crate) struct PageArtifacts {
    label: Regex,
    fraction: Regex,
}

impl PageArtifacts {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            label: Regex::new(r"\b[Pp]age[ \t]+\d+\b")?,
            fraction: Regex::new(r"\b\d+[ \t]*/[ \t]*\d+\b")?,
        })
    }

    pub(crate) fn strip(&self, text: &str) -> String {
        let without_labels = self.label.replace_all(text, "");
        self.fraction.replace_all(&without_labels, "").into_owned()
    }
}

/// Turns extracted document text into the canonical form that gets chunked:
/// paragraphs separated by exactly one blank line, single spaces inside them.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    pages: PageArtifacts,
    header_run: Regex,
    header_date: Regex,
    bullet: Regex,
    numbering: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pages: PageArtifacts::new()?,
            // three or more uppercase words: ANNUAL REPORT DRAFT
            header_run: Regex::new(r"\b[A-Z]{2,}(?:[ \t]+[A-Z]{2,}){2,}\b")?,
            header_date: Regex::new(r"\b\d{1,2}[ \t]*[A-Z]{3,}[ \t]*\d{4}\b")?,
            bullet: Regex::new(r"^[•\-*][ \t]*")?,
            numbering: Regex::new(r"^\d+\.(?:[ \t]+|$)")?,
        })
    }

    pub fn normalize(&self, raw: &str) -> String {
        let unified = raw
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .replace('\u{000c}', "\n\n");

        let mut paragraphs: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();

        for line in unified.split('\n') {
            if line.trim().is_empty() {
                flush_paragraph(&mut current, &mut paragraphs);
                continue;
            }

            let cleaned = self.clean_line(line);
            if !cleaned.is_empty() {
                current.push(cleaned);
            }
        }
        flush_paragraph(&mut current, &mut paragraphs);

        paragraphs.join("\n\n")
    }

    fn clean_line(&self, line: &str) -> String {
        let stripped = self.pages.strip(line);
        let stripped = self.header_run.replace_all(&stripped, "");
        let stripped = self.header_date.replace_all(&stripped, "");

        let trimmed = stripped.trim();
        let trimmed = self.bullet.replace(trimmed, "");
        let trimmed = self.numbering.replace(&trimmed, "");

        trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn flush_paragraph(current: &mut Vec<String>, paragraphs: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    paragraphs.push(current.join(" "));
    current.clear();
}
