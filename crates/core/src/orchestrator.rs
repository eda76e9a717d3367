use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::models::{
    ChatAnswer, ChatExchange, ChatOptions, ChatOutcome, NewChatRecord, RetrievedChunk,
};
use crate::retrieval::Retriever;
use crate::traits::{ChatHistoryStore, CompletionProvider, KnowledgeStore};
use tracing::{info, warn};

pub const NO_CONTEXT: &str = "No relevant documents found in the knowledge base.";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

const UNCERTAIN_PHRASES: [&str; 4] = [
    "i don't know",
    "i cannot",
    "i'm not sure",
    "i don't have enough information",
];

/// Answers questions from retrieved document context and records each exchange.
pub struct ChatCoordinator<S, E, C, H>
where
    S: KnowledgeStore,
    E: EmbeddingProvider,
    C: CompletionProvider,
    H: ChatHistoryStore,
{
    retriever: Retriever<S, E>,
    completion: C,
    history: H,
    options: ChatOptions,
}

impl<S, E, C, H> ChatCoordinator<S, E, C, H>
where
    S: KnowledgeStore,
    E: EmbeddingProvider,
    C: CompletionProvider,
    H: ChatHistoryStore,
{
    pub fn new(retriever: Retriever<S, E>, completion: C, history: H, options: ChatOptions) -> Self {
        Self {
            retriever,
            completion,
            history,
            options,
        }
    }

    pub async fn ask(&self, question: &str) -> Result<ChatAnswer> {
        if question.trim().is_empty() {
            return Err(RagError::Input("question is empty".to_string()));
        }

        let hits = self
            .retriever
            .retrieve(question, self.options.context_limit.max(1))
            .await?;
        let (context, sources) = compose_context(&hits);

        let history = if self.options.history_turns > 0 {
            self.history
                .recent_exchanges(self.options.history_turns)
                .await
                .unwrap_or_else(|error| {
                    warn!(%error, "could not load chat history, answering without it");
                    Vec::new()
                })
        } else {
            Vec::new()
        };

        let system_prompt = build_system_prompt(&context, &history);
        let answer = self.completion.complete(&system_prompt, question).await?;
        let outcome = classify_outcome(&sources, &answer);

        let record = NewChatRecord {
            outcome,
            question: question.to_string(),
            answer: answer.clone(),
            context_documents: sources.clone(),
        };
        if let Err(error) = self.history.save_chat(record).await {
            warn!(%error, "failed to save chat exchange");
        }

        info!(%outcome, sources = sources.len(), "question answered");
        Ok(ChatAnswer {
            question: question.to_string(),
            answer,
            context,
            sources,
            outcome,
        })
    }
}

/// Groups hits by file into `From {filename}:` sections.
///
/// Returns the context block and the distinct filenames in section order.
pub fn compose_context(hits: &[RetrievedChunk]) -> (String, Vec<String>) {
    if hits.is_empty() {
        return (NO_CONTEXT.to_string(), Vec::new());
    }

    let mut ordered = hits.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| {
        left.filename
            .cmp(&right.filename)
            .then(left.chunk_index.cmp(&right.chunk_index))
    });

    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    for hit in ordered {
        match sections.last_mut() {
            Some((filename, texts)) if *filename == hit.filename => texts.push(&hit.text),
            _ => sections.push((hit.filename.clone(), vec![hit.text.as_str()])),
        }
    }

    let context = sections
        .iter()
        .map(|(filename, texts)| format!("From {filename}:\n{}", texts.join("\n\n")))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    let sources = sections.into_iter().map(|(filename, _)| filename).collect();

    (context, sources)
}

pub fn build_system_prompt(context: &str, history: &[ChatExchange]) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant that answers questions based on the provided document context.\n\n\
         IMPORTANT INSTRUCTIONS:\n\
         1. Base your answer primarily on the context provided below\n\
         2. If the context contains relevant information, use it to provide a detailed and accurate answer\n\
         3. If the context doesn't contain enough information to answer the question, clearly state this\n\
         4. Cite specific parts of the documents when possible\n\
         5. Be concise but comprehensive\n\
         6. If you're unsure about something, acknowledge the uncertainty\n\n\
         Context from uploaded documents:\n",
    );
    prompt.push_str(context);

    if !history.is_empty() {
        prompt.push_str("\n\nPrevious conversation for continuity:\n");
        let turns = history
            .iter()
            .map(|turn| format!("User: {}\nAssistant: {}", turn.question, turn.answer))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&turns);
    }

    prompt.push_str("\n\nPlease provide a clear, accurate answer based on the context provided.");
    prompt
}

pub fn classify_outcome(sources: &[String], answer: &str) -> ChatOutcome {
    if sources.is_empty() {
        return ChatOutcome::Unanswered;
    }

    let lowered = answer.to_lowercase();
    if UNCERTAIN_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        ChatOutcome::HumanIntervention
    } else {
        ChatOutcome::Answered
    }
}
