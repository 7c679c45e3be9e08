//! Retrieval-augmented answering.
//!
//! [`AnswerEngine::answer`] embeds the question, searches the index, keeps
//! hits above the similarity floor, packs as many of them as fit into the
//! context budget and asks the generator to answer from that context only.
//!
//! Context packing takes hits in descending similarity and stops at the
//! first one that would overflow `context_char_budget`, so the least similar
//! hits are the ones dropped. When even the best hit is larger than the
//! budget it is cut down to the budget, at a char boundary.
//!
//! Citations list each source of an included hit once, in order of first
//! appearance, with that source's best similarity.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::generation::{GenerationGateway, Prompt};
use crate::models::{Answer, Citation, SearchHit};
use crate::store::VectorStore;

const GROUNDED_SYSTEM: &str = "You answer questions about a document collection. \
Use only the numbered context passages provided. If they do not contain the answer, \
say that you don't know; do not make up an answer. Refer to passages by their numbers.";

const UNGROUNDED_SYSTEM: &str = "No passage in the document collection matched this question. \
Answer from general knowledge and state clearly that the answer is not based on the documents.";

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: i64,
    /// Hits below this similarity are discarded. `None` keeps everything.
    pub similarity_floor: Option<f64>,
    pub context_char_budget: usize,
    pub allow_ungrounded: bool,
    /// User message template with `{context}` and `{question}` placeholders.
    pub prompt_template: Option<String>,
}

impl From<&RetrievalConfig> for RetrievalSettings {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            similarity_floor: config.similarity_floor,
            context_char_budget: config.context_char_budget,
            allow_ungrounded: config.allow_ungrounded,
            prompt_template: config.prompt_template.clone(),
        }
    }
}

/// One hit as it goes into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub hit: SearchHit,
    /// The hit's text, possibly truncated to the budget.
    pub text: String,
}

pub struct AnswerEngine {
    store: Arc<dyn VectorStore>,
    embeddings: EmbeddingGateway,
    generator: GenerationGateway,
    settings: RetrievalSettings,
}

impl AnswerEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: EmbeddingGateway,
        generator: GenerationGateway,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embeddings,
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Startup check: the index must have been built with the configured
    /// embedding model. An empty index passes.
    pub async fn verify(&self) -> Result<()> {
        let wanted = self.embeddings.index_model();
        match self.store.index_model().await? {
            Some(recorded) if recorded != wanted => Err(Error::config(format!(
                "index was built with {} ({} dims) but embedding is configured as {} ({} dims); \
                 re-run ingest with --full",
                recorded.model, recorded.dims, wanted.model, wanted.dims
            ))),
            _ => Ok(()),
        }
    }

    /// Hits for `query` with the configured `top_k` and similarity floor.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search(query, self.settings.top_k).await
    }

    /// Like [`retrieve`](Self::retrieve) with an explicit `k`.
    pub async fn search(&self, query: &str, k: i64) -> Result<Vec<SearchHit>> {
        let query = validate_query(query)?;
        let vector = self.embeddings.embed_query(query).await?;
        let mut hits = self.store.search(&vector, k).await?;
        if let Some(floor) = self.settings.similarity_floor {
            hits.retain(|h| h.similarity >= floor);
        }
        tracing::debug!(hits = hits.len(), k, "retrieved");
        Ok(hits)
    }

    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let question = validate_query(query)?;
        let hits = self.retrieve(question).await?;

        if hits.is_empty() {
            if !self.settings.allow_ungrounded {
                tracing::info!("no relevant context");
                return Ok(Answer::NoRelevantContext);
            }
            let prompt = ungrounded_prompt(question);
            let text = self.generator.generate(&prompt).await?;
            return Ok(Answer::Ungrounded { text });
        }

        let blocks = pack_context(hits, self.settings.context_char_budget);
        let prompt = grounded_prompt(question, &blocks, self.settings.prompt_template.as_deref());
        let text = self.generator.generate(&prompt).await?;
        let citations = citations(&blocks);
        tracing::info!(
            context_blocks = blocks.len(),
            sources = citations.len(),
            model = self.generator.model_name(),
            "answered"
        );
        Ok(Answer::Grounded { text, citations })
    }
}

fn validate_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::InvalidQuery("query is empty".to_string()));
    }
    if !query.chars().any(char::is_alphanumeric) {
        return Err(Error::InvalidQuery("query has no searchable terms".to_string()));
    }
    Ok(query)
}

/// Keep the most similar hits that fit in `budget` chars of text.
pub fn pack_context(hits: Vec<SearchHit>, budget: usize) -> Vec<ContextBlock> {
    let mut blocks = Vec::new();
    let mut used = 0usize;
    for hit in hits {
        let len = hit.text.chars().count();
        if used + len <= budget {
            used += len;
            let text = hit.text.clone();
            blocks.push(ContextBlock { hit, text });
        } else {
            if blocks.is_empty() {
                let text: String = hit.text.chars().take(budget).collect();
                blocks.push(ContextBlock { hit, text });
            }
            break;
        }
    }
    blocks
}

/// Numbered context passages, each headed by its source path.
pub fn render_context(blocks: &[ContextBlock]) -> String {
    blocks
        .iter()
        .enumerate()
        .map(|(i, b)| format!("[{}] ({})\n{}", i + 1, b.hit.path, b.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn grounded_prompt(question: &str, blocks: &[ContextBlock], template: Option<&str>) -> Prompt {
    let context = render_context(blocks);
    let user = match template {
        Some(t) => t.replace("{context}", &context).replace("{question}", question),
        None => format!("Context:\n{}\n\nQuestion: {}", context, question),
    };
    Prompt {
        system: GROUNDED_SYSTEM.to_string(),
        user,
        question: question.to_string(),
        passages: blocks.iter().map(|b| b.text.clone()).collect(),
    }
}

fn ungrounded_prompt(question: &str) -> Prompt {
    Prompt {
        system: UNGROUNDED_SYSTEM.to_string(),
        user: format!("Question: {}", question),
        question: question.to_string(),
        passages: Vec::new(),
    }
}

fn citations(blocks: &[ContextBlock]) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for b in blocks {
        match out.iter_mut().find(|c| c.source_id == b.hit.source_id) {
            Some(c) => c.similarity = c.similarity.max(b.hit.similarity),
            None => out.push(Citation {
                source_id: b.hit.source_id.clone(),
                path: b.hit.path.clone(),
                similarity: b.hit.similarity,
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashProvider};
    use crate::generation::ExtractiveGenerator;
    use crate::models::IndexEntry;
    use crate::retry::RetryPolicy;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn hit(source: &str, ordinal: u32, text: &str, similarity: f64) -> SearchHit {
        SearchHit {
            chunk_id: format!("{}-{}", source, ordinal),
            source_id: source.to_string(),
            path: format!("{}.md", source),
            ordinal,
            text: text.to_string(),
            similarity,
        }
    }

    fn settings() -> RetrievalSettings {
        RetrievalSettings::from(&RetrievalConfig::default())
    }

    async fn engine(texts: &[(&str, &str)], settings: RetrievalSettings) -> AnswerEngine {
        let provider = Arc::new(HashProvider::new(256).unwrap());
        let store = Arc::new(InMemoryStore::new());
        let vectors = provider
            .embed(&texts.iter().map(|(_, t)| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let entries: Vec<IndexEntry> = texts
            .iter()
            .zip(vectors)
            .map(|((source, text), vector)| IndexEntry {
                chunk_id: format!("{}-0", source),
                source_id: source.to_string(),
                path: format!("{}.txt", source),
                ordinal: 0,
                text: text.to_string(),
                vector,
                model: provider.model_name().to_string(),
            })
            .collect();
        store.upsert(&entries).await.unwrap();

        let policy = RetryPolicy::new(1, Duration::from_secs(5));
        AnswerEngine::new(
            store,
            EmbeddingGateway::new(provider, policy.clone(), 8),
            GenerationGateway::new(Arc::new(ExtractiveGenerator), policy),
            settings,
        )
    }

    #[test]
    fn test_pack_drops_least_similar_first() {
        let hits = vec![
            hit("a", 0, &"a".repeat(40), 0.9),
            hit("b", 0, &"b".repeat(40), 0.8),
            hit("c", 0, &"c".repeat(40), 0.7),
        ];
        let blocks = pack_context(hits, 100);
        let ids: Vec<&str> = blocks.iter().map(|b| b.hit.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_pack_truncates_oversized_top_hit() {
        let blocks = pack_context(vec![hit("a", 0, "ééééé", 0.9), hit("b", 0, "x", 0.8)], 3);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "ééé");
    }

    #[test]
    fn test_citations_deduplicated_in_order() {
        let blocks = pack_context(
            vec![
                hit("b", 2, "one", 0.9),
                hit("a", 0, "two", 0.8),
                hit("b", 0, "three", 0.7),
            ],
            1000,
        );
        let cites = citations(&blocks);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].source_id, "b");
        assert_eq!(cites[0].similarity, 0.9);
        assert_eq!(cites[1].source_id, "a");
    }

    #[test]
    fn test_prompt_layout_and_template() {
        let blocks = pack_context(vec![hit("a", 0, "Alpha text.", 0.9)], 1000);
        let p = grounded_prompt("What?", &blocks, None);
        assert_eq!(p.user, "Context:\n[1] (a.md)\nAlpha text.\n\nQuestion: What?");
        assert_eq!(p.passages, vec!["Alpha text.".to_string()]);

        let p = grounded_prompt("What?", &blocks, Some("Q={question}\nC={context}"));
        assert_eq!(p.user, "Q=What?\nC=[1] (a.md)\nAlpha text.");
    }

    #[tokio::test]
    async fn test_answers_with_citation() {
        let engine = engine(
            &[
                ("france", "Paris is the capital of France."),
                ("baking", "Whisk two eggs with sugar until pale."),
            ],
            settings(),
        )
        .await;
        let answer = engine.answer("What is the capital of France?").await.unwrap();
        assert!(answer.text().unwrap().contains("Paris"));
        assert_eq!(answer.source_ids()[0], "france");
        assert_eq!(answer.status(), "answered");
    }

    #[tokio::test]
    async fn test_no_relevant_context_vs_ungrounded() {
        let mut s = settings();
        s.similarity_floor = Some(0.99);
        let strict = engine(&[("baking", "Whisk two eggs with sugar.")], s.clone()).await;
        assert_eq!(
            strict.answer("Who wrote Hamlet?").await.unwrap(),
            Answer::NoRelevantContext
        );

        s.allow_ungrounded = true;
        let lenient = engine(&[("baking", "Whisk two eggs with sugar.")], s).await;
        let answer = lenient.answer("Who wrote Hamlet?").await.unwrap();
        assert!(matches!(answer, Answer::Ungrounded { .. }));
        assert!(answer.citations().is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let engine = engine(&[("a", "Alpha.")], settings()).await;
        assert!(matches!(
            engine.answer("   ").await,
            Err(Error::InvalidQuery(_))
        ));
        let err = engine.search("?! ...", 3).await.unwrap_err();
        assert!(err.to_string().contains("no searchable terms"));
    }

    #[tokio::test]
    async fn test_verify_detects_model_mismatch() {
        let engine = engine(&[("a", "Alpha.")], settings()).await;
        engine.verify().await.unwrap();

        let other = AnswerEngine::new(
            engine.store.clone(),
            EmbeddingGateway::new(
                Arc::new(HashProvider::new(32).unwrap()),
                RetryPolicy::new(1, Duration::from_secs(1)),
                8,
            ),
            engine.generator.clone(),
            settings(),
        );
        assert!(matches!(other.verify().await, Err(Error::Configuration(_))));
    }
}
