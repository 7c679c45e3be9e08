//! Offline generator that answers with sentences lifted from the context.
//!
//! Each passage is split into sentences; a sentence scores one point per
//! distinct question term it contains (stopwords ignored). The answer is the
//! best-scoring sentences, at most [`MAX_SENTENCES`], in the order they
//! appear in the context. Output depends only on the prompt.

use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{GenerationProvider, Prompt};
use crate::retry::CallError;

const MAX_SENTENCES: usize = 3;

pub const NO_ANSWER_IN_CONTEXT: &str =
    "The provided documents do not contain an answer to this question.";
pub const NO_CONTEXT: &str = "No documents were available to answer this question.";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where",
    "which", "who", "why", "with",
];

#[derive(Debug, Default)]
pub struct ExtractiveGenerator;

#[async_trait]
impl GenerationProvider for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, CallError> {
        Ok(answer(&prompt.question, &prompt.passages))
    }
}

fn answer(question: &str, passages: &[String]) -> String {
    if passages.is_empty() {
        return NO_CONTEXT.to_string();
    }
    let wanted = terms(question);

    let candidates: Vec<&str> = passages.iter().flat_map(|p| sentences(p)).collect();
    let scores: Vec<usize> = candidates
        .iter()
        .map(|s| wanted.intersection(&terms(s)).count())
        .collect();

    let best = scores.iter().copied().max().unwrap_or(0);
    if best == 0 {
        return NO_ANSWER_IN_CONTEXT.to_string();
    }

    let mut picked: Vec<&str> = Vec::new();
    for (&sentence, &score) in candidates.iter().zip(&scores) {
        if score == best && !picked.contains(&sentence) {
            picked.push(sentence);
            if picked.len() == MAX_SENTENCES {
                break;
            }
        }
    }
    picked.join(" ")
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        let boundary = c == '\n'
            || (matches!(c, '.' | '!' | '?')
                && text[end..].chars().next().map_or(true, char::is_whitespace));
        if boundary {
            push_trimmed(&mut out, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s);
    }
}
