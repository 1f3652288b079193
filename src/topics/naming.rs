//! Community labels from distinctive caption terms (TF-IDF contrast)

use super::TopicError;
use regex_lite::Regex;
use std::collections::{BTreeMap, HashSet};

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "and", "any", "are", "as",
    "at", "be", "been", "before", "being", "below", "between", "both", "but", "by", "can",
    "cells", "control", "could", "data", "did", "does", "during", "each", "error", "experiment",
    "experiments", "figure", "fig", "for", "from", "further", "had", "has", "have", "here",
    "independent", "into", "its", "mean", "more", "most", "not", "n", "of", "on", "only",
    "or", "other", "our", "over", "panel", "per", "relative", "representative", "same",
    "scale", "shown", "shows", "such", "than", "that", "the", "their", "then", "there",
    "these", "this", "those", "through", "under", "using", "various", "was", "were", "what",
    "when", "where", "which", "while", "with", "within", "without",
];

/// Splits caption text into candidate label tokens
#[derive(Debug, Clone)]
pub struct Tokenizer {
    word: Regex,
    stop: HashSet<&'static str>,
}

impl Tokenizer {
    pub fn new() -> Result<Self, TopicError> {
        Ok(Self {
            word: Regex::new(r"[A-Za-z][A-Za-z0-9-]*[A-Za-z0-9]")?,
            stop: STOP_WORDS.iter().copied().collect(),
        })
    }

    /// Lowercased tokens of three or more characters, stop-words removed.
    pub fn tokens(&self, text: &str) -> Vec<String> {
        self.word
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|t| t.len() >= 3 && !self.stop.contains(t.as_str()))
            .collect()
    }
}

/// Top `n` terms distinctive for `community` texts against `corpus` texts.
///
/// Term frequency is counted over the community's texts; inverse document
/// frequency over the whole corpus. Tokens in `excluded` never qualify.
pub fn distinctive_terms(
    tokenizer: &Tokenizer,
    community: &[&str],
    corpus: &[&str],
    excluded: &HashSet<String>,
    n: usize,
) -> Result<Vec<String>, TopicError> {
    if community.iter().all(|t| t.trim().is_empty()) {
        return Err(TopicError::NoText);
    }

    let mut document_frequency: BTreeMap<String, usize> = BTreeMap::new();
    for text in corpus {
        let unique: HashSet<String> = tokenizer.tokens(text).into_iter().collect();
        for token in unique {
            *document_frequency.entry(token).or_default() += 1;
        }
    }

    let mut term_frequency: BTreeMap<String, usize> = BTreeMap::new();
    for text in community {
        for token in tokenizer.tokens(text) {
            if !excluded.contains(&token) {
                *term_frequency.entry(token).or_default() += 1;
            }
        }
    }

    let docs = corpus.len().max(1) as f64;
    let mut scored: Vec<(String, f64)> = term_frequency
        .into_iter()
        .map(|(term, tf)| {
            let df = document_frequency.get(&term).copied().unwrap_or(0) as f64;
            let idf = (docs / (1.0 + df)).ln() + 1.0;
            (term, tf as f64 * idf)
        })
        .collect();
    if scored.is_empty() {
        return Err(TopicError::NoDistinctiveTerms);
    }

    // Sort is stable and the map iterated alphabetically, so ties stay sorted
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().take(n).map(|(term, _)| term).collect())
}
