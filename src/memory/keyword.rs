//! Lexical scoring for the hybrid query pipeline.
//!
//! Combines exact phrase hits, character/word n-gram overlap, and a BM25
//! approximation into a single keyword score per candidate. This runs on
//! candidate text already fetched from storage, not against the index.

use crate::memory::text::canonical_tokens;
use std::collections::{HashMap, HashSet};

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;
const BM25_CORPUS_SIZE: f64 = 10_000.0;
const BM25_AVG_DOC_LEN: f64 = 100.0;

/// Keyword features of a text: canonical tokens plus trigram shingles,
/// bigrams, and trigram word sequences. N-gram entries carry extra weight
/// in overlap scoring.
pub fn extract_keywords(text: &str, min_length: usize) -> HashSet<String> {
    let tokens = canonical_tokens(text);
    let mut keywords = HashSet::new();
    for token in &tokens {
        if token.len() >= min_length {
            keywords.insert(token.clone());
            if token.len() >= 3 {
                let chars: Vec<char> = token.chars().collect();
                for window in chars.windows(3) {
                    keywords.insert(window.iter().collect());
                }
            }
        }
    }
    for pair in tokens.windows(2) {
        let bigram = format!("{}_{}", pair[0], pair[1]);
        if bigram.len() >= min_length {
            keywords.insert(bigram);
        }
    }
    for triple in tokens.windows(3) {
        keywords.insert(format!("{}_{}_{}", triple[0], triple[1], triple[2]));
    }
    keywords
}

/// Weighted fraction of query keywords present in the content keywords.
/// Multi-word n-grams count double.
pub fn keyword_overlap(query_keywords: &HashSet<String>, content_keywords: &HashSet<String>) -> f64 {
    let mut matches = 0.0;
    let mut total = 0.0;
    for qk in query_keywords {
        let weight = if qk.contains('_') { 2.0 } else { 1.0 };
        if content_keywords.contains(qk) {
            matches += weight;
        }
        total += weight;
    }
    if total == 0.0 {
        0.0
    } else {
        matches / total
    }
}

pub fn exact_phrase_match(query: &str, content: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return false;
    }
    content.to_lowercase().contains(&q)
}

/// BM25 over a single document with fixed corpus statistics.
pub fn bm25_score(query_terms: &[String], content_terms: &[String]) -> f64 {
    let mut term_freq: HashMap<&str, f64> = HashMap::new();
    for term in content_terms {
        *term_freq.entry(term.as_str()).or_insert(0.0) += 1.0;
    }
    let doc_len = content_terms.len() as f64;

    let mut score = 0.0;
    for q_term in query_terms {
        let tf = match term_freq.get(q_term.as_str()) {
            Some(tf) => *tf,
            None => continue,
        };
        let idf = ((BM25_CORPUS_SIZE + 1.0) / (tf + 0.5)).ln();
        let numerator = tf * (BM25_K1 + 1.0);
        let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / BM25_AVG_DOC_LEN));
        score += idf * (numerator / denominator);
    }
    score
}

/// Precomputed query-side features, built once per query.
pub struct KeywordQuery {
    raw: String,
    keywords: HashSet<String>,
    terms: Vec<String>,
}

impl KeywordQuery {
    pub fn new(query: &str) -> Self {
        Self {
            raw: query.to_string(),
            keywords: extract_keywords(query, 3),
            terms: canonical_tokens(query),
        }
    }

    /// Composite lexical score of a candidate: phrase hit (1.0), weighted
    /// n-gram overlap (x0.8), capped BM25 (x0.5).
    pub fn score(&self, content: &str) -> f64 {
        let mut total = 0.0;
        if exact_phrase_match(&self.raw, content) {
            total += 1.0;
        }
        let content_keywords = extract_keywords(content, 3);
        total += keyword_overlap(&self.keywords, &content_keywords) * 0.8;
        let content_terms = canonical_tokens(content);
        total += (bm25_score(&self.terms, &content_terms) / 10.0).min(1.0) * 0.5;
        total
    }
}
