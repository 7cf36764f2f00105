//! Text canonicalization and extractive summarization.
//!
//! Tokens are lowercased, lightly stemmed, and folded through a small
//! synonym table so "preferences" and "likes" land on the same canonical
//! token. The summarizer is deliberately cheap: sentence scoring by
//! keyword density, used when decay reduces a memory to its essence.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

const SYNONYM_GROUPS: &[&[&str]] = &[
    &["prefer", "like", "love", "enjoy", "favor"],
    &["theme", "mode", "style", "layout"],
    &["meeting", "meet", "session", "call", "sync"],
    &["dark", "night", "black"],
    &["light", "bright", "day"],
    &["user", "person", "people", "customer"],
    &["task", "todo", "job"],
    &["note", "memo", "reminder"],
    &["time", "schedule", "when", "date"],
    &["project", "initiative", "plan"],
    &["issue", "problem", "bug"],
    &["document", "doc", "file"],
    &["question", "query", "ask"],
];

static CANONICAL_MAP: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for group in SYNONYM_GROUPS {
        let canonical = group[0];
        for word in *group {
            map.insert(*word, canonical);
        }
    }
    map
});

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "to", "of", "and", "or", "in", "on", "for", "with", "at", "by",
        "is", "it", "be", "as", "are", "was", "were", "this", "that", "these", "those",
        "from", "but", "if", "then", "so", "than", "too", "very", "can", "will", "just",
        "not", "i", "we", "you", "my", "our",
    ]
    .into_iter()
    .collect()
});

/// Split into lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Suffix-strip stemmer. Keeps stems of at least three characters.
fn stem(token: &str) -> String {
    if token.len() <= 3 {
        return token.to_string();
    }
    let rules: [(&str, &str); 5] = [
        ("ies", "y"),
        ("ing", ""),
        ("ers", "er"),
        ("ed", ""),
        ("s", ""),
    ];
    for (suffix, replacement) in rules {
        if let Some(base) = token.strip_suffix(suffix) {
            let stemmed = format!("{base}{replacement}");
            if stemmed.len() >= 3 {
                return stemmed;
            }
        }
    }
    token.to_string()
}

/// Canonical form of a single token: synonym fold, else stem, else itself.
pub fn canonicalize_token(token: &str) -> String {
    let lower = token.to_ascii_lowercase();
    if let Some(canonical) = CANONICAL_MAP.get(lower.as_str()) {
        return (*canonical).to_string();
    }
    let stemmed = stem(&lower);
    match CANONICAL_MAP.get(stemmed.as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => stemmed,
    }
}

/// Canonical tokens of length > 1, in text order (repeats kept).
pub fn canonical_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .iter()
        .map(|t| canonicalize_token(t))
        .filter(|t| t.len() > 1)
        .collect()
}

pub fn canonical_token_set(text: &str) -> HashSet<String> {
    canonical_tokens(text).into_iter().collect()
}

/// Fraction of query tokens present in the memory tokens, in [0, 1].
pub fn token_overlap(query: &HashSet<String>, memory: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let shared = query.intersection(memory).count();
    shared as f64 / query.len() as f64
}

/// FTS5 MATCH expression from free text: unique canonical tokens, each
/// quoted so user input cannot inject operators, OR-joined. Empty when
/// the text has no usable tokens.
pub fn build_fts_query(text: &str) -> String {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for token in canonical_tokens(text) {
        if seen.insert(token.clone()) {
            terms.push(format!("\"{token}\""));
        }
    }
    terms.join(" OR ")
}

/// Most frequent non-stopword terms, frequency then first-seen order.
pub fn top_keywords(text: &str, k: usize) -> Vec<String> {
    let words: Vec<String> = tokenize(text)
        .into_iter()
        .filter(|w| !STOPWORDS.contains(w.as_str()))
        .collect();
    if words.is_empty() {
        return Vec::new();
    }
    let mut freq: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, word) in words.iter().enumerate() {
        let entry = freq.entry(word.as_str()).or_insert((0, pos));
        entry.0 += 1;
    }
    let mut ranked: Vec<(&str, usize, usize)> =
        freq.into_iter().map(|(w, (n, pos))| (w, n, pos)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(k).map(|(w, _, _)| w.to_string()).collect()
}

/// Extractive summary: keep the highest-density third of the sentences
/// (at most three), in original order.
pub fn summarize_quick(text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return text.to_string();
    }
    let score = |s: &str| -> usize {
        let punct = s.chars().filter(|c| matches!(c, ',' | ';' | ':')).count().min(3);
        top_keywords(s, 6).len() + punct
    };
    let mut scored: Vec<(usize, &str, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| (i, *s, score(s)))
        .collect();
    scored.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
    let keep = sentences.len().div_ceil(3).min(3);
    let mut top: Vec<(usize, &str)> = scored.into_iter().take(keep).map(|(i, s, _)| (i, s)).collect();
    top.sort_by_key(|(i, _)| *i);
    let joined = top.iter().map(|(_, s)| *s).collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        sentences[0].to_string()
    } else {
        joined
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let slice = text[start..=i].trim();
            if !slice.is_empty() {
                sentences.push(slice);
            }
            start = i + 1;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Reduce content toward its essence as the decay factor drops.
///
/// Above 0.8 the text is only truncated; mid-range it is summarized;
/// below 0.4 only the top keywords survive.
pub fn compress_summary(text: &str, factor: f64) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if factor > 0.8 {
        truncate_chars(trimmed, 200)
    } else if factor > 0.4 {
        truncate_chars(&summarize_quick(trimmed), 80)
    } else {
        top_keywords(trimmed, 5).join(" ")
    }
}

/// Keyword-only rendition for fingerprinted (coldest) memories.
pub fn keyword_summary(text: &str) -> String {
    top_keywords(text, 3).join(" ")
}

fn truncate_chars(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let cut: String = s.chars().take(n.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}
