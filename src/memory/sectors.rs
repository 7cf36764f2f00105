//! Sector taxonomy and content classification.
//!
//! Every memory lives primarily in one of five fixed sectors. Each sector
//! carries a static profile (scoring weight, decay rate, cue patterns) and
//! classification is a pure function of content plus an optional metadata
//! override, so the same input always lands in the same sector.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    Episodic,
    Semantic,
    Procedural,
    Emotional,
    Reflective,
}

pub const ALL_SECTORS: [Sector; 5] = [
    Sector::Episodic,
    Sector::Semantic,
    Sector::Procedural,
    Sector::Emotional,
    Sector::Reflective,
];

impl Sector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Episodic => "episodic",
            Sector::Semantic => "semantic",
            Sector::Procedural => "procedural",
            Sector::Emotional => "emotional",
            Sector::Reflective => "reflective",
        }
    }

    pub fn parse(s: &str) -> Option<Sector> {
        match s {
            "episodic" => Some(Sector::Episodic),
            "semantic" => Some(Sector::Semantic),
            "procedural" => Some(Sector::Procedural),
            "emotional" => Some(Sector::Emotional),
            "reflective" => Some(Sector::Reflective),
            _ => None,
        }
    }

    /// Classification scoring weight for cue matches in this sector.
    pub fn weight(&self) -> f64 {
        match self {
            Sector::Episodic => 1.2,
            Sector::Semantic => 1.0,
            Sector::Procedural => 1.1,
            Sector::Emotional => 1.3,
            Sector::Reflective => 0.8,
        }
    }

    /// Baseline exponential decay rate (per day).
    pub fn decay_lambda(&self) -> f64 {
        match self {
            Sector::Episodic => 0.015,
            Sector::Semantic => 0.005,
            Sector::Procedural => 0.008,
            Sector::Emotional => 0.02,
            Sector::Reflective => 0.001,
        }
    }

    fn patterns(&self) -> &'static [Regex] {
        match self {
            Sector::Episodic => &EPISODIC_PATTERNS,
            Sector::Semantic => &SEMANTIC_PATTERNS,
            Sector::Procedural => &PROCEDURAL_PATTERNS,
            Sector::Emotional => &EMOTIONAL_PATTERNS,
            Sector::Reflective => &REFLECTIVE_PATTERNS,
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! cue_patterns {
    ($name:ident, [$($pat:expr),+ $(,)?]) => {
        static $name: LazyLock<Vec<Regex>> = LazyLock::new(|| {
            vec![$(Regex::new($pat).expect("static cue pattern compiles")),+]
        });
    };
}

cue_patterns!(EPISODIC_PATTERNS, [
    r"(?i)\b(today|yesterday|tomorrow|last (week|month|year)|next (week|month|year))\b",
    r"(?i)\b(remember when|recall|that time|when i|i was|we were)\b",
    r"(?i)\b(went|saw|met|felt|heard|visited|attended|participated)\b",
    r"(?i)\b(at \d{1,2}:\d{2}|on (monday|tuesday|wednesday|thursday|friday|saturday|sunday))\b",
    r"(?i)\b(event|moment|experience|incident|occurrence|happened)\b",
    r"(?i)\bi'?m going to\b",
]);

cue_patterns!(SEMANTIC_PATTERNS, [
    r"(?i)\b(is a|represents|means|stands for|defined as)\b",
    r"(?i)\b(concept|theory|principle|law|hypothesis|theorem|axiom)\b",
    r"(?i)\b(fact|statistic|data|evidence|proof|research|study|report)\b",
    r"(?i)\b(capital|population|distance|weight|height|width|depth)\b",
    r"(?i)\b(history|science|geography|math|physics|biology|chemistry)\b",
    r"(?i)\b(know|understand|learn|read|write|speak)\b",
]);

cue_patterns!(PROCEDURAL_PATTERNS, [
    r"(?i)\b(how to|step by step|guide|tutorial|manual|instructions)\b",
    r"(?i)\b(first|second|then|next|finally|afterwards|lastly)\b",
    r"(?i)\b(install|run|execute|compile|build|deploy|configure|setup)\b",
    r"(?i)\b(click|press|type|enter|select|drag|drop|scroll)\b",
    r"(?i)\b(method|function|class|algorithm|routine|recipe)\b",
    r"(?i)\b(to do|to make|to build|to create)\b",
]);

cue_patterns!(EMOTIONAL_PATTERNS, [
    r"(?i)\b(feel|feeling|felt|emotions?|mood|vibe)\b",
    r"(?i)\b(happy|sad|angry|mad|excited|scared|anxious|nervous|depressed)\b",
    r"(?i)\b(love|hate|like|dislike|adore|detest|enjoy|loathe)\b",
    r"(?i)\b(amazing|terrible|awesome|awful|wonderful|horrible|great|bad)\b",
    r"(?i)\b(frustrated|confused|overwhelmed|stressed|relaxed|calm)\b",
    r"(?i)\b(wow|omg|yay|nooo|ugh|sigh)\b",
    r"!{2,}",
]);

cue_patterns!(REFLECTIVE_PATTERNS, [
    r"(?i)\b(realize|realized|realization|insight|epiphany)\b",
    r"(?i)\b(think|thought|thinking|ponder|contemplate|reflect)\b",
    r"(?i)\b(understand|understood|understanding|grasp|comprehend)\b",
    r"(?i)\b(pattern|trend|connection|link|relationship|correlation)\b",
    r"(?i)\b(lesson|moral|takeaway|conclusion|summary|implication)\b",
    r"(?i)\b(feedback|review|analysis|evaluation|assessment)\b",
    r"(?i)\b(improve|grow|change|adapt|evolve)\b",
]);

/// Cues suggesting the text refers to a point in time. Used by the query
/// pipeline to bias retrieval toward the episodic sector.
static TEMPORAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b(today|yesterday|tomorrow|this week|last week|this morning)\b")
            .expect("static cue pattern compiles"),
        Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("static cue pattern compiles"),
        Regex::new(r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december) \d{1,2}")
            .expect("static cue pattern compiles"),
        Regex::new(r"(?i)\bwhat (did|have) (i|we) (do|done)\b")
            .expect("static cue pattern compiles"),
    ]
});

pub fn has_temporal_marker(text: &str) -> bool {
    TEMPORAL_PATTERNS.iter().any(|p| p.is_match(text))
}

/// Outcome of classifying a piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub primary: Sector,
    /// Secondary sectors that also scored meaningfully, strongest first.
    pub additional: Vec<Sector>,
    pub confidence: f64,
}

/// Classify content into its primary sector plus any additional sectors.
///
/// A `sector` key in the metadata naming a valid sector overrides pattern
/// scoring entirely and is reported at full confidence. Otherwise each
/// sector scores `matches x weight` across its cue patterns; ties resolve
/// in declaration order so the result is deterministic.
pub fn classify(content: &str, metadata: &serde_json::Value) -> Classification {
    if let Some(name) = metadata.get("sector").and_then(|v| v.as_str()) {
        if let Some(sector) = Sector::parse(name) {
            return Classification {
                primary: sector,
                additional: Vec::new(),
                confidence: 1.0,
            };
        }
    }

    let mut scores: Vec<(Sector, f64)> = ALL_SECTORS
        .iter()
        .map(|&sector| {
            let hits: usize = sector
                .patterns()
                .iter()
                .map(|p| p.find_iter(content).count())
                .sum();
            (sector, hits as f64 * sector.weight())
        })
        .collect();

    // Stable sort keeps declaration order on ties.
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (primary, primary_score) = scores[0];
    if primary_score <= 0.0 {
        return Classification {
            primary: Sector::Semantic,
            additional: Vec::new(),
            confidence: 0.2,
        };
    }

    let runner_up = scores[1].1;
    let threshold = (0.3 * primary_score).max(1.0);
    let additional: Vec<Sector> = scores[1..]
        .iter()
        .filter(|(_, score)| *score > 0.0 && *score >= threshold)
        .map(|(sector, _)| *sector)
        .collect();

    let confidence = (primary_score / (primary_score + runner_up + 1.0)).min(1.0);

    Classification {
        primary,
        additional,
        confidence,
    }
}
