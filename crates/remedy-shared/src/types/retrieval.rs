//! # Retrieval Contexts
//!
//! Result of querying the pattern index for a batch. The match list is what
//! gets serialized into the heavy-worker handoff (`QA_RAG_JSON`), so it is
//! kept wire-shaped: an ordered array of matches, possibly empty.

use serde::{Deserialize, Serialize};

/// Where a pattern entry came from in the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternSource {
    Commit,
    CodeChunk,
}

/// One item in the retrieval corpus. The payload is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub id: String,
    pub source_kind: PatternSource,
    pub keywords: Vec<String>,
    pub payload: serde_json::Value,
}

/// A corpus entry paired with its similarity to the query, in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub entry: PatternEntry,
    pub similarity: f64,
}

/// Ordered retrieval result for a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrievalContext {
    pub matches: Vec<PatternMatch>,
}

impl RetrievalContext {
    pub fn new(matches: Vec<PatternMatch>) -> Self {
        Self { matches }
    }

    /// Empty context: no matches, confidence 0
    pub fn empty() -> Self {
        Self::default()
    }

    /// Aggregate confidence: max similarity over matches, 0 when empty
    pub fn confidence(&self) -> f64 {
        self.matches
            .iter()
            .map(|m| m.similarity)
            .fold(0.0, f64::max)
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str) -> PatternEntry {
        PatternEntry {
            id: id.to_string(),
            source_kind: PatternSource::Commit,
            keywords: vec!["import".to_string()],
            payload: json!({"message": "fix imports"}),
        }
    }

    #[test]
    fn test_empty_context_confidence_zero() {
        let ctx = RetrievalContext::empty();
        assert_eq!(ctx.confidence(), 0.0);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_confidence_is_max_similarity() {
        let ctx = RetrievalContext::new(vec![
            PatternMatch {
                entry: entry("a"),
                similarity: 0.4,
            },
            PatternMatch {
                entry: entry("b"),
                similarity: 0.85,
            },
            PatternMatch {
                entry: entry("c"),
                similarity: 0.2,
            },
        ]);
        assert!((ctx.confidence() - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serializes_as_bare_array() {
        let ctx = RetrievalContext::empty();
        assert_eq!(serde_json::to_string(&ctx).unwrap(), "[]");

        let ctx = RetrievalContext::new(vec![PatternMatch {
            entry: entry("a"),
            similarity: 0.5,
        }]);
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.starts_with('['));
        let parsed: RetrievalContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}
