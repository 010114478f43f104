//! # Pattern Index
//!
//! Read-only retrieval facade over the corpus of past fixes. Loaded eagerly
//! at startup and held in memory; the corpus is small enough (≤ ~1e4
//! entries) that a linear scan per query is acceptable.
//!
//! ## Similarity
//!
//! v1 similarity is keyword overlap: query text is tokenized into lowercase
//! identifier-like tokens and compared to each entry's pre-tokenized keyword
//! set by Jaccard overlap. The interface is shaped so a dense-embedding
//! backend is a drop-in replacement: callers only see ranked
//! [`PatternMatch`]es and an aggregate confidence.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::{debug, info, warn};

use remedy_shared::types::batch::Batch;
use remedy_shared::types::retrieval::{
    PatternEntry, PatternMatch, PatternSource, RetrievalContext,
};
use remedy_shared::{RemedyError, RemedyResult};

/// Tokens shorter than this carry no signal
const MIN_TOKEN_LEN: usize = 3;

/// Small stop set dropped during tokenization
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "from", "this", "that", "are", "was", "has", "have", "not",
        "into", "when", "use", "using",
    ]
    .into_iter()
    .collect()
});

/// Corpus artifact: one past fix commit
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct CommitRecord {
    id: String,
    message: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Corpus artifact: one code-pattern chunk
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct ChunkRecord {
    id: String,
    file: String,
    snippet: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Corpus artifact: build metadata
#[derive(Debug, Clone, Deserialize)]
struct CorpusMetadata {
    version: String,
    #[serde(default)]
    #[allow(dead_code)]
    built_at: Option<String>,
}

/// Aggregate counts for the observability surface
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IndexStats {
    pub commit_count: usize,
    pub chunk_count: usize,
    pub version: Option<String>,
}

#[derive(Debug)]
struct IndexedEntry {
    entry: PatternEntry,
    keywords: HashSet<String>,
}

/// In-memory retrieval index, immutable after load
#[derive(Debug)]
pub struct PatternIndex {
    entries: Vec<IndexedEntry>,
    commit_count: usize,
    chunk_count: usize,
    version: Option<String>,
}

/// Tokenize free text into the lowercase identifier-like token set used for
/// both indexing and querying
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(t.as_str()))
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    if intersection == 0 {
        return 0.0;
    }
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

impl PatternIndex {
    /// An index with no corpus: every query returns confidence 0
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            commit_count: 0,
            chunk_count: 0,
            version: None,
        }
    }

    /// Load the corpus from its directory (startup only).
    ///
    /// An absent directory yields an empty index; the daemon must run
    /// without a corpus. A present-but-corrupt artifact is a startup-fatal
    /// error; silently degrading retrieval would skew every routing
    /// decision.
    pub async fn load(dir: &Path) -> RemedyResult<Self> {
        if !dir.is_dir() {
            warn!(
                corpus_dir = %dir.display(),
                "Pattern corpus directory absent, starting with empty index"
            );
            return Ok(Self::empty());
        }

        let commits: Vec<CommitRecord> = read_artifact(&dir.join("git_commits.json")).await?;
        let chunks: Vec<ChunkRecord> = read_artifact(&dir.join("chunks.json")).await?;
        let metadata: Option<CorpusMetadata> =
            read_optional_artifact(&dir.join("metadata.json")).await?;

        let commit_count = commits.len();
        let chunk_count = chunks.len();
        let mut entries = Vec::with_capacity(commit_count + chunk_count);

        for record in commits {
            let keywords = tokenize(&record.keywords.join(" "));
            let payload = serde_json::to_value(&record).map_err(|e| {
                RemedyError::IndexError(format!("commit record {} not serializable: {e}", record.id))
            })?;
            entries.push(IndexedEntry {
                entry: PatternEntry {
                    id: record.id,
                    source_kind: PatternSource::Commit,
                    keywords: record.keywords,
                    payload,
                },
                keywords,
            });
        }

        for record in chunks {
            let keywords = tokenize(&record.keywords.join(" "));
            let payload = serde_json::to_value(&record).map_err(|e| {
                RemedyError::IndexError(format!("chunk record {} not serializable: {e}", record.id))
            })?;
            entries.push(IndexedEntry {
                entry: PatternEntry {
                    id: record.id,
                    source_kind: PatternSource::CodeChunk,
                    keywords: record.keywords,
                    payload,
                },
                keywords,
            });
        }

        let version = metadata.map(|m| m.version);
        info!(
            commit_count = commit_count,
            chunk_count = chunk_count,
            version = ?version,
            "Pattern index loaded"
        );

        Ok(Self {
            entries,
            commit_count,
            chunk_count,
            version,
        })
    }

    /// Top-k entries by keyword-overlap similarity, ties broken by stable
    /// entry order
    pub fn query(&self, text: &str, top_k: usize) -> Vec<PatternMatch> {
        let query_tokens = tokenize(text);
        if query_tokens.is_empty() || self.entries.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<PatternMatch> = self
            .entries
            .iter()
            .filter_map(|indexed| {
                let similarity = jaccard(&query_tokens, &indexed.keywords);
                (similarity > 0.0).then(|| PatternMatch {
                    entry: indexed.entry.clone(),
                    similarity,
                })
            })
            .collect();

        // Stable sort keeps corpus order for equal similarities
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);

        debug!(
            query_tokens = query_tokens.len(),
            matches = scored.len(),
            "Pattern index query"
        );
        scored
    }

    /// Build a retrieval context for a batch from its kinds, file names, and
    /// details
    pub fn retrieve_for_batch(&self, batch: &Batch, top_k: usize) -> RetrievalContext {
        let mut text = String::new();
        for violation in &batch.violations {
            text.push_str(violation.kind.group_key());
            text.push(' ');
            if let Some(name) = violation.file_path.file_stem().and_then(|s| s.to_str()) {
                text.push_str(name);
                text.push(' ');
            }
            if let Some(detail) = &violation.detail {
                text.push_str(detail);
                text.push(' ');
            }
        }
        RetrievalContext::new(self.query(&text, top_k))
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            commit_count: self.commit_count,
            chunk_count: self.chunk_count,
            version: self.version.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read a required artifact; a missing file reads as an empty list so a
/// partially built corpus still loads, but malformed JSON is fatal.
async fn read_artifact<T: serde::de::DeserializeOwned>(path: &Path) -> RemedyResult<Vec<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
            RemedyError::IndexError(format!("corrupt corpus artifact {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(artifact = %path.display(), "Corpus artifact missing, treating as empty");
            Ok(Vec::new())
        }
        Err(e) => Err(RemedyError::IndexError(format!(
            "failed to read corpus artifact {}: {e}",
            path.display()
        ))),
    }
}

async fn read_optional_artifact<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> RemedyResult<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            RemedyError::IndexError(format!("corrupt corpus artifact {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RemedyError::IndexError(format!(
            "failed to read corpus artifact {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use remedy_shared::types::batch::BatchStrategy;
    use remedy_shared::types::violation::{Violation, ViolationKind};
    use uuid::Uuid;

    fn write_corpus(dir: &Path, commits: &str, chunks: &str, metadata: &str) {
        std::fs::write(dir.join("git_commits.json"), commits).unwrap();
        std::fs::write(dir.join("chunks.json"), chunks).unwrap();
        std::fs::write(dir.join("metadata.json"), metadata).unwrap();
    }

    fn sample_corpus(dir: &Path) {
        write_corpus(
            dir,
            r#"[
                {"id": "c1", "message": "fix unused imports", "files": ["a.py"],
                 "keywords": ["unused-import", "cleanup", "imports"]},
                {"id": "c2", "message": "wrap long lines", "files": ["b.py"],
                 "keywords": ["line-length", "formatting", "style"]}
            ]"#,
            r#"[
                {"id": "k1", "file": "security/auth.py", "snippet": "sanitize(input)",
                 "keywords": ["security", "sanitize", "injection"]}
            ]"#,
            r#"{"version": "2026-07-01", "built_at": "2026-07-01T00:00:00Z"}"#,
        );
    }

    #[test]
    fn test_tokenize_drops_short_and_stop_words() {
        let tokens = tokenize("Fix the unused-import in a.py for cleanup");
        assert!(tokens.contains("unused"));
        assert!(tokens.contains("import"));
        assert!(tokens.contains("cleanup"));
        assert!(!tokens.contains("the"));
        assert!(!tokens.contains("for"));
        assert!(!tokens.contains("a"));
        assert!(!tokens.contains("in"));
    }

    #[test]
    fn test_jaccard_overlap() {
        let a: HashSet<String> = ["one", "two", "three"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["two", "three", "four"].iter().map(|s| s.to_string()).collect();
        // 2 shared / 4 total
        assert!((jaccard(&a, &b) - 0.5).abs() < f64::EPSILON);
        assert_eq!(jaccard(&a, &HashSet::new()), 0.0);
    }

    #[tokio::test]
    async fn test_load_missing_directory_is_empty() {
        let index = PatternIndex::load(Path::new("/nonexistent/corpus")).await.unwrap();
        assert!(index.is_empty());
        assert!(index.query("anything", 5).is_empty());
        assert_eq!(index.stats().version, None);
    }

    #[tokio::test]
    async fn test_load_and_query() {
        let dir = tempfile::tempdir().unwrap();
        sample_corpus(dir.path());

        let index = PatternIndex::load(dir.path()).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(
            index.stats(),
            IndexStats {
                commit_count: 2,
                chunk_count: 1,
                version: Some("2026-07-01".to_string()),
            }
        );

        let matches = index.query("remove unused imports", 5);
        assert!(!matches.is_empty());
        assert_eq!(matches[0].entry.id, "c1");
        assert!(matches[0].similarity > 0.0);
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        sample_corpus(dir.path());
        let index = PatternIndex::load(dir.path()).await.unwrap();

        let matches = index.query("security sanitize injection", 5);
        assert_eq!(matches[0].entry.id, "k1");
        assert_eq!(matches[0].entry.source_kind, PatternSource::CodeChunk);
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let dir = tempfile::tempdir().unwrap();
        sample_corpus(dir.path());
        let index = PatternIndex::load(dir.path()).await.unwrap();

        let matches = index.query("imports formatting security sanitize line style", 1);
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), "not json at all", "[]", "{\"version\": \"v\"}");

        let result = PatternIndex::load(dir.path()).await;
        assert!(matches!(result, Err(RemedyError::IndexError(_))));
    }

    #[tokio::test]
    async fn test_missing_artifact_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("git_commits.json"),
            r#"[{"id": "c1", "message": "m", "files": [], "keywords": ["alpha"]}]"#,
        )
        .unwrap();

        let index = PatternIndex::load(dir.path()).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.stats().chunk_count, 0);
    }

    #[tokio::test]
    async fn test_retrieve_for_batch() {
        let dir = tempfile::tempdir().unwrap();
        sample_corpus(dir.path());
        let index = PatternIndex::load(dir.path()).await.unwrap();

        let batch = Batch::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            BatchStrategy::ByType,
            vec![
                Violation::new("v1", ViolationKind::UnusedImport, PathBuf::from("src/api.py"), 3)
                    .with_detail("unused import of os"),
            ],
        );

        let ctx = index.retrieve_for_batch(&batch, 3);
        assert!(!ctx.is_empty());
        assert!(ctx.confidence() > 0.0);
        assert_eq!(ctx.matches[0].entry.id, "c1");
    }

    #[test]
    fn test_empty_index_retrieval_confidence_zero() {
        let index = PatternIndex::empty();
        let batch = Batch::new(Uuid::now_v7(), Uuid::now_v7(), BatchStrategy::Mixed, vec![]);
        let ctx = index.retrieve_for_batch(&batch, 3);
        assert_eq!(ctx.confidence(), 0.0);
    }
}
