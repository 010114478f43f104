//! # Violations
//!
//! A [`Violation`] is a single code-quality issue reported by an external
//! detector. Violations are immutable once observed; the orchestrator only
//! groups, scores, and routes them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Severity reported by the detector, when available
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Broad family a violation kind belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KindFamily {
    /// Mechanical style issues addressable by formatters
    Style,
    /// Policy rules addressable by a declarative fix
    Configuration,
    /// Cross-file or semantic issues
    Architectural,
}

/// Closed enumeration of violation kinds the orchestrator understands.
///
/// The intrinsic cost table drives both per-violation complexity scoring and
/// the by-complexity batching split. Kinds outside this enumeration
/// deserialize to [`ViolationKind::Unknown`] and are costed conservatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    LineLength,
    UnusedImport,
    Formatting,
    ConfigPolicy,
    LoggingConvention,
    CrossFileImport,
    ConfigMigration,
    Security,
    #[serde(other)]
    Unknown,
}

impl ViolationKind {
    /// Intrinsic cost of fixing one violation of this kind, in [0, 1].
    ///
    /// Unknown kinds cost 0.50: treated like architectural work until a
    /// detector tells us otherwise.
    pub fn intrinsic_cost(&self) -> f64 {
        match self {
            Self::LineLength | Self::UnusedImport | Self::Formatting => 0.05,
            Self::ConfigPolicy => 0.15,
            Self::LoggingConvention => 0.25,
            Self::CrossFileImport => 0.50,
            Self::ConfigMigration => 0.60,
            Self::Security => 0.80,
            Self::Unknown => 0.50,
        }
    }

    /// Family grouping used by the batch optimizer and dependency heuristic
    pub fn family(&self) -> KindFamily {
        match self {
            Self::LineLength | Self::UnusedImport | Self::Formatting | Self::LoggingConvention => {
                KindFamily::Style
            }
            Self::ConfigPolicy | Self::ConfigMigration => KindFamily::Configuration,
            Self::CrossFileImport | Self::Security | Self::Unknown => KindFamily::Architectural,
        }
    }

    /// Whether this kind is in the import/dependency family
    pub fn is_import_family(&self) -> bool {
        matches!(self, Self::CrossFileImport)
    }

    /// Stable grouping key for by-type batching (lexicographic ordering)
    pub fn group_key(&self) -> &'static str {
        match self {
            Self::LineLength => "line-length",
            Self::UnusedImport => "unused-import",
            Self::Formatting => "formatting",
            Self::ConfigPolicy => "config-policy",
            Self::LoggingConvention => "logging-convention",
            Self::CrossFileImport => "cross-file-import",
            Self::ConfigMigration => "config-migration",
            Self::Security => "security",
            Self::Unknown => "unknown",
        }
    }
}

/// A single detected code-quality issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable identifier assigned by the detector
    pub id: String,
    pub kind: ViolationKind,
    pub file_path: PathBuf,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Violation {
    /// Create a violation with the required fields
    pub fn new(
        id: impl Into<String>,
        kind: ViolationKind,
        file_path: impl Into<PathBuf>,
        line: u32,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            file_path: file_path.into(),
            line,
            severity: None,
            detail: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether the detector marked this violation critical
    pub fn is_critical(&self) -> bool {
        self.severity == Some(Severity::Critical)
    }

    /// Parent directory of the violating file, used by the dependency heuristic
    pub fn directory(&self) -> &Path {
        self.file_path.parent().unwrap_or_else(|| Path::new(""))
    }
}
