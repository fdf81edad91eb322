//! Immutable, content-addressed build artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Content hash identifying an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Hashes the given content into an identifier.
    #[must_use]
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first twelve hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A versioned build output passed between stages.
///
/// Artifacts have no setters: once built they are shared behind an `Arc`
/// and only ever read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    id: ArtifactId,
    produced_at: DateTime<Utc>,
    source_revision: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl Artifact {
    /// Creates an artifact whose identity is the SHA-256 of `content`.
    #[must_use]
    pub fn from_content(source_revision: impl Into<String>, content: &[u8]) -> Self {
        Self {
            id: ArtifactId::from_content(content),
            produced_at: Utc::now(),
            source_revision: source_revision.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attaches a metadata entry. Only usable while the artifact is still
    /// owned by its producer.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the content identifier.
    #[must_use]
    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    /// Returns when the artifact was produced.
    #[must_use]
    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }

    /// Returns the source revision the artifact was built from.
    #[must_use]
    pub fn source_revision(&self) -> &str {
        &self.source_revision
    }

    /// Returns a metadata value.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
