//! Host tags and tag-match rules.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tags attached to a host: each key maps to a set of values.
pub type TagSet = BTreeMap<String, BTreeSet<String>>;

/// A stable host plus its current tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Stable instance identifier.
    pub instance_id: String,
    /// Key to set-of-values tags.
    #[serde(default)]
    pub tags: TagSet,
    /// Reachable address of the host, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
}

impl DeploymentTarget {
    /// Creates a target with no tags.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            tags: TagSet::new(),
            public_address: None,
        }
    }

    /// Adds one tag value; repeated keys accumulate values.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(key.into()).or_default().insert(value.into());
        self
    }

    /// Sets the public address.
    #[must_use]
    pub fn with_public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    /// Returns the values of a tag key.
    #[must_use]
    pub fn tag_values(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.tags.get(key)
    }
}

/// Mapping from tag key to the accepted set of values.
///
/// A target matches when, for every key in the rule, at least one of its
/// values for that key is accepted. Keys absent from the rule are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagMatchRule {
    accepted: BTreeMap<String, BTreeSet<String>>,
}

impl TagMatchRule {
    /// Creates an empty rule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts the given values for `key`, adding to any already accepted.
    #[must_use]
    pub fn accept<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.accepted
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Returns the accepted values per key.
    #[must_use]
    pub fn accepted(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.accepted
    }

    /// Rejects rules that could never match, or would match every host.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty rule, a blank key, or a key with no
    /// accepted values.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.accepted.is_empty() {
            return Err(ConfigurationError::new(
                "tag match rule has no keys and would select every host",
            ));
        }
        for (key, values) in &self.accepted {
            if key.trim().is_empty() {
                return Err(ConfigurationError::new("tag match rule contains a blank key"));
            }
            if values.is_empty() {
                return Err(ConfigurationError::new(format!(
                    "tag key '{key}' has no accepted values and can never match"
                ))
                .with_context_entry("key", key.clone()));
            }
        }
        Ok(())
    }

    /// Returns true if the target's tags satisfy every key of the rule.
    ///
    /// Call [`validate`](Self::validate) first; this does not re-check.
    #[must_use]
    pub fn matches(&self, target: &DeploymentTarget) -> bool {
        self.accepted.iter().all(|(key, accepted)| {
            target
                .tag_values(key)
                .is_some_and(|values| !values.is_disjoint(accepted))
        })
    }
}
