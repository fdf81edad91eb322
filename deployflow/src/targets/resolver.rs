//! Late-bound resolution of deployment groups to concrete hosts.

use super::{DeploymentGroup, DeploymentTarget};
use crate::errors::{DeployflowError, NoTargetsMatchedError};
use crate::ports::LiveInventory;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// The hosts a deployment group selected at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    group: String,
    targets: Vec<DeploymentTarget>,
}

impl Resolution {
    /// Returns the group this resolution belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns the matched hosts ordered by instance id.
    #[must_use]
    pub fn targets(&self) -> &[DeploymentTarget] {
        &self.targets
    }

    /// Returns the matched instance ids in order.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.instance_id.as_str()).collect()
    }

    /// Returns the number of matched hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Consumes the resolution, returning the hosts.
    #[must_use]
    pub fn into_targets(self) -> Vec<DeploymentTarget> {
        self.targets
    }

    /// Fails when nothing matched.
    ///
    /// Whether zero hosts is acceptable is the caller's decision, so
    /// [`resolve`] never fails on its own for an empty result.
    pub fn require_any(self) -> Result<Self, NoTargetsMatchedError> {
        if self.targets.is_empty() {
            Err(NoTargetsMatchedError::new(self.group))
        } else {
            Ok(self)
        }
    }
}

/// Selects the hosts of `inventory` that satisfy the group's tag rule.
///
/// Pure: the result depends only on the arguments, and nothing is cached
/// between calls.
///
/// Stricter than plain per-key matching in one case: a rule with no keys
/// would vacuously match every host, and is rejected instead (see
/// [`TagMatchRule::validate`](super::TagMatchRule::validate)).
///
/// # Errors
///
/// Returns a configuration error when the group is invalid, including an
/// empty rule, and an inventory error when two hosts share an instance id.
pub fn resolve(
    group: &DeploymentGroup,
    inventory: &[DeploymentTarget],
) -> Result<Resolution, DeployflowError> {
    group.validate()?;

    let mut matched: BTreeMap<&str, &DeploymentTarget> = BTreeMap::new();
    let mut seen = std::collections::HashSet::with_capacity(inventory.len());
    for target in inventory {
        if !seen.insert(target.instance_id.as_str()) {
            return Err(DeployflowError::Inventory(format!(
                "instance '{}' is listed more than once",
                target.instance_id
            )));
        }
        if group.tag_rule.matches(target) {
            matched.insert(target.instance_id.as_str(), target);
        }
    }

    Ok(Resolution {
        group: group.name.clone(),
        targets: matched.into_values().cloned().collect(),
    })
}

/// Lists the live inventory and resolves the group against it.
///
/// The inventory is listed on every call so hosts added or removed since the
/// previous release are picked up.
#[instrument(skip(group, inventory), fields(group = %group.name))]
pub async fn resolve_live(
    group: &DeploymentGroup,
    inventory: &dyn LiveInventory,
) -> Result<Resolution, DeployflowError> {
    // Fail before touching the inventory.
    group.validate()?;

    let hosts = inventory
        .list()
        .await
        .map_err(|e| DeployflowError::Inventory(format!("{e:#}")))?;
    let resolution = resolve(group, &hosts)?;
    debug!(
        inventory_size = hosts.len(),
        matched = resolution.len(),
        "Resolved deployment group"
    );
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MockLiveInventory;
    use crate::targets::TagMatchRule;
    use pretty_assertions::assert_eq;

    fn python_web_group() -> DeploymentGroup {
        DeploymentGroup::new(
            "PythonAppDeploymentGroup",
            "python-webApp",
            TagMatchRule::new()
                .accept("application-name", ["python-web"])
                .accept("stage", ["prod", "stage"]),
        )
    }

    fn host(id: &str, app: &str, stage: &str) -> DeploymentTarget {
        DeploymentTarget::new(id)
            .with_tag("application-name", app)
            .with_tag("stage", stage)
    }

    fn inventory() -> Vec<DeploymentTarget> {
        vec![
            host("h1", "python-web", "prod"),
            host("h2", "python-web", "dev"),
            host("h3", "other-app", "prod"),
        ]
    }

    #[test]
    fn test_scenario_resolves_only_h1() {
        let resolution = resolve(&python_web_group(), &inventory()).unwrap();
        assert_eq!(resolution.instance_ids(), vec!["h1"]);
        assert_eq!(resolution.group(), "PythonAppDeploymentGroup");
    }

    #[test]
    fn test_adding_non_matching_host_changes_nothing() {
        let group = python_web_group();
        let before = resolve(&group, &inventory()).unwrap();

        let mut grown = inventory();
        grown.push(host("h4", "python-web", "qa"));
        grown.push(DeploymentTarget::new("h5"));
        let after = resolve(&group, &grown).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_removing_matching_host_shrinks_by_that_host() {
        let group = python_web_group();
        let mut hosts = inventory();
        hosts.push(host("h6", "python-web", "stage"));
        let before = resolve(&group, &hosts).unwrap();
        assert_eq!(before.instance_ids(), vec!["h1", "h6"]);

        hosts.retain(|h| h.instance_id != "h6");
        let after = resolve(&group, &hosts).unwrap();
        assert_eq!(after.instance_ids(), vec!["h1"]);
        assert_eq!(before.len() - after.len(), 1);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let group = python_web_group();
        let hosts = inventory();
        assert_eq!(resolve(&group, &hosts).unwrap(), resolve(&group, &hosts).unwrap());
    }

    #[test]
    fn test_result_order_is_independent_of_inventory_order() {
        let group = python_web_group();
        let mut hosts = vec![host("b", "python-web", "prod"), host("a", "python-web", "stage")];
        let forward = resolve(&group, &hosts).unwrap();
        hosts.reverse();
        assert_eq!(forward, resolve(&group, &hosts).unwrap());
        assert_eq!(forward.instance_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_value_set_is_configuration_error() {
        let group = DeploymentGroup::new(
            "broken",
            "python-webApp",
            TagMatchRule::new()
                .accept("application-name", ["python-web"])
                .accept("stage", Vec::<String>::new()),
        );
        let err = resolve(&group, &inventory()).unwrap_err();
        assert!(matches!(err, DeployflowError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_instance_is_inventory_error() {
        let hosts = vec![host("h1", "python-web", "prod"), host("h1", "python-web", "prod")];
        let err = resolve(&python_web_group(), &hosts).unwrap_err();
        assert!(matches!(err, DeployflowError::Inventory(_)));
    }

    #[test]
    fn test_require_any() {
        let group = python_web_group();
        let empty = resolve(&group, &[]).unwrap();
        assert!(empty.is_empty());
        let err = empty.require_any().unwrap_err();
        assert_eq!(err.group, "PythonAppDeploymentGroup");

        assert!(resolve(&group, &inventory()).unwrap().require_any().is_ok());
    }

    #[tokio::test]
    async fn test_resolve_live_lists_inventory_every_call() {
        let mut inventory = MockLiveInventory::new();
        let mut calls = 0;
        inventory.expect_list().times(2).returning(move || {
            calls += 1;
            let mut hosts = vec![host("h1", "python-web", "prod")];
            if calls > 1 {
                hosts.push(host("h7", "python-web", "prod"));
            }
            Ok(hosts)
        });

        let group = python_web_group();
        let first = resolve_live(&group, &inventory).await.unwrap();
        let second = resolve_live(&group, &inventory).await.unwrap();
        assert_eq!(first.instance_ids(), vec!["h1"]);
        assert_eq!(second.instance_ids(), vec!["h1", "h7"]);
    }

    #[test]
    fn test_empty_rule_does_not_select_every_host() {
        let group = DeploymentGroup::new("g", "python-webApp", TagMatchRule::new());
        let inventory = vec![DeploymentTarget::new("h1").with_tag("stage", "prod")];

        let err = resolve(&group, &inventory).unwrap_err();
        assert!(matches!(err, DeployflowError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_resolve_live_validates_before_listing() {
        let mut inventory = MockLiveInventory::new();
        inventory.expect_list().times(0);

        let group = DeploymentGroup::new("g", "app", TagMatchRule::new());
        assert!(resolve_live(&group, &inventory).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_live_surfaces_inventory_failure() {
        let mut inventory = MockLiveInventory::new();
        inventory
            .expect_list()
            .returning(|| Err(anyhow::anyhow!("describe-instances throttled")));

        let err = resolve_live(&python_web_group(), &inventory).await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
    }
}
