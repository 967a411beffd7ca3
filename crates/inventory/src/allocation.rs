//! Allocation rules
//!
//! Pure functions over a catalog and a ledger. Nothing here touches the
//! document store; `engine` wraps these in read-modify-write cycles.
//!
//! Invariant: a node name appears in at most one group of one cloud across
//! the whole ledger. Every mutation goes through `reserve`, which only ever
//! hands out nodes from `free_nodes`.

use crate::error::InventoryError;
use crate::models::{Allocations, CloudAllocation, Resources};
use crds::NodeGroup;
use std::collections::BTreeMap;

/// Free nodes of `profile`, in node-name order.
///
/// Never fails: an exhausted or unknown profile yields an empty list.
pub fn free_nodes(resources: &Resources, allocations: &Allocations, profile: &str) -> Vec<String> {
    let in_use = allocations.in_use();
    resources
        .nodes
        .iter()
        .filter(|(name, node)| node.hwprofile == profile && !in_use.contains(name.as_str()))
        .map(|(name, _)| name.clone())
        .collect()
}

/// Checks that every group of a request could be satisfied right now.
///
/// Sizes of groups sharing a profile are summed, so two groups that each fit
/// on their own but not together are rejected. Fails on the first profile
/// (in request order) that falls short.
pub fn feasibility_check(
    resources: &Resources,
    allocations: &Allocations,
    groups: &[NodeGroup],
) -> Result<(), InventoryError> {
    let mut requested: Vec<(&str, usize)> = Vec::new();
    for group in groups {
        match requested.iter_mut().find(|(profile, _)| *profile == group.hw_profile) {
            Some((_, total)) => *total += group.size,
            None => requested.push((group.hw_profile.as_str(), group.size)),
        }
    }

    for (profile, requested) in requested {
        let available = free_nodes(resources, allocations, profile).len();
        if requested > available {
            return Err(InventoryError::InsufficientResources {
                profile: profile.to_string(),
                requested,
                available,
            });
        }
    }

    Ok(())
}

/// Reserves at most one node for `group` of `cloud_id` in the in-memory ledger.
///
/// Returns `Ok(None)` when the group already holds `size` nodes; in that case
/// the ledger is left untouched. Otherwise takes the first free node of the
/// group's profile.
pub fn reserve(
    resources: &Resources,
    allocations: &mut Allocations,
    cloud_id: &str,
    group: &NodeGroup,
) -> Result<Option<String>, InventoryError> {
    let assigned = allocations
        .find(cloud_id)
        .map_or(0, |cloud| cloud.assigned_count(&group.name));
    if assigned >= group.size {
        return Ok(None);
    }

    let free = free_nodes(resources, allocations, &group.hw_profile);
    let node_name = free
        .into_iter()
        .next()
        .ok_or_else(|| InventoryError::InsufficientResources {
            profile: group.hw_profile.clone(),
            requested: group.size - assigned,
            available: 0,
        })?;

    if !resources.nodes.contains_key(&node_name) {
        return Err(InventoryError::NotFound(format!("no inventory record for node {}", node_name)));
    }

    allocations
        .find_or_insert(cloud_id)
        .nodegroups
        .entry(group.name.clone())
        .or_default()
        .push(node_name.clone());

    Ok(Some(node_name))
}

/// Whether every group of the request holds at least its requested size.
///
/// False when the cloud has no ledger entry yet.
pub fn is_fully_allocated(allocations: &Allocations, cloud_id: &str, groups: &[NodeGroup]) -> bool {
    match allocations.find(cloud_id) {
        Some(cloud) => groups
            .iter()
            .all(|group| cloud.assigned_count(&group.name) >= group.size),
        None => false,
    }
}

/// Nodes assigned to the request's groups, sorted.
pub fn assigned_nodes(allocations: &Allocations, cloud_id: &str, groups: &[NodeGroup]) -> Vec<String> {
    let Some(cloud) = allocations.find(cloud_id) else {
        return Vec::new();
    };

    let mut nodes: Vec<String> = groups
        .iter()
        .filter_map(|group| cloud.nodegroups.get(&group.name))
        .flatten()
        .cloned()
        .collect();
    nodes.sort();
    nodes
}

/// Removes a cloud's ledger entry, returning it if there was one.
pub fn remove_cloud(allocations: &mut Allocations, cloud_id: &str) -> Option<CloudAllocation> {
    let index = allocations.clouds.iter().position(|c| c.cloud_id == cloud_id)?;
    Some(allocations.clouds.remove(index))
}

/// Number of free nodes per profile, for logging shortfalls.
pub fn free_by_profile(resources: &Resources, allocations: &Allocations) -> BTreeMap<String, usize> {
    let in_use = allocations.in_use();
    let mut counts: BTreeMap<String, usize> = resources
        .hwprofiles
        .iter()
        .map(|p| (p.clone(), 0))
        .collect();
    for (name, node) in &resources.nodes {
        if !in_use.contains(name.as_str()) {
            *counts.entry(node.hwprofile.clone()).or_default() += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeInfo;

    fn catalog(nodes: &[(&str, &str)]) -> Resources {
        let mut resources = Resources::default();
        for (name, profile) in nodes {
            if !resources.hwprofiles.iter().any(|p| p == profile) {
                resources.hwprofiles.push(profile.to_string());
            }
            resources.nodes.insert(
                name.to_string(),
                NodeInfo {
                    hwprofile: profile.to_string(),
                    ..Default::default()
                },
            );
        }
        resources
    }

    fn group(name: &str, profile: &str, size: usize) -> NodeGroup {
        NodeGroup {
            name: name.to_string(),
            hw_profile: profile.to_string(),
            size,
        }
    }

    #[test]
    fn test_free_nodes_filters_profile_and_ledger() {
        let resources = catalog(&[("n1", "P"), ("n0", "P"), ("m0", "Q")]);
        let mut allocations = Allocations::default();
        assert_eq!(free_nodes(&resources, &allocations, "P"), vec!["n0", "n1"]);

        allocations
            .find_or_insert("other")
            .nodegroups
            .insert("g".to_string(), vec!["n0".to_string()]);
        assert_eq!(free_nodes(&resources, &allocations, "P"), vec!["n1"]);
        assert!(free_nodes(&resources, &allocations, "missing").is_empty());
    }

    #[test]
    fn test_two_allocations_fill_group() {
        let resources = catalog(&[("n0", "P"), ("n1", "P")]);
        let mut allocations = Allocations::default();
        let g = group("controller", "P", 2);

        assert_eq!(reserve(&resources, &mut allocations, "cloud", &g).unwrap().as_deref(), Some("n0"));
        assert!(!is_fully_allocated(&allocations, "cloud", std::slice::from_ref(&g)));
        assert_eq!(reserve(&resources, &mut allocations, "cloud", &g).unwrap().as_deref(), Some("n1"));

        assert_eq!(allocations.find("cloud").unwrap().nodegroups["controller"], vec!["n0", "n1"]);
        assert!(is_fully_allocated(&allocations, "cloud", &[g]));
    }

    #[test]
    fn test_reserve_on_full_group_is_noop() {
        let resources = catalog(&[("n0", "P"), ("n1", "P")]);
        let mut allocations = Allocations::default();
        let g = group("controller", "P", 1);
        reserve(&resources, &mut allocations, "cloud", &g).unwrap();
        let before = allocations.clone();

        assert_eq!(reserve(&resources, &mut allocations, "cloud", &g).unwrap(), None);
        assert_eq!(allocations, before);
    }

    #[test]
    fn test_reserve_zero_size_does_not_create_entry() {
        let resources = catalog(&[("n0", "P")]);
        let mut allocations = Allocations::default();

        assert_eq!(reserve(&resources, &mut allocations, "cloud", &group("g", "P", 0)).unwrap(), None);
        assert!(allocations.clouds.is_empty());
    }

    #[test]
    fn test_reserve_exhausted_profile() {
        let resources = catalog(&[("n0", "P")]);
        let mut allocations = Allocations::default();
        reserve(&resources, &mut allocations, "a", &group("g", "P", 1)).unwrap();

        let err = reserve(&resources, &mut allocations, "b", &group("g", "P", 2)).unwrap_err();
        match err {
            InventoryError::InsufficientResources { profile, requested, available } => {
                assert_eq!(profile, "P");
                assert_eq!(requested, 2);
                assert_eq!(available, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_feasibility_reports_shortfall() {
        let resources = catalog(&[("n0", "P"), ("n1", "P")]);
        let allocations = Allocations::default();

        let err = feasibility_check(&resources, &allocations, &[group("g", "P", 3)]).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientResources { ref profile, requested: 3, available: 2 } if profile == "P"
        ));
        assert!(feasibility_check(&resources, &allocations, &[group("g", "P", 2)]).is_ok());
    }

    #[test]
    fn test_feasibility_sums_groups_sharing_profile() {
        let resources = catalog(&[("n0", "P"), ("n1", "P"), ("n2", "P")]);
        let allocations = Allocations::default();
        let groups = [group("controller", "P", 2), group("worker", "P", 2)];

        let err = feasibility_check(&resources, &allocations, &groups).unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientResources { requested: 4, available: 3, .. }));
    }

    #[test]
    fn test_feasibility_names_first_short_profile() {
        let resources = catalog(&[("n0", "P"), ("m0", "Q")]);
        let allocations = Allocations::default();
        let groups = [group("a", "P", 1), group("b", "Q", 2), group("c", "R", 1)];

        let err = feasibility_check(&resources, &allocations, &groups).unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientResources { ref profile, .. } if profile == "Q"));
    }

    #[test]
    fn test_no_double_allocation_across_clouds() {
        let resources = catalog(&[("n0", "P"), ("n1", "P"), ("n2", "P"), ("n3", "P")]);
        let mut allocations = Allocations::default();
        let requests = [("a", group("x", "P", 2)), ("b", group("y", "P", 2)), ("c", group("z", "P", 2))];

        // Interleave single-node steps until the catalog runs dry
        for _ in 0..3 {
            for (cloud, g) in &requests {
                let _ = reserve(&resources, &mut allocations, cloud, g);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for cloud in &allocations.clouds {
            for (_, node) in cloud.iter_nodes() {
                assert!(seen.insert(node.to_string()), "{node} allocated twice");
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_release_restores_free_set() {
        let resources = catalog(&[("n0", "P"), ("n1", "P"), ("n2", "P")]);
        let mut allocations = Allocations::default();
        reserve(&resources, &mut allocations, "keep", &group("g", "P", 1)).unwrap();
        let before = free_nodes(&resources, &allocations, "P");

        let g = group("g", "P", 2);
        reserve(&resources, &mut allocations, "cloud", &g).unwrap();
        reserve(&resources, &mut allocations, "cloud", &g).unwrap();
        assert!(free_nodes(&resources, &allocations, "P").is_empty());

        let removed = remove_cloud(&mut allocations, "cloud").unwrap();
        assert_eq!(removed.nodegroups["g"], vec!["n1", "n2"]);
        assert_eq!(free_nodes(&resources, &allocations, "P"), before);
        assert!(remove_cloud(&mut allocations, "cloud").is_none());
    }

    #[test]
    fn test_assigned_nodes_sorted_union() {
        let mut allocations = Allocations::default();
        let cloud = allocations.find_or_insert("cloud");
        cloud.nodegroups.insert("worker".to_string(), vec!["w1".to_string(), "a0".to_string()]);
        cloud.nodegroups.insert("controller".to_string(), vec!["c0".to_string()]);
        cloud.nodegroups.insert("stale".to_string(), vec!["s0".to_string()]);

        let groups = [group("controller", "P", 1), group("worker", "P", 2)];
        assert_eq!(assigned_nodes(&allocations, "cloud", &groups), vec!["a0", "c0", "w1"]);
        assert!(assigned_nodes(&allocations, "unknown", &groups).is_empty());
    }

    #[test]
    fn test_free_by_profile_counts_empty_profiles() {
        let mut resources = catalog(&[("n0", "P")]);
        resources.hwprofiles.push("Q".to_string());
        let counts = free_by_profile(&resources, &Allocations::default());

        assert_eq!(counts["P"], 1);
        assert_eq!(counts["Q"], 0);
    }
}
