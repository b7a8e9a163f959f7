//! Node/metadata partitioner.
//!
//! Splits a node set's metadata into *exclusive groups* (combinations of
//! metadata values that must retain at least one member, e.g. one node per
//! availability zone) and a *base* map of keys common to every node. Two
//! consumers:
//!
//! - [`choose_metadata`] picks the metadata for a newly created node.
//! - [`choose_nodes_for_removal`] picks removal candidates that never
//!   empty an exclusive group and never empty the pool.
//!
//! A metadata key counts as exclusive when its value differs across the
//! node set; a key missing on a node reads as the empty string. Groups
//! keep first-seen insertion order, so results are deterministic for a
//! fixed node ordering.

use std::collections::BTreeSet;

use crate::types::{Metadata, Node};

/// Nodes sharing one combination of exclusive metadata values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataGroup {
    /// The exclusive key → value combination shared by the group.
    pub metadata: Metadata,
    /// Addresses of the member nodes, in input order.
    pub addresses: Vec<String>,
}

/// Partition a node set's metadata into exclusive groups and the common
/// base map.
pub fn split_metadata(nodes: &[Node]) -> (Vec<MetadataGroup>, Metadata) {
    if nodes.is_empty() {
        return (Vec::new(), Metadata::new());
    }

    let mut keys: BTreeSet<&str> = BTreeSet::new();
    for node in nodes {
        keys.extend(node.metadata.keys().map(String::as_str));
    }

    let value_of = |node: &Node, key: &str| -> String {
        node.metadata.get(key).cloned().unwrap_or_default()
    };

    let mut base = Metadata::new();
    let mut exclusive_keys: Vec<&str> = Vec::new();
    for key in keys {
        let first = value_of(&nodes[0], key);
        if nodes.iter().all(|n| value_of(n, key) == first) {
            base.insert(key.to_string(), first);
        } else {
            exclusive_keys.push(key);
        }
    }

    let mut groups: Vec<MetadataGroup> = Vec::new();
    if !exclusive_keys.is_empty() {
        for node in nodes {
            let combo: Metadata = exclusive_keys
                .iter()
                .map(|k| (k.to_string(), value_of(node, k)))
                .collect();
            match groups.iter_mut().find(|g| g.metadata == combo) {
                Some(group) => group.addresses.push(node.address.clone()),
                None => groups.push(MetadataGroup {
                    metadata: combo,
                    addresses: vec![node.address.clone()],
                }),
            }
        }
    }

    (groups, base)
}

/// Pick the metadata for a new node modeled on the given set: the base
/// metadata overlaid with the first exclusive group's values.
pub fn choose_metadata(nodes: &[Node]) -> Metadata {
    let (groups, mut base) = split_metadata(nodes);
    if let Some(first) = groups.first() {
        for (key, value) in &first.metadata {
            base.insert(key.clone(), value.clone());
        }
    }
    base
}

/// Whether `node` may be removed from `nodes` without violating structural
/// constraints: never the last node overall, and never the sole remaining
/// member of an exclusive group.
pub fn can_remove(node: &Node, nodes: &[Node]) -> bool {
    if nodes.len() <= 1 {
        return false;
    }
    let (groups, _) = split_metadata(nodes);
    if groups.is_empty() {
        return true;
    }
    let matches_group = |group: &MetadataGroup| {
        group.metadata.iter().all(|(key, value)| {
            node.metadata.get(key).map(String::as_str).unwrap_or("") == value
        })
    };
    match groups.iter().find(|g| matches_group(g)) {
        Some(group) => group.addresses.len() > 1,
        None => false,
    }
}

/// Select up to `count` removal candidates, one at a time, shrinking the
/// working set after each pick so repeated scale-downs still honor the
/// group constraints.
pub fn choose_nodes_for_removal(nodes: &[Node], count: usize) -> Vec<Node> {
    let mut remaining: Vec<Node> = nodes.to_vec();
    let mut chosen = Vec::new();
    for node in nodes {
        if chosen.len() >= count {
            break;
        }
        if can_remove(node, &remaining) {
            remaining.retain(|n| n.address != node.address);
            chosen.push(node.clone());
        }
    }
    chosen
}
