//! gridpool-core — domain types for the gridpool autoscaler.
//!
//! Pure data model and algorithms, no I/O:
//!
//! - [`Node`], [`NodeSpec`], [`Unit`]: read-only snapshots of the cluster
//!   as reported by a provisioner backend.
//! - [`Rule`] and [`ScalingPolicy`]: the per-pool scaling policy.
//! - [`ScalerResult`]: the decision output of one scaling pass.
//! - [`metadata`]: the partitioner that splits node metadata into
//!   exclusive groups and picks safe removal candidates.

pub mod metadata;
pub mod types;

pub use metadata::{
    MetadataGroup, can_remove, choose_metadata, choose_nodes_for_removal, split_metadata,
};
pub use types::*;
