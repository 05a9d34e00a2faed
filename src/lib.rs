// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Planning and verification of in-place pod updates.
//!
//! A workload controller calls into this crate on every reconcile tick to decide whether a
//! revision transition can be applied to a live pod without recreating it, to patch the pod
//! batch by batch, and to check whether the node agent has converged the containers.
pub mod clock;
pub mod feature_gates;
pub mod inplace_update;
pub mod kubernetes_api_objects;
pub mod patch;
pub mod vertical_update;

#[cfg(test)]
mod unit_tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use feature_gates::FeatureGates;
pub use inplace_update::{
    InPlaceUpdater, PatchedPod, PendingReason, UpdateOptions, UpdateProgress,
};
pub use inplace_update::types::{
    ContainerBatch, ContainerRefMetadata, InPlaceUpdateContainerStatus, InPlaceUpdateState,
    PreCheckBeforeNext, RuntimeContainerHashes, RuntimeContainerMeta, RuntimeContainerMetaSet,
    UpdateSpec,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
    #[error("Failed to decode revision {0}: {1}")]
    RevisionDecodeFailed(String, #[source] serde_json::Error),
    #[error("Failed to decode in-place update state: {0}")]
    StateDecodeFailed(#[source] serde_json::Error),
    #[error("Failed to encode in-place update state: {0}")]
    StateEncodeFailed(#[source] serde_json::Error),
    #[error("Failed to decode runtime container meta: {0}")]
    RuntimeMetaDecodeFailed(#[source] serde_json::Error),
    #[error("Failed to apply metadata patch: {0}")]
    MetadataPatchFailed(#[source] serde_json::Error),
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),
    #[error("Invalid resource patch {path}: {reason}")]
    InvalidResourcePatch { path: String, reason: String },
    #[error("Invalid quantity: {0:?}")]
    InvalidQuantity(String),
    #[error("Invalid feature gate: {0}")]
    InvalidFeatureGate(String),
}
