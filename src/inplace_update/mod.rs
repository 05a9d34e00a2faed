// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! In-place update of running pods.
//!
//! The controller drives an update through [`InPlaceUpdater`] on each reconcile:
//! - [`InPlaceUpdater::calculate_update_spec`] classifies a revision transition once,
//! - [`InPlaceUpdater::pod_needs_be_unready`] tells whether readiness must drop first,
//! - [`InPlaceUpdater::patch_update_spec_to_pod`] plans and applies one batch,
//! - [`InPlaceUpdater::check_update_completed`] polls the node agent's convergence.
pub mod classifier;
pub mod hash;
pub mod planner;
pub mod readiness;
pub mod types;
pub mod verifier;

use crate::clock::{Clock, SystemClock};
use crate::feature_gates::FeatureGates;
use crate::patch::{JsonPatchEngine, PatchEngine};
use crate::vertical_update::{NativeVerticalUpdate, VerticalUpdate};
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::{Pod, ResourceRequirements};
use std::collections::BTreeMap;

pub use planner::PatchedPod;
use types::InPlaceUpdateState;

/// Per-transition knobs of the classifier.
#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    /// Skip the volume claim template compatibility check even when the gate asks for it.
    pub ignore_volume_claim_templates_hash_diff: bool,
    pub grace_period_seconds: i32,
    /// Derives the revision id recorded in the update spec; the revision name otherwise.
    pub revision_override: Option<fn(&ControllerRevision) -> String>,
}

/// Why an in-place update has not converged yet. Every reason is retryable.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PendingReason {
    #[error("still in grace period of in-place update")]
    InGracePeriod,
    #[error("existing containers to in-place update in next batches")]
    NextBatchesRemaining,
    #[error("waiting for all containers hash consistent, but runtime-container-meta not found")]
    RuntimeMetaMissing,
    #[error("waiting for all containers hash consistent")]
    HashInconsistent,
    #[error("container {0} status not found")]
    ContainerStatusMissing(String),
    #[error("container {0} resources not applied yet")]
    ResourcesNotApplied(String),
    #[error("container {0} imageID not changed")]
    ImageIdNotChanged(String),
    #[error("not found statuses of containers {0:?}")]
    ContainerStatusesNotFound(Vec<String>),
    #[error("container {0} is not ready")]
    ContainerNotReady(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateProgress {
    Completed,
    Pending(PendingReason),
}

impl UpdateProgress {
    pub fn is_completed(&self) -> bool {
        matches!(self, UpdateProgress::Completed)
    }
}

/// Entry point of the in-place update core, configured by the calling controller.
///
/// Holds no state across calls apart from its configuration and collaborators.
pub struct InPlaceUpdater {
    gates: FeatureGates,
    vertical_update: Box<dyn VerticalUpdate>,
    patch_engine: Box<dyn PatchEngine>,
    clock: Box<dyn Clock>,
}

impl InPlaceUpdater {
    pub fn new(gates: FeatureGates) -> InPlaceUpdater {
        InPlaceUpdater {
            gates,
            vertical_update: Box::new(NativeVerticalUpdate::default()),
            patch_engine: Box::new(JsonPatchEngine),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_vertical_update(mut self, vertical_update: impl VerticalUpdate + 'static) -> Self {
        self.vertical_update = Box::new(vertical_update);
        self
    }

    pub fn with_patch_engine(mut self, patch_engine: impl PatchEngine + 'static) -> Self {
        self.patch_engine = Box::new(patch_engine);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn gates(&self) -> &FeatureGates {
        &self.gates
    }

    /// Applies the desired resources to the pod spec through the configured strategy.
    /// Callers delivering through the resize subresource use this to mirror what they sent.
    pub fn update_resource(&self, pod: &mut Pod, expected: &BTreeMap<String, ResourceRequirements>) {
        self.vertical_update.update_resource(pod, expected)
    }

    /// Fresh continuation state for the first batch of `spec`.
    pub fn begin_state(&self, spec: &types::UpdateSpec) -> InPlaceUpdateState {
        InPlaceUpdateState::begin(spec, self.clock.now(), self.gates.in_place_workload_vertical_scaling)
    }
}
