// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::types::{InPlaceUpdateState, UpdateSpec};
use super::{InPlaceUpdater, PendingReason, UpdateProgress};
use crate::kubernetes_api_objects::pod::{container_status, containers, contains_readiness_gate};
use crate::kubernetes_api_objects::resource_requirements::{resize_requires_restart, TouchedResources};
use k8s_openapi::api::core::v1::Pod;

impl InPlaceUpdater {
    /// Whether the pod has to be marked unready before this update is applied.
    ///
    /// Image and metadata updates restart containers, so any pod carrying the
    /// `InPlaceUpdateReady` gate goes unready. A resize-only update keeps the pod ready unless
    /// a container's resize policy restarts it for a resource the update touches.
    pub fn pod_needs_be_unready(&self, pod: &Pod, spec: &UpdateSpec) -> bool {
        if !self.gates.in_place_workload_vertical_scaling || !spec.is_vertical_update_only() {
            return contains_readiness_gate(pod);
        }

        let need_restart = containers(pod).iter().any(|container| {
            spec.container_resources
                .get(&container.name)
                .map_or(false, |resources| resize_requires_restart(container, TouchedResources::of(resources)))
        });
        need_restart && contains_readiness_gate(pod)
    }

    /// Whether the containers updated by the previous batch are ready, which gates the next one.
    pub fn check_pre_check_before_next(&self, pod: &Pod, state: &InPlaceUpdateState) -> UpdateProgress {
        let required = state
            .pre_check_before_next
            .iter()
            .flat_map(|pre_check| pre_check.containers_required_ready.iter());
        for name in required {
            if !container_status(pod, name).map_or(false, |status| status.ready) {
                return UpdateProgress::Pending(PendingReason::ContainerNotReady(name.clone()));
            }
        }
        UpdateProgress::Completed
    }
}
