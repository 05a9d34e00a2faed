// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::types::{
    ContainerBatch, ContainerRefMetadata, InPlaceUpdateContainerStatus, InPlaceUpdateState,
    PreCheckBeforeNext, UpdateSpec,
};
use super::InPlaceUpdater;
use crate::kubernetes_api_objects::container::container_priority;
use crate::kubernetes_api_objects::pod::{container_mut, container_statuses, containers};
use crate::Error;
use k8s_openapi::api::core::v1::{Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Result of planning one batch.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchedPod {
    /// The pod with this batch applied and the new state persisted in its annotations.
    pub pod: Pod,
    pub state: InPlaceUpdateState,
    /// Desired resources per container, set only when resizes go through the resize
    /// subresource; the pod spec is left untouched in that case.
    pub resize_resources: Option<BTreeMap<String, ResourceRequirements>>,
}

impl InPlaceUpdater {
    /// Applies the next batch of `spec` to a copy of the pod.
    ///
    /// Containers without a launch priority always update. Among prioritized containers only
    /// those sharing the highest pending priority update now, together with every container
    /// sharing a changed label or annotation with them. Everything else is deferred into the
    /// state's next-batch maps. Changes for containers the pod does not declare are dropped.
    /// Inputs are never modified, so a failure leaves no partial update.
    pub fn patch_update_spec_to_pod(
        &self,
        pod: &Pod,
        spec: &UpdateSpec,
        state: &InPlaceUpdateState,
    ) -> Result<PatchedPod, Error> {
        debug!(
            "Begin to in-place update pod {}/{} to revision {}",
            pod.namespace().unwrap_or_default(),
            pod.name_any(),
            spec.revision
        );
        let mut pod = self.apply_metadata_patch(pod, spec)?;
        let mut state = state.clone();
        state.next_container_images.clear();
        state.next_container_ref_metadata.clear();
        state.next_container_resources.clear();
        if state.revision.is_empty() {
            state.revision = spec.revision.clone();
        }
        state.update_env_from_metadata |= spec.update_env_from_metadata;
        state.update_resources |=
            self.gates.in_place_workload_vertical_scaling && !spec.container_resources.is_empty();

        let to_update = containers_to_update(&pod, spec);
        let present: BTreeSet<String> = containers(&pod).iter().map(|c| c.name.clone()).collect();
        for name in spec.eligible_containers().filter(|name| !present.contains(name.as_str())) {
            info!(
                "Skip in-place update of container {} not found in pod {}/{}",
                name,
                pod.namespace().unwrap_or_default(),
                pod.name_any()
            );
        }

        let mut image_changed = BTreeSet::new();
        for (name, image) in spec.container_images.iter().filter(|(name, _)| present.contains(name.as_str())) {
            if to_update.contains(name) {
                if let Some(container) = container_mut(&mut pod, name) {
                    container.image = Some(image.clone());
                    image_changed.insert(name.clone());
                }
            } else {
                state.next_container_images.insert(name.clone(), image.clone());
            }
        }
        for status in container_statuses(&pod) {
            if image_changed.contains(&status.name) {
                state
                    .last_container_statuses
                    .entry(status.name.clone())
                    .or_insert_with(|| InPlaceUpdateContainerStatus { image_id: status.image_id.clone() });
            }
        }

        let mut expected_resources = BTreeMap::new();
        if self.gates.in_place_workload_vertical_scaling {
            let resized = spec.container_resources.iter().filter(|(name, _)| present.contains(name.as_str()));
            for (name, resources) in resized {
                if to_update.contains(name) {
                    expected_resources.insert(name.clone(), resources.clone());
                } else {
                    state.next_container_resources.insert(name.clone(), resources.clone());
                }
            }
            if !self.vertical_update.should_update_resource_by_resize() {
                self.vertical_update.update_resource(&mut pod, &expected_resources);
            }
        }

        // Containers are folded in name order, so on a key collision the last name wins.
        let ref_metadata = spec.container_ref_metadata.iter().filter(|(name, _)| present.contains(name.as_str()));
        for (name, overrides) in ref_metadata {
            if to_update.contains(name) {
                pod.labels_mut().extend(overrides.labels.clone());
                pod.annotations_mut().extend(overrides.annotations.clone());
            } else {
                state.next_container_ref_metadata.insert(name.clone(), overrides.clone());
            }
        }

        let batch: Vec<String> = to_update.into_iter().collect();
        state.pre_check_before_next = if state.has_next_batch() {
            Some(PreCheckBeforeNext { containers_required_ready: batch.clone() })
        } else {
            None
        };
        state.container_batches_record.push(ContainerBatch {
            timestamp: Time(self.clock.now()),
            containers: batch,
        });

        state.write_to_pod(&mut pod)?;
        debug!(
            "Decide to in-place update pod {}/{}: {}",
            pod.namespace().unwrap_or_default(),
            pod.name_any(),
            serde_json::to_string(&state).unwrap_or_default()
        );

        let resize_resources = if self.gates.in_place_workload_vertical_scaling
            && self.vertical_update.should_update_resource_by_resize()
        {
            Some(expected_resources)
        } else {
            None
        };
        Ok(PatchedPod { pod, state, resize_resources })
    }

    fn apply_metadata_patch(&self, pod: &Pod, spec: &UpdateSpec) -> Result<Pod, Error> {
        let Some(patch) = spec.metadata_patch.as_ref() else {
            return Ok(pod.clone());
        };
        let patch = serde_json::from_slice(patch).map_err(Error::MetadataPatchFailed)?;
        let mut object = serde_json::to_value(pod).map_err(Error::MetadataPatchFailed)?;
        self.patch_engine.apply_merge_patch(&mut object, &patch)?;
        serde_json::from_value(object).map_err(Error::MetadataPatchFailed)
    }
}

/// Picks the containers that update in this batch. Only containers declared in the pod and
/// named by one of the spec's change maps are considered.
fn containers_to_update(pod: &Pod, spec: &UpdateSpec) -> BTreeSet<String> {
    let pending = |name: &String| {
        spec.container_images.contains_key(name)
            || spec.container_resources.contains_key(name)
            || spec.container_ref_metadata.contains_key(name)
    };

    let mut to_update = BTreeSet::new();
    let mut prioritized = Vec::new();
    for container in containers(pod).iter().filter(|c| pending(&c.name)) {
        match container_priority(container) {
            None => {
                to_update.insert(container.name.clone());
            }
            Some(priority) => prioritized.push((&container.name, priority)),
        }
    }
    if let Some(highest) = prioritized.iter().map(|(_, p)| *p).max() {
        to_update.extend(
            prioritized
                .iter()
                .filter(|(_, p)| *p == highest)
                .map(|(name, _)| (*name).clone()),
        );
    }

    add_metadata_shared_containers(pod, &mut to_update, &spec.container_ref_metadata);
    to_update
}

/// Grows `to_update` to a fixed point with every container whose metadata overrides share a
/// label or annotation key with a container already updating.
fn add_metadata_shared_containers(
    pod: &Pod,
    to_update: &mut BTreeSet<String>,
    ref_metadata: &BTreeMap<String, ContainerRefMetadata>,
) {
    let declared: BTreeSet<&str> = containers(pod).iter().map(|c| c.name.as_str()).collect();
    loop {
        let shared: Vec<String> = ref_metadata
            .iter()
            .filter(|(name, _)| declared.contains(name.as_str()) && !to_update.contains(*name))
            .filter(|(_, overrides)| {
                to_update
                    .iter()
                    .filter_map(|updating| ref_metadata.get(updating))
                    .any(|updating| updating.shares_key_with(overrides))
            })
            .map(|(name, _)| name.clone())
            .collect();
        if shared.is_empty() {
            return;
        }
        for name in shared {
            info!(
                "Has to in-place update container {} with lower priority in pod {}/{}, for the metadata it shared has changed",
                name,
                pod.namespace().unwrap_or_default(),
                pod.name_any()
            );
            to_update.insert(name);
        }
    }
}
