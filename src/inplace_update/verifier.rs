// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::hash::{env_from_metadata_hash, ContainerHashAlgorithm};
use super::types::{InPlaceUpdateState, RuntimeContainerMetaSet};
use super::{InPlaceUpdater, PendingReason, UpdateProgress};
use crate::kubernetes_api_objects::container::normalized_image;
use crate::kubernetes_api_objects::pod::{container_status, container_statuses, containers, in_grace_period};
use crate::Error;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Which reported hash a consistency check compares against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HashCheck {
    /// The container spec hash, accepted under any [`ContainerHashAlgorithm`].
    Plain,
    /// The hash of env vars resolved from pod labels and annotations.
    ExtractedEnvFromMetadata,
}

impl InPlaceUpdater {
    /// Checks whether the in-place update recorded on the pod has taken effect, using the
    /// runtime snapshot the node agent attached to the pod.
    pub fn check_update_completed(&self, pod: &Pod) -> Result<UpdateProgress, Error> {
        self.check_progress(pod, || RuntimeContainerMetaSet::from_pod(pod))
    }

    /// Same as [`InPlaceUpdater::check_update_completed`] with an explicitly supplied runtime
    /// snapshot. A pod without persisted state has nothing to wait for.
    pub fn check_update_completed_with(
        &self,
        pod: &Pod,
        runtime_meta: Option<&RuntimeContainerMetaSet>,
    ) -> Result<UpdateProgress, Error> {
        self.check_progress(pod, || Ok(runtime_meta.cloned()))
    }

    /// The runtime snapshot is only loaded once grace period, state and batches allow it.
    fn check_progress(
        &self,
        pod: &Pod,
        runtime_meta: impl FnOnce() -> Result<Option<RuntimeContainerMetaSet>, Error>,
    ) -> Result<UpdateProgress, Error> {
        if in_grace_period(pod) {
            return Ok(UpdateProgress::Pending(PendingReason::InGracePeriod));
        }
        let Some(state) = InPlaceUpdateState::from_pod(pod)? else {
            return Ok(UpdateProgress::Completed);
        };
        if state.has_next_batch() {
            return Ok(UpdateProgress::Pending(PendingReason::NextBatchesRemaining));
        }
        let runtime_meta = runtime_meta()?;
        Ok(self.check_containers_update_completed(pod, &state, runtime_meta.as_ref()))
    }

    fn check_containers_update_completed(
        &self,
        pod: &Pod,
        state: &InPlaceUpdateState,
        runtime_meta: Option<&RuntimeContainerMetaSet>,
    ) -> UpdateProgress {
        if state.update_env_from_metadata {
            let Some(runtime_meta) = runtime_meta else {
                return UpdateProgress::Pending(PendingReason::RuntimeMetaMissing);
            };
            if !all_containers_hash_consistent(pod, runtime_meta, HashCheck::ExtractedEnvFromMetadata) {
                return UpdateProgress::Pending(PendingReason::HashInconsistent);
            }
        }

        if self.gates.in_place_workload_vertical_scaling && state.update_resources {
            let progress = self.vertical_update.is_update_completed(pod);
            if !progress.is_completed() {
                return progress;
            }
        }

        if let Some(runtime_meta) = runtime_meta {
            if all_containers_hash_consistent(pod, runtime_meta, HashCheck::Plain) {
                debug!(
                    "Check pod {}/{} in-place update completed for all container hash consistent",
                    pod.namespace().unwrap_or_default(),
                    pod.name_any()
                );
                return UpdateProgress::Completed;
            }
            // The node agent may be stale; fall back to image ids instead of failing here.
        }

        check_image_ids_changed(pod, state)
    }
}

/// Compares the live image ids against those recorded before the update.
///
/// An unchanged image id is still accepted when the declared image already matches the image
/// the runtime reports, so a new tag resolving to the same digest counts as converged.
fn check_image_ids_changed(pod: &Pod, state: &InPlaceUpdateState) -> UpdateProgress {
    let declared: BTreeMap<&str, String> = containers(pod)
        .iter()
        .map(|c| (c.name.as_str(), normalized_image(c.image.as_deref().unwrap_or_default())))
        .collect();

    let mut tracked = state.last_container_statuses.clone();
    for status in container_statuses(pod) {
        let Some(previous) = tracked.remove(&status.name) else {
            continue;
        };
        if previous.image_id == status.image_id
            && declared.get(status.name.as_str()).map(String::as_str) != Some(status.image.as_str())
        {
            return UpdateProgress::Pending(PendingReason::ImageIdNotChanged(status.name.clone()));
        }
    }

    if tracked.is_empty() {
        UpdateProgress::Completed
    } else {
        UpdateProgress::Pending(PendingReason::ContainerStatusesNotFound(tracked.into_keys().collect()))
    }
}

/// Every declared container must appear in both the pod status and the runtime snapshot with
/// the same container id, and its hash must match the one the node agent reported.
fn all_containers_hash_consistent(pod: &Pod, runtime_meta: &RuntimeContainerMetaSet, check: HashCheck) -> bool {
    let pod_key = || format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any());
    for container in containers(pod) {
        let Some(status) = container_status(pod, &container.name) else {
            info!("Find no container {} in status for pod {}", container.name, pod_key());
            return false;
        };
        let Some(meta) = runtime_meta.container(&container.name) else {
            info!("Find no container {} in runtime-container-meta for pod {}", container.name, pod_key());
            return false;
        };
        if Some(meta.container_id.as_str()) != status.container_id.as_deref() {
            info!(
                "Find container {} in runtime-container-meta for pod {} has different containerID with status: {} vs {:?}",
                container.name,
                pod_key(),
                meta.container_id,
                status.container_id
            );
            return false;
        }
        match check {
            HashCheck::Plain => {
                if ContainerHashAlgorithm::matching(container, meta.hashes.plain_hash).is_none() {
                    info!(
                        "Find container {} in runtime-container-meta for pod {} has different plain hash {} with spec",
                        container.name,
                        pod_key(),
                        meta.hashes.plain_hash
                    );
                    return false;
                }
            }
            HashCheck::ExtractedEnvFromMetadata => {
                let expected = env_from_metadata_hash(container, pod);
                if meta.hashes.extracted_env_from_metadata_hash != expected {
                    info!(
                        "Find container {} in runtime-container-meta for pod {} has different extractedEnvFromMetadataHash {} with expected {}",
                        container.name,
                        pod_key(),
                        meta.hashes.extracted_env_from_metadata_hash,
                        expected
                    );
                    return false;
                }
            }
        }
    }
    true
}
