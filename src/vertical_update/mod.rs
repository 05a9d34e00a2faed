// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Pluggable in-place vertical resize of container resources.
use crate::inplace_update::types::UpdateSpec;
use crate::inplace_update::{PendingReason, UpdateProgress};
use crate::kubernetes_api_objects::pod::{container_mut, container_status, containers};
use crate::kubernetes_api_objects::resource_requirements::{
    qos_class, resource_list_satisfied, RESOURCE_CPU, RESOURCE_MEMORY,
};
use crate::patch::PatchOperation;
use crate::Error;
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Strategy for turning resource diffs into in-place resizes.
pub trait VerticalUpdate: Send + Sync {
    /// Writes the desired resources into the pod's container specs.
    fn update_resource(&self, pod: &mut Pod, expected: &BTreeMap<String, ResourceRequirements>);

    /// Records the resource change described by a `replace` operation on
    /// `/spec/containers/<index>/resources/...` into the update spec.
    fn update_inplace_update_metadata(
        &self,
        op: &PatchOperation,
        old_template: &PodTemplateSpec,
        spec: &mut UpdateSpec,
    ) -> Result<(), Error>;

    fn is_pod_qos_changed(&self, old_template: &PodTemplateSpec, new_template: &PodTemplateSpec) -> bool;

    /// Whether the runtime has applied the declared resources to every container.
    fn is_update_completed(&self, pod: &Pod) -> UpdateProgress;

    /// When true the planner hands the desired resources back to the caller for delivery
    /// through the resize subresource instead of mutating the container specs.
    fn should_update_resource_by_resize(&self) -> bool;
}

/// How resized resources reach the pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeDelivery {
    /// Resources are written into the container spec of the patched pod.
    SpecMutation,
    /// Resources are returned separately and sent through the pod's resize subresource.
    Subresource,
}

/// Resize strategy backed by the kubelet's native in-place pod resize.
/// Only cpu and memory can change without recreating the pod.
#[derive(Clone, Copy, Debug)]
pub struct NativeVerticalUpdate {
    delivery: ResizeDelivery,
}

impl NativeVerticalUpdate {
    pub fn spec_mutation() -> NativeVerticalUpdate {
        NativeVerticalUpdate { delivery: ResizeDelivery::SpecMutation }
    }

    pub fn subresource() -> NativeVerticalUpdate {
        NativeVerticalUpdate { delivery: ResizeDelivery::Subresource }
    }

    pub fn delivery(&self) -> ResizeDelivery {
        self.delivery
    }

    pub fn can_resource_resize_in_place(resource_name: &str) -> bool {
        resource_name == RESOURCE_CPU || resource_name == RESOURCE_MEMORY
    }
}

impl Default for NativeVerticalUpdate {
    fn default() -> Self {
        NativeVerticalUpdate::spec_mutation()
    }
}

impl VerticalUpdate for NativeVerticalUpdate {
    fn update_resource(&self, pod: &mut Pod, expected: &BTreeMap<String, ResourceRequirements>) {
        for (name, desired) in expected {
            let Some(container) = container_mut(pod, name) else {
                continue;
            };
            let resources = container.resources.get_or_insert_with(Default::default);
            merge_resource_list(&mut resources.limits, desired.limits.as_ref());
            merge_resource_list(&mut resources.requests, desired.requests.as_ref());
        }
    }

    fn update_inplace_update_metadata(
        &self,
        op: &PatchOperation,
        old_template: &PodTemplateSpec,
        spec: &mut UpdateSpec,
    ) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidResourcePatch { path: op.path.clone(), reason };
        // /spec/containers/<index>/resources/<limits|requests>/<resource>
        let words: Vec<&str> = op.path.split('/').collect();
        let [_, "spec", "containers", index, "resources", list, resource_name] = words.as_slice() else {
            return Err(invalid("unexpected resource path".to_string()));
        };
        let index: usize = index.parse().map_err(|_| invalid("invalid container index".to_string()))?;
        let container = old_template
            .spec
            .as_ref()
            .and_then(|s| s.containers.get(index))
            .ok_or_else(|| invalid("container index out of range".to_string()))?;
        if !Self::can_resource_resize_in_place(resource_name) {
            return Err(invalid(format!("disallowed in-place update resource {}", resource_name)));
        }
        let quantity = op
            .value_str()
            .map(|v| Quantity(v.to_string()))
            .ok_or_else(|| invalid("quantity is not a string".to_string()))?;
        crate::kubernetes_api_objects::quantity::parse_milli(&quantity)
            .map_err(|e| invalid(e.to_string()))?;

        let resources = spec.container_resources.entry(container.name.clone()).or_default();
        let target = match *list {
            "limits" => &mut resources.limits,
            "requests" => &mut resources.requests,
            other => return Err(invalid(format!("unknown resource list {}", other))),
        };
        target
            .get_or_insert_with(BTreeMap::new)
            .insert(resource_name.to_string(), quantity);
        Ok(())
    }

    fn is_pod_qos_changed(&self, old_template: &PodTemplateSpec, new_template: &PodTemplateSpec) -> bool {
        let old_spec = old_template.spec.clone().unwrap_or_default();
        let new_spec = new_template.spec.clone().unwrap_or_default();
        qos_class(&old_spec) != qos_class(&new_spec)
    }

    fn is_update_completed(&self, pod: &Pod) -> UpdateProgress {
        for container in containers(pod) {
            let Some(declared) = container.resources.as_ref() else {
                continue;
            };
            let Some(status) = container_status(pod, &container.name) else {
                return UpdateProgress::Pending(PendingReason::ContainerStatusMissing(container.name.clone()));
            };
            let applied = status.resources.as_ref();
            let satisfied = resource_list_satisfied(
                declared.limits.as_ref(),
                applied.and_then(|r| r.limits.as_ref()),
            ) && resource_list_satisfied(
                declared.requests.as_ref(),
                applied.and_then(|r| r.requests.as_ref()),
            );
            if !satisfied {
                return UpdateProgress::Pending(PendingReason::ResourcesNotApplied(container.name.clone()));
            }
        }
        UpdateProgress::Completed
    }

    fn should_update_resource_by_resize(&self) -> bool {
        self.delivery == ResizeDelivery::Subresource
    }
}

fn merge_resource_list(
    target: &mut Option<BTreeMap<String, Quantity>>,
    desired: Option<&BTreeMap<String, Quantity>>,
) {
    for (name, quantity) in desired.into_iter().flatten() {
        target
            .get_or_insert_with(BTreeMap::new)
            .insert(name.clone(), quantity.clone());
    }
}
