// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

/// Annotation holding the serialized in-place update state of the pod.
pub const IN_PLACE_UPDATE_STATE_KEY: &str = "apps.kruise.io/inplace-update-state";
/// Annotation present while the pod sits in the grace period after an in-place patch.
pub const IN_PLACE_UPDATE_GRACE_KEY: &str = "apps.kruise.io/inplace-update-grace";
/// Annotation the node agent writes with the runtime hashes of the running containers.
pub const RUNTIME_CONTAINER_META_KEY: &str = "apps.kruise.io/runtime-containers-meta";
/// Readiness gate condition type owned by the in-place update machinery.
pub const IN_PLACE_UPDATE_READY: &str = "InPlaceUpdateReady";

pub fn in_grace_period(pod: &Pod) -> bool {
    pod.annotations().contains_key(IN_PLACE_UPDATE_GRACE_KEY)
}

pub fn containers(pod: &Pod) -> &[Container] {
    pod.spec.as_ref().map(|spec| spec.containers.as_slice()).unwrap_or_default()
}

pub fn container_mut<'a>(pod: &'a mut Pod, name: &str) -> Option<&'a mut Container> {
    pod.spec.as_mut()?.containers.iter_mut().find(|c| c.name == name)
}

pub fn container_statuses(pod: &Pod) -> &[ContainerStatus] {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_deref())
        .unwrap_or_default()
}

pub fn container_status<'a>(pod: &'a Pod, name: &str) -> Option<&'a ContainerStatus> {
    container_statuses(pod).iter().find(|cs| cs.name == name)
}

/// Whether the pod declares the `InPlaceUpdateReady` readiness gate.
pub fn contains_readiness_gate(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.readiness_gates.as_ref())
        .map_or(false, |gates| gates.iter().any(|g| g.condition_type == IN_PLACE_UPDATE_READY))
}

pub fn in_place_update_ready_condition(pod: &Pod) -> Option<&PodCondition> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == IN_PLACE_UPDATE_READY)
}

/// Sets the `InPlaceUpdateReady` condition and returns whether anything changed.
/// The transition time only moves when the status flips.
pub fn set_in_place_update_ready(pod: &mut Pod, ready: bool, now: DateTime<Utc>) -> bool {
    let status_value = if ready { "True" } else { "False" };
    let conditions = pod
        .status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new);
    match conditions.iter_mut().find(|c| c.type_ == IN_PLACE_UPDATE_READY) {
        Some(condition) if condition.status == status_value => false,
        Some(condition) => {
            condition.status = status_value.to_string();
            condition.last_transition_time = Some(Time(now));
            true
        }
        None => {
            conditions.push(PodCondition {
                type_: IN_PLACE_UPDATE_READY.to_string(),
                status: status_value.to_string(),
                last_transition_time: Some(Time(now)),
                ..PodCondition::default()
            });
            true
        }
    }
}
