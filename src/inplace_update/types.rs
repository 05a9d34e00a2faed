// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::pod::{IN_PLACE_UPDATE_STATE_KEY, RUNTIME_CONTAINER_META_KEY};
use crate::Error;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label and annotation values a single container's env vars read from pod metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContainerRefMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ContainerRefMetadata {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }

    /// Whether the two override sets touch a common label or annotation key.
    pub fn shares_key_with(&self, other: &ContainerRefMetadata) -> bool {
        self.labels.keys().any(|k| other.labels.contains_key(k))
            || self.annotations.keys().any(|k| other.annotations.contains_key(k))
    }
}

/// The in-place-eligible difference between two revisions.
///
/// Produced once per revision transition by the classifier and never modified afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateSpec {
    pub revision: String,
    pub container_images: BTreeMap<String, String>,
    pub container_resources: BTreeMap<String, ResourceRequirements>,
    pub container_ref_metadata: BTreeMap<String, ContainerRefMetadata>,
    /// Merge patch over `{"metadata": ...}` for the keys no container consumes.
    pub metadata_patch: Option<Vec<u8>>,
    pub grace_seconds: i32,
    pub update_env_from_metadata: bool,
}

impl UpdateSpec {
    /// Whether the diff consists of resource changes only.
    pub fn is_vertical_update_only(&self) -> bool {
        !self.container_resources.is_empty()
            && self.container_images.is_empty()
            && self.container_ref_metadata.is_empty()
            && self.metadata_patch.is_none()
    }

    /// Names of every container with a pending change.
    pub fn eligible_containers(&self) -> impl Iterator<Item = &String> {
        let mut names: Vec<&String> = self
            .container_images
            .keys()
            .chain(self.container_ref_metadata.keys())
            .chain(self.container_resources.keys())
            .collect();
        names.sort();
        names.dedup();
        names.into_iter()
    }

    /// The update of the next batch, built from the changes the state deferred.
    /// Returns `None` when nothing is deferred.
    pub fn for_next_batch(state: &InPlaceUpdateState, grace_seconds: i32) -> Option<UpdateSpec> {
        if !state.has_next_batch() {
            return None;
        }
        Some(UpdateSpec {
            revision: state.revision.clone(),
            container_images: state.next_container_images.clone(),
            container_resources: state.next_container_resources.clone(),
            container_ref_metadata: state.next_container_ref_metadata.clone(),
            metadata_patch: None,
            grace_seconds,
            update_env_from_metadata: state.update_env_from_metadata,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InPlaceUpdateContainerStatus {
    #[serde(rename = "imageID", default)]
    pub image_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreCheckBeforeNext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers_required_ready: Vec<String>,
}

/// One applied batch: when it was planned and which containers it updated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContainerBatch {
    pub timestamp: Time,
    #[serde(default)]
    pub containers: Vec<String>,
}

/// Continuation state of an in-place update, persisted on the pod between reconciles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InPlaceUpdateState {
    #[serde(default)]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_timestamp: Option<Time>,
    /// Image ids observed before the update, consulted only for completion checks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub last_container_statuses: BTreeMap<String, InPlaceUpdateContainerStatus>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub update_resources: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub update_env_from_metadata: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub next_container_images: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub next_container_ref_metadata: BTreeMap<String, ContainerRefMetadata>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub next_container_resources: BTreeMap<String, ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_check_before_next: Option<PreCheckBeforeNext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_batches_record: Vec<ContainerBatch>,
}

impl InPlaceUpdateState {
    /// Fresh state for the first batch of an update.
    pub fn begin(spec: &UpdateSpec, now: DateTime<Utc>, vertical_scaling: bool) -> InPlaceUpdateState {
        InPlaceUpdateState {
            revision: spec.revision.clone(),
            update_timestamp: Some(Time(now)),
            update_resources: vertical_scaling && !spec.container_resources.is_empty(),
            update_env_from_metadata: spec.update_env_from_metadata,
            ..InPlaceUpdateState::default()
        }
    }

    /// Reads the state persisted on the pod, if any.
    pub fn from_pod(pod: &Pod) -> Result<Option<InPlaceUpdateState>, Error> {
        pod.annotations()
            .get(IN_PLACE_UPDATE_STATE_KEY)
            .map(|raw| serde_json::from_str(raw).map_err(Error::StateDecodeFailed))
            .transpose()
    }

    pub fn write_to_pod(&self, pod: &mut Pod) -> Result<(), Error> {
        let raw = serde_json::to_string(self).map_err(Error::StateEncodeFailed)?;
        pod.annotations_mut().insert(IN_PLACE_UPDATE_STATE_KEY.to_string(), raw);
        Ok(())
    }

    /// Whether some change is still deferred to a later batch.
    pub fn has_next_batch(&self) -> bool {
        !self.next_container_images.is_empty()
            || !self.next_container_ref_metadata.is_empty()
            || !self.next_container_resources.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContainerHashes {
    #[serde(default)]
    pub plain_hash: u64,
    #[serde(default)]
    pub extracted_env_from_metadata_hash: u64,
}

/// What the node agent reports about one running container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContainerMeta {
    pub name: String,
    #[serde(rename = "containerID", default)]
    pub container_id: String,
    #[serde(default)]
    pub restart_count: i32,
    #[serde(default)]
    pub hashes: RuntimeContainerHashes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeContainerMetaSet {
    #[serde(default)]
    pub containers: Vec<RuntimeContainerMeta>,
}

impl RuntimeContainerMetaSet {
    /// Reads the snapshot the node agent attached to the pod, if any.
    pub fn from_pod(pod: &Pod) -> Result<Option<RuntimeContainerMetaSet>, Error> {
        pod.annotations()
            .get(RUNTIME_CONTAINER_META_KEY)
            .map(|raw| serde_json::from_str(raw).map_err(Error::RuntimeMetaDecodeFailed))
            .transpose()
    }

    pub fn container(&self, name: &str) -> Option<&RuntimeContainerMeta> {
        self.containers.iter().find(|c| c.name == name)
    }
}
