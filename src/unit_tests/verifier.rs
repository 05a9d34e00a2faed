// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::{all_gates, pod, updater};
use crate::feature_gates::FeatureGates;
use crate::inplace_update::hash::{env_from_metadata_hash, ContainerHashAlgorithm};
use crate::inplace_update::types::{
    InPlaceUpdateContainerStatus, InPlaceUpdateState, RuntimeContainerHashes, RuntimeContainerMeta,
    RuntimeContainerMetaSet,
};
use crate::inplace_update::{PendingReason, UpdateProgress};
use crate::kubernetes_api_objects::pod::{
    containers, IN_PLACE_UPDATE_GRACE_KEY, IN_PLACE_UPDATE_STATE_KEY, RUNTIME_CONTAINER_META_KEY,
};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;

const UPDATED_POD: &str = "
apiVersion: v1
kind: Pod
metadata:
  name: web-0
  namespace: default
  labels:
    version: v2
spec:
  containers:
  - name: web
    image: nginx:1.1
    env:
    - name: VERSION
      valueFrom:
        fieldRef:
          fieldPath: metadata.labels['version']
status:
  containerStatuses:
  - name: web
    image: nginx:1.0
    imageID: sha256:aaa
    containerID: containerd://web-1
    ready: true
    restartCount: 0
";

fn with_state(mut pod: Pod, state: &InPlaceUpdateState) -> Pod {
    state.write_to_pod(&mut pod).unwrap();
    pod
}

fn image_state() -> InPlaceUpdateState {
    InPlaceUpdateState {
        revision: "web-2".to_string(),
        last_container_statuses: BTreeMap::from([(
            "web".to_string(),
            InPlaceUpdateContainerStatus { image_id: "sha256:aaa".to_string() },
        )]),
        ..InPlaceUpdateState::default()
    }
}

fn runtime_meta(pod: &Pod, plain_hash: u64, container_id: &str) -> RuntimeContainerMetaSet {
    let container = &containers(pod)[0];
    RuntimeContainerMetaSet {
        containers: vec![RuntimeContainerMeta {
            name: container.name.clone(),
            container_id: container_id.to_string(),
            restart_count: 1,
            hashes: RuntimeContainerHashes {
                plain_hash,
                extracted_env_from_metadata_hash: env_from_metadata_hash(container, pod),
            },
        }],
    }
}

#[test]
pub fn test_grace_period_is_pending() {
    let mut pod = with_state(pod(UPDATED_POD), &image_state());
    pod.annotations_mut().insert(IN_PLACE_UPDATE_GRACE_KEY.to_string(), "{}".to_string());
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Pending(PendingReason::InGracePeriod)
    );
}

#[test]
pub fn test_pod_without_state_is_completed() {
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod(UPDATED_POD)).unwrap(),
        UpdateProgress::Completed
    );
}

#[test]
pub fn test_remaining_batches_are_pending() {
    let mut state = image_state();
    state.next_container_images.insert("sidecar".to_string(), "envoy:2.0".to_string());
    let pod = with_state(pod(UPDATED_POD), &state);
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Pending(PendingReason::NextBatchesRemaining)
    );
}

#[test]
pub fn test_unchanged_image_id_is_pending() {
    println!("Testing check_update_completed() without runtime metadata...");
    let pod = with_state(pod(UPDATED_POD), &image_state());
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Pending(PendingReason::ImageIdNotChanged("web".to_string()))
    );
}

#[test]
pub fn test_changed_image_id_is_completed() {
    let yaml = UPDATED_POD.replace("imageID: sha256:aaa", "imageID: sha256:bbb");
    let pod = with_state(pod(&yaml), &image_state());
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Completed
    );
}

#[test]
pub fn test_new_tag_on_same_digest_is_completed() {
    let yaml = UPDATED_POD.replace("image: nginx:1.0", "image: nginx:1.1");
    let pod = with_state(pod(&yaml), &image_state());
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Completed
    );
}

#[test]
pub fn test_untracked_container_status_is_pending() {
    let yaml = UPDATED_POD.replace("imageID: sha256:aaa", "imageID: sha256:bbb");
    let mut state = image_state();
    state.last_container_statuses.insert(
        "sidecar".to_string(),
        InPlaceUpdateContainerStatus { image_id: "sha256:ccc".to_string() },
    );
    let pod = with_state(pod(&yaml), &state);
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Pending(PendingReason::ContainerStatusesNotFound(vec!["sidecar".to_string()]))
    );
}

#[test]
pub fn test_consistent_runtime_hash_is_completed() {
    println!("Testing check_update_completed_with() with runtime metadata...");
    let updater = updater(FeatureGates::default());
    let pod = with_state(pod(UPDATED_POD), &image_state());
    let container = &containers(&pod)[0];
    for algorithm in ContainerHashAlgorithm::FALLBACK_ORDER {
        let meta = runtime_meta(&pod, algorithm.hash(container), "containerd://web-1");
        assert_eq!(
            updater.check_update_completed_with(&pod, Some(&meta)).unwrap(),
            UpdateProgress::Completed
        );
    }
}

#[test]
pub fn test_runtime_meta_read_from_annotation() {
    let mut pod = with_state(pod(UPDATED_POD), &image_state());
    let hash = ContainerHashAlgorithm::Current.hash(&containers(&pod)[0]);
    let meta = runtime_meta(&pod, hash, "containerd://web-1");
    pod.annotations_mut()
        .insert(RUNTIME_CONTAINER_META_KEY.to_string(), serde_json::to_string(&meta).unwrap());
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Completed
    );
}

#[test]
pub fn test_stale_runtime_meta_falls_back_to_image_ids() {
    let updater = updater(FeatureGates::default());
    let pod = with_state(pod(UPDATED_POD), &image_state());
    let hash = ContainerHashAlgorithm::Current.hash(&containers(&pod)[0]);

    let other_container = runtime_meta(&pod, hash, "containerd://web-0");
    assert_eq!(
        updater.check_update_completed_with(&pod, Some(&other_container)).unwrap(),
        UpdateProgress::Pending(PendingReason::ImageIdNotChanged("web".to_string()))
    );

    let wrong_hash = runtime_meta(&pod, hash.wrapping_add(1), "containerd://web-1");
    assert_eq!(
        updater.check_update_completed_with(&pod, Some(&wrong_hash)).unwrap(),
        UpdateProgress::Pending(PendingReason::ImageIdNotChanged("web".to_string()))
    );
}

#[test]
pub fn test_env_from_metadata_needs_runtime_meta() {
    let updater = updater(FeatureGates::default());
    let state = InPlaceUpdateState { update_env_from_metadata: true, ..image_state() };
    let pod = with_state(pod(UPDATED_POD), &state);
    assert_eq!(
        updater.check_update_completed_with(&pod, None).unwrap(),
        UpdateProgress::Pending(PendingReason::RuntimeMetaMissing)
    );

    let hash = ContainerHashAlgorithm::Current.hash(&containers(&pod)[0]);
    let mut meta = runtime_meta(&pod, hash, "containerd://web-1");
    assert_eq!(
        updater.check_update_completed_with(&pod, Some(&meta)).unwrap(),
        UpdateProgress::Completed
    );

    meta.containers[0].hashes.extracted_env_from_metadata_hash ^= 1;
    assert_eq!(
        updater.check_update_completed_with(&pod, Some(&meta)).unwrap(),
        UpdateProgress::Pending(PendingReason::HashInconsistent)
    );
}

const RESIZED_POD: &str = "
apiVersion: v1
kind: Pod
metadata:
  name: web-0
spec:
  containers:
  - name: web
    image: nginx:1.0
    resources:
      limits:
        cpu: \"2\"
        memory: 1Gi
status:
  containerStatuses:
  - name: web
    image: nginx:1.0
    imageID: sha256:aaa
    ready: true
    restartCount: 0
    resources:
      limits:
        cpu: 1000m
        memory: 1Gi
";

#[test]
pub fn test_unapplied_resize_is_pending() {
    println!("Testing check_update_completed() after a resize...");
    let state = InPlaceUpdateState {
        revision: "web-2".to_string(),
        update_resources: true,
        ..InPlaceUpdateState::default()
    };
    let pending = with_state(pod(RESIZED_POD), &state);
    assert_eq!(
        updater(all_gates()).check_update_completed(&pending).unwrap(),
        UpdateProgress::Pending(PendingReason::ResourcesNotApplied("web".to_string()))
    );

    let applied = with_state(pod(&RESIZED_POD.replace("cpu: 1000m", "cpu: 2000m")), &state);
    assert_eq!(updater(all_gates()).check_update_completed(&applied).unwrap(), UpdateProgress::Completed);
}

#[test]
pub fn test_resize_ignored_when_vertical_scaling_disabled() {
    let state = InPlaceUpdateState { update_resources: true, ..InPlaceUpdateState::default() };
    let pod = with_state(pod(RESIZED_POD), &state);
    assert_eq!(
        updater(FeatureGates::default()).check_update_completed(&pod).unwrap(),
        UpdateProgress::Completed
    );
}

#[test]
pub fn test_corrupted_state_is_an_error() {
    let mut pod = pod(UPDATED_POD);
    pod.annotations_mut().insert(IN_PLACE_UPDATE_STATE_KEY.to_string(), "{not json".to_string());
    assert!(updater(FeatureGates::default()).check_update_completed(&pod).is_err());
}

#[test]
pub fn test_state_annotation_schema() {
    let schema = serde_json::to_value(schemars::schema_for!(InPlaceUpdateState)).unwrap();
    let properties = schema["properties"].as_object().unwrap();
    assert!(properties.contains_key("lastContainerStatuses"));
    assert!(properties.contains_key("containerBatchesRecord"));
    assert!(properties.contains_key("preCheckBeforeNext"));
}

#[test]
pub fn test_runtime_meta_decoded_after_earlier_checks() {
    let updater = updater(FeatureGates::default());
    let malformed = |mut pod: Pod| {
        pod.annotations_mut().insert(RUNTIME_CONTAINER_META_KEY.to_string(), "not-json".to_string());
        pod
    };

    let mut in_grace = malformed(with_state(pod(UPDATED_POD), &image_state()));
    in_grace.annotations_mut().insert(IN_PLACE_UPDATE_GRACE_KEY.to_string(), "{}".to_string());
    assert_eq!(
        updater.check_update_completed(&in_grace).unwrap(),
        UpdateProgress::Pending(PendingReason::InGracePeriod)
    );

    let stateless = malformed(pod(UPDATED_POD));
    assert_eq!(updater.check_update_completed(&stateless).unwrap(), UpdateProgress::Completed);

    let mut batched = image_state();
    batched.next_container_images.insert("sidecar".to_string(), "envoy:2.0".to_string());
    let batched = malformed(with_state(pod(UPDATED_POD), &batched));
    assert_eq!(
        updater.check_update_completed(&batched).unwrap(),
        UpdateProgress::Pending(PendingReason::NextBatchesRemaining)
    );

    let settled = malformed(with_state(pod(UPDATED_POD), &image_state()));
    assert!(updater.check_update_completed(&settled).is_err());
}
