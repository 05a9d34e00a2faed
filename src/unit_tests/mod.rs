pub mod quantity;
pub mod verifier;

use crate::clock::FixedClock;
use crate::feature_gates::FeatureGates;
use crate::inplace_update::InPlaceUpdater;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use serde_json::json;

pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn updater(gates: FeatureGates) -> InPlaceUpdater {
    InPlaceUpdater::new(gates).with_clock(FixedClock(now()))
}

pub fn all_gates() -> FeatureGates {
    FeatureGates {
        in_place_workload_vertical_scaling: true,
        recreate_pod_when_change_vct_in_clone_set_gate: true,
        in_place_update_env_from_metadata: true,
    }
}

/// Builds a revision whose payload embeds the pod template written as YAML.
pub fn revision(name: &str, template_yaml: &str) -> ControllerRevision {
    let template: serde_json::Value = serde_yaml::from_str(template_yaml).unwrap();
    ControllerRevision {
        metadata: ObjectMeta { name: Some(name.to_string()), ..ObjectMeta::default() },
        data: Some(RawExtension(json!({ "spec": { "template": template } }))),
        revision: 1,
    }
}

pub fn pod(yaml: &str) -> Pod {
    serde_yaml::from_str(yaml).unwrap()
}
