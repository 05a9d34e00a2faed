// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::types::{ContainerRefMetadata, UpdateSpec};
use super::{InPlaceUpdater, UpdateOptions};
use crate::kubernetes_api_objects::container::{is_container_reference_to_meta, MetadataField};
use crate::kubernetes_api_objects::controller_revision::{
    revision_data, template_from_revision, volume_claim_templates_compatible, TEMPLATE_POINTER,
};
use crate::patch::{unescape_pointer_token, PatchKind, PatchOperation};
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

/// Where a classified patch operation points inside the pod shape.
enum PodPath {
    ContainerImage(usize),
    ContainerResources,
    Metadata,
    OtherSpec,
    Outside,
}

fn classify_path(path: &str) -> PodPath {
    if path.starts_with("/metadata/") {
        return PodPath::Metadata;
    }
    let Some(spec_path) = path.strip_prefix("/spec/") else {
        return PodPath::Outside;
    };
    let words: Vec<&str> = spec_path.split('/').collect();
    match words.as_slice() {
        ["containers", index, "image"] => match index.parse::<usize>() {
            Ok(index) => PodPath::ContainerImage(index),
            Err(_) => PodPath::OtherSpec,
        },
        ["containers", index, "resources", _, ..] if index.parse::<usize>().is_ok() => {
            PodPath::ContainerResources
        }
        _ => PodPath::OtherSpec,
    }
}

/// Strips the template prefix so paths are relative to the pod shape.
fn pod_relative_path(path: &str) -> String {
    match path.strip_prefix(TEMPLATE_POINTER) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

impl InPlaceUpdater {
    /// Calculates the in-place update spec between two revisions.
    ///
    /// Returns `None` whenever any part of the diff cannot be applied in place, in which case
    /// the caller has to recreate the pod. Only image replacements, cpu/memory replacements
    /// (with vertical scaling enabled) and metadata changes qualify.
    pub fn calculate_update_spec(
        &self,
        old_revision: &ControllerRevision,
        new_revision: &ControllerRevision,
        opts: &UpdateOptions,
    ) -> Option<UpdateSpec> {
        let (old_data, new_data) = match (revision_data(old_revision), revision_data(new_revision)) {
            (Ok(old_data), Ok(new_data)) => (old_data, new_data),
            (Err(e), _) | (_, Err(e)) => {
                debug!("Revision payload unavailable: {}", e);
                return None;
            }
        };

        if self.gates.recreate_pod_when_change_vct_in_clone_set_gate
            && !opts.ignore_volume_claim_templates_hash_diff
            && !volume_claim_templates_compatible(old_revision, new_revision)
        {
            info!(
                "Volume claim templates changed from {} to {}, can not update in place",
                old_revision.name_any(),
                new_revision.name_any()
            );
            return None;
        }

        let (mut old_template, mut new_template) =
            match (template_from_revision(old_revision), template_from_revision(new_revision)) {
                (Ok(old_template), Ok(new_template)) => (old_template, new_template),
                (Err(e), _) | (_, Err(e)) => {
                    debug!("Failed to decode pod template: {}", e);
                    return None;
                }
            };

        let patches = match self.patch_engine.create_patch(old_data, new_data) {
            Ok(patches) => patches,
            Err(e) => {
                info!("Failed to diff revisions: {}", e);
                return None;
            }
        };

        let mut spec = UpdateSpec {
            revision: match opts.revision_override {
                Some(revision_of) => revision_of(new_revision),
                None => new_revision.name_any(),
            },
            grace_seconds: opts.grace_period_seconds,
            ..UpdateSpec::default()
        };

        let mut metadata_patches: Vec<PatchOperation> = Vec::new();
        for mut op in patches {
            op.path = pod_relative_path(&op.path);
            match classify_path(&op.path) {
                PodPath::Metadata => {
                    metadata_patches.push(op);
                    continue;
                }
                PodPath::Outside => {
                    debug!("Change outside of pod spec at {:?}, can not update in place", op.path);
                    return None;
                }
                _ if op.kind != PatchKind::Replace => {
                    debug!("Non-replace operation on {}, can not update in place", op.path);
                    return None;
                }
                PodPath::ContainerImage(index) => {
                    let name = old_template.spec.as_ref()?.containers.get(index)?.name.clone();
                    let image = op.value_str()?.to_string();
                    spec.container_images.insert(name, image);
                }
                PodPath::ContainerResources if self.gates.in_place_workload_vertical_scaling => {
                    if let Err(e) = self.vertical_update.update_inplace_update_metadata(&op, &old_template, &mut spec) {
                        info!("UpdateInplaceUpdateMetadata error: {}", e);
                        return None;
                    }
                }
                _ => {
                    debug!("Unsupported change at {}, can not update in place", op.path);
                    return None;
                }
            }
        }

        if self.gates.in_place_workload_vertical_scaling
            && !spec.container_resources.is_empty()
            && self.vertical_update.is_pod_qos_changed(&old_template, &new_template)
        {
            info!("Can not update in place when qos changed");
            return None;
        }

        if !metadata_patches.is_empty() {
            if self.gates.in_place_update_env_from_metadata {
                consume_env_from_metadata(&metadata_patches, &mut old_template, &mut new_template, &mut spec);
            }
            let old_meta = json!({ "metadata": old_template.metadata });
            let new_meta = json!({ "metadata": new_template.metadata });
            spec.metadata_patch = match self.patch_engine.create_merge_patch(&old_meta, &new_meta) {
                Ok(patch) => patch.map(|p| p.to_string().into_bytes()),
                Err(e) => {
                    info!("Failed to create metadata patch: {}", e);
                    return None;
                }
            };
        }

        Some(spec)
    }
}

/// Moves label and annotation changes that containers read through env vars into the
/// per-container overrides, removing the consumed keys from both templates.
fn consume_env_from_metadata(
    metadata_patches: &[PatchOperation],
    old_template: &mut PodTemplateSpec,
    new_template: &mut PodTemplateSpec,
    spec: &mut UpdateSpec,
) {
    for op in metadata_patches {
        if op.kind != PatchKind::Replace && op.kind != PatchKind::Add {
            continue;
        }
        // /metadata/<labels|annotations>/<key>
        let words: Vec<&str> = op.path.splitn(4, '/').collect();
        let [_, _, segment, escaped_key] = words.as_slice() else {
            continue;
        };
        let Some(field) = MetadataField::from_path_segment(segment) else {
            continue;
        };
        let Some(value) = op.value_str() else {
            continue;
        };
        let key = unescape_pointer_token(escaped_key);

        let mut consumed = false;
        let containers = new_template.spec.iter().flat_map(|s| s.containers.iter());
        for container in containers {
            if !is_container_reference_to_meta(container, field, &key) {
                continue;
            }
            let overrides = spec
                .container_ref_metadata
                .entry(container.name.clone())
                .or_insert_with(ContainerRefMetadata::default);
            match field {
                MetadataField::Labels => overrides.labels.insert(key.clone(), value.to_string()),
                MetadataField::Annotations => overrides.annotations.insert(key.clone(), value.to_string()),
            };
            spec.update_env_from_metadata = true;
            consumed = true;
        }
        if consumed {
            for template in [&mut *old_template, &mut *new_template] {
                if let Some(meta) = template.metadata.as_mut() {
                    field.values_mut(meta).remove(&key);
                }
            }
        }
    }
}
