// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::Error;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use serde_json::Value;

/// Revision annotation carrying the hash of the workload's volume claim templates.
pub const VOLUME_CLAIM_TEMPLATES_HASH_KEY: &str = "apps.kruise.io/volume-claim-templates-hash";

/// Pointer of the pod template inside a revision payload.
pub const TEMPLATE_POINTER: &str = "/spec/template";
const VOLUME_CLAIM_TEMPLATES_POINTER: &str = "/spec/volumeClaimTemplates";

/// Raw payload of the revision.
pub fn revision_data(revision: &ControllerRevision) -> Result<&Value, Error> {
    revision
        .data
        .as_ref()
        .map(|raw| &raw.0)
        .ok_or(Error::MissingObjectKey(".data"))
}

/// Decodes the pod template stored in the revision.
pub fn template_from_revision(revision: &ControllerRevision) -> Result<PodTemplateSpec, Error> {
    let template = revision_data(revision)?
        .pointer(TEMPLATE_POINTER)
        .ok_or(Error::MissingObjectKey(".data.spec.template"))?;
    serde_json::from_value(template.clone())
        .map_err(|e| Error::RevisionDecodeFailed(revision.name_any(), e))
}

/// Whether moving between the two revisions leaves the volume claim templates untouched.
///
/// The hash annotations decide when both revisions carry one; otherwise the embedded
/// templates are compared when both payloads have them. A side with neither is compatible.
pub fn volume_claim_templates_compatible(old: &ControllerRevision, new: &ControllerRevision) -> bool {
    let old_hash = old.annotations().get(VOLUME_CLAIM_TEMPLATES_HASH_KEY);
    let new_hash = new.annotations().get(VOLUME_CLAIM_TEMPLATES_HASH_KEY);
    if let (Some(old_hash), Some(new_hash)) = (old_hash, new_hash) {
        return old_hash == new_hash;
    }

    let templates = |revision: &ControllerRevision| {
        revision_data(revision)
            .ok()
            .and_then(|data| data.pointer(VOLUME_CLAIM_TEMPLATES_POINTER))
            .cloned()
    };
    match (templates(old), templates(new)) {
        (Some(old_templates), Some(new_templates)) => old_templates == new_templates,
        _ => true,
    }
}
