// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::container::env_from_metadata;
use k8s_openapi::api::core::v1::{Container, Pod};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The ways a container spec is hashed for comparison with the node agent's report.
///
/// Agents on older nodes report hashes of the whole container spec, newer ones hash only
/// the identity fields. Both are accepted, tried in [`ContainerHashAlgorithm::FALLBACK_ORDER`].
///
/// The hash function is this crate's contract with the node agent: the first 8 bytes of a
/// SHA-256 digest over the JSON encoding, read as a big-endian `u64`. Agents reporting
/// kubelet-style FNV hashes never match, and completion falls back to comparing image ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerHashAlgorithm {
    /// Name and image only.
    Current,
    /// The full serialized container spec.
    Legacy,
}

impl ContainerHashAlgorithm {
    pub const FALLBACK_ORDER: [ContainerHashAlgorithm; 2] =
        [ContainerHashAlgorithm::Current, ContainerHashAlgorithm::Legacy];

    pub fn hash(self, container: &Container) -> u64 {
        match self {
            ContainerHashAlgorithm::Current => {
                let picked = BTreeMap::from([
                    ("image", container.image.clone().unwrap_or_default()),
                    ("name", container.name.clone()),
                ]);
                hash_json(&picked)
            }
            ContainerHashAlgorithm::Legacy => hash_json(container),
        }
    }

    /// The first algorithm, in fallback order, whose hash of the container equals `reported`.
    pub fn matching(container: &Container, reported: u64) -> Option<ContainerHashAlgorithm> {
        Self::FALLBACK_ORDER
            .into_iter()
            .find(|algorithm| algorithm.hash(container) == reported)
    }
}

/// Hash over the env vars the container sources from the pod's labels and annotations,
/// resolved against the live pod metadata.
pub fn env_from_metadata_hash(container: &Container, pod: &Pod) -> u64 {
    hash_json(&env_from_metadata(container, &pod.metadata))
}

fn hash_json<T: Serialize + ?Sized>(value: &T) -> u64 {
    // Serializing k8s-openapi types and string maps into JSON does not fail.
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
