// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Env var carrying the launch priority of a container. Higher values launch, and update, first.
pub const CONTAINER_PRIORITY_ENV: &str = "KRUISE_CONTAINER_PRIORITY";

/// The pod metadata maps a container can reference through the downward API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataField {
    Labels,
    Annotations,
}

impl MetadataField {
    pub fn field_path(self) -> &'static str {
        match self {
            MetadataField::Labels => "metadata.labels",
            MetadataField::Annotations => "metadata.annotations",
        }
    }

    /// Maps the segment following `/metadata/` in a patch path.
    pub fn from_path_segment(segment: &str) -> Option<MetadataField> {
        match segment {
            "labels" => Some(MetadataField::Labels),
            "annotations" => Some(MetadataField::Annotations),
            _ => None,
        }
    }

    pub fn values(self, meta: &ObjectMeta) -> Option<&BTreeMap<String, String>> {
        match self {
            MetadataField::Labels => meta.labels.as_ref(),
            MetadataField::Annotations => meta.annotations.as_ref(),
        }
    }

    pub fn values_mut(self, meta: &mut ObjectMeta) -> &mut BTreeMap<String, String> {
        match self {
            MetadataField::Labels => meta.labels.get_or_insert_with(BTreeMap::new),
            MetadataField::Annotations => meta.annotations.get_or_insert_with(BTreeMap::new),
        }
    }
}

/// Launch priority declared by the container, if any.
/// A value that does not parse as an integer counts as no priority.
pub fn container_priority(container: &Container) -> Option<i32> {
    container
        .env
        .as_ref()?
        .iter()
        .find(|env| env.name == CONTAINER_PRIORITY_ENV)
        .and_then(|env| env.value.as_deref())
        .and_then(|value| value.trim().parse::<i32>().ok())
}

/// Splits a downward API field path like `metadata.labels['app']` into its field and key.
pub fn parse_metadata_field_path(field_path: &str) -> Option<(MetadataField, &str)> {
    [MetadataField::Labels, MetadataField::Annotations]
        .into_iter()
        .find_map(|field| {
            let key = field_path
                .strip_prefix(field.field_path())?
                .strip_prefix("['")?
                .strip_suffix("']")?;
            Some((field, key))
        })
}

/// Env vars of the container sourced from pod metadata, as (env name, field, key).
pub fn metadata_env_refs(container: &Container) -> impl Iterator<Item = (&str, MetadataField, &str)> {
    container.env.iter().flatten().filter_map(|env| {
        let field_path = env.value_from.as_ref()?.field_ref.as_ref()?.field_path.as_str();
        let (field, key) = parse_metadata_field_path(field_path)?;
        Some((env.name.as_str(), field, key))
    })
}

/// Whether the container exposes the given label or annotation key through an env var.
pub fn is_container_reference_to_meta(container: &Container, field: MetadataField, key: &str) -> bool {
    metadata_env_refs(container).any(|(_, f, k)| f == field && k == key)
}

/// Resolves every metadata-sourced env var of the container against the given pod metadata.
/// Keys missing from the metadata resolve to the empty string, as the kubelet does.
pub fn env_from_metadata(container: &Container, meta: &ObjectMeta) -> BTreeMap<String, String> {
    metadata_env_refs(container)
        .map(|(name, field, key)| {
            let value = field
                .values(meta)
                .and_then(|values| values.get(key))
                .cloned()
                .unwrap_or_default();
            (name.to_string(), value)
        })
        .collect()
}

/// The declared image, with an implicit `latest` tag made explicit for bare references.
pub fn normalized_image(image: &str) -> String {
    if image.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}
