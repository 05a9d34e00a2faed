// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Helpers over the `k8s-openapi` object types the in-place update core reads and mutates.
pub mod container;
pub mod controller_revision;
pub mod pod;
pub mod quantity;
pub mod resource_requirements;
