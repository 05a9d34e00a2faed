// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::quantity::{parse_milli, quantity_eq};
use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";

/// Restart policy value of a container resize policy that forces a container restart.
pub const RESTART_CONTAINER: &str = "RestartContainer";

/// QoS class of a pod, derived from the cpu and memory requests and limits of its containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
}

/// Computes the QoS class the apiserver would assign to a pod with this spec.
///
/// Requests missing next to a limit default to the limit, mirroring apiserver defaulting,
/// so templates compare the same way the admitted pods would.
pub fn qos_class(spec: &PodSpec) -> QosClass {
    let mut requests: BTreeMap<&str, i128> = BTreeMap::new();
    let mut limits: BTreeMap<&str, i128> = BTreeMap::new();
    let mut guaranteed = true;

    let all_containers = spec.init_containers.iter().flatten().chain(spec.containers.iter());
    for container in all_containers {
        let resources = container.resources.as_ref();
        let container_limits = resources.and_then(|r| r.limits.as_ref());
        let container_requests = resources.and_then(|r| r.requests.as_ref());
        let mut limited = 0;
        for name in [RESOURCE_CPU, RESOURCE_MEMORY] {
            let limit = container_limits.and_then(|l| l.get(name)).and_then(non_zero_milli);
            let request = container_requests
                .and_then(|r| r.get(name))
                .and_then(non_zero_milli)
                .or(limit);
            if let Some(limit) = limit {
                *limits.entry(name).or_default() += limit;
                limited += 1;
            }
            if let Some(request) = request {
                *requests.entry(name).or_default() += request;
                if Some(request) != limit {
                    guaranteed = false;
                }
            }
        }
        if limited != 2 {
            guaranteed = false;
        }
    }

    if requests.is_empty() && limits.is_empty() {
        QosClass::BestEffort
    } else if guaranteed && requests == limits {
        QosClass::Guaranteed
    } else {
        QosClass::Burstable
    }
}

fn non_zero_milli(quantity: &Quantity) -> Option<i128> {
    parse_milli(quantity).ok().filter(|v| *v != 0)
}

/// Which of cpu and memory a pending resource change touches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TouchedResources {
    pub cpu: bool,
    pub memory: bool,
}

impl TouchedResources {
    pub fn of(resources: &ResourceRequirements) -> TouchedResources {
        let has = |name: &str| {
            resources.limits.as_ref().map_or(false, |l| l.contains_key(name))
                || resources.requests.as_ref().map_or(false, |r| r.contains_key(name))
        };
        TouchedResources { cpu: has(RESOURCE_CPU), memory: has(RESOURCE_MEMORY) }
    }

    pub fn contains(&self, resource_name: &str) -> bool {
        match resource_name {
            RESOURCE_CPU => self.cpu,
            RESOURCE_MEMORY => self.memory,
            _ => false,
        }
    }
}

/// Whether resizing a touched resource of this container requires restarting it.
pub fn resize_requires_restart(container: &Container, touched: TouchedResources) -> bool {
    container.resize_policy.iter().flatten().any(|policy| {
        policy.restart_policy == RESTART_CONTAINER && touched.contains(&policy.resource_name)
    })
}

/// Whether the cpu and memory quantities declared in `expected` are present with the same
/// value in `actual`. Other resources cannot be resized in place and are not compared.
pub fn resource_list_satisfied(
    expected: Option<&BTreeMap<String, Quantity>>,
    actual: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    expected
        .into_iter()
        .flatten()
        .filter(|(name, _)| *name == RESOURCE_CPU || *name == RESOURCE_MEMORY)
        .all(|(name, quantity)| {
            actual.and_then(|a| a.get(name)).map_or(false, |q| quantity_eq(quantity, q))
        })
}
