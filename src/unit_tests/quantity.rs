// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::quantity::*;
use crate::kubernetes_api_objects::resource_requirements::*;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

fn q(value: &str) -> Quantity {
    Quantity(value.to_string())
}

#[test]
pub fn test_parse_milli() {
    println!("Testing parse_milli()...");
    assert_eq!(parse_milli(&q("500m")).unwrap(), 500);
    assert_eq!(parse_milli(&q("2")).unwrap(), 2000);
    assert_eq!(parse_milli(&q("0.5")).unwrap(), 500);
    assert_eq!(parse_milli(&q("1Ki")).unwrap(), 1_024_000);
    assert_eq!(parse_milli(&q("1Gi")).unwrap(), 1_073_741_824_000);
    assert_eq!(parse_milli(&q("1k")).unwrap(), 1_000_000);
    assert_eq!(parse_milli(&q("1e3")).unwrap(), 1_000_000);
    assert_eq!(parse_milli(&q("5E-1")).unwrap(), 500);
    assert_eq!(parse_milli(&q("-250m")).unwrap(), -250);
    // Sub-milli precision rounds up.
    assert_eq!(parse_milli(&q("1u")).unwrap(), 1);
    assert_eq!(parse_milli(&q("100n")).unwrap(), 1);
}

#[test]
pub fn test_parse_milli_rejects_garbage() {
    for raw in ["", "m", "1.2.3", "1Xi", "abc", "1e", "."] {
        assert!(parse_milli(&q(raw)).is_err(), "{} should not parse", raw);
    }
}

#[test]
pub fn test_quantity_eq() {
    assert!(quantity_eq(&q("1"), &q("1000m")));
    assert!(quantity_eq(&q("1Gi"), &q("1024Mi")));
    assert!(!quantity_eq(&q("1G"), &q("1Gi")));
    assert!(quantity_eq(&q("bogus"), &q("bogus")));
}

fn spec(yaml: &str) -> PodSpec {
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
pub fn test_qos_class() {
    println!("Testing qos_class()...");
    assert_eq!(qos_class(&spec("containers:\n- name: a\n")), QosClass::BestEffort);
    assert_eq!(
        qos_class(&spec("
containers:
- name: a
  resources:
    limits:
      cpu: \"1\"
      memory: 1Gi
")),
        QosClass::Guaranteed
    );
    assert_eq!(
        qos_class(&spec("
containers:
- name: a
  resources:
    requests:
      cpu: 500m
      memory: 1Gi
    limits:
      cpu: \"1\"
      memory: 1Gi
")),
        QosClass::Burstable
    );
    assert_eq!(
        qos_class(&spec("
containers:
- name: a
  resources:
    limits:
      cpu: \"1\"
      memory: 1Gi
- name: b
")),
        QosClass::Burstable
    );
}

#[test]
pub fn test_resource_list_satisfied() {
    let expected = std::collections::BTreeMap::from([
        ("cpu".to_string(), q("1")),
        ("ephemeral-storage".to_string(), q("1Gi")),
    ]);
    let actual = std::collections::BTreeMap::from([("cpu".to_string(), q("1000m"))]);
    assert!(resource_list_satisfied(Some(&expected), Some(&actual)));
    assert!(!resource_list_satisfied(Some(&expected), None));
    assert!(resource_list_satisfied(None, None));
}
