// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const IN_PLACE_WORKLOAD_VERTICAL_SCALING: &str = "InPlaceWorkloadVerticalScaling";
pub const RECREATE_POD_WHEN_CHANGE_VCT_IN_CLONE_SET_GATE: &str =
    "RecreatePodWhenChangeVCTInCloneSetGate";
pub const IN_PLACE_UPDATE_ENV_FROM_METADATA: &str = "InPlaceUpdateEnvFromMetadata";

/// Feature toggles consulted by the in-place update core.
///
/// The gates are passed explicitly by the caller; nothing here is read from process-wide state.
/// They can be deserialized from a config document or parsed from the usual
/// `--feature-gates` syntax, e.g. `InPlaceWorkloadVerticalScaling=true,InPlaceUpdateEnvFromMetadata=false`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureGates {
    pub in_place_workload_vertical_scaling: bool,
    pub recreate_pod_when_change_vct_in_clone_set_gate: bool,
    pub in_place_update_env_from_metadata: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        FeatureGates {
            in_place_workload_vertical_scaling: false,
            recreate_pod_when_change_vct_in_clone_set_gate: false,
            in_place_update_env_from_metadata: true,
        }
    }
}

impl FeatureGates {
    pub fn set(&mut self, name: &str, enabled: bool) -> Result<(), Error> {
        match name {
            IN_PLACE_WORKLOAD_VERTICAL_SCALING => self.in_place_workload_vertical_scaling = enabled,
            RECREATE_POD_WHEN_CHANGE_VCT_IN_CLONE_SET_GATE => {
                self.recreate_pod_when_change_vct_in_clone_set_gate = enabled
            }
            IN_PLACE_UPDATE_ENV_FROM_METADATA => self.in_place_update_env_from_metadata = enabled,
            _ => return Err(Error::InvalidFeatureGate(format!("unrecognized feature gate: {}", name))),
        }
        Ok(())
    }
}

impl FromStr for FeatureGates {
    type Err = Error;

    /// Parses `Name=bool` pairs separated by commas on top of the defaults.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut gates = FeatureGates::default();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidFeatureGate(format!("missing bool value for {}", pair)))?;
            let enabled = value.trim().parse::<bool>().map_err(|_| {
                Error::InvalidFeatureGate(format!("invalid value of {}: {}", name.trim(), value.trim()))
            })?;
            gates.set(name.trim(), enabled)?;
        }
        Ok(gates)
    }
}
