// Copyright 2025 Qubership Monitoring Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::types::v1alpha1::k8s::{Ingress, Monitor};
use k8s_openapi::api::core::v1 as corev1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_GRAFANA_IMAGE: &str = "grafana/grafana:10.4.3";
pub const DEFAULT_GRAFANA_OPERATOR_IMAGE: &str =
    "quay.io/grafana-operator/grafana-operator:v4.10.1";
pub const DEFAULT_GRAFANA_PLUGINS_INIT_IMAGE: &str =
    "quay.io/grafana-operator/grafana_plugins_init:0.1.0";

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Grafana {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<bool>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    /// Extra `grafana.ini` sections, rendered into the Grafana CR config.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Ingress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_monitor: Option<Monitor>,

    #[serde(default)]
    pub operator: GrafanaOperator,
}

impl Grafana {
    pub fn is_install(&self) -> bool {
        self.install.unwrap_or(true)
    }
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrafanaOperator {
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub init_container_image: String,

    #[serde(default)]
    pub paused: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_monitor: Option<Monitor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}
